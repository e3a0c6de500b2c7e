//! C7 `BlockManager`: the orchestrator that owns C1-C6 behind a single
//! namespace-global lock and exposes the operations the namespace layer
//! calls into.
//!
//! In a full deployment this lock is owned by the namespace tree and
//! threaded through every call that touches block metadata, since the
//! same lock also guards the file/directory hierarchy. That layer is
//! out of scope here, so `BlockManager` owns the lock
//! directly; callers get the same multi-reader/single-writer semantics
//! without needing a namespace of their own.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use blockmaster_util::config::Config;
use blockmaster_util::error::{Error, Result};

use crate::block_info::BlockInfo;
use crate::blocks_map::{BlocksMap, BlocksMapCapacity};
use crate::corrupt_replicas::CorruptReplicas;
use crate::excess_replicas::ExcessReplicas;
use crate::ids::{Block, BlockId, CorruptReason, GenStamp, NodeId, ReplicaState, StorageId};
use crate::iface::{BlockPlacementPolicy, BlockTokenIssuer, DatanodeManager, NodeClass, PlacementCandidate, RackId};
use crate::invalidate_blocks::InvalidateBlocks;
use crate::metasave::MetaSaveReport;
use crate::pending_replications::PendingReplications;
use crate::report::{
	classify_replica, diff_first_report, diff_full_report, Classification, IncrementalEvent,
	IncrementalOp, ReportedReplica,
};
use crate::under_replicated::{Priority, UnderReplicatedBlocks};

/// Everything guarded by the namespace-global lock: C1 through C6.
struct Inner {
	blocks: BlocksMap,
	corrupt: CorruptReplicas,
	invalidate: InvalidateBlocks,
	excess: ExcessReplicas,
	under_replicated: UnderReplicatedBlocks,
	pending: PendingReplications,
}

/// Outcome of processing one storage's block report: what the caller
/// (the RPC layer fielding the datanode's report) should act on
/// outside the lock.
#[derive(Debug, Default)]
pub struct ReportOutcome {
	pub newly_corrupt: Vec<(BlockId, CorruptReason)>,
	pub queued_for_deletion: Vec<BlockId>,
}

/// A block's current replica placement as returned to a client reading
/// a file: live replicas first, corrupt replicas
/// appended at the end.
#[derive(Debug, Clone)]
pub struct LocatedBlock {
	pub block: Block,
	pub storages: Vec<StorageId>,
	pub corrupt: bool,
	pub is_under_construction: bool,
	pub token: Option<Vec<u8>>,
}

pub struct BlockManager {
	inner: RwLock<Inner>,
	config: Config,
	datanodes: Arc<dyn DatanodeManager>,
	placement: Arc<dyn BlockPlacementPolicy>,
	token_issuer: Option<Arc<dyn BlockTokenIssuer>>,
}

impl BlockManager {
	pub fn new(
		config: Config,
		datanodes: Arc<dyn DatanodeManager>,
		placement: Arc<dyn BlockPlacementPolicy>,
		token_issuer: Option<Arc<dyn BlockTokenIssuer>>,
	) -> Self {
		let invalidate = InvalidateBlocks::new(config.startup_delay_block_deletion_secs * 1000);
		BlockManager {
			inner: RwLock::new(Inner {
				blocks: BlocksMap::with_capacity(BlocksMapCapacity::default()),
				corrupt: CorruptReplicas::default(),
				invalidate,
				excess: ExcessReplicas::default(),
				under_replicated: UnderReplicatedBlocks::default(),
				pending: PendingReplications::default(),
			}),
			config,
			datanodes,
			placement,
			token_issuer,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	// ---- block lifecycle ----

	/// Register a newly allocated block, `UnderConstruction`, owned by
	/// `owner_file`.
	pub fn add_block_under_construction(
		&self,
		id: BlockId,
		owner_file: u64,
		generation_stamp: GenStamp,
		expected_locations: Vec<StorageId>,
	) -> Result<()> {
		let mut inner = self.inner.write().unwrap();
		inner
			.blocks
			.insert(BlockInfo::new_under_construction(id, owner_file, generation_stamp, expected_locations))
	}

	/// Client "commit last block": `UnderConstruction -> Committed`,
	/// then immediately attempt `Committed -> Complete` against the
	/// live replica count observed so far.
	pub fn commit_or_complete_last_block(
		&self,
		id: BlockId,
		reported_len: u64,
		reported_gen_stamp: GenStamp,
		target_replication: u16,
	) -> Result<bool> {
		let mut inner = self.inner.write().unwrap();
		let live = self.count_live(&inner, id);
		let block = inner
			.blocks
			.get_mut(id)
			.ok_or_else(|| Error::Invariant(format!("commit on unknown block {id:?}")))?;
		block
			.commit(reported_len, reported_gen_stamp)
			.map_err(|e| Error::Invariant(e.into()))?;
		let completed = block.complete(false, live, self.config.replication_min);
		self.recompute_priority_locked(&mut inner, id, target_replication);
		self.recompute_excess_locked(&mut inner, id, target_replication);
		Ok(completed)
	}

	/// `convertLastBlockToUnderConstruction`: the sole path by which a
	/// `Complete` block may return to `UnderConstruction`, used when a
	/// client reopens a file for append.
	pub fn convert_last_block_to_under_construction(
		&self,
		id: BlockId,
		expected_locations: Vec<StorageId>,
	) -> Result<()> {
		let mut inner = self.inner.write().unwrap();
		let block = inner
			.blocks
			.get_mut(id)
			.ok_or_else(|| Error::Invariant(format!("reopen of unknown block {id:?}")))?;
		block
			.reopen_for_append(expected_locations)
			.map_err(|e| Error::Invariant(e.into()))?;
		inner.under_replicated.remove(id);
		Ok(())
	}

	// ---- placement (consulted outside the lock) ----

	pub async fn choose_target_for_new_block(
		&self,
		num_replicas: usize,
		excluded: &[NodeId],
	) -> Result<Vec<StorageId>> {
		let targets = self.placement.choose_targets(num_replicas, excluded).await;
		if targets.len() < self.config.replication_min as usize {
			return Err(Error::InvalidReplication(format!(
				"placement policy returned {} targets, below replication_min {}",
				targets.len(),
				self.config.replication_min
			)));
		}
		Ok(targets)
	}

	pub async fn choose_target_for_additional_datanode(
		&self,
		id: BlockId,
		num_additional: usize,
	) -> Result<Vec<StorageId>> {
		let excluded: Vec<NodeId> = {
			let inner = self.inner.read().unwrap();
			let block = inner
				.blocks
				.get(id)
				.ok_or_else(|| Error::Invariant(format!("unknown block {id:?}")))?;
			block.nodes().collect()
		};
		Ok(self.placement.choose_targets(num_additional, &excluded).await)
	}

	// ---- replication factor changes ----

	/// Re-evaluate one block's under-replication bucket against a new
	/// target replication factor, e.g. after `setReplication` changes
	/// the owning file's declared replication.
	pub fn set_replication(&self, id: BlockId, target_replication: u16) -> Result<()> {
		let mut inner = self.inner.write().unwrap();
		if !inner.blocks.contains(id) {
			return Err(Error::Invariant(format!("setReplication on unknown block {id:?}")));
		}
		self.recompute_priority_locked(&mut inner, id, target_replication);
		self.recompute_excess_locked(&mut inner, id, target_replication);
		Ok(())
	}

	// ---- block reports ----

	/// Process a full block report from one storage. `target_replication`
	/// supplies the owning file's declared replication factor per
	/// reported block, since that is namespace state this core does
	/// not itself retain.
	pub fn process_report(
		&self,
		storage: StorageId,
		reported: &[ReportedReplica],
		first_report: bool,
		target_replication: impl Fn(BlockId) -> u16,
	) -> ReportOutcome {
		let mut inner = self.inner.write().unwrap();
		let diff = if first_report {
			diff_first_report(&inner.blocks, storage, reported)
		} else {
			diff_full_report(&inner.blocks, storage, reported)
		};

		let mut outcome = ReportOutcome::default();

		for id in diff.to_add {
			let _ = inner.blocks.add_storage(id, storage);
			let target = target_replication(id);
			self.recompute_priority_locked(&mut inner, id, target);
			self.recompute_excess_locked(&mut inner, id, target);
			self.maybe_invalidate_corrupt_locked(&mut inner, id, target);
		}

		for id in diff.to_remove {
			inner.blocks.remove_storage(id, storage);
			self.recompute_priority_locked(&mut inner, id, target_replication(id));
		}

		for id in diff.to_invalidate {
			inner.invalidate.add(id, storage.node(), blockmaster_util::time::now_msec());
			outcome.queued_for_deletion.push(id);
		}

		for (id, state) in diff.to_uc {
			if let Some(block) = inner.blocks.get_mut(id) {
				if let Some(uc) = block.uc_state_mut() {
					uc.attach_reported(storage, state);
				}
			}
		}

		for (id, reason, reported_gen_stamp) in diff.to_corrupt {
			self.mark_corrupt_locked(&mut inner, id, storage, reason, reported_gen_stamp, &target_replication);
			outcome.newly_corrupt.push((id, reason));
		}

		outcome
	}

	/// Process incremental block report events:
	/// RECEIVING attaches to a UC pipeline, RECEIVED promotes to a live
	/// edge (re-validated against stored metadata), DELETED drops the
	/// edge.
	pub fn process_incremental_report(
		&self,
		events: &[IncrementalEvent],
		target_replication: impl Fn(BlockId) -> u16,
	) -> ReportOutcome {
		let mut inner = self.inner.write().unwrap();
		let mut outcome = ReportOutcome::default();

		for ev in events {
			match ev.op {
				IncrementalOp::Receiving => {
					if let Some(block) = inner.blocks.get_mut(ev.block.id) {
						if let Some(uc) = block.uc_state_mut() {
							uc.attach_reported(ev.storage, ReplicaState::ReceivingBeingWritten);
						}
					}
				}
				IncrementalOp::Received => {
					let target = target_replication(ev.block.id);
					if let Some(block) = inner.blocks.get(ev.block.id) {
						let cls = classify_replica(
							&ReportedReplica {
								block: ev.block,
								state: ReplicaState::Finalized,
							},
							block.generation_stamp,
							block.len,
							&block.state.clone(),
						);
						match cls {
							Classification::ToAdd => {
								let _ = inner.blocks.add_storage(ev.block.id, ev.storage);
								self.recompute_priority_locked(&mut inner, ev.block.id, target);
								self.recompute_excess_locked(&mut inner, ev.block.id, target);
								self.maybe_invalidate_corrupt_locked(&mut inner, ev.block.id, target);
							}
							Classification::ToUc => {
								if let Some(block) = inner.blocks.get_mut(ev.block.id) {
									if let Some(uc) = block.uc_state_mut() {
										uc.attach_reported(ev.storage, ReplicaState::Finalized);
									}
								}
							}
							Classification::Ignore => {}
							Classification::Corrupt(reason) => {
								self.mark_corrupt_locked(
									&mut inner,
									ev.block.id,
									ev.storage,
									reason,
									ev.block.generation_stamp,
									&target_replication,
								);
								outcome.newly_corrupt.push((ev.block.id, reason));
							}
						}
					}
					if let Some(hint) = ev.delete_hint {
						inner.excess.add(hint.node(), ev.block.id);
						inner.invalidate.add(ev.block.id, hint.node(), blockmaster_util::time::now_msec());
					}
				}
				IncrementalOp::Deleted => {
					inner.blocks.remove_storage(ev.block.id, ev.storage);
					inner.excess.remove(ev.storage.node(), ev.block.id);
					inner.corrupt.remove_node(ev.block.id, ev.storage);
					let target = target_replication(ev.block.id);
					self.recompute_priority_locked(&mut inner, ev.block.id, target);
				}
			}
		}

		outcome
	}

	// ---- corruption ----

	pub fn find_and_mark_block_as_corrupt(
		&self,
		id: BlockId,
		storage: StorageId,
		reason: CorruptReason,
		reported_gen_stamp: GenStamp,
		target_replication: u16,
	) -> Result<()> {
		let mut inner = self.inner.write().unwrap();
		if !inner.blocks.contains(id) {
			return Err(Error::Invariant(format!("corrupt report for unknown block {id:?}")));
		}
		self.mark_corrupt_locked(&mut inner, id, storage, reason, reported_gen_stamp, &|_| target_replication);
		Ok(())
	}

	fn mark_corrupt_locked(
		&self,
		inner: &mut Inner,
		id: BlockId,
		storage: StorageId,
		reason: CorruptReason,
		reported_gen_stamp: GenStamp,
		target_replication: &dyn Fn(BlockId) -> u16,
	) {
		inner.corrupt.add(id, storage, reason);
		let target = target_replication(id);
		self.recompute_priority_locked(inner, id, target);

		let live = self.count_live(inner, id);
		let over_replicated = live > target as usize;
		let stale_genstamp = inner
			.blocks
			.get(id)
			.map_or(false, |b| reported_gen_stamp < b.generation_stamp);
		if over_replicated || stale_genstamp {
			// This replica is either surplus already or reports a
			// generation stamp the block has since moved past, so it can
			// never become a valid copy again: no reason to wait for
			// re-replication before dropping it.
			self.invalidate_corrupt_storage_locked(inner, id, storage);
		}

		// Otherwise corruption is recorded immediately, but the replica
		// is only actually queued for deletion once live replicas
		// already meet target: deleting it right away while
		// under-replicated would leave fewer usable copies than
		// necessary until re-replication catches up.
		self.maybe_invalidate_corrupt_locked(inner, id, target);
	}

	/// Queue one corrupt replica for deletion, unless doing so would
	/// leave the block with no copies at all.
	fn invalidate_corrupt_storage_locked(&self, inner: &mut Inner, id: BlockId, storage: StorageId) {
		let total_storages = inner.blocks.get(id).map(|b| b.storage_count()).unwrap_or(0);
		if inner.corrupt.count(id) >= total_storages {
			// Every copy is corrupt; keep the last one around rather
			// than lose the data outright.
			return;
		}
		if !inner.invalidate.contains(id, storage.node()) {
			inner.invalidate.add(id, storage.node(), blockmaster_util::time::now_msec());
		}
	}

	/// Queue any not-yet-queued corrupt replicas of `id` for deletion,
	/// provided live replicas meet `target` and at least one
	/// non-corrupt copy remains.
	fn maybe_invalidate_corrupt_locked(&self, inner: &mut Inner, id: BlockId, target: u16) {
		if inner.corrupt.count(id) == 0 {
			return;
		}
		let live = self.count_live(inner, id);
		if live < target as usize {
			return;
		}
		let corrupt_storages: Vec<StorageId> = inner.corrupt.nodes(id).collect();
		for storage in corrupt_storages {
			self.invalidate_corrupt_storage_locked(inner, id, storage);
		}
	}

	// ---- node/storage removal ----

	pub fn remove_blocks_associated_to_node(
		&self,
		node: NodeId,
		storages: &[StorageId],
		target_replication: impl Fn(BlockId) -> u16,
	) -> Vec<BlockId> {
		let mut inner = self.inner.write().unwrap();
		let affected = inner.blocks.remove_node(node, storages);
		inner.invalidate.remove_all_for_node(node);
		inner.excess.remove_all_for_node(node);
		for &id in &affected {
			for &storage in storages {
				inner.corrupt.remove_node(id, storage);
			}
			let target = target_replication(id);
			self.recompute_priority_locked(&mut inner, id, target);
		}
		affected
	}

	pub fn remove_blocks_associated_to_storage(
		&self,
		storage: StorageId,
		target_replication: impl Fn(BlockId) -> u16,
	) -> Vec<BlockId> {
		let mut inner = self.inner.write().unwrap();
		let ids: Vec<BlockId> = inner.blocks.blocks_of_storage(storage).collect();
		for &id in &ids {
			inner.blocks.remove_storage(id, storage);
			inner.corrupt.remove_node(id, storage);
			let target = target_replication(id);
			self.recompute_priority_locked(&mut inner, id, target);
		}
		ids
	}

	// ---- readers ----

	pub fn create_located_blocks(&self, ids: &[BlockId]) -> Result<Vec<LocatedBlock>> {
		let inner = self.inner.read().unwrap();
		let mut out = Vec::with_capacity(ids.len());
		for &id in ids {
			let block = inner
				.blocks
				.get(id)
				.ok_or_else(|| Error::Invariant(format!("createLocatedBlocks on unknown block {id:?}")))?;
			let mut live = Vec::new();
			let mut corrupt = Vec::new();
			for s in block.storages() {
				if inner.corrupt.is_corrupt(id, s) {
					corrupt.push(s);
				} else {
					live.push(s);
				}
			}
			let all_corrupt = live.is_empty() && !corrupt.is_empty();
			live.extend(corrupt);
			let token = self
				.token_issuer
				.as_ref()
				.filter(|_| self.config.block_access_token_enable)
				.map(|t| t.issue(id));
			out.push(LocatedBlock {
				block: Block {
					id,
					generation_stamp: block.generation_stamp,
					len: block.len,
				},
				storages: live,
				corrupt: all_corrupt,
				is_under_construction: block.state.is_under_construction(),
				token,
			});
		}
		Ok(out)
	}

	// ---- diagnostics ----

	pub fn meta_save(&self) -> MetaSaveReport {
		let inner = self.inner.read().unwrap();
		let corrupt_blocks = inner.corrupt.blocks().count();
		let corrupt_replicas: usize = inner.corrupt.blocks().map(|b| inner.corrupt.count(b)).sum();
		let priorities = [
			("L0Salvageable", Priority::L0Salvageable),
			("L1SingleReplica", Priority::L1SingleReplica),
			("L2Severe", Priority::L2Severe),
			("L3Other", Priority::L3Other),
			("L4RackViolation", Priority::L4RackViolation),
			("L5CorruptOrMissing", Priority::L5CorruptOrMissing),
		];
		MetaSaveReport {
			total_blocks: inner.blocks.len(),
			under_construction_blocks: inner
				.blocks
				.iter()
				.filter(|b| b.state.is_under_construction())
				.count(),
			corrupt_blocks,
			corrupt_replicas,
			pending_deletion_blocks: inner.invalidate.total_pending(),
			excess_replica_blocks: inner.excess.total(),
			under_replicated_blocks: inner.under_replicated.len(),
			under_replicated_by_priority: priorities
				.iter()
				.map(|(name, p)| (*name, inner.under_replicated.count_in(*p)))
				.collect(),
			pending_replication_blocks: inner.pending.len(),
		}
	}

	// ---- replication work enumeration, used by `monitor.rs` ----

	pub(crate) fn choose_under_replicated(&self, max_blocks: usize) -> Vec<(Priority, BlockId)> {
		let mut inner = self.inner.write().unwrap();
		inner.under_replicated.choose_under_replicated(max_blocks)
	}

	pub(crate) fn block_storages(&self, id: BlockId) -> Vec<StorageId> {
		let inner = self.inner.read().unwrap();
		inner.blocks.get(id).map(|b| b.storages().collect()).unwrap_or_default()
	}

	/// Storages holding a replica of `id` that a source-selection pass
	/// must not consider: corrupt for this block, or already queued as
	/// excess for it.
	pub(crate) fn ineligible_source_storages(&self, id: BlockId) -> HashSet<StorageId> {
		let inner = self.inner.read().unwrap();
		inner
			.corrupt
			.nodes(id)
			.chain(
				inner
					.blocks
					.get(id)
					.map(|b| b.storages().collect::<Vec<_>>())
					.unwrap_or_default()
					.into_iter()
					.filter(|s| inner.excess.contains(s.node(), id)),
			)
			.collect()
	}

	pub(crate) fn add_pending(&self, id: BlockId, additional_required: usize, deadline_msec: u64, targets: Vec<StorageId>) {
		let mut inner = self.inner.write().unwrap();
		inner.pending.add(id, additional_required, deadline_msec, targets);
	}

	pub(crate) fn drain_timed_out_pending(&self, now_msec: u64) -> Vec<BlockId> {
		let mut inner = self.inner.write().unwrap();
		inner.pending.drain_timed_out(now_msec)
	}

	pub(crate) fn invalidation_work_for_node(&self, node: NodeId, limit: usize, now_msec: u64) -> Vec<BlockId> {
		let mut inner = self.inner.write().unwrap();
		inner.invalidate.drain(node, limit, now_msec)
	}

	pub(crate) fn nodes_ready_for_invalidation(&self, now_msec: u64) -> Vec<NodeId> {
		let inner = self.inner.read().unwrap();
		inner.invalidate.nodes_ready(now_msec)
	}

	/// A sorted snapshot of every known block id, for the startup
	/// mis-replication scan. Sorted so that chunked
	/// scanning makes deterministic progress across lock releases.
	pub fn all_block_ids(&self) -> Vec<BlockId> {
		let inner = self.inner.read().unwrap();
		let mut ids: Vec<BlockId> = inner.blocks.iter().map(|b| b.id).collect();
		ids.sort_unstable_by_key(|b| b.0);
		ids
	}

	/// Re-evaluate a batch of blocks' under-replication bucket in one
	/// lock acquisition: chunked, lock-released iteration across the
	/// full block set.
	pub fn recompute_priority_batch(&self, ids: &[BlockId], target_replication: &dyn Fn(BlockId) -> u16) {
		let mut inner = self.inner.write().unwrap();
		for &id in ids {
			self.recompute_priority_locked(&mut inner, id, target_replication(id));
		}
	}

	/// Snapshot of the blocks currently parked in one priority bucket,
	/// used by the postponed rescan worker.
	pub(crate) fn ids_in_priority(&self, priority: Priority) -> Vec<BlockId> {
		let inner = self.inner.read().unwrap();
		inner.under_replicated.snapshot(priority)
	}

	pub(crate) fn datanodes(&self) -> &Arc<dyn DatanodeManager> {
		&self.datanodes
	}

	pub(crate) fn placement(&self) -> &Arc<dyn BlockPlacementPolicy> {
		&self.placement
	}

	// ---- internal priority bookkeeping ----

	fn count_live(&self, inner: &Inner, id: BlockId) -> usize {
		let block = match inner.blocks.get(id) {
			Some(b) => b,
			None => return 0,
		};
		block
			.storages()
			.filter(|s| {
				!inner.corrupt.is_corrupt(id, *s)
					&& matches!(self.datanodes.classify(s.node()), Some(NodeClass::Live))
			})
			.count()
	}

	fn recompute_priority_locked(&self, inner: &mut Inner, id: BlockId, target_replication: u16) {
		let block = match inner.blocks.get(id) {
			Some(b) => b,
			None => {
				inner.under_replicated.remove(id);
				return;
			}
		};
		// A block still being written (no committed length yet) is not
		// "missing": it simply hasn't collected storages yet, or is
		// between pipeline recovery attempts. Replication work only
		// applies once the block is Committed/Complete.
		if block.state.is_under_construction() {
			inner.under_replicated.remove(id);
			return;
		}
		if block.storage_count() == 0 {
			inner.under_replicated.update(id, Some(Priority::L5CorruptOrMissing));
			return;
		}

		let mut live = 0usize;
		let mut has_decommissioning = false;
		let mut racks = HashSet::new();
		for s in block.storages() {
			if inner.corrupt.is_corrupt(id, s) {
				continue;
			}
			match self.datanodes.classify(s.node()) {
				Some(NodeClass::Live) => {
					live += 1;
					if let Some(r) = self.datanodes.rack_of(s.node()) {
						racks.insert(r);
					}
				}
				Some(NodeClass::Decommissioning) => has_decommissioning = true,
				Some(NodeClass::Decommissioned) | None => {}
			}
		}
		let rack_violation =
			live >= target_replication as usize && self.datanodes.rack_count() > 1 && racks.len() <= 1;
		let priority = Priority::classify(live, target_replication, has_decommissioning, false, rack_violation);
		inner.under_replicated.update(id, priority);
	}

	/// Over-replication reducer. Candidates are this
	/// block's storages minus corrupt, decommissioned, already-excess
	/// and (if any is stale) the whole block is left alone for the
	/// next rescan rather than risk evicting from a count we can't
	/// trust yet.
	fn recompute_excess_locked(&self, inner: &mut Inner, id: BlockId, target_replication: u16) {
		let mut candidates: Vec<StorageId> = match inner.blocks.get(id) {
			Some(b) => b.storages().collect(),
			None => return,
		};
		candidates.retain(|s| !inner.corrupt.is_corrupt(id, *s) && !inner.excess.contains(s.node(), id));
		candidates.retain(|s| !matches!(self.datanodes.classify(s.node()), Some(NodeClass::Decommissioned) | None));
		if candidates.iter().any(|s| self.datanodes.is_stale(*s)) {
			return;
		}

		while candidates.len() > target_replication as usize {
			let mut per_rack: HashMap<Option<RackId>, usize> = HashMap::new();
			for s in &candidates {
				*per_rack.entry(self.datanodes.rack_of(s.node())).or_insert(0) += 1;
			}
			let more_than_one: Vec<StorageId> = candidates
				.iter()
				.copied()
				.filter(|s| per_rack[&self.datanodes.rack_of(s.node())] >= 2)
				.collect();
			let pool = if more_than_one.is_empty() { &candidates } else { &more_than_one };
			let pool_candidates: Vec<PlacementCandidate> =
				pool.iter()
					.map(|storage| PlacementCandidate { storage: *storage, free_space: self.datanodes.free_space(*storage) })
					.collect();
			let victim = match self.placement.choose_excess_victim(&pool_candidates) {
				Some(v) => v,
				None => break,
			};
			candidates.retain(|s| *s != victim);
			inner.excess.add(victim.node(), id);
			inner.invalidate.add(id, victim.node(), blockmaster_util::time::now_msec());
		}
	}
}
