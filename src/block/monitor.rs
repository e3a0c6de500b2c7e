//! `ReplicationMonitor`: the background worker that turns C5/C3 queue
//! contents into outbound replicate/invalidate commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tracing::debug;

use blockmaster_util::background::worker::{Worker, WorkerStatus};
use blockmaster_util::error::Error;
use blockmaster_util::time::now_msec;

use crate::iface::NodeClass;
use crate::manager::BlockManager;

/// One tick's work: compute the per-tick budget from the live node
/// count, dispatch replication for
/// under-replicated blocks, then dispatch invalidation for nodes whose
/// startup grace period has elapsed.
pub struct ReplicationMonitor {
	manager: Arc<BlockManager>,
	target_replication: Arc<dyn Fn(crate::ids::BlockId) -> u16 + Send + Sync>,
	recheck_interval: Duration,
}

impl ReplicationMonitor {
	pub fn new(
		manager: Arc<BlockManager>,
		target_replication: Arc<dyn Fn(crate::ids::BlockId) -> u16 + Send + Sync>,
	) -> Self {
		let recheck_interval = Duration::from_secs(manager.config().replication_recheck_interval_secs);
		ReplicationMonitor {
			manager,
			target_replication,
			recheck_interval,
		}
	}

	fn replication_budget(&self) -> usize {
		let live = self.manager.datanodes().live_datanode_count().max(1);
		live * self.manager.config().replication_work_multiplier as usize
	}

	/// Pick a source node for one replication task: any non-corrupt,
	/// non-excess storage for this block whose node is live or
	/// decommissioning and under its outgoing-stream budget.
	/// Decommissioning nodes are preferred (they carry no write
	/// traffic); otherwise ties are broken at random so that no single
	/// node is favored tick after tick.
	fn choose_source(&self, block: crate::ids::BlockId, hard_limit: bool) -> Option<crate::ids::NodeId> {
		let limit = if hard_limit {
			self.manager.config().replication_max_streams_hard_limit
		} else {
			self.manager.config().replication_max_streams
		};
		let ineligible = self.manager.ineligible_source_storages(block);
		let storages = self.manager.block_storages(block);
		let mut live: Vec<crate::ids::NodeId> = Vec::new();
		let mut decommissioning: Vec<crate::ids::NodeId> = Vec::new();
		for s in storages {
			if ineligible.contains(&s) {
				continue;
			}
			let n = s.node();
			if self.manager.datanodes().pending_outgoing_replicas(n) >= limit {
				continue;
			}
			match self.manager.datanodes().classify(n) {
				Some(NodeClass::Live) => live.push(n),
				Some(NodeClass::Decommissioning) => decommissioning.push(n),
				Some(NodeClass::Decommissioned) | None => {}
			}
		}
		let mut pool = if !decommissioning.is_empty() { decommissioning } else { live };
		pool.dedup();
		pool.shuffle(&mut rand::thread_rng());
		pool.into_iter().next()
	}

	async fn run_replication_tick(&self) -> usize {
		let budget = self.replication_budget();
		let chosen = self.manager.choose_under_replicated(budget);
		let mut dispatched = 0;

		for (priority, block) in chosen {
			let target = (self.target_replication)(block);
			let current = self.manager.block_storages(block);
			let additional = (target as usize).saturating_sub(current.len());
			if additional == 0 {
				continue;
			}
			let hard_limit = priority == crate::under_replicated::Priority::L0Salvageable
				|| priority == crate::under_replicated::Priority::L1SingleReplica;
			let source = match self.choose_source(block, hard_limit) {
				Some(s) => s,
				None => {
					debug!("no eligible source for block {:?}, deferring", block);
					continue;
				}
			};
			let excluded: Vec<crate::ids::NodeId> = current.iter().map(|s| s.node()).collect();
			let targets = self.manager.placement().choose_targets(additional, &excluded).await;
			if targets.is_empty() {
				continue;
			}
			self.manager.datanodes().enqueue_replicate(source, block, &targets);
			let deadline = now_msec() + self.manager.config().replication_pending_timeout_secs * 1000;
			self.manager.add_pending(block, targets.len(), deadline, targets);
			dispatched += 1;
		}

		dispatched
	}

	fn run_invalidation_tick(&self) -> usize {
		let now = now_msec();
		let mut nodes = self.manager.nodes_ready_for_invalidation(now);
		let pct = self.manager.config().blockreport_invalidate_work_pct_per_iteration;
		let num_live = self.manager.datanodes().live_datanode_count();
		let nodes_to_process = ((num_live as f64) * pct).ceil().max(1.0) as usize;
		nodes.shuffle(&mut rand::thread_rng());
		nodes.truncate(nodes_to_process);

		let limit = self.manager.config().block_invalidate_limit;
		let mut dispatched = 0;
		for node in nodes {
			let blocks = self.manager.invalidation_work_for_node(node, limit, now);
			if blocks.is_empty() {
				continue;
			}
			self.manager.datanodes().enqueue_invalidate(node, &blocks);
			dispatched += blocks.len();
		}
		dispatched
	}
}

#[async_trait]
impl Worker for ReplicationMonitor {
	fn name(&self) -> String {
		"ReplicationMonitor".into()
	}

	async fn work(&mut self, _must_exit: &mut watch::Receiver<bool>) -> Result<WorkerStatus, Error> {
		let replicated = self.run_replication_tick().await;
		let invalidated = self.run_invalidation_tick();
		if replicated > 0 || invalidated > 0 {
			debug!("replication tick: {} replicate, {} invalidate", replicated, invalidated);
		}
		Ok(WorkerStatus::Idle)
	}

	async fn wait_for_work(&mut self, _must_exit: &watch::Receiver<bool>) -> WorkerStatus {
		tokio::time::sleep(self.recheck_interval).await;
		WorkerStatus::Busy
	}
}
