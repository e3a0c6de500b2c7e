//! Full and incremental block report processing.
//!
//! Full reports are diffed against C1's per-storage edge set using a
//! "delimiter trick" in the source system: a sentinel is threaded
//! through the intrusive list and reported blocks are relinked ahead
//! of it, leaving everything still behind the sentinel as `toRemove`.
//! Since this crate keeps the per-storage index as a `BTreeSet` rather
//! than an intrusive list (see `blocks_map.rs`), the same outcome is
//! reached by a direct set-difference: `stored - reported = toRemove`,
//! `reported - stored = {toAdd | toInvalidate | toCorrupt | toUC}`.
//! The observable diff is identical; only the mechanism differs.

use std::collections::HashSet;

use crate::block_info::BlockUcState;
use crate::blocks_map::BlocksMap;
use crate::ids::{Block, BlockId, CorruptReason, GenStamp, ReplicaState, StorageId};

#[derive(Debug, Clone, Copy)]
pub struct ReportedReplica {
	pub block: Block,
	pub state: ReplicaState,
}

/// Outcome of classifying one `(reported replica, stored block)` pair,
/// per the corruption detection truth table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
	/// Matches stored metadata; record the edge.
	ToAdd,
	/// Attach to the pipeline's expected-replica list.
	ToUc,
	/// Delayed pipeline close; not an error, not recorded either.
	Ignore,
	Corrupt(CorruptReason),
}

/// Classify one reported replica against the block's current stored
/// state, per the corruption detection truth table.
pub fn classify_replica(reported: &ReportedReplica, stored_gen: GenStamp, stored_len: u64, stored_state: &BlockUcState) -> Classification {
	use BlockUcState::*;
	use ReplicaState::*;

	match (reported.state, stored_state) {
		(Finalized, Complete) | (Finalized, Committed) => {
			if reported.block.generation_stamp != stored_gen {
				Classification::Corrupt(CorruptReason::GenstampMismatch)
			} else if reported.block.len != stored_len {
				Classification::Corrupt(CorruptReason::SizeMismatch)
			} else {
				Classification::ToAdd
			}
		}
		(Finalized, UnderConstruction(_)) | (Finalized, UnderRecovery(_)) => {
			if stored_gen > reported.block.generation_stamp {
				Classification::Corrupt(CorruptReason::GenstampMismatch)
			} else {
				Classification::ToUc
			}
		}
		(ReceivingBeingWritten, Complete) => {
			if reported.block.generation_stamp != stored_gen {
				Classification::Corrupt(CorruptReason::GenstampMismatch)
			} else {
				// delayed pipeline close
				Classification::Ignore
			}
		}
		(ReceivingWaitingRecovery, Complete) => {
			if reported.block.generation_stamp != stored_gen {
				Classification::Corrupt(CorruptReason::GenstampMismatch)
			} else {
				Classification::Corrupt(CorruptReason::InvalidState)
			}
		}
		(ReceivingBeingWritten, UnderConstruction(_))
		| (ReceivingBeingWritten, UnderRecovery(_))
		| (ReceivingWaitingRecovery, UnderConstruction(_))
		| (ReceivingWaitingRecovery, UnderRecovery(_)) => Classification::ToUc,
		(UnderRecovery, _) | (Temporary, _) => Classification::Corrupt(CorruptReason::InvalidState),
	}
}

/// Result of diffing one storage's full block report against C1.
#[derive(Debug, Default)]
pub struct ReportDiff {
	/// Reported `Finalized` blocks that match stored metadata but
	/// whose edge is not yet recorded.
	pub to_add: Vec<BlockId>,
	/// In C1 for this storage but absent from the report: the storage
	/// no longer holds it.
	pub to_remove: Vec<BlockId>,
	/// In the report but unknown to C1: the datanode should delete.
	pub to_invalidate: Vec<BlockId>,
	/// Length/generation-stamp mismatch or impossible state
	/// combination, along with the generation stamp the storage
	/// reported (used to tell a definitively stale replica from one
	/// that might still become valid once re-replicated).
	pub to_corrupt: Vec<(BlockId, CorruptReason, GenStamp)>,
	/// Reported replica for a block that is
	/// UnderConstruction/UnderRecovery.
	pub to_uc: Vec<(BlockId, ReplicaState)>,
}

/// Diff a full block report for one storage against C1.
///
/// `first_report` is true when this storage has never reported before
///: in that case `toRemove`
/// and `toInvalidate` are skipped entirely (unknown blocks are
/// silently dropped rather than invalidated, to avoid a mass delete on
/// startup), and valid replicas are funneled straight into `to_add`.
pub fn diff_full_report(
	map: &BlocksMap,
	storage: StorageId,
	reported: &[ReportedReplica],
) -> ReportDiff {
	diff_full_report_inner(map, storage, reported, false)
}

pub fn diff_first_report(
	map: &BlocksMap,
	storage: StorageId,
	reported: &[ReportedReplica],
) -> ReportDiff {
	diff_full_report_inner(map, storage, reported, true)
}

fn diff_full_report_inner(
	map: &BlocksMap,
	storage: StorageId,
	reported: &[ReportedReplica],
	first_report: bool,
) -> ReportDiff {
	let mut diff = ReportDiff::default();
	let mut reported_ids: HashSet<BlockId> = HashSet::with_capacity(reported.len());

	for r in reported {
		reported_ids.insert(r.block.id);
		match map.get(r.block.id) {
			None => {
				if !first_report {
					diff.to_invalidate.push(r.block.id);
				}
				// first report: unknown blocks are silently dropped
			}
			Some(block) => {
				if block.has_storage(storage) && !first_report {
					// already recorded; still re-run classification in
					// case the stored generation stamp advanced, which
					// can surface a corruption that wasn't visible at
					// the time the edge was added
				}
				match classify_replica(r, block.generation_stamp, block.len, &block.state) {
					Classification::ToAdd => {
						if !block.has_storage(storage) {
							diff.to_add.push(r.block.id);
						}
					}
					Classification::ToUc => diff.to_uc.push((r.block.id, r.state)),
					Classification::Ignore => {}
					Classification::Corrupt(reason) => {
						diff.to_corrupt.push((r.block.id, reason, r.block.generation_stamp))
					}
				}
			}
		}
	}

	if !first_report {
		for stored_id in map.blocks_of_storage(storage) {
			if !reported_ids.contains(&stored_id) {
				diff.to_remove.push(stored_id);
			}
		}
	}

	diff
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementalOp {
	Receiving,
	Received,
	Deleted,
}

#[derive(Debug, Clone, Copy)]
pub struct IncrementalEvent {
	pub op: IncrementalOp,
	pub block: Block,
	pub storage: StorageId,
	/// For `Received`, the node the client prefers to drop for
	/// pipeline recovery, if any.
	pub delete_hint: Option<StorageId>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::block_info::BlockInfo;
	use crate::ids::NodeId;

	fn storage(n: u64) -> StorageId {
		StorageId::new(NodeId(n), 0)
	}

	#[test]
	fn finalized_matching_complete_is_to_add() {
		let b = BlockInfo::new_complete(BlockId(1), Some(1), GenStamp(5), 100, vec![]);
		let r = ReportedReplica {
			block: Block {
				id: BlockId(1),
				generation_stamp: GenStamp(5),
				len: 100,
			},
			state: ReplicaState::Finalized,
		};
		assert_eq!(
			classify_replica(&r, b.generation_stamp, b.len, &b.state),
			Classification::ToAdd
		);
	}

	#[test]
	fn genstamp_mismatch_is_corrupt() {
		let b = BlockInfo::new_complete(BlockId(1), Some(1), GenStamp(5), 100, vec![]);
		let r = ReportedReplica {
			block: Block {
				id: BlockId(1),
				generation_stamp: GenStamp(4),
				len: 100,
			},
			state: ReplicaState::Finalized,
		};
		assert_eq!(
			classify_replica(&r, b.generation_stamp, b.len, &b.state),
			Classification::Corrupt(CorruptReason::GenstampMismatch)
		);
	}

	#[test]
	fn rbw_equal_genstamp_against_complete_is_ignored() {
		let b = BlockInfo::new_complete(BlockId(1), Some(1), GenStamp(5), 100, vec![]);
		let r = ReportedReplica {
			block: Block {
				id: BlockId(1),
				generation_stamp: GenStamp(5),
				len: 100,
			},
			state: ReplicaState::ReceivingBeingWritten,
		};
		assert_eq!(
			classify_replica(&r, b.generation_stamp, b.len, &b.state),
			Classification::Ignore
		);
	}

	#[test]
	fn rwr_equal_genstamp_against_complete_is_invalid_state() {
		let b = BlockInfo::new_complete(BlockId(1), Some(1), GenStamp(5), 100, vec![]);
		let r = ReportedReplica {
			block: Block {
				id: BlockId(1),
				generation_stamp: GenStamp(5),
				len: 100,
			},
			state: ReplicaState::ReceivingWaitingRecovery,
		};
		assert_eq!(
			classify_replica(&r, b.generation_stamp, b.len, &b.state),
			Classification::Corrupt(CorruptReason::InvalidState)
		);
	}

	#[test]
	fn temporary_is_always_corrupt() {
		let b = BlockInfo::new_complete(BlockId(1), Some(1), GenStamp(5), 100, vec![]);
		let r = ReportedReplica {
			block: Block {
				id: BlockId(1),
				generation_stamp: GenStamp(5),
				len: 100,
			},
			state: ReplicaState::Temporary,
		};
		assert_eq!(
			classify_replica(&r, b.generation_stamp, b.len, &b.state),
			Classification::Corrupt(CorruptReason::InvalidState)
		);
	}

	#[test]
	fn first_report_drops_unknown_blocks_silently() {
		let map = BlocksMap::default();
		let reported = vec![ReportedReplica {
			block: Block {
				id: BlockId(999),
				generation_stamp: GenStamp(1),
				len: 10,
			},
			state: ReplicaState::Finalized,
		}];
		let diff = diff_first_report(&map, storage(1), &reported);
		assert!(diff.to_invalidate.is_empty());
		assert!(diff.to_add.is_empty());
	}

	#[test]
	fn full_report_invalidates_unknown_blocks() {
		let map = BlocksMap::default();
		let reported = vec![ReportedReplica {
			block: Block {
				id: BlockId(999),
				generation_stamp: GenStamp(1),
				len: 10,
			},
			state: ReplicaState::Finalized,
		}];
		let diff = diff_full_report(&map, storage(1), &reported);
		assert_eq!(diff.to_invalidate, vec![BlockId(999)]);
	}

	#[test]
	fn reporting_same_blocks_twice_is_idempotent() {
		let mut map = BlocksMap::default();
		let s = storage(1);
		map.insert(BlockInfo::new_complete(BlockId(1), Some(1), GenStamp(1), 10, vec![s]))
			.unwrap();
		let reported = vec![ReportedReplica {
			block: Block {
				id: BlockId(1),
				generation_stamp: GenStamp(1),
				len: 10,
			},
			state: ReplicaState::Finalized,
		}];
		let diff = diff_full_report(&map, s, &reported);
		assert!(diff.to_add.is_empty());
		assert!(diff.to_remove.is_empty());
		assert!(diff.to_invalidate.is_empty());
		assert!(diff.to_corrupt.is_empty());
	}

	#[test]
	fn missing_from_report_is_to_remove() {
		let mut map = BlocksMap::default();
		let s = storage(1);
		map.insert(BlockInfo::new_complete(BlockId(1), Some(1), GenStamp(1), 10, vec![s]))
			.unwrap();
		let diff = diff_full_report(&map, s, &[]);
		assert_eq!(diff.to_remove, vec![BlockId(1)]);
	}
}
