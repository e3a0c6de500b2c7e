//! Startup mis-replication scan and its postponed-rescan companion.
//!
//! On startup, C5 is empty: nothing has been classified yet. Rather
//! than compute priorities under a single write-lock hold across the
//! whole `BlocksMap` (which would stall every reader for as long as
//! the scan takes on a large cluster), the scan walks a sorted
//! snapshot of block ids in chunks, reacquiring the lock once per
//! chunk.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use blockmaster_util::background::worker::{Worker, WorkerStatus};
use blockmaster_util::error::Error;

use crate::ids::BlockId;
use crate::manager::BlockManager;
use crate::under_replicated::Priority;

/// Run the one-shot startup scan to completion. Not itself a `Worker`:
/// the server runs this before handing control to `ReplicationMonitor`,
/// matching the source system's "queues are populated before the
/// monitor thread starts" ordering.
pub async fn initialize_replication_queues(
	manager: &BlockManager,
	target_replication: &dyn Fn(BlockId) -> u16,
) {
	let ids = manager.all_block_ids();
	let chunk_size = manager.config().block_misreplication_processing_limit.max(1);
	let mut processed = 0;
	for chunk in ids.chunks(chunk_size) {
		manager.recompute_priority_batch(chunk, target_replication);
		processed += chunk.len();
		// Yield so readers waiting on the lock get a turn between
		// chunks even on a single-threaded runtime.
		tokio::task::yield_now().await;
	}
	info!("mis-replication scan complete: {} blocks classified", processed);
}

/// Periodically re-evaluates blocks parked in the rack-violation or
/// corrupt/missing buckets, in case cluster topology (new racks
/// reported, a decommission completing) changed since they were last
/// classified and no other event triggered a recompute.
pub struct PostponedMisreplicationScan {
	manager: Arc<BlockManager>,
	target_replication: Arc<dyn Fn(BlockId) -> u16 + Send + Sync>,
	interval: Duration,
}

impl PostponedMisreplicationScan {
	pub fn new(manager: Arc<BlockManager>, target_replication: Arc<dyn Fn(BlockId) -> u16 + Send + Sync>, interval: Duration) -> Self {
		PostponedMisreplicationScan {
			manager,
			target_replication,
			interval,
		}
	}
}

#[async_trait]
impl Worker for PostponedMisreplicationScan {
	fn name(&self) -> String {
		"PostponedMisreplicationScan".into()
	}

	async fn work(&mut self, _must_exit: &mut watch::Receiver<bool>) -> Result<WorkerStatus, Error> {
		let candidates = self.manager.ids_in_priority(Priority::L4RackViolation);
		if !candidates.is_empty() {
			let target_replication = self.target_replication.clone();
			self.manager
				.recompute_priority_batch(&candidates, &|id| target_replication(id));
		}
		Ok(WorkerStatus::Idle)
	}

	async fn wait_for_work(&mut self, _must_exit: &watch::Receiver<bool>) -> WorkerStatus {
		tokio::time::sleep(self.interval).await;
		WorkerStatus::Busy
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ids::{GenStamp, NodeId, StorageId};
	use crate::iface::{BlockPlacementPolicy, DatanodeManager, NodeClass, PlacementCandidate, RackId};
	use blockmaster_util::config::Config;

	#[derive(Debug)]
	struct OneRackDatanodes;

	impl DatanodeManager for OneRackDatanodes {
		fn live_datanode_count(&self) -> usize {
			3
		}
		fn classify(&self, _node: NodeId) -> Option<NodeClass> {
			Some(NodeClass::Live)
		}
		fn is_stale(&self, _storage: StorageId) -> bool {
			false
		}
		fn pending_outgoing_replicas(&self, _node: NodeId) -> u32 {
			0
		}
		fn rack_of(&self, _node: NodeId) -> Option<RackId> {
			Some(RackId(1))
		}
		fn rack_count(&self) -> usize {
			2
		}
		fn free_space(&self, _storage: StorageId) -> u64 {
			u64::MAX
		}
		fn enqueue_replicate(&self, _source: NodeId, _block: BlockId, _targets: &[StorageId]) {}
		fn enqueue_invalidate(&self, _node: NodeId, _blocks: &[BlockId]) {}
	}

	struct NoopPlacement;

	#[async_trait]
	impl BlockPlacementPolicy for NoopPlacement {
		async fn choose_targets(&self, _num_replicas: usize, _excluded: &[NodeId]) -> Vec<StorageId> {
			vec![]
		}
		fn choose_excess_victim(&self, _candidates: &[PlacementCandidate]) -> Option<StorageId> {
			None
		}
	}

	#[tokio::test]
	async fn startup_scan_skips_blocks_still_under_construction() {
		let manager = Arc::new(BlockManager::new(
			Config::default(),
			Arc::new(OneRackDatanodes),
			Arc::new(NoopPlacement),
			None,
		));
		manager
			.add_block_under_construction(BlockId(1), 1, GenStamp(1), vec![])
			.unwrap();

		// A block that's still being written isn't missing, it just
		// hasn't been committed yet: the scan must not route it into
		// any priority bucket.
		initialize_replication_queues(&manager, &|_| 3).await;
		let report = manager.meta_save();
		assert_eq!(report.under_replicated_blocks, 0);
		assert!(report.under_replicated_by_priority.iter().all(|(_, n)| *n == 0));
	}

	#[tokio::test]
	async fn postponed_scan_rechecks_rack_violation_bucket_without_panicking() {
		let manager = Arc::new(BlockManager::new(
			Config::default(),
			Arc::new(OneRackDatanodes),
			Arc::new(NoopPlacement),
			None,
		));
		let target: Arc<dyn Fn(BlockId) -> u16 + Send + Sync> = Arc::new(|_| 3);
		let mut worker = PostponedMisreplicationScan::new(manager, target, Duration::from_millis(1));
		let (_tx, mut rx) = watch::channel(false);
		let status = worker.work(&mut rx).await.unwrap();
		assert_eq!(status, WorkerStatus::Idle);
	}
}
