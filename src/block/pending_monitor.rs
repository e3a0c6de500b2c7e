//! `PendingReplicationMonitor`: sweeps C6 on its own schedule,
//! independent of `ReplicationMonitor`'s tick, and re-queues anything
//! that timed out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use blockmaster_util::background::worker::{Worker, WorkerStatus};
use blockmaster_util::error::Error;
use blockmaster_util::time::now_msec;

use crate::ids::BlockId;
use crate::manager::BlockManager;

pub struct PendingReplicationMonitor {
	manager: Arc<BlockManager>,
	target_replication: Arc<dyn Fn(BlockId) -> u16 + Send + Sync>,
	scan_interval: Duration,
}

impl PendingReplicationMonitor {
	pub fn new(manager: Arc<BlockManager>, target_replication: Arc<dyn Fn(BlockId) -> u16 + Send + Sync>) -> Self {
		// Scans at half the timeout so no entry can live more than
		// 1.5x its nominal deadline before being noticed.
		let scan_interval = Duration::from_secs((manager.config().replication_pending_timeout_secs / 2).max(1));
		PendingReplicationMonitor {
			manager,
			target_replication,
			scan_interval,
		}
	}
}

#[async_trait]
impl Worker for PendingReplicationMonitor {
	fn name(&self) -> String {
		"PendingReplicationMonitor".into()
	}

	async fn work(&mut self, _must_exit: &mut watch::Receiver<bool>) -> Result<WorkerStatus, Error> {
		let expired = self.manager.drain_timed_out_pending(now_msec());
		if !expired.is_empty() {
			info!("{} pending replications timed out, re-queuing", expired.len());
			for block in expired {
				let target = (self.target_replication)(block);
				self.manager.set_replication(block, target).ok();
			}
		}
		Ok(WorkerStatus::Idle)
	}

	async fn wait_for_work(&mut self, _must_exit: &watch::Receiver<bool>) -> WorkerStatus {
		tokio::time::sleep(self.scan_interval).await;
		WorkerStatus::Busy
	}
}
