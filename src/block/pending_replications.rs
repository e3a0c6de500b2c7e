//! C6 `PendingReplications`: per-block in-flight replication work
//! with timeouts.

use std::collections::HashMap;

use crate::ids::{BlockId, StorageId};

struct Entry {
	additional_required: usize,
	deadline_msec: u64,
	targets: Vec<StorageId>,
}

#[derive(Default)]
pub struct PendingReplications {
	entries: HashMap<BlockId, Entry>,
}

impl PendingReplications {
	pub fn add(
		&mut self,
		block: BlockId,
		additional_required: usize,
		deadline_msec: u64,
		targets: Vec<StorageId>,
	) {
		self.entries.insert(
			block,
			Entry {
				additional_required,
				deadline_msec,
				targets,
			},
		);
	}

	pub fn remove(&mut self, block: BlockId) -> bool {
		self.entries.remove(&block).is_some()
	}

	pub fn contains(&self, block: BlockId) -> bool {
		self.entries.contains_key(&block)
	}

	pub fn targets(&self, block: BlockId) -> &[StorageId] {
		self.entries
			.get(&block)
			.map(|e| e.targets.as_slice())
			.unwrap_or(&[])
	}

	pub fn additional_required(&self, block: BlockId) -> usize {
		self.entries.get(&block).map(|e| e.additional_required).unwrap_or(0)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Scan for entries whose deadline has passed `now_msec`,
	/// removing and returning them. Invoked once per
	/// `pendingTimeoutSec` by `PendingReplicationMonitor`; the caller
	/// re-adds timed-out blocks to C5.
	pub fn drain_timed_out(&mut self, now_msec: u64) -> Vec<BlockId> {
		let expired: Vec<BlockId> = self
			.entries
			.iter()
			.filter(|(_, e)| e.deadline_msec <= now_msec)
			.map(|(id, _)| *id)
			.collect();
		for id in &expired {
			self.entries.remove(id);
		}
		expired
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn entries_expire_past_deadline() {
		let mut c6 = PendingReplications::default();
		c6.add(BlockId(1), 1, 1000, vec![StorageId(1)]);
		assert!(c6.drain_timed_out(999).is_empty());
		assert_eq!(c6.drain_timed_out(1000), vec![BlockId(1)]);
		assert!(!c6.contains(BlockId(1)));
	}
}
