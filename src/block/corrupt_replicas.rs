//! C2 `CorruptReplicas`: per-block set of storages holding a replica
//! flagged corrupt, with a reason.

use std::collections::{HashMap, HashSet};

use crate::ids::{BlockId, CorruptReason, StorageId};

#[derive(Default)]
pub struct CorruptReplicas {
	by_block: HashMap<BlockId, HashMap<StorageId, CorruptReason>>,
}

impl CorruptReplicas {
	/// Idempotent: marking the same `(block, storage)` corrupt again
	/// just overwrites the reason.
	pub fn add(&mut self, block: BlockId, storage: StorageId, reason: CorruptReason) {
		self.by_block.entry(block).or_default().insert(storage, reason);
	}

	pub fn remove_node(&mut self, block: BlockId, storage: StorageId) {
		if let Some(set) = self.by_block.get_mut(&block) {
			set.remove(&storage);
			if set.is_empty() {
				self.by_block.remove(&block);
			}
		}
	}

	pub fn remove_block(&mut self, block: BlockId) {
		self.by_block.remove(&block);
	}

	pub fn count(&self, block: BlockId) -> usize {
		self.by_block.get(&block).map(|s| s.len()).unwrap_or(0)
	}

	pub fn is_corrupt(&self, block: BlockId, storage: StorageId) -> bool {
		self.by_block
			.get(&block)
			.map(|s| s.contains_key(&storage))
			.unwrap_or(false)
	}

	pub fn nodes(&self, block: BlockId) -> impl Iterator<Item = StorageId> + '_ {
		self.by_block
			.get(&block)
			.into_iter()
			.flat_map(|s| s.keys().copied())
	}

	pub fn reason(&self, block: BlockId, storage: StorageId) -> Option<CorruptReason> {
		self.by_block.get(&block).and_then(|s| s.get(&storage)).copied()
	}

	pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
		self.by_block.keys().copied()
	}

	pub fn storages_as_set(&self, block: BlockId) -> HashSet<StorageId> {
		self.by_block
			.get(&block)
			.map(|s| s.keys().copied().collect())
			.unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn add_is_idempotent() {
		let mut c = CorruptReplicas::default();
		let s = StorageId(1);
		c.add(BlockId(1), s, CorruptReason::GenstampMismatch);
		c.add(BlockId(1), s, CorruptReason::GenstampMismatch);
		assert_eq!(c.count(BlockId(1)), 1);
	}

	#[test]
	fn remove_block_clears_all_its_entries() {
		let mut c = CorruptReplicas::default();
		c.add(BlockId(1), StorageId(1), CorruptReason::SizeMismatch);
		c.add(BlockId(1), StorageId(2), CorruptReason::SizeMismatch);
		c.remove_block(BlockId(1));
		assert_eq!(c.count(BlockId(1)), 0);
	}
}
