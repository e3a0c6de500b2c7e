//! C1 `BlocksMap`: the canonical index from block id to block record
//! to set of storage locations.
//!
//! The per-storage enumeration side index is conventionally an
//! intrusive doubly-linked list threaded through `BlockInfo`. Rust's
//! ownership model makes a literal circular intrusive list impractical
//! without `unsafe`; this implementation gets the same O(1)-amortized
//! add/remove and O(k) per-storage enumeration by maintaining an
//! auxiliary `StorageId -> BTreeSet<BlockId>` index alongside the
//! primary map, updated in lockstep on every mutation. This is
//! recorded as a deliberate substitution in DESIGN.md.

use std::collections::{BTreeSet, HashMap};

use blockmaster_util::error::Error;

use crate::block_info::BlockInfo;
use crate::ids::{BlockId, GenStamp, NodeId, StorageId};

/// Sizing hint used at construction time: sized to a fixed capacity
/// (conventionally ~2% of available memory). This crate uses a
/// growable `HashMap`, but honors the hint by pre-reserving capacity
/// so that the common case never rehashes.
#[derive(Debug, Clone, Copy)]
pub struct BlocksMapCapacity(pub usize);

impl Default for BlocksMapCapacity {
	fn default() -> Self {
		// A conservative default; production deployments size this
		// from available memory the way the source system does.
		BlocksMapCapacity(1 << 16)
	}
}

#[derive(Default)]
pub struct BlocksMap {
	blocks: HashMap<BlockId, BlockInfo>,
	by_storage: HashMap<StorageId, BTreeSet<BlockId>>,
}

impl BlocksMap {
	pub fn with_capacity(cap: BlocksMapCapacity) -> Self {
		BlocksMap {
			blocks: HashMap::with_capacity(cap.0),
			by_storage: HashMap::new(),
		}
	}

	pub fn len(&self) -> usize {
		self.blocks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.blocks.is_empty()
	}

	pub fn get(&self, id: BlockId) -> Option<&BlockInfo> {
		self.blocks.get(&id)
	}

	pub fn get_mut(&mut self, id: BlockId) -> Option<&mut BlockInfo> {
		self.blocks.get_mut(&id)
	}

	pub fn contains(&self, id: BlockId) -> bool {
		self.blocks.contains_key(&id)
	}

	/// Insert a new block record. Fails (invariant violation) if the
	/// id is already present; callers needing identity-preserving
	/// variant swaps should use [`BlocksMap::replace`].
	pub fn insert(&mut self, block: BlockInfo) -> Result<(), Error> {
		if self.blocks.contains_key(&block.id) {
			return Err(Error::Invariant(format!(
				"block {:?} already present in BlocksMap",
				block.id
			)));
		}
		for s in block.storages() {
			self.by_storage.entry(s).or_default().insert(block.id);
		}
		self.blocks.insert(block.id, block);
		Ok(())
	}

	/// Remove a block entirely, scrubbing it from the per-storage
	/// index. Returns the removed record, if any.
	pub fn remove(&mut self, id: BlockId) -> Option<BlockInfo> {
		let block = self.blocks.remove(&id)?;
		for s in block.storages() {
			if let Some(set) = self.by_storage.get_mut(&s) {
				set.remove(&id);
				if set.is_empty() {
					self.by_storage.remove(&s);
				}
			}
		}
		Some(block)
	}

	/// Replace a block's record in place, preserving identity (same
	/// id) while allowing the variant (UC <-> Complete) to change. The
	/// per-storage index is rebuilt from the new record's storage set.
	pub fn replace(&mut self, new: BlockInfo) -> Result<(), Error> {
		if !self.blocks.contains_key(&new.id) {
			return Err(Error::Invariant(format!(
				"replace called on absent block {:?}",
				new.id
			)));
		}
		let id = new.id;
		// Drop the old storage index entries, then rebuild from the
		// replacement -- `replace` is rare (one call per UC/Complete
		// transition) so a full rebuild of this block's fan-out is
		// cheap relative to correctness risk of a partial diff.
		if let Some(old) = self.blocks.get(&id) {
			for s in old.storages() {
				if let Some(set) = self.by_storage.get_mut(&s) {
					set.remove(&id);
				}
			}
		}
		for s in new.storages() {
			self.by_storage.entry(s).or_default().insert(id);
		}
		self.blocks.insert(id, new);
		Ok(())
	}

	/// Add a `(block, storage)` edge. No-op (idempotent) if already
	/// present.
	pub fn add_storage(&mut self, id: BlockId, storage: StorageId) -> Result<(), Error> {
		let block = self
			.blocks
			.get_mut(&id)
			.ok_or_else(|| Error::Invariant(format!("add_storage on absent block {:?}", id)))?;
		if block.add_storage(storage) {
			self.by_storage.entry(storage).or_default().insert(id);
		}
		Ok(())
	}

	/// Remove a `(block, storage)` edge. Idempotent.
	pub fn remove_storage(&mut self, id: BlockId, storage: StorageId) {
		if let Some(block) = self.blocks.get_mut(&id) {
			if block.remove_storage(storage) {
				if let Some(set) = self.by_storage.get_mut(&storage) {
					set.remove(&id);
					if set.is_empty() {
						self.by_storage.remove(&storage);
					}
				}
			}
		}
	}

	/// Enumerate the blocks claimed by one storage, without a
	/// secondary index scan over the whole map -- O(k) in the number
	/// of blocks on that storage.
	pub fn blocks_of_storage(&self, storage: StorageId) -> impl Iterator<Item = BlockId> + '_ {
		self.by_storage
			.get(&storage)
			.into_iter()
			.flat_map(|set| set.iter().copied())
	}

	/// Remove every `(block, storage)` edge for all storages of a
	/// node in one pass, used by `removeBlocksAssociatedTo(node)`.
	/// Returns the set of affected block ids so the caller can
	/// re-evaluate their replication needs.
	pub fn remove_node(&mut self, node: NodeId, storages: &[StorageId]) -> Vec<BlockId> {
		let mut affected = Vec::new();
		for &storage in storages {
			debug_assert_eq!(storage.node(), node);
			let ids: Vec<BlockId> = self.blocks_of_storage(storage).collect();
			for id in ids {
				self.remove_storage(id, storage);
				affected.push(id);
			}
		}
		affected.sort_unstable_by_key(|b| b.0);
		affected.dedup();
		affected
	}

	pub fn iter(&self) -> impl Iterator<Item = &BlockInfo> {
		self.blocks.values()
	}

	pub fn generation_stamp_of(&self, id: BlockId) -> Option<GenStamp> {
		self.blocks.get(&id).map(|b| b.generation_stamp)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::block_info::BlockInfo;

	fn storage(node: u64, slot: u32) -> StorageId {
		StorageId::new(NodeId(node), slot)
	}

	#[test]
	fn insert_then_lookup() {
		let mut map = BlocksMap::default();
		let b = BlockInfo::new_complete(BlockId(1), Some(1), GenStamp(1), 10, vec![storage(1, 0)]);
		map.insert(b).unwrap();
		assert!(map.contains(BlockId(1)));
		assert_eq!(map.blocks_of_storage(storage(1, 0)).count(), 1);
	}

	#[test]
	fn remove_storage_cleans_index() {
		let mut map = BlocksMap::default();
		let s = storage(1, 0);
		let b = BlockInfo::new_complete(BlockId(1), Some(1), GenStamp(1), 10, vec![s]);
		map.insert(b).unwrap();
		map.remove_storage(BlockId(1), s);
		assert_eq!(map.blocks_of_storage(s).count(), 0);
		assert!(!map.get(BlockId(1)).unwrap().has_storage(s));
	}

	#[test]
	fn remove_node_scrubs_all_its_storages() {
		let mut map = BlocksMap::default();
		let s0 = storage(1, 0);
		let s1 = storage(1, 1);
		map.insert(BlockInfo::new_complete(
			BlockId(1),
			Some(1),
			GenStamp(1),
			10,
			vec![s0],
		))
		.unwrap();
		map.insert(BlockInfo::new_complete(
			BlockId(2),
			Some(1),
			GenStamp(1),
			10,
			vec![s1],
		))
		.unwrap();
		let affected = map.remove_node(NodeId(1), &[s0, s1]);
		assert_eq!(affected, vec![BlockId(1), BlockId(2)]);
		assert!(!map.get(BlockId(1)).unwrap().has_storage(s0));
		assert!(!map.get(BlockId(2)).unwrap().has_storage(s1));
	}

	#[test]
	fn replace_preserves_identity_across_variant_swap() {
		let mut map = BlocksMap::default();
		map.insert(BlockInfo::new_under_construction(
			BlockId(1),
			1,
			GenStamp(1),
			vec![],
		))
		.unwrap();
		let complete = BlockInfo::new_complete(BlockId(1), Some(1), GenStamp(2), 100, vec![]);
		map.replace(complete).unwrap();
		assert!(map.get(BlockId(1)).unwrap().state.is_complete());
	}
}
