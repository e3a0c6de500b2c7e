//! C3 `InvalidateBlocks`: per-node queue of replicas to delete, with a
//! startup grace period.

use std::collections::{BTreeSet, HashMap};

use crate::ids::{BlockId, NodeId};

struct NodeQueue {
	blocks: BTreeSet<BlockId>,
	/// Monotonic millisecond timestamp of the first insertion into
	/// this node's queue, used to gate the startup grace period.
	first_populated_msec: u64,
}

#[derive(Default)]
pub struct InvalidateBlocks {
	by_node: HashMap<NodeId, NodeQueue>,
	startup_delay_msec: u64,
}

impl InvalidateBlocks {
	pub fn new(startup_delay_msec: u64) -> Self {
		InvalidateBlocks {
			by_node: HashMap::new(),
			startup_delay_msec,
		}
	}

	/// Idempotent add of `(block, node)` to the deletion queue.
	pub fn add(&mut self, block: BlockId, node: NodeId, now_msec: u64) {
		let entry = self.by_node.entry(node).or_insert_with(|| NodeQueue {
			blocks: BTreeSet::new(),
			first_populated_msec: now_msec,
		});
		entry.blocks.insert(block);
	}

	/// Idempotent remove.
	pub fn remove(&mut self, block: BlockId, node: NodeId) {
		if let Some(q) = self.by_node.get_mut(&node) {
			q.blocks.remove(&block);
			if q.blocks.is_empty() {
				self.by_node.remove(&node);
			}
		}
	}

	pub fn remove_all_for_node(&mut self, node: NodeId) {
		self.by_node.remove(&node);
	}

	pub fn contains(&self, block: BlockId, node: NodeId) -> bool {
		self.by_node
			.get(&node)
			.map(|q| q.blocks.contains(&block))
			.unwrap_or(false)
	}

	pub fn num_blocks(&self, node: NodeId) -> usize {
		self.by_node.get(&node).map(|q| q.blocks.len()).unwrap_or(0)
	}

	/// Whether this node's grace period has elapsed, i.e. its pending
	/// deletions may now be returned to the scheduler.
	pub fn grace_elapsed(&self, node: NodeId, now_msec: u64) -> bool {
		match self.by_node.get(&node) {
			None => true,
			Some(q) => now_msec.saturating_sub(q.first_populated_msec) >= self.startup_delay_msec,
		}
	}

	/// Nodes with at least one pending deletion whose grace period has
	/// elapsed.
	pub fn nodes_ready(&self, now_msec: u64) -> Vec<NodeId> {
		self.by_node
			.iter()
			.filter(|(_, q)| {
				!q.blocks.is_empty()
					&& now_msec.saturating_sub(q.first_populated_msec) >= self.startup_delay_msec
			})
			.map(|(n, _)| *n)
			.collect()
	}

	/// Drain up to `limit` blocks queued for `node`. Returns an empty
	/// vec (without consuming anything) if the grace period has not
	/// elapsed: until it elapses, the node's pending deletions are not
	/// returned to the scheduler.
	pub fn drain(&mut self, node: NodeId, limit: usize, now_msec: u64) -> Vec<BlockId> {
		if !self.grace_elapsed(node, now_msec) {
			return Vec::new();
		}
		let q = match self.by_node.get_mut(&node) {
			Some(q) => q,
			None => return Vec::new(),
		};
		let drained: Vec<BlockId> = q.blocks.iter().take(limit).copied().collect();
		for b in &drained {
			q.blocks.remove(b);
		}
		if q.blocks.is_empty() {
			self.by_node.remove(&node);
		}
		drained
	}

	pub fn total_pending(&self) -> usize {
		self.by_node.values().map(|q| q.blocks.len()).sum()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn grace_period_blocks_drain_until_elapsed() {
		let mut inv = InvalidateBlocks::new(1000);
		inv.add(BlockId(1), NodeId(1), 0);
		assert!(inv.drain(NodeId(1), 10, 500).is_empty());
		let drained = inv.drain(NodeId(1), 10, 1000);
		assert_eq!(drained, vec![BlockId(1)]);
	}

	#[test]
	fn reissuing_delete_is_idempotent() {
		let mut inv = InvalidateBlocks::new(0);
		inv.add(BlockId(1), NodeId(1), 0);
		inv.add(BlockId(1), NodeId(1), 0);
		assert_eq!(inv.num_blocks(NodeId(1)), 1);
	}

	#[test]
	fn drain_respects_limit_and_is_ordered() {
		let mut inv = InvalidateBlocks::new(0);
		for i in 0..5 {
			inv.add(BlockId(i), NodeId(1), 0);
		}
		let drained = inv.drain(NodeId(1), 3, 0);
		assert_eq!(drained.len(), 3);
		assert_eq!(inv.num_blocks(NodeId(1)), 2);
	}
}
