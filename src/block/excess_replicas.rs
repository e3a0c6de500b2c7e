//! C4 `ExcessReplicas`: per-node set of replicas considered surplus,
//! populated by the over-replication reducer and drained when a
//! delete is confirmed.

use std::collections::{HashMap, HashSet};

use crate::ids::{BlockId, NodeId};

#[derive(Default)]
pub struct ExcessReplicas {
	by_node: HashMap<NodeId, HashSet<BlockId>>,
}

impl ExcessReplicas {
	pub fn add(&mut self, node: NodeId, block: BlockId) {
		self.by_node.entry(node).or_default().insert(block);
	}

	pub fn remove(&mut self, node: NodeId, block: BlockId) {
		if let Some(set) = self.by_node.get_mut(&node) {
			set.remove(&block);
			if set.is_empty() {
				self.by_node.remove(&node);
			}
		}
	}

	pub fn remove_all_for_node(&mut self, node: NodeId) {
		self.by_node.remove(&node);
	}

	pub fn contains(&self, node: NodeId, block: BlockId) -> bool {
		self.by_node
			.get(&node)
			.map(|s| s.contains(&block))
			.unwrap_or(false)
	}

	pub fn count(&self, node: NodeId) -> usize {
		self.by_node.get(&node).map(|s| s.len()).unwrap_or(0)
	}

	pub fn total(&self) -> usize {
		self.by_node.values().map(|s| s.len()).sum()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn add_remove_roundtrip() {
		let mut e = ExcessReplicas::default();
		e.add(NodeId(1), BlockId(1));
		assert!(e.contains(NodeId(1), BlockId(1)));
		e.remove(NodeId(1), BlockId(1));
		assert!(!e.contains(NodeId(1), BlockId(1)));
	}
}
