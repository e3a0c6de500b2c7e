//! In-memory stand-ins for the four external interfaces
//! (`BlockCollection`, `DatanodeManager`, `BlockPlacementPolicy`,
//! `BlockTokenIssuer`) that a real deployment would supply from its
//! namespace tree, heartbeat subsystem, placement strategy and
//! security layer. Used by the `server` and `simulate` subcommands;
//! a real deployment replaces these with its own implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use rand::seq::SliceRandom;

use blockmaster_block::iface::{
	BlockCollection, BlockPlacementPolicy, BlockTokenIssuer, DatanodeManager, NodeClass,
	PlacementCandidate, RackId,
};
use blockmaster_block::ids::{BlockId, NodeId, StorageId};

/// One simulated datanode: fixed rack assignment, a live outgoing
/// replication stream counter, and a free-space figure used only to
/// break ties in the placement policy below.
struct DemoNode {
	class: NodeClass,
	rack: RackId,
	free_space: u64,
	pending_outgoing: AtomicU32,
}

/// A small, fixed-size cluster of demo datanodes spread evenly across
/// three racks, all reporting fresh and live.
pub struct DemoDatanodes {
	nodes: HashMap<NodeId, DemoNode>,
}

impl DemoDatanodes {
	pub fn new(count: usize) -> Self {
		let mut nodes = HashMap::with_capacity(count);
		for i in 0..count {
			nodes.insert(
				NodeId(i as u64 + 1),
				DemoNode {
					class: NodeClass::Live,
					rack: RackId((i % 3) as u32),
					free_space: 1_000_000_000 - (i as u64 * 1_000_000),
					pending_outgoing: AtomicU32::new(0),
				},
			);
		}
		DemoDatanodes { nodes }
	}

	fn storages_of(&self, node: NodeId) -> StorageId {
		StorageId::new(node, 0)
	}
}

impl std::fmt::Debug for DemoDatanodes {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DemoDatanodes").field("nodes", &self.nodes.len()).finish()
	}
}

impl DatanodeManager for DemoDatanodes {
	fn live_datanode_count(&self) -> usize {
		self.nodes.values().filter(|n| n.class == NodeClass::Live).count()
	}

	fn classify(&self, node: NodeId) -> Option<NodeClass> {
		self.nodes.get(&node).map(|n| n.class)
	}

	fn is_stale(&self, _storage: StorageId) -> bool {
		false
	}

	fn pending_outgoing_replicas(&self, node: NodeId) -> u32 {
		self.nodes.get(&node).map(|n| n.pending_outgoing.load(Ordering::Relaxed)).unwrap_or(0)
	}

	fn rack_of(&self, node: NodeId) -> Option<RackId> {
		self.nodes.get(&node).map(|n| n.rack)
	}

	fn rack_count(&self) -> usize {
		self.nodes.values().map(|n| n.rack).collect::<std::collections::HashSet<_>>().len()
	}

	fn free_space(&self, storage: StorageId) -> u64 {
		self.nodes.get(&storage.node()).map(|n| n.free_space).unwrap_or(0)
	}

	fn enqueue_replicate(&self, source: NodeId, block: BlockId, targets: &[StorageId]) {
		if let Some(n) = self.nodes.get(&source) {
			n.pending_outgoing.fetch_add(1, Ordering::Relaxed);
		}
		debug!("demo: replicate {:?} from {:?} to {:?}", block, source, targets);
	}

	fn enqueue_invalidate(&self, node: NodeId, blocks: &[BlockId]) {
		debug!("demo: invalidate {} block(s) on {:?}", blocks.len(), node);
	}
}

/// Round-robin-with-rack-awareness placement policy: picks nodes from
/// racks not yet represented among the excluded set before repeating a
/// rack, and evicts the candidate with the least free space.
pub struct DemoPlacement {
	datanodes: std::sync::Arc<DemoDatanodes>,
}

impl DemoPlacement {
	pub fn new(datanodes: std::sync::Arc<DemoDatanodes>) -> Self {
		DemoPlacement { datanodes }
	}
}

#[async_trait]
impl BlockPlacementPolicy for DemoPlacement {
	async fn choose_targets(&self, num_replicas: usize, excluded: &[NodeId]) -> Vec<StorageId> {
		let mut candidates: Vec<NodeId> = self
			.datanodes
			.nodes
			.keys()
			.copied()
			.filter(|n| !excluded.contains(n))
			.collect();
		candidates.sort_unstable();
		let mut rng = rand::thread_rng();
		candidates.shuffle(&mut rng);

		let mut out = Vec::with_capacity(num_replicas);
		let mut seen_racks = std::collections::HashSet::new();
		// First pass: prefer spreading across distinct racks.
		for &n in &candidates {
			if out.len() == num_replicas {
				break;
			}
			if let Some(rack) = self.datanodes.rack_of(n) {
				if seen_racks.insert(rack) {
					out.push(self.datanodes.storages_of(n));
				}
			}
		}
		// Second pass: fill any remainder regardless of rack.
		for &n in &candidates {
			if out.len() == num_replicas {
				break;
			}
			let s = self.datanodes.storages_of(n);
			if !out.contains(&s) {
				out.push(s);
			}
		}
		out
	}

	fn choose_excess_victim(&self, candidates: &[PlacementCandidate]) -> Option<StorageId> {
		candidates.iter().min_by_key(|c| c.free_space).map(|c| c.storage)
	}
}

/// A fixed-size file with a declared replication factor, standing in
/// for one entry of the (out-of-scope) namespace tree.
#[derive(Debug, Clone)]
pub struct DemoFile {
	pub id: u64,
	pub replication: u16,
	pub under_construction: bool,
}

impl BlockCollection for DemoFile {
	fn id(&self) -> u64 {
		self.id
	}

	fn is_under_construction(&self) -> bool {
		self.under_construction
	}

	fn preferred_block_size(&self) -> u64 {
		64 * 1024 * 1024
	}

	fn replication(&self) -> u16 {
		self.replication
	}
}

/// Token issuer that just stamps the block id into an opaque byte
/// string; no cryptographic value, demo/testing only.
pub struct DemoTokenIssuer;

impl BlockTokenIssuer for DemoTokenIssuer {
	fn issue(&self, block: BlockId) -> Vec<u8> {
		format!("demo-token:{}", block.0).into_bytes()
	}
}
