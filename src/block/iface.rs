//! External collaborators the core consumes through interfaces: the
//! namespace tree, the datanode membership subsystem, the replica placement
//! policy, and the access token issuer. None of these are implemented
//! here; only the shapes the core depends on are.

use async_trait::async_trait;

use crate::ids::{BlockId, NodeId, StorageId};

/// A file handle in the (out-of-scope) namespace tree: an ordered
/// list of blocks. The core consults this to find a block's owning
/// file and whether that file is still open for writing.
pub trait BlockCollection: std::fmt::Debug {
	/// Stable identifier of the owning file, used for logging only.
	fn id(&self) -> u64;

	/// Whether this file still has an open write pipeline (its last
	/// block may be `UnderConstruction`).
	fn is_under_construction(&self) -> bool;

	/// Preferred block size for this file, used to decide whether the
	/// last block is "partial" in
	/// `convertLastBlockToUnderConstruction`.
	fn preferred_block_size(&self) -> u64;

	/// Target replication factor declared for this file.
	fn replication(&self) -> u16;
}

/// A node's current membership state in the datanode fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
	Live,
	Decommissioning,
	Decommissioned,
}

/// The (out-of-scope) datanode membership, heartbeat and decommission
/// subsystem, consulted by the core through this interface.
pub trait DatanodeManager: Send + Sync + std::fmt::Debug {
	/// Number of datanodes currently considered live, used to size the
	/// `ReplicationMonitor`'s per-tick work budget.
	fn live_datanode_count(&self) -> usize;

	/// Current membership classification of a node.
	fn classify(&self, node: NodeId) -> Option<NodeClass>;

	/// Whether a storage's most recent block report is still
	/// considered fresh (i.e. not "stale" per the GLOSSARY) since the
	/// master became active.
	fn is_stale(&self, storage: StorageId) -> bool;

	/// Number of outbound replication streams currently scheduled on a
	/// node (used by source-node eligibility).
	fn pending_outgoing_replicas(&self, node: NodeId) -> u32;

	/// The rack a node belongs to, for the rack-diversity predicate
	/// used when classifying priority level 4 (no rack diversity).
	fn rack_of(&self, node: NodeId) -> Option<RackId>;

	/// Total distinct racks known in the cluster.
	fn rack_count(&self) -> usize;

	/// Free space remaining on a storage, used to break ties among
	/// excess-replica eviction candidates. Implementations with no
	/// real signal may return `u64::MAX` for every storage, which
	/// reduces victim selection to whatever order the placement
	/// policy's own tie-break applies.
	fn free_space(&self, storage: StorageId) -> u64;

	/// Enqueue a "replicate this block to these target storages"
	/// command on a node's outgoing queue. Delivery is asynchronous
	/// and at-least-once; the core relies on idempotency.
	fn enqueue_replicate(&self, source: NodeId, block: BlockId, targets: &[StorageId]);

	/// Enqueue a "delete these blocks" command on a node.
	fn enqueue_invalidate(&self, node: NodeId, blocks: &[BlockId]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RackId(pub u32);

/// Candidate storage offered to the placement policy: the free-space
/// and storage-type hints used to break ties among victims in the
/// over-replication reducer.
#[derive(Debug, Clone, Copy)]
pub struct PlacementCandidate {
	pub storage: StorageId,
	pub free_space: u64,
}

/// The pluggable replica placement strategy, consulted outside the
/// namespace lock.
#[async_trait]
pub trait BlockPlacementPolicy: Send + Sync {
	/// Choose up to `num_replicas` target storages for a new block,
	/// excluding `excluded`. Returns fewer than requested if the
	/// cluster cannot satisfy the request; the caller is responsible
	/// for failing if the count is below `minReplication`.
	async fn choose_targets(
		&self,
		num_replicas: usize,
		excluded: &[NodeId],
	) -> Vec<StorageId>;

	/// Among `candidates` (storages from the "more than one per rack"
	/// bucket of the over-replication reducer), pick the one to evict:
	/// typically the one with the least free space.
	fn choose_excess_victim(&self, candidates: &[PlacementCandidate]) -> Option<StorageId>;
}

/// Opaque access-token / transport-key issuance, out of scope for this
/// core but consulted when serving reader locations, if token
/// issuance is enabled.
pub trait BlockTokenIssuer: Send + Sync {
	/// Opaque token bytes scoped to one block, for one requesting
	/// client/mode. Implementations are free to embed any validity
	/// window.
	fn issue(&self, block: BlockId) -> Vec<u8>;
}
