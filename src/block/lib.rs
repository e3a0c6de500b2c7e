//! Block manager core: C1-C7 and the `ReplicationMonitor` family of
//! background workers tracking block metadata and replication state
//! for a distributed file system master node.

#[macro_use]
extern crate tracing;

pub mod block_info;
pub mod blocks_map;
pub mod corrupt_replicas;
pub mod excess_replicas;
pub mod ids;
pub mod iface;
pub mod invalidate_blocks;
pub mod manager;
pub mod metasave;
pub mod metrics;
pub mod monitor;
pub mod pending_monitor;
pub mod pending_replications;
pub mod report;
pub mod scan;
pub mod under_replicated;
