//! Configuration surface for the block manager, read from a TOML file.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::Error;

/// Represents the whole configuration surface named in the block
/// manager's external interfaces section.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
	/// Reject writes whose requested replication is below this;
	/// completion requires at least this many live replicas.
	#[serde(default = "default_replication_min")]
	pub replication_min: u16,

	/// Cluster-wide upper bound on requested replication, capped at
	/// 2^15 - 1 regardless of what is configured.
	#[serde(default = "default_replication_max")]
	pub replication_max: u16,

	/// Default replication factor used when none is specified.
	#[serde(default = "default_replication_default")]
	pub replication_default: u16,

	/// Outbound replication stream limit per node for non-highest
	/// priority work.
	#[serde(default = "default_max_streams")]
	pub replication_max_streams: u32,

	/// Hard cap on outbound replication streams per node, regardless
	/// of priority.
	#[serde(default = "default_max_streams_hard_limit")]
	pub replication_max_streams_hard_limit: u32,

	/// `ReplicationMonitor` tick interval, in seconds.
	#[serde(default = "default_recheck_interval_secs")]
	pub replication_recheck_interval_secs: u64,

	/// Deadline, in seconds, after which an in-flight replication in
	/// `PendingReplications` is considered timed out.
	#[serde(default = "default_pending_timeout_secs")]
	pub replication_pending_timeout_secs: u64,

	/// Chunk size for the asynchronous mis-replication scan.
	#[serde(default = "default_misreplication_processing_limit")]
	pub block_misreplication_processing_limit: usize,

	/// Fraction of live nodes to process for invalidation work on
	/// each `ReplicationMonitor` tick.
	#[serde(default = "default_invalidate_work_pct")]
	pub blockreport_invalidate_work_pct_per_iteration: f64,

	/// Per-node cap on deletions drained and dispatched in a single
	/// invalidation tick.
	#[serde(default = "default_block_invalidate_limit")]
	pub block_invalidate_limit: usize,

	/// Multiplier applied to the live node count to bound how many
	/// blocks are processed for replication work per tick.
	#[serde(default = "default_work_multiplier")]
	pub replication_work_multiplier: u32,

	/// Grace period, in seconds, after a node's invalidation set is
	/// first populated before deletions are dispatched to it.
	#[serde(default)]
	pub startup_delay_block_deletion_secs: u64,

	#[serde(default)]
	pub block_access_token_enable: bool,

	#[serde(default = "default_access_key_update_interval_secs")]
	pub block_access_key_update_interval_secs: u64,

	#[serde(default = "default_access_token_lifetime_secs")]
	pub block_access_token_lifetime_secs: u64,

	#[serde(default)]
	pub data_encryption_algorithm: Option<String>,

	#[serde(default)]
	pub encrypt_data_transfer: bool,

	/// Per-report log cap.
	#[serde(default = "default_max_num_blocks_to_log")]
	pub max_num_blocks_to_log: usize,
}

fn default_replication_min() -> u16 {
	1
}
fn default_replication_max() -> u16 {
	512
}
fn default_replication_default() -> u16 {
	3
}
fn default_max_streams() -> u32 {
	2
}
fn default_max_streams_hard_limit() -> u32 {
	4
}
fn default_recheck_interval_secs() -> u64 {
	3
}
fn default_pending_timeout_secs() -> u64 {
	5 * 60
}
fn default_misreplication_processing_limit() -> usize {
	10_000
}
fn default_invalidate_work_pct() -> f64 {
	0.32
}
fn default_block_invalidate_limit() -> usize {
	1000
}
fn default_work_multiplier() -> u32 {
	2
}
fn default_access_key_update_interval_secs() -> u64 {
	24 * 3600
}
fn default_access_token_lifetime_secs() -> u64 {
	10 * 60
}
fn default_max_num_blocks_to_log() -> usize {
	1000
}

/// Hard ceiling on replication factor: 2^15 - 1, regardless of what
/// `replication_max` is configured to.
pub const REPLICATION_MAX_CEILING: u16 = (1 << 15) - 1;

impl Default for Config {
	fn default() -> Self {
		Config {
			replication_min: default_replication_min(),
			replication_max: default_replication_max(),
			replication_default: default_replication_default(),
			replication_max_streams: default_max_streams(),
			replication_max_streams_hard_limit: default_max_streams_hard_limit(),
			replication_recheck_interval_secs: default_recheck_interval_secs(),
			replication_pending_timeout_secs: default_pending_timeout_secs(),
			block_misreplication_processing_limit: default_misreplication_processing_limit(),
			blockreport_invalidate_work_pct_per_iteration: default_invalidate_work_pct(),
			block_invalidate_limit: default_block_invalidate_limit(),
			replication_work_multiplier: default_work_multiplier(),
			startup_delay_block_deletion_secs: 0,
			block_access_token_enable: false,
			block_access_key_update_interval_secs: default_access_key_update_interval_secs(),
			block_access_token_lifetime_secs: default_access_token_lifetime_secs(),
			data_encryption_algorithm: None,
			encrypt_data_transfer: false,
			max_num_blocks_to_log: default_max_num_blocks_to_log(),
		}
	}
}

impl Config {
	/// Reject configurations that can never be satisfied.
	pub fn validate(&self) -> Result<(), Error> {
		let ceiling = self.replication_max.min(REPLICATION_MAX_CEILING);
		if self.replication_min == 0 {
			return Err(Error::InvalidReplication(
				"replication_min must be at least 1".into(),
			));
		}
		if self.replication_min > ceiling {
			return Err(Error::InvalidReplication(format!(
				"replication_min ({}) exceeds replication_max ({})",
				self.replication_min, ceiling
			)));
		}
		if self.replication_default < self.replication_min || self.replication_default > ceiling {
			return Err(Error::InvalidReplication(format!(
				"replication_default ({}) must be within [{}, {}]",
				self.replication_default, self.replication_min, ceiling
			)));
		}
		if !(0.0..=1.0).contains(&self.blockreport_invalidate_work_pct_per_iteration) {
			return Err(Error::Message(
				"blockreport_invalidate_work_pct_per_iteration must be within [0, 1]".into(),
			));
		}
		Ok(())
	}

	/// Replication max, clamped to the hard ceiling regardless of what
	/// was configured.
	pub fn replication_max(&self) -> u16 {
		self.replication_max.min(REPLICATION_MAX_CEILING)
	}
}

/// Read and parse configuration from a TOML file.
pub fn read_config(config_file: &Path) -> Result<Config, Error> {
	let mut file = std::fs::OpenOptions::new().read(true).open(config_file)?;

	let mut config = String::new();
	file.read_to_string(&mut config)?;

	let config: Config = toml::from_str(&config)?;
	config.validate()?;
	Ok(config)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_valid() {
		Config::default().validate().unwrap();
	}

	#[test]
	fn rejects_min_above_max() {
		let mut c = Config::default();
		c.replication_min = 10;
		c.replication_max = 5;
		c.replication_default = 10;
		assert!(c.validate().is_err());
	}

	#[test]
	fn caps_replication_max_to_ceiling() {
		let mut c = Config::default();
		c.replication_max = u16::MAX;
		assert_eq!(c.replication_max(), REPLICATION_MAX_CEILING);
	}
}
