//! `MetaSaveReport`: a point-in-time snapshot of the block manager's
//! queues, mirroring the HDFS `metasave` operator diagnostic dump.

use std::fmt;

/// Counts pulled from C1-C6 under a read lock, formatted for a
/// human operator rather than for machine consumption.
#[derive(Debug, Clone, Default)]
pub struct MetaSaveReport {
	pub total_blocks: usize,
	pub under_construction_blocks: usize,
	pub corrupt_blocks: usize,
	pub corrupt_replicas: usize,
	pub pending_deletion_blocks: usize,
	pub excess_replica_blocks: usize,
	pub under_replicated_blocks: usize,
	pub under_replicated_by_priority: Vec<(&'static str, usize)>,
	pub pending_replication_blocks: usize,
}

impl fmt::Display for MetaSaveReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "{} blocks total", self.total_blocks)?;
		writeln!(f, "{} blocks under construction", self.under_construction_blocks)?;
		writeln!(
			f,
			"{} blocks with at least one corrupt replica ({} corrupt replicas)",
			self.corrupt_blocks, self.corrupt_replicas
		)?;
		writeln!(f, "{} blocks waiting on deletion", self.pending_deletion_blocks)?;
		writeln!(f, "{} blocks with excess replicas", self.excess_replica_blocks)?;
		writeln!(f, "{} blocks under-replicated:", self.under_replicated_blocks)?;
		for (name, count) in &self.under_replicated_by_priority {
			writeln!(f, "  {name}: {count}")?;
		}
		writeln!(f, "{} blocks with replication in flight", self.pending_replication_blocks)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_does_not_panic_on_empty_report() {
		let report = MetaSaveReport::default();
		assert!(report.to_string().contains("0 blocks total"));
	}
}
