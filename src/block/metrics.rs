use std::sync::Arc;

use opentelemetry::{global, metrics::*};

use crate::manager::BlockManager;

/// Metrics exported by the block manager core: gauges sampled from a
/// callback for point-in-time queue depths, counters for work
/// dispatched over time.
pub struct BlockManagerMetrics {
	pub(crate) total_blocks: ObservableGauge<u64>,
	pub(crate) under_replicated_blocks: ObservableGauge<u64>,
	pub(crate) corrupt_blocks: ObservableGauge<u64>,
	pub(crate) pending_deletion_blocks: ObservableGauge<u64>,
	pub(crate) pending_replication_blocks: ObservableGauge<u64>,

	pub(crate) replicate_dispatched: Counter<u64>,
	pub(crate) invalidate_dispatched: Counter<u64>,
	pub(crate) pending_timed_out: Counter<u64>,
	pub(crate) corrupt_detected: Counter<u64>,

	pub(crate) replication_tick_duration: Histogram<f64>,
}

impl BlockManagerMetrics {
	pub fn new(manager: Arc<BlockManager>) -> Self {
		let meter = global::meter("blockmaster/block");

		let m = manager.clone();
		let total_blocks = meter
			.u64_observable_gauge("block.total_blocks")
			.with_description("Total blocks known to BlocksMap")
			.with_callback(move |observer| observer.observe(m.meta_save().total_blocks as u64, &[]))
			.init();

		let m = manager.clone();
		let under_replicated_blocks = meter
			.u64_observable_gauge("block.under_replicated_blocks")
			.with_description("Blocks currently queued for replication")
			.with_callback(move |observer| observer.observe(m.meta_save().under_replicated_blocks as u64, &[]))
			.init();

		let m = manager.clone();
		let corrupt_blocks = meter
			.u64_observable_gauge("block.corrupt_blocks")
			.with_description("Blocks with at least one replica flagged corrupt")
			.with_callback(move |observer| observer.observe(m.meta_save().corrupt_blocks as u64, &[]))
			.init();

		let m = manager.clone();
		let pending_deletion_blocks = meter
			.u64_observable_gauge("block.pending_deletion_blocks")
			.with_description("Blocks queued for deletion in InvalidateBlocks")
			.with_callback(move |observer| observer.observe(m.meta_save().pending_deletion_blocks as u64, &[]))
			.init();

		let m = manager;
		let pending_replication_blocks = meter
			.u64_observable_gauge("block.pending_replication_blocks")
			.with_description("Blocks with replication currently in flight")
			.with_callback(move |observer| observer.observe(m.meta_save().pending_replication_blocks as u64, &[]))
			.init();

		Self {
			total_blocks,
			under_replicated_blocks,
			corrupt_blocks,
			pending_deletion_blocks,
			pending_replication_blocks,

			replicate_dispatched: meter
				.u64_counter("block.replicate_dispatched")
				.with_description("Replication commands enqueued to datanodes")
				.init(),
			invalidate_dispatched: meter
				.u64_counter("block.invalidate_dispatched")
				.with_description("Deletion commands enqueued to datanodes")
				.init(),
			pending_timed_out: meter
				.u64_counter("block.pending_timed_out")
				.with_description("In-flight replications that timed out and were re-queued")
				.init(),
			corrupt_detected: meter
				.u64_counter("block.corrupt_detected")
				.with_description("Replicas newly flagged corrupt by block report processing")
				.init(),

			replication_tick_duration: meter
				.f64_histogram("block.replication_tick_duration")
				.with_description("Duration of one ReplicationMonitor tick")
				.init(),
		}
	}
}
