//! `meta-save` and `simulate` CLI subcommands: exercise the block
//! manager core against the in-memory demo fakes without starting the
//! server's background workers, for quick local inspection.

use std::path::PathBuf;
use std::sync::Arc;

use blockmaster_block::ids::{Block, BlockId, GenStamp};
use blockmaster_block::manager::BlockManager;
use blockmaster_block::report::{IncrementalEvent, IncrementalOp};

use blockmaster_util::config::read_config;
use blockmaster_util::error::Error;

use crate::cli::SimulateOpt;
use crate::demo::{DemoDatanodes, DemoPlacement};

/// Allocate `blocks` blocks against `nodes` demo datanodes, simulating
/// each target datanode reporting the write complete, then commit each
/// block. Returns the populated manager for the caller to inspect.
async fn run_workload(config_file: &PathBuf, nodes: usize, blocks: usize) -> Result<Arc<BlockManager>, Error> {
	let config = read_config(config_file)?;
	let datanodes = Arc::new(DemoDatanodes::new(nodes));
	let placement = Arc::new(DemoPlacement::new(datanodes.clone()));
	let manager = Arc::new(BlockManager::new(config.clone(), datanodes, placement, None));

	for i in 0..blocks {
		let id = BlockId(i as u64 + 1);
		let targets = manager
			.choose_target_for_new_block(config.replication_default as usize, &[])
			.await?;

		manager.add_block_under_construction(id, i as u64, GenStamp(1), targets.clone())?;

		let events: Vec<IncrementalEvent> = targets
			.iter()
			.map(|&storage| IncrementalEvent {
				op: IncrementalOp::Received,
				block: Block {
					id,
					generation_stamp: GenStamp(1),
					len: 4096,
				},
				storage,
				delete_hint: None,
			})
			.collect();
		manager.process_incremental_report(&events, |_| config.replication_default);

		manager.commit_or_complete_last_block(id, 4096, GenStamp(1), config.replication_default)?;
	}

	Ok(manager)
}

pub async fn run_meta_save(config_file: PathBuf) -> Result<(), Error> {
	let manager = run_workload(&config_file, 5, 20).await?;
	println!("{}", manager.meta_save());
	Ok(())
}

pub async fn run_simulate(opt: SimulateOpt) -> Result<(), Error> {
	let manager = run_workload(&opt.config_file, opt.nodes, opt.blocks).await?;

	println!("Simulated {} blocks across {} datanodes.", opt.blocks, opt.nodes);
	for id in manager.all_block_ids() {
		let located = manager.create_located_blocks(&[id])?;
		let lb = &located[0];
		println!(
			"block {:>4}: {} replica(s) on {:?}{}",
			lb.block.id.0,
			lb.storages.len(),
			lb.storages,
			if lb.corrupt { " (ALL CORRUPT)" } else { "" }
		);
	}
	println!();
	println!("{}", manager.meta_save());

	Ok(())
}
