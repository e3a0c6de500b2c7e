use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub enum Command {
	/// Run the block manager server
	#[structopt(name = "server")]
	Server(ServerOpt),

	/// Dump a metaSave-style diagnostic report and exit
	#[structopt(name = "meta-save")]
	MetaSave(ServerOpt),

	/// Run an in-memory simulation: allocate a handful of blocks against
	/// the demo fakes, print their priority classification, then exit
	#[structopt(name = "simulate")]
	Simulate(SimulateOpt),
}

#[derive(StructOpt, Debug)]
pub struct ServerOpt {
	/// Configuration file
	#[structopt(short = "c", long = "config", default_value = "./config.toml")]
	pub config_file: PathBuf,
}

#[derive(StructOpt, Debug)]
pub struct SimulateOpt {
	/// Configuration file
	#[structopt(short = "c", long = "config", default_value = "./config.toml")]
	pub config_file: PathBuf,

	/// Number of demo datanodes to simulate
	#[structopt(long = "nodes", default_value = "5")]
	pub nodes: usize,

	/// Number of demo blocks to allocate
	#[structopt(long = "blocks", default_value = "20")]
	pub blocks: usize,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "blockmaster")]
pub struct Opt {
	#[structopt(subcommand)]
	pub cmd: Command,
}
