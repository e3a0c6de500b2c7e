//! `blockmaster` binary: a thin CLI wrapper around the block manager
//! core, wired to in-memory fakes for the namespace tree, datanode
//! membership and placement policy (see `demo.rs`).

#[macro_use]
extern crate tracing;

mod cli;
mod demo;
mod server;
mod simulate;

use std::process::ExitCode;

use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use blockmaster_util::error::Error;

use cli::{Command, Opt};

#[tokio::main]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.init();

	let opt = Opt::from_args();

	let result = match opt.cmd {
		Command::Server(server_opt) => server::run_server(server_opt.config_file).await,
		Command::MetaSave(server_opt) => simulate::run_meta_save(server_opt.config_file).await,
		Command::Simulate(sim_opt) => simulate::run_simulate(sim_opt).await,
	};

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			print_error(&e);
			ExitCode::FAILURE
		}
	}
}

fn print_error(e: &Error) {
	error!("{}", e);
}
