use std::path::PathBuf;
use std::sync::Arc;

use opentelemetry::sdk::export::metrics::aggregation;
use opentelemetry::sdk::metrics::{controllers, processors, selectors};
use tokio::sync::watch;

use blockmaster_util::background::BackgroundRunner;
use blockmaster_util::config::read_config;
use blockmaster_util::error::Error;

use blockmaster_block::manager::BlockManager;
use blockmaster_block::metrics::BlockManagerMetrics;
use blockmaster_block::monitor::ReplicationMonitor;
use blockmaster_block::pending_monitor::PendingReplicationMonitor;
use blockmaster_block::scan::{initialize_replication_queues, PostponedMisreplicationScan};

use crate::demo::{DemoDatanodes, DemoPlacement, DemoTokenIssuer};

/// Number of background job runners handed to `BackgroundRunner`,
/// independent of the three dedicated `Worker` tasks spawned below.
const BACKGROUND_JOB_RUNNERS: usize = 2;

pub async fn run_server(config_file: PathBuf) -> Result<(), Error> {
	info!("Loading configuration...");
	let config = read_config(&config_file)?;

	info!("Setting up metrics exporter...");
	let controller = controllers::basic(
		processors::factory(
			selectors::simple::histogram([0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
			aggregation::cumulative_temporality_selector(),
		)
		.with_memory(true),
	)
	.build();
	let _metrics_exporter = opentelemetry_prometheus::exporter(controller).init();

	info!("Initializing demo datanode fleet and placement policy...");
	let datanodes = Arc::new(DemoDatanodes::new(5));
	let placement = Arc::new(DemoPlacement::new(datanodes.clone()));
	let token_issuer: Option<Arc<dyn blockmaster_block::iface::BlockTokenIssuer>> =
		if config.block_access_token_enable {
			Some(Arc::new(DemoTokenIssuer))
		} else {
			None
		};

	let manager = Arc::new(BlockManager::new(config.clone(), datanodes, placement, token_issuer));
	let _metrics = BlockManagerMetrics::new(manager.clone());

	// No namespace tree is wired in, so the demo binary uses a fixed
	// replication target for every block rather than looking one up
	// per owning file.
	let target_replication: Arc<dyn Fn(blockmaster_block::ids::BlockId) -> u16 + Send + Sync> =
		Arc::new({
			let default_replication = config.replication_default;
			move |_id| default_replication
		});

	info!("Initializing background runner...");
	let watch_cancel = watch_shutdown_signal();
	let (background, await_background_done) = BackgroundRunner::new(BACKGROUND_JOB_RUNNERS, watch_cancel.clone());

	info!("Running startup mis-replication scan...");
	initialize_replication_queues(&manager, &|id| target_replication(id)).await;

	info!("Spawning replication and invalidation workers...");
	background.spawn_worker(ReplicationMonitor::new(manager.clone(), target_replication.clone()));
	background.spawn_worker(PendingReplicationMonitor::new(manager.clone(), target_replication.clone()));
	background.spawn_worker(PostponedMisreplicationScan::new(
		manager.clone(),
		target_replication.clone(),
		std::time::Duration::from_secs(config.replication_recheck_interval_secs * 10),
	));

	wait_for_shutdown(watch_cancel).await;

	info!("Shutdown signal received, waiting for background workers to drain...");
	opentelemetry::global::shutdown_tracer_provider();
	drop(manager);
	await_background_done.await.ok();

	info!("Cleaning up...");
	Ok(())
}

async fn wait_for_shutdown(mut chan: watch::Receiver<bool>) {
	while !*chan.borrow() {
		if chan.changed().await.is_err() {
			return;
		}
	}
}

#[cfg(unix)]
fn watch_shutdown_signal() -> watch::Receiver<bool> {
	use tokio::signal::unix::*;

	let (send_cancel, watch_cancel) = watch::channel(false);
	tokio::spawn(async move {
		let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
		let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
		let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
		tokio::select! {
			_ = sigint.recv() => info!("Received SIGINT, shutting down."),
			_ = sigterm.recv() => info!("Received SIGTERM, shutting down."),
			_ = sighup.recv() => info!("Received SIGHUP, shutting down."),
		}
		send_cancel.send(true).unwrap();
	});
	watch_cancel
}

#[cfg(windows)]
fn watch_shutdown_signal() -> watch::Receiver<bool> {
	use tokio::signal::windows::*;

	let (send_cancel, watch_cancel) = watch::channel(false);
	tokio::spawn(async move {
		let mut sigint = ctrl_c().expect("failed to install Ctrl-C handler");
		let mut sigclose = ctrl_close().expect("failed to install Ctrl-Close handler");
		let mut siglogoff = ctrl_logoff().expect("failed to install Ctrl-Logoff handler");
		let mut sigsdown = ctrl_shutdown().expect("failed to install Ctrl-Shutdown handler");
		tokio::select! {
			_ = sigint.recv() => info!("Received Ctrl-C, shutting down."),
			_ = sigclose.recv() => info!("Received Ctrl-Close, shutting down."),
			_ = siglogoff.recv() => info!("Received Ctrl-Logoff, shutting down."),
			_ = sigsdown.recv() => info!("Received Ctrl-Shutdown, shutting down."),
		}
		send_cancel.send(true).unwrap();
	});
	watch_cancel
}
