use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use teleport_config::{Config, ConfigLoader};
use teleport_core::{NodeBuilder, TeleportNode};
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, Command};

/// How often the running node logs its counters.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let config = load_config(&cli.config).await?;

	let log_level = cli
		.log_level
		.clone()
		.unwrap_or_else(|| config.node.log_level.clone());
	setup_tracing(&log_level)?;

	match cli.command {
		Some(Command::Start) | None => start_node(config).await,
		Some(Command::Validate) => validate_config(&cli.config, &config),
	}
}

async fn load_config(path: &Path) -> Result<Config> {
	ConfigLoader::new()
		.with_file(path)
		.load()
		.await
		.with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn start_node(config: Config) -> Result<()> {
	info!("Starting teleport node {}", config.node.name);
	info!(
		node_id = %config.node.node_id,
		settlement_chain = %config.chains.settlement_chain,
		staking_chain = %config.chains.staking_chain,
		execution_chains = config.chains.execution_chains.len(),
		"Configuration loaded"
	);
	if config.node.dev_mode {
		info!("Development mode: using in-process chains and proof system");
	}

	let node = NodeBuilder::new(config)
		.build()
		.context("Failed to build teleport node")?;
	node.start().await.context("Failed to start teleport node")?;

	let shutdown_signal = setup_shutdown_signal();
	tokio::pin!(shutdown_signal);
	let mut stats = tokio::time::interval(STATS_INTERVAL);
	stats.tick().await;

	info!("Teleport node running");
	loop {
		tokio::select! {
			_ = &mut shutdown_signal => break,
			_ = stats.tick() => log_stats(&node).await,
		}
	}

	info!("Shutdown signal received, stopping node...");
	node.shutdown()
		.await
		.context("Failed to shut down teleport node")?;
	Ok(())
}

async fn log_stats(node: &TeleportNode) {
	let stats = node.stats().await;
	match serde_json::to_string(&stats) {
		Ok(json) => info!(health = %stats.health, "Node stats: {}", json),
		Err(e) => debug!("Failed to encode node stats: {}", e),
	}
}

fn validate_config(path: &Path, config: &Config) -> Result<()> {
	info!("Configuration {} is valid", path.display());
	info!("Node: {} ({})", config.node.name, config.node.node_id);
	info!(
		"Threshold: {} of {} participants",
		config.threshold.threshold,
		config.threshold.participants.len()
	);
	info!(
		"Settlement: batch size {}, interval {}ms, {:?} failure policy",
		config.settlement.batch_size,
		config.settlement.batch_interval_ms,
		config.settlement.failure_policy
	);
	info!("Storage: {:?} at {}", config.storage.backend, config.storage.path.display());
	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
		.with_context(|| format!("Invalid log level {}", log_level))?;

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn setup_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use teleport_config::validate_config as check;

	#[test]
	fn test_bundled_config_is_valid() {
		let config = ConfigLoader::new()
			.parse(include_str!("../../../config/local.toml"))
			.unwrap();
		check(&config).unwrap();
		assert!(config.node.dev_mode);
		assert_eq!(config.threshold.local_parties().len(), 3);
	}

	#[tokio::test]
	async fn test_missing_config_file_is_reported() {
		let err = load_config(Path::new("does/not/exist.toml"))
			.await
			.unwrap_err();
		assert!(err.to_string().contains("does/not/exist.toml"));
	}
}
