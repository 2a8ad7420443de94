//! Command-line interface of the teleport node.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "teleport-node")]
#[command(about = "Cross-chain teleport node", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
	#[command(subcommand)]
	pub command: Option<Command>,

	/// Path to configuration file
	#[arg(short, long, value_name = "FILE", env = "TELEPORT_CONFIG", default_value = "config/local.toml")]
	pub config: PathBuf,

	/// Log level override (trace, debug, info, warn, error)
	#[arg(short, long, env = "TELEPORT_LOG_LEVEL")]
	pub log_level: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
	/// Start the node
	Start,
	/// Load and validate the configuration file
	Validate,
}
