//! Configuration loading for teleport nodes.
//!
//! Configuration is read from a TOML file. `${VAR}` references are replaced
//! with environment values before parsing, a small set of `TELEPORT_`-prefixed
//! variables override individual settings, and the result is validated before
//! any component is built from it.

use regex::Regex;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub mod types;

pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Loads [`Config`] from a file with environment substitution.
pub struct ConfigLoader {
	file_path: Option<PathBuf>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "TELEPORT_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_path_buf());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		let Some(file_path) = &self.file_path else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};
		if !file_path.exists() {
			return Err(ConfigError::FileNotFound(file_path.display().to_string()));
		}

		let content = tokio::fs::read_to_string(file_path).await?;
		let mut config = self.parse(&content)?;
		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;
		Ok(config)
	}

	/// Parses TOML after `${VAR}` substitution, without overrides or validation.
	pub fn parse(&self, content: &str) -> Result<Config, ConfigError> {
		let substituted = substitute_env_vars(content)?;
		toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))
	}

	fn apply_env_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			debug!("Overriding log level from environment");
			config.node.log_level = log_level;
		}

		if let Ok(path) = env::var(format!("{}STORAGE_PATH", self.env_prefix)) {
			debug!("Overriding storage path from environment");
			config.storage.path = PathBuf::from(path);
		}

		if let Ok(batch_size) = env::var(format!("{}BATCH_SIZE", self.env_prefix)) {
			config.settlement.batch_size = batch_size.parse().map_err(|e| {
				ConfigError::ValidationError(format!("Invalid batch size: {}", e))
			})?;
		}

		Ok(())
	}
}

fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
	let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::ParseError(e.to_string()))?;
	let mut result = content.to_string();

	for cap in re.captures_iter(content) {
		let full_match = &cap[0];
		let var_name = &cap[1];
		let value =
			env::var(var_name).map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
		result = result.replace(full_match, &value);
	}

	Ok(result)
}

/// Checks cross-field constraints that serde cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
	let invalid = |msg: String| -> Result<(), ConfigError> {
		Err(ConfigError::ValidationError(msg))
	};

	let threshold = &config.threshold;
	if threshold.participants.is_empty() {
		return invalid("threshold.participants must not be empty".into());
	}
	if threshold.threshold == 0 || threshold.threshold > threshold.participants.len() {
		return invalid(format!(
			"threshold.threshold must be in 1..={}, got {}",
			threshold.participants.len(),
			threshold.threshold
		));
	}
	let mut unique = threshold.participants.clone();
	unique.sort();
	unique.dedup();
	if unique.len() != threshold.participants.len() {
		return invalid("threshold.participants contains duplicates".into());
	}
	if let Some(stranger) = threshold
		.local_parties
		.iter()
		.find(|p| !threshold.participants.contains(p))
	{
		return invalid(format!("local party {} is not a participant", stranger));
	}
	if threshold.round_timeout_ms == 0
		|| threshold.session_timeout_secs == 0
		|| threshold.sign_timeout_ms == 0
	{
		return invalid("threshold timeouts must be non-zero".into());
	}
	if threshold.max_concurrent_sessions == 0 {
		return invalid("threshold.max_concurrent_sessions must be at least 1".into());
	}

	if config.chains.settlement_chain == config.chains.staking_chain {
		return invalid("settlement_chain and staking_chain must differ".into());
	}
	if config.chains.temporary_holder.is_empty() {
		return invalid("chains.temporary_holder must be set".into());
	}

	if config.settlement.batch_size == 0 {
		return invalid("settlement.batch_size must be at least 1".into());
	}
	if config.settlement.batch_interval_ms == 0 {
		return invalid("settlement.batch_interval_ms must be non-zero".into());
	}

	let orchestrator = &config.orchestrator;
	if orchestrator.busy_threshold >= orchestrator.overload_threshold {
		return invalid(format!(
			"orchestrator.busy_threshold ({}) must be below overload_threshold ({})",
			orchestrator.busy_threshold, orchestrator.overload_threshold
		));
	}
	if orchestrator.sweep_interval_ms == 0 {
		return invalid("orchestrator.sweep_interval_ms must be non-zero".into());
	}

	Ok(())
}
