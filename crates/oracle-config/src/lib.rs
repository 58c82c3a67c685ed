//! Configuration module for the cricket oracle.
//!
//! Configuration is read from TOML, with `${VAR}` and `${VAR:-default}`
//! placeholders resolved from the environment before parsing. Pluggable
//! sections (`account`, `delivery`, `storage`) carry a `primary` name and a
//! map of raw implementation tables that the matching factory validates.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["network.toml", "sequence.toml"]` in the main file
//! - Each top-level section must be unique across all files

mod loader;

use oracle_types::Address;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Smallest gas multiplier accepted over an estimate.
pub const MIN_GAS_MULTIPLIER: f64 = 1.5;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// The message alone, without the input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the oracle.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Oracle identity and receipt-wait settings.
	pub oracle: OracleConfig,
	/// Ledger endpoint and the factory contract.
	pub network: NetworkConfig,
	/// Signing account.
	pub account: AccountConfig,
	/// Chain client and fee policy.
	pub delivery: DeliveryConfig,
	/// Ball sequence timing and retry policy.
	#[serde(default)]
	pub sequence: SequenceConfig,
	/// Checkpoint storage.
	pub storage: StorageConfig,
}

/// Oracle instance settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OracleConfig {
	/// Identifier used in logs.
	pub id: String,
	/// How long a submission waits for its receipt.
	#[serde(default = "default_receipt_timeout_seconds")]
	pub receipt_timeout_seconds: u64,
	/// Interval between receipt polls.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	/// Blocks that must be built on top of a receipt before it counts.
	#[serde(default = "default_min_confirmations")]
	pub min_confirmations: u64,
}

fn default_receipt_timeout_seconds() -> u64 {
	120
}

fn default_poll_interval_ms() -> u64 {
	1000
}

fn default_min_confirmations() -> u64 {
	1
}

impl OracleConfig {
	pub fn receipt_timeout(&self) -> Duration {
		Duration::from_secs(self.receipt_timeout_seconds)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}
}

/// Ledger connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
	pub rpc_url: String,
	pub chain_id: u64,
	/// Address of the factory that deploys game contracts.
	pub factory_address: Address,
}

/// Configuration for the signing account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the chain client and transaction fees.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
	/// Which chain client implementation to use.
	pub primary: String,
	/// Map of chain client implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Multiplier applied to every gas estimate.
	#[serde(default = "default_gas_multiplier")]
	pub gas_multiplier: f64,
	/// Fixed gas limit. When set, estimation is skipped.
	#[serde(default)]
	pub gas_limit: Option<u64>,
}

fn default_gas_multiplier() -> f64 {
	2.0
}

/// What the sequence runner does when close is confirmed but report is not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialCompletionPolicy {
	/// Record the ball as partially complete and move on.
	#[default]
	Surface,
	/// Re-issue only the report under the retry policy, then record.
	RetryReport,
}

/// Timing of the automated ball sequence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SequenceConfig {
	/// Delay between consecutive balls.
	#[serde(default = "default_pacing_ms")]
	pub pacing_ms: u64,
	/// How long a ball stays open for betting.
	#[serde(default = "default_betting_window_ms")]
	pub betting_window_ms: u64,
	/// Delay between close and report.
	#[serde(default = "default_settle_delay_ms")]
	pub settle_delay_ms: u64,
	#[serde(default)]
	pub partial_completion: PartialCompletionPolicy,
	#[serde(default)]
	pub retry: RetryConfig,
}

fn default_pacing_ms() -> u64 {
	1000
}

fn default_betting_window_ms() -> u64 {
	5000
}

fn default_settle_delay_ms() -> u64 {
	2000
}

impl Default for SequenceConfig {
	fn default() -> Self {
		Self {
			pacing_ms: default_pacing_ms(),
			betting_window_ms: default_betting_window_ms(),
			settle_delay_ms: default_settle_delay_ms(),
			partial_completion: PartialCompletionPolicy::default(),
			retry: RetryConfig::default(),
		}
	}
}

/// Exponential backoff for retryable submissions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
	#[serde(default = "default_initial_interval_ms")]
	pub initial_interval_ms: u64,
	#[serde(default = "default_max_interval_ms")]
	pub max_interval_ms: u64,
	#[serde(default = "default_retry_multiplier")]
	pub multiplier: f64,
	/// Total attempts, including the first.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
}

fn default_initial_interval_ms() -> u64 {
	500
}

fn default_max_interval_ms() -> u64 {
	10_000
}

fn default_retry_multiplier() -> f64 {
	2.0
}

fn default_max_attempts() -> u32 {
	3
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			initial_interval_ms: default_initial_interval_ms(),
			max_interval_ms: default_max_interval_ms(),
			multiplier: default_retry_multiplier(),
			max_attempts: default_max_attempts(),
		}
	}
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable and
/// supports defaults with `${VAR_NAME:-default_value}`.
///
/// Input is limited to 1MB to bound regex work.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply in reverse so earlier offsets stay valid
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

fn require_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if implementations.is_empty() {
		return Err(ConfigError::Validation(format!(
			"At least one {} implementation must be configured",
			section
		)));
	}
	if primary.is_empty() {
		return Err(ConfigError::Validation(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.oracle.id.is_empty() {
			return Err(ConfigError::Validation("Oracle ID cannot be empty".into()));
		}
		if self.oracle.receipt_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"receipt_timeout_seconds must be greater than 0".into(),
			));
		}
		if self.oracle.poll_interval_ms == 0 {
			return Err(ConfigError::Validation(
				"poll_interval_ms must be greater than 0".into(),
			));
		}
		if self.oracle.min_confirmations == 0 || self.oracle.min_confirmations > 100 {
			return Err(ConfigError::Validation(
				"min_confirmations must be between 1 and 100".into(),
			));
		}

		if self.network.rpc_url.is_empty() {
			return Err(ConfigError::Validation("network.rpc_url cannot be empty".into()));
		}
		if self.network.chain_id == 0 {
			return Err(ConfigError::Validation("network.chain_id cannot be 0".into()));
		}
		if self.network.factory_address == Address::ZERO {
			return Err(ConfigError::Validation(
				"network.factory_address cannot be the zero address".into(),
			));
		}

		require_primary("account", &self.account.primary, &self.account.implementations)?;
		require_primary(
			"delivery",
			&self.delivery.primary,
			&self.delivery.implementations,
		)?;
		require_primary("storage", &self.storage.primary, &self.storage.implementations)?;

		if !(self.delivery.gas_multiplier >= MIN_GAS_MULTIPLIER) {
			return Err(ConfigError::Validation(format!(
				"delivery.gas_multiplier must be at least {}, got {}",
				MIN_GAS_MULTIPLIER, self.delivery.gas_multiplier
			)));
		}
		if self.delivery.gas_limit == Some(0) {
			return Err(ConfigError::Validation(
				"delivery.gas_limit must be greater than 0".into(),
			));
		}

		let retry = &self.sequence.retry;
		if retry.max_attempts == 0 {
			return Err(ConfigError::Validation(
				"sequence.retry.max_attempts must be at least 1".into(),
			));
		}
		if !(retry.multiplier >= 1.0) {
			return Err(ConfigError::Validation(
				"sequence.retry.multiplier must be at least 1.0".into(),
			));
		}
		if retry.initial_interval_ms > retry.max_interval_ms {
			return Err(ConfigError::Validation(
				"sequence.retry.initial_interval_ms cannot exceed max_interval_ms".into(),
			));
		}

		Ok(())
	}
}

impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASE_CONFIG: &str = r#"
[oracle]
id = "oracle-test"

[network]
rpc_url = "http://localhost:8545"
chain_id = 31337
factory_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"

[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"

[delivery]
primary = "mock"
[delivery.implementations.mock]

[storage]
primary = "memory"
[storage.implementations.memory]
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("ORACLE_TEST_HOST", "localhost");
		std::env::set_var("ORACLE_TEST_PORT", "8545");

		let input = "rpc_url = \"http://${ORACLE_TEST_HOST}:${ORACLE_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "rpc_url = \"http://localhost:8545\"");

		std::env::remove_var("ORACLE_TEST_HOST");
		std::env::remove_var("ORACLE_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${ORACLE_UNSET_VAR:-fallback}\"";
		assert_eq!(resolve_env_vars(input).unwrap(), "value = \"fallback\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("key = \"${ORACLE_MISSING_VAR}\"");
		assert!(result.is_err());
		assert!(result
			.unwrap_err()
			.to_string()
			.contains("ORACLE_MISSING_VAR"));
	}

	#[test]
	fn test_defaults_applied() {
		let config: Config = BASE_CONFIG.parse().unwrap();
		assert_eq!(config.oracle.receipt_timeout(), Duration::from_secs(120));
		assert_eq!(config.oracle.min_confirmations, 1);
		assert_eq!(config.delivery.gas_multiplier, 2.0);
		assert_eq!(config.delivery.gas_limit, None);
		assert_eq!(config.sequence.pacing_ms, 1000);
		assert_eq!(
			config.sequence.partial_completion,
			PartialCompletionPolicy::Surface
		);
		assert_eq!(config.sequence.retry.max_attempts, 3);
		assert_eq!(config.network.chain_id, 31337);
	}

	#[test]
	fn test_sequence_section_parsed() {
		let input = format!(
			"{}\n[sequence]\npacing_ms = 10\npartial_completion = \"retry_report\"\n[sequence.retry]\nmax_attempts = 5\n",
			BASE_CONFIG
		);
		let config: Config = input.parse().unwrap();
		assert_eq!(config.sequence.pacing_ms, 10);
		assert_eq!(config.sequence.betting_window_ms, 5000);
		assert_eq!(
			config.sequence.partial_completion,
			PartialCompletionPolicy::RetryReport
		);
		assert_eq!(config.sequence.retry.max_attempts, 5);
		assert_eq!(config.sequence.retry.initial_interval_ms, 500);
	}

	#[test]
	fn test_low_gas_multiplier_rejected() {
		let input = BASE_CONFIG.replace(
			"primary = \"mock\"",
			"primary = \"mock\"\ngas_multiplier = 1.2",
		);
		let err = input.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("gas_multiplier"));
	}

	#[test]
	fn test_unknown_primary_rejected() {
		let input = BASE_CONFIG.replace("primary = \"memory\"", "primary = \"file\"");
		let err = input.parse::<Config>().unwrap_err();
		assert!(err
			.to_string()
			.contains("Primary storage 'file' not found"));
	}

	#[test]
	fn test_zero_factory_rejected() {
		let input = BASE_CONFIG.replace(
			"0x5FbDB2315678afecb367f032d93F642f64180aa3",
			"0x0000000000000000000000000000000000000000",
		);
		assert!(input.parse::<Config>().is_err());
	}
}
