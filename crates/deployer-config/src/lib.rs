//! Configuration module for the contract deployer.
//!
//! This module provides the structures for the deployer configuration and
//! loads them from TOML. Environment variables are substituted before parsing
//! with `${VAR}` or `${VAR:-default}`, which is how mnemonics are normally
//! supplied.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["network.toml", "accounts.toml"]` to include other files
//! - Each top-level section must be unique across all files

mod loader;

use deployer_types::{GasPrice, NetworkConfig, SecretString};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the deployer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Target chain settings.
	pub network: NetworkConfig,
	/// Signing accounts.
	pub account: AccountConfig,
	/// Transaction submission settings.
	#[serde(default)]
	pub delivery: DeliveryConfig,
	/// Artifact and refs locations used by the deploy tasks.
	#[serde(default)]
	pub deploy: DeployConfig,
}

/// Signing account configuration.
///
/// Several tester mnemonics may be configured; `tester_index` (1-based)
/// selects the active one.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Candidate mnemonics, in tester order.
	pub mnemonics: Vec<SecretString>,
	/// 1-based index of the active mnemonic.
	/// Defaults to 1; values outside the list fall back to the first mnemonic.
	#[serde(default = "default_tester_index")]
	pub tester_index: usize,
	/// Derive keys with coin type 118 instead of Terra's 330.
	#[serde(default)]
	pub coin_type_118: bool,
}

impl AccountConfig {
	/// Returns the mnemonic for `tester` (or the configured index).
	pub fn mnemonic(&self, tester: Option<usize>) -> Option<&SecretString> {
		let index = tester.unwrap_or(self.tester_index);
		index
			.checked_sub(1)
			.and_then(|i| self.mnemonics.get(i))
			.or_else(|| self.mnemonics.first())
	}

	/// BIP-44 coin type used for key derivation.
	pub fn coin_type(&self) -> u32 {
		if self.coin_type_118 {
			118
		} else {
			330
		}
	}
}

fn default_tester_index() -> usize {
	1
}

/// Transaction submission settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
	/// Simulate transactions to estimate gas. When false the fixed
	/// fallback fee is used.
	#[serde(default = "default_auto_estimate_fee")]
	pub auto_estimate_fee: bool,
	/// Polling used to wait for a transaction to be included.
	#[serde(default)]
	pub confirmation: ConfirmationConfig,
}

impl Default for DeliveryConfig {
	fn default() -> Self {
		Self {
			auto_estimate_fee: default_auto_estimate_fee(),
			confirmation: ConfirmationConfig::default(),
		}
	}
}

fn default_auto_estimate_fee() -> bool {
	true
}

/// Bounded polling for transaction inclusion.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfirmationConfig {
	/// Seconds between lookups.
	#[serde(default = "default_poll_interval_seconds")]
	pub poll_interval_seconds: u64,
	/// Lookups before giving up.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
}

impl ConfirmationConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_seconds)
	}
}

impl Default for ConfirmationConfig {
	fn default() -> Self {
		Self {
			poll_interval_seconds: default_poll_interval_seconds(),
			max_attempts: default_max_attempts(),
		}
	}
}

fn default_poll_interval_seconds() -> u64 {
	2
}

fn default_max_attempts() -> u32 {
	30
}

/// Locations used by the deploy tasks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeployConfig {
	/// Directory holding optimized `<contract>.wasm` files.
	#[serde(default = "default_artifacts_dir")]
	pub artifacts_dir: PathBuf,
	/// JSON file recording code ids and contract addresses.
	#[serde(default = "default_refs_file")]
	pub refs_file: PathBuf,
}

impl Default for DeployConfig {
	fn default() -> Self {
		Self {
			artifacts_dir: default_artifacts_dir(),
			refs_file: default_refs_file(),
		}
	}
}

fn default_artifacts_dir() -> PathBuf {
	PathBuf::from("./artifacts")
}

fn default_refs_file() -> PathBuf {
	PathBuf::from("./refs.json")
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB.
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
		let var_name = var_name.as_str();
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)));
				},
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let base_dir = path
			.parent()
			.filter(|p| !p.as_os_str().is_empty())
			.unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path.display())))?;
		loader.load_config(file_name).await
	}

	/// Validates the configuration.
	///
	/// - Network endpoint, chain id, prefix and denom are set
	/// - Gas price parses and gas adjustment is positive
	/// - At least one mnemonic is configured and the active one is not blank
	/// - Confirmation polling is bounded and non-zero
	fn validate(&self) -> Result<(), ConfigError> {
		let network = &self.network;
		if network.lcd_url.is_empty() {
			return Err(ConfigError::Validation("network.lcd_url cannot be empty".into()));
		}
		if !network.lcd_url.starts_with("http://") && !network.lcd_url.starts_with("https://") {
			return Err(ConfigError::Validation(format!(
				"network.lcd_url must be an http(s) URL, got '{}'",
				network.lcd_url
			)));
		}
		if network.chain_id.is_empty() {
			return Err(ConfigError::Validation("network.chain_id cannot be empty".into()));
		}
		if network.prefix.is_empty() {
			return Err(ConfigError::Validation("network.prefix cannot be empty".into()));
		}
		if network.denom.is_empty() {
			return Err(ConfigError::Validation("network.denom cannot be empty".into()));
		}
		network
			.gas_price_with_denom()
			.parse::<GasPrice>()
			.map_err(|e| ConfigError::Validation(format!("network.gas_price: {}", e)))?;
		if !(network.gas_adjustment > 0.0) {
			return Err(ConfigError::Validation(
				"network.gas_adjustment must be greater than 0".into(),
			));
		}
		if network.request_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"network.request_timeout_seconds must be greater than 0".into(),
			));
		}

		if self.account.mnemonics.is_empty() {
			return Err(ConfigError::Validation(
				"At least one mnemonic must be configured".into(),
			));
		}
		if self.account.mnemonic(None).is_none_or(|m| m.is_blank()) {
			return Err(ConfigError::Validation(format!(
				"Mnemonic for tester {} is empty",
				self.account.tester_index
			)));
		}

		let confirmation = &self.delivery.confirmation;
		if confirmation.poll_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"delivery.confirmation.poll_interval_seconds must be greater than 0".into(),
			));
		}
		if confirmation.max_attempts == 0 {
			return Err(ConfigError::Validation(
				"delivery.confirmation.max_attempts must be at least 1".into(),
			));
		}
		if confirmation.max_attempts > 1000 {
			return Err(ConfigError::Validation(
				"delivery.confirmation.max_attempts cannot exceed 1000".into(),
			));
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables and validating.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
