//! Configuration for the batch orchestrator.
//!
//! Configuration is TOML. `${VAR}` and `${VAR:-default}` references are resolved
//! from the environment before parsing, and the result is validated before it is
//! returned.
//!
//! ## Modular configuration
//!
//! A file may pull in others with `include = ["chain.toml", "accounts.toml"]`.
//! Every top-level section must appear in exactly one file.

mod loader;

#[cfg(any(test, feature = "testing"))]
pub mod builders;

#[cfg(any(test, feature = "testing"))]
pub use builders::ConfigBuilder;

use batch_types::{Address, BatchMode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use loader::ConfigLoader;

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
		// The full error embeds the whole input; keep only the message.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub batcher: BatcherConfig,
	pub chain: ChainConfig,
	pub account: AccountConfig,
	#[serde(default)]
	pub submission: SubmissionConfig,
	#[serde(default)]
	pub estimation: EstimationConfig,
	#[serde(default)]
	pub polling: PollingConfig,
}

/// Identity of this orchestrator instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatcherConfig {
	/// Name used in logs.
	pub id: String,
	/// Account used when a command does not name one. Defaults to the first
	/// account of the signing authority.
	#[serde(default)]
	pub default_account: Option<Address>,
}

/// Chain client selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Implementation name to raw config table, validated by the implementation's schema.
	pub implementations: HashMap<String, toml::Value>,
}

/// Signing authority selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
}

/// Submission behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmissionConfig {
	/// Batch mode used when the caller does not choose one.
	#[serde(default)]
	pub mode: BatchMode,
	/// Upper bound on the wait for an inclusion status after submission. The
	/// account stays locked for at most this long when the node goes quiet.
	#[serde(default = "default_status_timeout_seconds")]
	pub status_timeout_seconds: u64,
}

impl Default for SubmissionConfig {
	fn default() -> Self {
		Self {
			mode: BatchMode::default(),
			status_timeout_seconds: default_status_timeout_seconds(),
		}
	}
}

impl SubmissionConfig {
	pub fn status_timeout(&self) -> Duration {
		Duration::from_secs(self.status_timeout_seconds)
	}
}

fn default_status_timeout_seconds() -> u64 {
	120
}

/// Limits substituted for forced operations whose estimate failed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstimationConfig {
	#[serde(default = "default_gas_limit")]
	pub default_gas_limit: u64,
	#[serde(default = "default_storage_limit")]
	pub default_storage_limit: u64,
}

impl Default for EstimationConfig {
	fn default() -> Self {
		Self {
			default_gas_limit: default_gas_limit(),
			default_storage_limit: default_storage_limit(),
		}
	}
}

fn default_gas_limit() -> u64 {
	3_000_000
}

fn default_storage_limit() -> u64 {
	100_000
}

/// Bounded polling for delayed effects.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
	#[serde(default = "default_poll_interval_ms")]
	pub interval_ms: u64,
	#[serde(default = "default_poll_timeout_seconds")]
	pub timeout_seconds: u64,
}

impl PollingConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms)
	}

	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_seconds)
	}
}

impl Default for PollingConfig {
	fn default() -> Self {
		Self {
			interval_ms: default_poll_interval_ms(),
			timeout_seconds: default_poll_timeout_seconds(),
		}
	}
}

fn default_poll_interval_ms() -> u64 {
	2_000
}

fn default_poll_timeout_seconds() -> u64 {
	60
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of `VAR_NAME`, or with `default_value` for
/// `${VAR_NAME:-default_value}` when the variable is unset.
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

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let var_name = var_name.as_str();

		let value = match (std::env::var(var_name), cap.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					var_name
				)));
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Checks cross-field constraints serde cannot express.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.batcher.id.is_empty() {
			return Err(ConfigError::Validation("Batcher ID cannot be empty".into()));
		}

		validate_selection("chain", &self.chain.primary, &self.chain.implementations)?;
		validate_selection(
			"account",
			&self.account.primary,
			&self.account.implementations,
		)?;

		if self.submission.status_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"submission.status_timeout_seconds must be greater than 0".into(),
			));
		}

		if self.estimation.default_gas_limit == 0 {
			return Err(ConfigError::Validation(
				"estimation.default_gas_limit must be greater than 0".into(),
			));
		}

		if self.polling.interval_ms == 0 || self.polling.interval_ms > 60_000 {
			return Err(ConfigError::Validation(
				"polling.interval_ms must be between 1 and 60000".into(),
			));
		}
		if self.polling.timeout_seconds == 0 || self.polling.timeout_seconds > 3_600 {
			return Err(ConfigError::Validation(
				"polling.timeout_seconds must be between 1 and 3600".into(),
			));
		}
		if self.polling.interval() > self.polling.timeout() {
			return Err(ConfigError::Validation(
				"polling.interval_ms cannot exceed polling.timeout_seconds".into(),
			));
		}

		Ok(())
	}
}

fn validate_selection(
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

/// Parses a TOML string: environment references are resolved, then the result is
/// validated.
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

	const MINIMAL: &str = r#"
[batcher]
id = "batcher-test"

[chain]
primary = "simulated"
[chain.implementations.simulated]
block_time_ms = 10

[account]
primary = "local"
[account.implementations.local]
private_keys = ["0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"]
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("BATCHER_TEST_HOST", "localhost");
		std::env::set_var("BATCHER_TEST_PORT", "9944");

		let input = "url = \"ws://${BATCHER_TEST_HOST}:${BATCHER_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "url = \"ws://localhost:9944\"");

		std::env::remove_var("BATCHER_TEST_HOST");
		std::env::remove_var("BATCHER_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${BATCHER_MISSING_VAR:-fallback}\"";
		assert_eq!(resolve_env_vars(input).unwrap(), "value = \"fallback\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("value = \"${BATCHER_MISSING_VAR}\"");
		assert!(result
			.unwrap_err()
			.to_string()
			.contains("BATCHER_MISSING_VAR"));
	}

	#[test]
	fn test_defaults_for_optional_sections() {
		let config: Config = MINIMAL.parse().unwrap();

		assert_eq!(config.batcher.id, "batcher-test");
		assert_eq!(config.batcher.default_account, None);
		assert_eq!(config.submission.mode, BatchMode::Atomic);
		assert_eq!(config.submission.status_timeout(), Duration::from_secs(120));
		assert_eq!(config.estimation.default_gas_limit, 3_000_000);
		assert_eq!(config.estimation.default_storage_limit, 100_000);
		assert_eq!(config.polling.interval(), Duration::from_secs(2));
		assert_eq!(config.polling.timeout(), Duration::from_secs(60));
	}

	#[test]
	fn test_full_config() {
		let config_str = format!(
			r#"{}
[submission]
mode = "best_effort"
status_timeout_seconds = 30

[estimation]
default_gas_limit = 5000000

[polling]
interval_ms = 500
timeout_seconds = 10
"#,
			MINIMAL.replace(
				"id = \"batcher-test\"",
				"id = \"batcher-test\"\ndefault_account = \"0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266\""
			)
		);

		let config: Config = config_str.parse().unwrap();
		assert_eq!(config.submission.mode, BatchMode::BestEffort);
		assert_eq!(config.submission.status_timeout(), Duration::from_secs(30));
		assert_eq!(config.estimation.default_gas_limit, 5_000_000);
		assert_eq!(config.estimation.default_storage_limit, 100_000);
		assert_eq!(config.polling.interval(), Duration::from_millis(500));
		assert!(config.batcher.default_account.is_some());
	}

	#[test]
	fn test_config_with_env_vars() {
		std::env::set_var("BATCHER_TEST_ID", "from-env");

		let config: Config = MINIMAL
			.replace("batcher-test", "${BATCHER_TEST_ID}")
			.parse()
			.unwrap();
		assert_eq!(config.batcher.id, "from-env");

		std::env::remove_var("BATCHER_TEST_ID");
	}

	#[test]
	fn test_primary_must_be_configured() {
		let result: Result<Config, _> = MINIMAL.replace("primary = \"local\"", "primary = \"kms\"").parse();

		let error = result.unwrap_err().to_string();
		assert!(error.contains("Primary account 'kms' not found"));
	}

	#[test]
	fn test_polling_bounds() {
		let config_str = format!("{}\n[polling]\ninterval_ms = 0\n", MINIMAL);
		assert!(config_str.parse::<Config>().is_err());

		let config_str = format!(
			"{}\n[polling]\ninterval_ms = 20000\ntimeout_seconds = 10\n",
			MINIMAL
		);
		let error = config_str.parse::<Config>().unwrap_err().to_string();
		assert!(error.contains("cannot exceed"));
	}

	#[test]
	fn test_zero_status_timeout_rejected() {
		let config_str = format!("{}\n[submission]\nstatus_timeout_seconds = 0\n", MINIMAL);
		assert!(matches!(
			config_str.parse::<Config>(),
			Err(ConfigError::Validation(_))
		));
	}
}
