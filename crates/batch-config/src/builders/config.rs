//! Fluent construction of [`Config`] values for tests.

use crate::{
	AccountConfig, BatcherConfig, ChainConfig, Config, EstimationConfig, PollingConfig,
	SubmissionConfig,
};
use batch_types::BatchMode;
use std::collections::HashMap;

/// Builds a `Config` without going through TOML.
///
/// Implementation tables start empty; add them with [`ConfigBuilder::chain`] and
/// [`ConfigBuilder::account`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	batcher_id: String,
	chain_primary: String,
	chain_implementations: HashMap<String, toml::Value>,
	account_primary: String,
	account_implementations: HashMap<String, toml::Value>,
	mode: BatchMode,
	status_timeout_seconds: u64,
	estimation: EstimationConfig,
	polling: PollingConfig,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			batcher_id: "test-batcher".to_string(),
			chain_primary: "simulated".to_string(),
			chain_implementations: HashMap::new(),
			account_primary: "local".to_string(),
			account_implementations: HashMap::new(),
			mode: BatchMode::Atomic,
			status_timeout_seconds: SubmissionConfig::default().status_timeout_seconds,
			estimation: EstimationConfig::default(),
			polling: PollingConfig::default(),
		}
	}

	pub fn batcher_id(mut self, id: impl Into<String>) -> Self {
		self.batcher_id = id.into();
		self
	}

	/// Adds a chain implementation table and makes it primary.
	pub fn chain(mut self, name: impl Into<String>, table: toml::Value) -> Self {
		let name = name.into();
		self.chain_implementations.insert(name.clone(), table);
		self.chain_primary = name;
		self
	}

	/// Adds an account implementation table and makes it primary.
	pub fn account(mut self, name: impl Into<String>, table: toml::Value) -> Self {
		let name = name.into();
		self.account_implementations.insert(name.clone(), table);
		self.account_primary = name;
		self
	}

	pub fn mode(mut self, mode: BatchMode) -> Self {
		self.mode = mode;
		self
	}

	pub fn status_timeout_seconds(mut self, seconds: u64) -> Self {
		self.status_timeout_seconds = seconds;
		self
	}

	pub fn default_limits(mut self, gas_limit: u64, storage_limit: u64) -> Self {
		self.estimation = EstimationConfig {
			default_gas_limit: gas_limit,
			default_storage_limit: storage_limit,
		};
		self
	}

	pub fn polling(mut self, interval_ms: u64, timeout_seconds: u64) -> Self {
		self.polling = PollingConfig {
			interval_ms,
			timeout_seconds,
		};
		self
	}

	pub fn build(self) -> Config {
		Config {
			batcher: BatcherConfig {
				id: self.batcher_id,
				default_account: None,
			},
			chain: ChainConfig {
				primary: self.chain_primary,
				implementations: self.chain_implementations,
			},
			account: AccountConfig {
				primary: self.account_primary,
				implementations: self.account_implementations,
			},
			submission: SubmissionConfig {
				mode: self.mode,
				status_timeout_seconds: self.status_timeout_seconds,
			},
			estimation: self.estimation,
			polling: self.polling,
		}
	}
}
