//! Signing authorities for the batch orchestrator.
//!
//! A signing authority owns the accounts batches execute as and produces the
//! signature that authorizes a batch at a given account nonce. Interactive wallets
//! may take arbitrarily long to answer, or refuse.

use async_trait::async_trait;
use batch_types::{Address, Batch, ConfigSchema, ImplementationRegistry, SignedBatch, B256};
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// The signer refused to sign.
	#[error("Signing rejected: {0}")]
	Rejected(String),
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// The authority does not control the requested account.
	#[error("Unknown account: {0}")]
	UnknownAccount(Address),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// Capability that authorizes batches on behalf of accounts.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait SigningAuthority: Send + Sync {
	/// Schema of this implementation's config table.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Accounts this authority can sign for, in configuration order.
	async fn accounts(&self) -> Result<Vec<Address>, AccountError>;

	/// Signs `batch` as `account` at `nonce` by signing `digest`, the value the
	/// chain derived for exactly this batch, account and nonce.
	///
	/// May suspend indefinitely while waiting for a user decision.
	async fn sign_batch(
		&self,
		account: Address,
		batch: &Batch,
		nonce: u64,
		digest: B256,
	) -> Result<SignedBatch, AccountError>;
}

/// Factory signature every signing authority implementation provides.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn SigningAuthority>, AccountError>;

/// Registry trait for signing authority implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// All signing authority implementations, as `(config name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}
