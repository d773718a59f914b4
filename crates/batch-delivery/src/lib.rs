//! Chain access for the batch orchestrator.
//!
//! A [`ChainClient`] simulates calls for resource estimation, accepts signed
//! batches and reports their progress as a stream of [`TxStatus`] notifications,
//! exposes the execution log of included blocks, and answers read-only queries.
//! The chain also decides which digest authorizes a batch and how native accounts
//! map to EVM addresses.

use async_trait::async_trait;
use batch_types::{
	Address, Batch, BlockHash, Bytes, CallRequest, ConfigSchema, EventRecord,
	ImplementationRegistry, NativeAccount, ResourceEstimate, SignedBatch, TransactionHash,
	TxStatus, B256, U256,
};
use futures::stream::BoxStream;
use thiserror::Error;

pub mod implementations {
	pub mod simulated;
	pub mod substrate;
}

/// Errors that can occur during chain operations.
#[derive(Debug, Error)]
pub enum DeliveryError {
	#[error("Network error: {0}")]
	Network(String),
	/// The dry run of a call failed.
	#[error("Estimation failed: {0}")]
	Estimation(String),
	/// The chain refused the signed batch (bad signature, stale nonce, fees).
	#[error("Submission rejected: {0}")]
	Rejected(String),
	/// A read-only call reverted.
	#[error("Call failed: {0}")]
	Call(String),
	#[error("Unknown block: {0}")]
	UnknownBlock(BlockHash),
	#[error("Invalid configuration: {0}")]
	Configuration(String),
}

/// A batch accepted by the chain.
pub struct SubmittedBatch {
	pub tx_hash: TransactionHash,
	/// Status notifications, in the order the chain reports them. May end without
	/// ever reporting inclusion.
	pub statuses: BoxStream<'static, TxStatus>,
}

/// Capability giving the orchestrator access to a chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Schema of this implementation's config table.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Dry-runs `request` against the current state.
	async fn estimate_resources(
		&self,
		request: &CallRequest,
	) -> Result<ResourceEstimate, DeliveryError>;

	/// Digest `account` must sign to execute `batch` at `nonce`.
	async fn signing_digest(
		&self,
		batch: &Batch,
		account: Address,
		nonce: u64,
	) -> Result<B256, DeliveryError> {
		let _ = account;
		batch
			.signing_digest(nonce)
			.map_err(|e| DeliveryError::Rejected(format!("cannot encode batch: {}", e)))
	}

	/// Submits a signed batch as one extrinsic.
	async fn submit(&self, batch: SignedBatch) -> Result<SubmittedBatch, DeliveryError>;

	/// Events the given extrinsic emitted in `block`, in log order.
	async fn block_events(
		&self,
		block: BlockHash,
		tx_hash: TransactionHash,
	) -> Result<Vec<EventRecord>, DeliveryError>;

	/// Executes a read-only call and returns the raw return data.
	async fn call(&self, request: &CallRequest) -> Result<Bytes, DeliveryError>;

	/// Free native balance of `address`.
	async fn get_balance(&self, address: Address) -> Result<U256, DeliveryError>;

	/// EVM transaction count of `address`, used to derive contract addresses.
	async fn transaction_count(&self, address: Address) -> Result<u64, DeliveryError>;

	/// Nonce the next signed batch of `address` must carry.
	async fn account_nonce(&self, address: Address) -> Result<u64, DeliveryError>;

	/// EVM address bound to `account` by a claim, if any.
	async fn evm_address_of(
		&self,
		account: &NativeAccount,
	) -> Result<Option<Address>, DeliveryError>;

	async fn is_claimed(&self, account: &NativeAccount) -> Result<bool, DeliveryError> {
		Ok(self.evm_address_of(account).await?.is_some())
	}

	/// Address `account` is given when it claims its default.
	fn default_evm_address(&self, account: &NativeAccount) -> Address;
}

/// Factory signature every chain client implementation provides.
pub type ChainFactory = fn(&toml::Value) -> Result<Box<dyn ChainClient>, DeliveryError>;

/// Registry trait for chain client implementations.
pub trait ChainRegistry: ImplementationRegistry<Factory = ChainFactory> {}

/// All chain client implementations, as `(config name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, ChainFactory)> {
	use implementations::{simulated, substrate};

	vec![
		(simulated::Registry::NAME, simulated::Registry::factory()),
		(substrate::Registry::NAME, substrate::Registry::factory()),
	]
}
