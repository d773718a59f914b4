//! The batch orchestrator.
//!
//! [`BatchOrchestrator`] is the explicit context every batch flows through: it
//! owns the chain client, the signing authority, the per-account in-flight locks
//! and the settings loaded from configuration. Nothing here is process-global, so
//! several orchestrators (for different chains or accounts) can coexist.

use crate::assembler;
use crate::queries;
use crate::request::{encode_operation, estimation_request, resolve_limits};
use crate::submission::{SubmissionStream, Tracker};
use crate::BatchError;
use batch_account::SigningAuthority;
use batch_config::Config;
use batch_delivery::{ChainClient, DeliveryError};
use batch_types::{
	truncate_id, AccountBinding, Address, Batch, NativeAccount, Operation, OperationRequest, U256,
};
use dashmap::DashMap;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Builds, assembles, submits and reconciles batches for the accounts of one
/// signing authority on one chain.
#[derive(Clone)]
pub struct BatchOrchestrator {
	config: Config,
	chain: Arc<dyn ChainClient>,
	signer: Arc<dyn SigningAuthority>,
	/// One in-flight batch per account.
	locks: Arc<DashMap<Address, Arc<Mutex<()>>>>,
}

impl BatchOrchestrator {
	pub fn new(
		config: Config,
		chain: Arc<dyn ChainClient>,
		signer: Arc<dyn SigningAuthority>,
	) -> Self {
		Self {
			config,
			chain,
			signer,
			locks: Arc::new(DashMap::new()),
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn chain(&self) -> &Arc<dyn ChainClient> {
		&self.chain
	}

	/// Accounts the signing authority can sign for.
	pub async fn accounts(&self) -> Result<Vec<Address>, BatchError> {
		self.signer
			.accounts()
			.await
			.map_err(|e| BatchError::Configuration(format!("cannot list accounts: {}", e)))
	}

	/// The configured default account, or the signing authority's first account.
	pub async fn default_account(&self) -> Result<Address, BatchError> {
		if let Some(account) = self.config.batcher.default_account {
			return Ok(account);
		}
		self.accounts().await?.into_iter().next().ok_or_else(|| {
			BatchError::Configuration("signing authority has no accounts".to_string())
		})
	}

	/// Encodes `operation` and sets its resource limits.
	///
	/// Estimation runs as `account` against the current chain state. An estimation
	/// failure is an error unless the operation is forced, in which case the
	/// configured default limits are used.
	#[instrument(skip_all, fields(account = %account, operation = %operation.label()))]
	pub async fn build_operation_request(
		&self,
		account: Address,
		operation: &Operation,
	) -> Result<OperationRequest, BatchError> {
		let (kind, data) = encode_operation(operation)?;

		let estimate = match estimation_request(account, operation, &kind, &data) {
			None => None,
			Some(request) => match self.chain.estimate_resources(&request).await {
				Ok(estimate) => Some(Ok(estimate)),
				Err(DeliveryError::Estimation(reason)) => Some(Err(reason)),
				Err(e) => {
					return Err(BatchError::ResourceEstimationFailed {
						operation: operation.label(),
						reason: e.to_string(),
					});
				},
			},
		};
		let limits = resolve_limits(operation, estimate, &self.config.estimation)?;

		tracing::debug!(
			gas_limit = limits.gas_limit,
			storage_limit = limits.storage_limit,
			estimated = limits.estimated,
			"Built operation request"
		);
		Ok(OperationRequest {
			kind,
			data,
			value: operation.value(),
			gas_limit: limits.gas_limit,
			storage_limit: limits.storage_limit,
			access_list: Vec::new(),
			estimated: limits.estimated,
		})
	}

	/// Builds requests for all `operations` concurrently.
	///
	/// Every estimate sees the same chain state, so an operation that depends on an
	/// earlier one in the list must be forced. The result keeps the input order; if
	/// several operations fail, the error of the first one is returned.
	pub async fn build_operation_requests(
		&self,
		account: Address,
		operations: &[Operation],
	) -> Result<Vec<OperationRequest>, BatchError> {
		join_all(
			operations
				.iter()
				.map(|operation| self.build_operation_request(account, operation)),
		)
		.await
		.into_iter()
		.collect()
	}

	/// Address of the contract created by a deployment of the next batch of
	/// `account` that follows `offset` other EVM items.
	///
	/// Deployments, calls and destroys each advance the account's transaction
	/// count. Claims do not.
	pub async fn predict_contract_address(
		&self,
		account: Address,
		offset: u64,
	) -> Result<Address, BatchError> {
		let predict = self.contract_address_predictor(account).await?;
		Ok(predict(offset))
	}

	/// Reads the transaction count of `account` once and returns the prediction for
	/// any item offset of its next batch.
	pub async fn contract_address_predictor(
		&self,
		account: Address,
	) -> Result<impl Fn(u64) -> Address, BatchError> {
		let count = self
			.chain
			.transaction_count(account)
			.await
			.map_err(|e| BatchError::Query(format!("transaction count of {}: {}", account, e)))?;
		Ok(move |offset: u64| account.create(count + offset))
	}

	/// The EVM address binding of the native account behind `account`.
	pub async fn account_binding(&self, account: Address) -> Result<AccountBinding, BatchError> {
		let native = NativeAccount::from_evm_address(account);
		let evm_address = self
			.chain
			.evm_address_of(&native)
			.await
			.map_err(|e| BatchError::Query(format!("EVM address of {}: {}", native, e)))?;

		Ok(AccountBinding {
			native,
			evm_address,
			default_evm_address: self.chain.default_evm_address(&native),
		})
	}

	/// Submits a single-item batch binding the default EVM address of `account`.
	///
	/// Fails up front if the account already has a bound address.
	#[instrument(skip_all, fields(account = %account))]
	pub async fn claim_default_account(
		&self,
		account: Address,
	) -> Result<SubmissionStream, BatchError> {
		let binding = self.account_binding(account).await?;
		if let Some(bound) = binding.evm_address {
			return Err(BatchError::InvalidOperation(format!(
				"{} is already bound to {}",
				binding.native, bound
			)));
		}

		let request = self
			.build_operation_request(account, &Operation::claim_default_account())
			.await?;
		let batch = self.assemble_batch(vec![request])?;
		tracing::info!(evm_address = %binding.default_evm_address, "Claiming default EVM address");
		Ok(self.submit_batch(batch, account))
	}

	/// Assembles `requests` in the configured submission mode.
	pub fn assemble_batch(&self, requests: Vec<OperationRequest>) -> Result<Batch, BatchError> {
		assembler::assemble_batch(requests, self.config.submission.mode)
	}

	/// Submits `batch` signed by `account` and returns its progress stream.
	///
	/// Never fails directly: every failure is the terminal item of the stream.
	/// Batches of the same account are signed and submitted one at a time.
	#[instrument(skip_all, fields(batch_id = %truncate_id(&batch.id.to_string()), items = batch.len()))]
	pub fn submit_batch(&self, batch: Batch, account: Address) -> SubmissionStream {
		let account_lock = Arc::clone(self.locks.entry(account).or_default().value());
		tracing::info!(account = %account, mode = ?batch.mode, "Submitting batch");

		Tracker {
			chain: Arc::clone(&self.chain),
			signer: Arc::clone(&self.signer),
			account_lock,
			status_timeout: self.config.submission.status_timeout(),
		}
		.spawn(batch, account)
	}

	pub async fn native_balance(&self, address: Address) -> Result<U256, BatchError> {
		queries::native_balance(self.chain.as_ref(), address).await
	}

	pub async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, BatchError> {
		queries::token_balance(self.chain.as_ref(), token, owner).await
	}

	pub async fn allowance(
		&self,
		token: Address,
		owner: Address,
		spender: Address,
	) -> Result<U256, BatchError> {
		queries::allowance(self.chain.as_ref(), token, owner, spender).await
	}

	pub async fn pool_liquidity(
		&self,
		factory: Address,
		token_a: Address,
		token_b: Address,
		holder: Address,
	) -> Result<U256, BatchError> {
		queries::pool_liquidity(self.chain.as_ref(), factory, token_a, token_b, holder).await
	}

	/// [`queries::poll_until`] with the configured interval and timeout.
	pub async fn poll_until<T, Q, Fut, P>(&self, query: Q, predicate: P) -> Result<T, BatchError>
	where
		Q: FnMut() -> Fut,
		Fut: Future<Output = Result<T, BatchError>>,
		P: FnMut(&T) -> bool,
	{
		queries::poll_until(
			query,
			predicate,
			self.config.polling.interval(),
			self.config.polling.timeout(),
		)
		.await
	}

	/// Waits until the native balance of `address` exceeds `threshold`, e.g. for the
	/// deposit refund of a destroyed contract to arrive.
	#[instrument(skip_all, fields(address = %address, threshold = %threshold))]
	pub async fn wait_for_balance_above(
		&self,
		address: Address,
		threshold: U256,
	) -> Result<U256, BatchError> {
		let balance = self
			.poll_until(
				|| self.native_balance(address),
				|balance| *balance > threshold,
			)
			.await?;
		tracing::info!(balance = %balance, "Balance above threshold");
		Ok(balance)
	}
}
