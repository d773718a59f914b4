//! In-process chain client.
//!
//! `SimulatedChain` keeps a ledger of accounts and contracts and executes signed
//! batches the way a batching runtime does: items run in order, each consumes one
//! EVM nonce, creations are charged a storage deposit, and destroyed contracts
//! refund their deposit after a delay. Native accounts can claim their default EVM
//! address once, and an address is bound to at most one account. Each accepted batch is included in its own
//! block after `block_time_ms`, reported as `Ready`, `Broadcast`, `InBlock` and
//! (optionally) `Finalized`.
//!
//! Config table:
//!
//! ```toml
//! [chain.implementations.simulated]
//! block_time_ms = 100
//! finalize = true
//! gas_price = 1
//! deposit_per_byte = 1000
//! refund_delay_ms = 4000
//! genesis = [{ address = "0xf39F...", balance = "1000000000000000000000" }]
//! ```
//!
//! Tests can script estimation and execution failures, view-call results and the
//! status notifications of the next submission.

mod state;

use crate::{ChainClient, ChainFactory, ChainRegistry, DeliveryError, SubmittedBatch};
use async_trait::async_trait;
use batch_types::{
	truncate_id, Address, BlockHash, Bytes, CallRequest, ConfigSchema, EventRecord, Field,
	FieldType, ImplementationRegistry, NativeAccount, ResourceEstimate, Schema, SignedBatch,
	TransactionHash, TxStatus, ValidationError, U256,
};
use futures::StreamExt;
use state::{
	block_hash, default_evm_address, extrinsic_hash, ChainState, Economics, ScriptedFailure,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Duration, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Replaces the normal lifecycle of the next submission.
///
/// Scripted submissions are accepted but never executed.
#[derive(Debug, Clone)]
pub enum SubmissionScript {
	/// Emits the statuses, then closes the stream.
	Statuses(Vec<TxStatus>),
	/// Emits the statuses and keeps the stream open forever.
	Stall(Vec<TxStatus>),
}

/// Parameters of a [`SimulatedChain`].
#[derive(Debug, Clone)]
pub struct SimulatedChainConfig {
	pub block_time: Duration,
	/// Report `Finalized` one block time after `InBlock`.
	pub finalize: bool,
	pub gas_price: U256,
	pub deposit_per_byte: U256,
	pub refund_delay: Duration,
	pub genesis: Vec<(Address, U256)>,
}

impl Default for SimulatedChainConfig {
	fn default() -> Self {
		Self {
			block_time: Duration::from_millis(100),
			finalize: true,
			gas_price: U256::from(1u64),
			deposit_per_byte: U256::from(1_000u64),
			refund_delay: Duration::from_secs(4),
			genesis: Vec::new(),
		}
	}
}

struct Inner {
	block_time: Duration,
	finalize: bool,
	economics: Economics,
	state: Mutex<ChainState>,
	scripts: Mutex<VecDeque<SubmissionScript>>,
}

/// Chain client backed by an in-memory ledger.
#[derive(Clone)]
pub struct SimulatedChain {
	inner: Arc<Inner>,
}

impl SimulatedChain {
	pub fn new(config: SimulatedChainConfig) -> Self {
		let mut state = ChainState::default();
		for (address, balance) in &config.genesis {
			state.accounts.entry(*address).or_default().balance = *balance;
		}
		// Genesis block, so that block numbers start at 1 for submissions.
		state.blocks.insert(block_hash(0), Vec::new());

		Self {
			inner: Arc::new(Inner {
				block_time: config.block_time,
				finalize: config.finalize,
				economics: Economics {
					gas_price: config.gas_price,
					deposit_per_byte: config.deposit_per_byte,
					refund_delay: config.refund_delay,
				},
				state: Mutex::new(state),
				scripts: Mutex::new(VecDeque::new()),
			}),
		}
	}

	/// Credits `amount` to `address`.
	pub async fn fund(&self, address: Address, amount: U256) {
		let mut state = self.inner.state.lock().await;
		let account = state.accounts.entry(address).or_default();
		account.balance = account.balance.saturating_add(amount);
	}

	/// Makes every estimation matching `matches` fail with `reason`.
	pub async fn fail_estimation_when<F>(&self, matches: F, reason: impl Into<String>)
	where
		F: Fn(&CallRequest) -> bool + Send + Sync + 'static,
	{
		self.inner
			.state
			.lock()
			.await
			.estimation_failures
			.push(ScriptedFailure {
				matches: Box::new(matches),
				reason: reason.into(),
			});
	}

	/// Makes every executed item matching `matches` revert with `reason`.
	pub async fn fail_execution_when<F>(&self, matches: F, reason: impl Into<String>)
	where
		F: Fn(&CallRequest) -> bool + Send + Sync + 'static,
	{
		self.inner
			.state
			.lock()
			.await
			.execution_failures
			.push(ScriptedFailure {
				matches: Box::new(matches),
				reason: reason.into(),
			});
	}

	/// Answers view calls to `to` with exactly `data` with `result`.
	pub async fn set_call_result(&self, to: Address, data: Bytes, result: Bytes) {
		self.inner
			.state
			.lock()
			.await
			.call_results
			.insert((to, data), result);
	}

	/// Binds `evm_address` to `account` as if it had been claimed.
	pub async fn bind_evm_address(&self, account: NativeAccount, evm_address: Address) {
		self.inner
			.state
			.lock()
			.await
			.bindings
			.insert(account, evm_address);
	}

	/// Overrides the lifecycle of the next submission.
	pub async fn script_next_submission(&self, script: SubmissionScript) {
		self.inner.scripts.lock().await.push_back(script);
	}

	/// Deployed code at `address`, if any.
	pub async fn code_at(&self, address: Address) -> Option<Bytes> {
		self.inner
			.state
			.lock()
			.await
			.contracts
			.get(&address)
			.map(|contract| contract.code.clone())
	}

	/// Number of the latest block.
	pub async fn block_number(&self) -> u64 {
		self.inner.state.lock().await.block_number
	}

	fn spawn_lifecycle(
		&self,
		batch: SignedBatch,
		tx_hash: TransactionHash,
		script: Option<SubmissionScript>,
	) -> ReceiverStream<TxStatus> {
		let (sender, receiver) = mpsc::channel(16);
		let inner = Arc::clone(&self.inner);

		tokio::spawn(async move {
			// Send errors mean the caller stopped listening; the extrinsic still runs.
			match script {
				Some(SubmissionScript::Statuses(statuses)) => {
					for status in statuses {
						let _ = sender.send(status).await;
					}
				},
				Some(SubmissionScript::Stall(statuses)) => {
					for status in statuses {
						let _ = sender.send(status).await;
					}
					std::future::pending::<()>().await;
				},
				None => {
					let _ = sender.send(TxStatus::Ready).await;
					let _ = sender.send(TxStatus::Broadcast).await;
					tokio::time::sleep(inner.block_time).await;

					let block = {
						let mut state = inner.state.lock().await;
						state.produce_block(&batch, tx_hash, &inner.economics, Instant::now())
					};
					info!(
						tx_hash = %truncate_id(&tx_hash.to_string()),
						block = %truncate_id(&block.to_string()),
						"Batch included"
					);
					let _ = sender.send(TxStatus::InBlock(block)).await;

					if inner.finalize {
						tokio::time::sleep(inner.block_time).await;
						let _ = sender.send(TxStatus::Finalized(block)).await;
					}
				},
			}
		});

		ReceiverStream::new(receiver)
	}
}

/// Configuration schema for the simulated chain.
pub struct SimulatedChainSchema;

impl SimulatedChainSchema {
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		SimulatedChainSchema.validate(config)
	}
}

fn is_amount(value: &toml::Value) -> Result<(), String> {
	match value.as_str() {
		Some(amount) if amount.parse::<U256>().is_ok() => Ok(()),
		_ => Err("expected a decimal or 0x-prefixed amount".to_string()),
	}
}

impl ConfigSchema for SimulatedChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let genesis_entry = Schema::new(
			vec![
				Field::new("address", FieldType::String).with_validator(|value| {
					match value.as_str().map(str::parse::<Address>) {
						Some(Ok(_)) => Ok(()),
						_ => Err("expected a 20-byte hex address".to_string()),
					}
				}),
				Field::new("balance", FieldType::String).with_validator(is_amount),
			],
			vec![],
		);

		let schema = Schema::new(
			vec![],
			vec![
				Field::new(
					"block_time_ms",
					FieldType::Integer {
						min: Some(0),
						max: Some(60_000),
					},
				),
				Field::new("finalize", FieldType::Boolean),
				Field::new(
					"gas_price",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"deposit_per_byte",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"refund_delay_ms",
					FieldType::Integer {
						min: Some(0),
						max: Some(3_600_000),
					},
				),
				Field::new(
					"genesis",
					FieldType::Array(Box::new(FieldType::Table(genesis_entry))),
				),
			],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl ChainClient for SimulatedChain {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(SimulatedChainSchema)
	}

	async fn estimate_resources(
		&self,
		request: &CallRequest,
	) -> Result<ResourceEstimate, DeliveryError> {
		let state = self.inner.state.lock().await;
		state.estimate(request).map_err(DeliveryError::Estimation)
	}

	async fn submit(&self, batch: SignedBatch) -> Result<SubmittedBatch, DeliveryError> {
		{
			let state = self.inner.state.lock().await;
			state
				.validate_extrinsic(&batch, self.inner.economics.gas_price)
				.map_err(DeliveryError::Rejected)?;
		}

		let tx_hash = extrinsic_hash(&batch);
		let script = self.inner.scripts.lock().await.pop_front();
		debug!(
			tx_hash = %truncate_id(&tx_hash.to_string()),
			items = batch.batch.len(),
			scripted = script.is_some(),
			"Accepted batch into pool"
		);

		let statuses = self.spawn_lifecycle(batch, tx_hash, script);
		Ok(SubmittedBatch {
			tx_hash,
			statuses: statuses.boxed(),
		})
	}

	async fn block_events(
		&self,
		block: BlockHash,
		tx_hash: TransactionHash,
	) -> Result<Vec<EventRecord>, DeliveryError> {
		let state = self.inner.state.lock().await;
		let log = state
			.blocks
			.get(&block)
			.ok_or(DeliveryError::UnknownBlock(block))?;

		Ok(log
			.iter()
			.filter(|event| event.extrinsic == Some(tx_hash))
			.map(|event| event.record.clone())
			.collect())
	}

	async fn call(&self, request: &CallRequest) -> Result<Bytes, DeliveryError> {
		let to = request
			.to
			.ok_or_else(|| DeliveryError::Call("view calls need a target".to_string()))?;
		let state = self.inner.state.lock().await;

		if let Some(result) = state.call_results.get(&(to, request.data.clone())) {
			return Ok(result.clone());
		}
		if state.contracts.contains_key(&to) {
			Err(DeliveryError::Call("execution reverted".to_string()))
		} else {
			Err(DeliveryError::Call(format!("no contract deployed at {}", to)))
		}
	}

	async fn get_balance(&self, address: Address) -> Result<U256, DeliveryError> {
		let mut state = self.inner.state.lock().await;
		state.settle_refunds(Instant::now());
		Ok(state.account(&address).balance)
	}

	async fn transaction_count(&self, address: Address) -> Result<u64, DeliveryError> {
		Ok(self.inner.state.lock().await.account(&address).evm_nonce)
	}

	async fn account_nonce(&self, address: Address) -> Result<u64, DeliveryError> {
		Ok(self.inner.state.lock().await.account(&address).nonce)
	}

	async fn evm_address_of(
		&self,
		account: &NativeAccount,
	) -> Result<Option<Address>, DeliveryError> {
		Ok(self.inner.state.lock().await.bindings.get(account).copied())
	}

	fn default_evm_address(&self, account: &NativeAccount) -> Address {
		default_evm_address(account)
	}
}

fn integer(config: &toml::Value, key: &str) -> Option<u64> {
	config
		.get(key)
		.and_then(toml::Value::as_integer)
		.and_then(|value| u64::try_from(value).ok())
}

/// Factory for [`SimulatedChain`].
pub fn create_chain(config: &toml::Value) -> Result<Box<dyn ChainClient>, DeliveryError> {
	SimulatedChainSchema::validate_config(config)
		.map_err(|e| DeliveryError::Configuration(e.to_string()))?;

	let defaults = SimulatedChainConfig::default();
	let mut genesis = Vec::new();
	for entry in config
		.get("genesis")
		.and_then(toml::Value::as_array)
		.map(Vec::as_slice)
		.unwrap_or_default()
	{
		let address = entry
			.get("address")
			.and_then(toml::Value::as_str)
			.and_then(|s| s.parse::<Address>().ok());
		let balance = entry
			.get("balance")
			.and_then(toml::Value::as_str)
			.and_then(|s| s.parse::<U256>().ok());
		match (address, balance) {
			(Some(address), Some(balance)) => genesis.push((address, balance)),
			_ => {
				return Err(DeliveryError::Configuration(
					"invalid genesis entry".to_string(),
				));
			},
		}
	}

	let chain = SimulatedChain::new(SimulatedChainConfig {
		block_time: integer(config, "block_time_ms")
			.map(Duration::from_millis)
			.unwrap_or(defaults.block_time),
		finalize: config
			.get("finalize")
			.and_then(toml::Value::as_bool)
			.unwrap_or(defaults.finalize),
		gas_price: integer(config, "gas_price")
			.map(U256::from)
			.unwrap_or(defaults.gas_price),
		deposit_per_byte: integer(config, "deposit_per_byte")
			.map(U256::from)
			.unwrap_or(defaults.deposit_per_byte),
		refund_delay: integer(config, "refund_delay_ms")
			.map(Duration::from_millis)
			.unwrap_or(defaults.refund_delay),
		genesis,
	});

	Ok(Box::new(chain))
}

/// Registry for the simulated chain.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "simulated";
	type Factory = ChainFactory;

	fn factory() -> Self::Factory {
		create_chain
	}
}

impl ChainRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_signer::SignerSync;
	use alloy_signer_local::PrivateKeySigner;
	use batch_types::{Batch, BatchMode, ChainEvent, OperationRequest, RequestKind, Signature};

	const ETHER: u64 = 1_000_000_000_000_000_000;

	fn signer() -> PrivateKeySigner {
		"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
			.parse()
			.unwrap()
	}

	fn chain(finalize: bool) -> SimulatedChain {
		SimulatedChain::new(SimulatedChainConfig {
			block_time: Duration::from_millis(10),
			finalize,
			genesis: vec![(signer().address(), U256::from(ETHER))],
			..Default::default()
		})
	}

	fn create(code: &'static [u8]) -> OperationRequest {
		OperationRequest {
			kind: RequestKind::Create,
			data: Bytes::from_static(code),
			value: U256::ZERO,
			gas_limit: 1_000_000,
			storage_limit: 1_000,
			access_list: Vec::new(),
			estimated: true,
		}
	}

	fn call(to: Address) -> OperationRequest {
		OperationRequest {
			kind: RequestKind::Call { to },
			data: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
			..create(&[])
		}
	}

	fn claim() -> OperationRequest {
		OperationRequest {
			kind: RequestKind::ClaimDefaultAccount,
			gas_limit: 0,
			storage_limit: 0,
			..create(&[])
		}
	}

	fn sign(batch: Batch, nonce: u64) -> SignedBatch {
		let signer = signer();
		let digest = batch.signing_digest(nonce).unwrap();
		let signature = signer.sign_hash_sync(&digest).unwrap();
		SignedBatch {
			batch,
			signer: signer.address(),
			nonce,
			signature: Signature(signature.as_bytes().to_vec()),
		}
	}

	async fn included(submitted: SubmittedBatch) -> BlockHash {
		let statuses: Vec<TxStatus> = submitted.statuses.collect().await;
		statuses
			.iter()
			.find_map(TxStatus::included_in)
			.expect("batch was not included")
	}

	#[tokio::test]
	async fn test_estimate_create_and_missing_contract() {
		let chain = chain(false);
		let from = signer().address();

		let estimate = chain
			.estimate_resources(&CallRequest {
				from,
				to: None,
				value: U256::ZERO,
				data: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
			})
			.await
			.unwrap();
		assert_eq!(estimate.gas, 21_000 + 32_000 + 4 * 16);
		assert_eq!(estimate.storage, 4);

		let result = chain
			.estimate_resources(&CallRequest {
				from,
				to: Some(Address::repeat_byte(9)),
				value: U256::ZERO,
				data: Bytes::new(),
			})
			.await;
		assert!(matches!(result, Err(DeliveryError::Estimation(_))));
	}

	#[tokio::test(start_paused = true)]
	async fn test_batch_lifecycle_and_events() {
		let chain = chain(true);
		let from = signer().address();
		let predicted = from.create(0);

		let batch = Batch::new(
			BatchMode::Atomic,
			vec![create(&[0x60, 0x80]), call(predicted)],
		);
		let submitted = chain.submit(sign(batch, 0)).await.unwrap();
		let tx_hash = submitted.tx_hash;
		let statuses: Vec<TxStatus> = submitted.statuses.collect().await;

		assert_eq!(statuses[0], TxStatus::Ready);
		assert!(matches!(statuses[2], TxStatus::InBlock(_)));
		assert!(matches!(statuses[3], TxStatus::Finalized(_)));

		let block = statuses[2].included_in().unwrap();
		let events = chain.block_events(block, tx_hash).await.unwrap();
		assert_eq!(
			events[0].event,
			ChainEvent::Created {
				from,
				contract: predicted
			}
		);
		assert_eq!(events[0].call_index, Some(0));
		assert_eq!(events.last().unwrap().event, ChainEvent::ExtrinsicSuccess);
		assert!(events.iter().all(|record| record.position > 0));

		assert_eq!(chain.account_nonce(from).await.unwrap(), 1);
		assert_eq!(chain.transaction_count(from).await.unwrap(), 2);
		assert!(chain.code_at(predicted).await.is_some());
	}

	#[tokio::test(start_paused = true)]
	async fn test_atomic_failure_reverts_everything() {
		let chain = chain(false);
		let from = signer().address();
		chain
			.fail_execution_when(|call| call.data.starts_with(&[0xde, 0xad]), "revert: paused")
			.await;

		let batch = Batch::new(
			BatchMode::Atomic,
			vec![create(&[0x60]), call(from.create(0))],
		);
		let submitted = chain.submit(sign(batch, 0)).await.unwrap();
		let tx_hash = submitted.tx_hash;
		let block = included(submitted).await;

		let events = chain.block_events(block, tx_hash).await.unwrap();
		assert_eq!(events.len(), 2);
		assert_eq!(events[0].call_index, Some(1));
		assert_eq!(events[0].event.failure_reason(), Some("revert: paused"));
		assert!(matches!(events[1].event, ChainEvent::ExtrinsicFailed { .. }));

		assert!(chain.code_at(from.create(0)).await.is_none());
		assert_eq!(chain.transaction_count(from).await.unwrap(), 0);
		assert_eq!(chain.account_nonce(from).await.unwrap(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_best_effort_keeps_earlier_items() {
		let chain = chain(false);
		let from = signer().address();

		let batch = Batch::new(
			BatchMode::BestEffort,
			vec![create(&[0x60]), call(Address::repeat_byte(7)), create(&[0x61])],
		);
		let submitted = chain.submit(sign(batch, 0)).await.unwrap();
		let tx_hash = submitted.tx_hash;
		let block = included(submitted).await;

		let events = chain.block_events(block, tx_hash).await.unwrap();
		assert!(events.iter().any(|record| matches!(
			record.event,
			ChainEvent::BatchInterrupted { index: 1, .. }
		)));
		assert!(chain.code_at(from.create(0)).await.is_some());
		assert!(chain.code_at(from.create(2)).await.is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_destroy_refunds_after_delay() {
		let chain = chain(false);
		let from = signer().address();

		let submitted = chain
			.submit(sign(Batch::new(BatchMode::Atomic, vec![create(&[0x60; 10])]), 0))
			.await
			.unwrap();
		included(submitted).await;
		let before = chain.get_balance(from).await.unwrap();

		let destroy = OperationRequest {
			kind: RequestKind::Destroy {
				contract: from.create(0),
			},
			gas_limit: 0,
			..create(&[])
		};
		let submitted = chain
			.submit(sign(Batch::new(BatchMode::Atomic, vec![destroy]), 1))
			.await
			.unwrap();
		included(submitted).await;
		assert_eq!(chain.get_balance(from).await.unwrap(), before);

		tokio::time::advance(Duration::from_secs(5)).await;
		assert_eq!(
			chain.get_balance(from).await.unwrap(),
			before + U256::from(10_000u64)
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_claim_binds_default_address_once() {
		let chain = chain(false);
		let from = signer().address();
		let account = NativeAccount::from_evm_address(from);
		assert!(!chain.is_claimed(&account).await.unwrap());

		let submitted = chain
			.submit(sign(Batch::new(BatchMode::Atomic, vec![claim()]), 0))
			.await
			.unwrap();
		let tx_hash = submitted.tx_hash;
		let block = included(submitted).await;

		let events = chain.block_events(block, tx_hash).await.unwrap();
		assert_eq!(
			events[0].event,
			ChainEvent::AccountClaimed {
				account,
				evm_address: from
			}
		);
		assert_eq!(chain.evm_address_of(&account).await.unwrap(), Some(from));
		// Claims are not EVM transactions.
		assert_eq!(chain.transaction_count(from).await.unwrap(), 0);

		let submitted = chain
			.submit(sign(Batch::new(BatchMode::Atomic, vec![claim()]), 1))
			.await
			.unwrap();
		let tx_hash = submitted.tx_hash;
		let block = included(submitted).await;
		let events = chain.block_events(block, tx_hash).await.unwrap();
		assert_eq!(events.len(), 1);
		assert!(events[0]
			.event
			.failure_reason()
			.unwrap()
			.contains("AccountIdHasMapped"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_claim_of_address_bound_elsewhere() {
		let chain = chain(false);
		let from = signer().address();
		let other = NativeAccount(batch_types::B256::repeat_byte(0x77));
		chain.bind_evm_address(other, from).await;

		let submitted = chain
			.submit(sign(Batch::new(BatchMode::BestEffort, vec![claim()]), 0))
			.await
			.unwrap();
		let tx_hash = submitted.tx_hash;
		let block = included(submitted).await;

		let events = chain.block_events(block, tx_hash).await.unwrap();
		assert!(events.iter().any(|record| record.event
			== ChainEvent::BatchInterrupted {
				index: 0,
				reason: "EthAddressHasMapped".to_string()
			}));
		assert_eq!(
			chain
				.evm_address_of(&NativeAccount::from_evm_address(from))
				.await
				.unwrap(),
			None
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_atomic_failure_reverts_claim() {
		let chain = chain(false);
		let from = signer().address();

		let batch = Batch::new(
			BatchMode::Atomic,
			vec![claim(), call(Address::repeat_byte(7))],
		);
		let submitted = chain.submit(sign(batch, 0)).await.unwrap();
		included(submitted).await;

		assert!(!chain
			.is_claimed(&NativeAccount::from_evm_address(from))
			.await
			.unwrap());
	}

	#[test]
	fn test_default_evm_address() {
		let chain = chain(false);
		let from = signer().address();
		assert_eq!(
			chain.default_evm_address(&NativeAccount::from_evm_address(from)),
			from
		);

		let plain = NativeAccount(batch_types::B256::repeat_byte(0x42));
		let derived = chain.default_evm_address(&plain);
		let mut preimage = b"evm:".to_vec();
		preimage.extend_from_slice(plain.as_bytes());
		assert_eq!(
			derived,
			Address::from_slice(&alloy_primitives::keccak256(preimage)[..20])
		);
	}

	#[tokio::test]
	async fn test_rejects_stale_nonce_and_forged_signature() {
		let chain = chain(false);

		let batch = Batch::new(BatchMode::Atomic, vec![create(&[0x60])]);
		let mut forged = sign(batch.clone(), 0);
		forged.signer = Address::repeat_byte(1);
		assert!(matches!(
			chain.submit(forged).await,
			Err(DeliveryError::Rejected(_))
		));

		let result = chain.submit(sign(batch, 3)).await;
		match result {
			Err(DeliveryError::Rejected(reason)) => assert!(reason.contains("future nonce")),
			_ => panic!("expected rejection"),
		}
	}

	#[tokio::test]
	async fn test_scripted_statuses() {
		let chain = chain(false);
		chain
			.script_next_submission(SubmissionScript::Statuses(vec![
				TxStatus::Ready,
				TxStatus::Dropped,
			]))
			.await;

		let submitted = chain
			.submit(sign(Batch::new(BatchMode::Atomic, vec![create(&[0x60])]), 0))
			.await
			.unwrap();
		let statuses: Vec<TxStatus> = submitted.statuses.collect().await;

		assert_eq!(statuses, vec![TxStatus::Ready, TxStatus::Dropped]);
		assert_eq!(chain.block_number().await, 0);
	}

	#[tokio::test]
	async fn test_factory_from_config() {
		let config: toml::Value = toml::from_str(
			r#"
			block_time_ms = 5
			finalize = false
			genesis = [{ address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266", balance = "1000" }]
			"#,
		)
		.unwrap();

		let chain = create_chain(&config).unwrap();
		assert_eq!(
			chain.get_balance(signer().address()).await.unwrap(),
			U256::from(1_000u64)
		);

		let bad: toml::Value =
			toml::from_str("genesis = [{ address = \"0x12\", balance = \"1\" }]").unwrap();
		assert!(create_chain(&bad).is_err());
	}
}
