//! Node-backed chain client.
//!
//! `SubstrateChain` talks to an EVM-enabled Substrate node over its websocket RPC.
//! Batches become one `utility.batchAll` (or `utility.batch`) extrinsic whose
//! items are `evm.create`, `evm.call`, `evm.selfdestruct` and
//! `evmAccounts.claimDefaultAccount` calls. The extrinsic is immortal and signed
//! by the native account derived from the signer's Ethereum key; the signed
//! digest is the keccak256 of its signing payload.
//!
//! Config table:
//!
//! ```toml
//! [chain.implementations.substrate]
//! ws_url = "ws://127.0.0.1:9944"
//! ```

mod runtime;

use crate::{ChainClient, ChainFactory, ChainRegistry, DeliveryError, SubmittedBatch};
use async_trait::async_trait;
use batch_types::{
	truncate_id, Address, Batch, BlockHash, Bytes, CallRequest, ConfigSchema, EventRecord,
	Field, FieldType, ImplementationRegistry, NativeAccount, ResourceEstimate, Schema,
	SignedBatch, TransactionHash, TxStatus, ValidationError, B256, U256,
};
use futures::{future, StreamExt};
use runtime::{
	account_id, attribute_items, batch_call, bytes_of, chain_event, dry_run_args,
	execution_info, signer_address, u256_of, EthereumSignature, EvmSubstrateConfig,
	ExecutionInfo,
};
use subxt::config::DefaultExtrinsicParamsBuilder;
use subxt::dynamic::{At, Value};
use subxt::error::DispatchError;
use subxt::events::EventDetails;
use subxt::ext::scale_value::Composite;
use subxt::tx::{PartialExtrinsic, TxStatus as NodeStatus};
use subxt::utils::H256;
use subxt::{Metadata, OnlineClient};
use tracing::{debug, info, warn};

type Client = OnlineClient<EvmSubstrateConfig>;

/// Chain client backed by a Substrate node.
pub struct SubstrateChain {
	client: Client,
}

fn network<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> DeliveryError + '_ {
	move |e| DeliveryError::Network(format!("{}: {}", context, e))
}

fn block_hash(hash: H256) -> BlockHash {
	BlockHash(B256::from(hash.0))
}

impl SubstrateChain {
	/// Connects to the node at `ws_url`. Plain `ws://` is accepted for any host.
	pub async fn new(ws_url: &str) -> Result<Self, DeliveryError> {
		let client = if ws_url.starts_with("wss://") {
			Client::from_url(ws_url).await
		} else {
			Client::from_insecure_url(ws_url).await
		}
		.map_err(|e| DeliveryError::Network(format!("Failed to connect to {}: {}", ws_url, e)))?;

		info!(url = %ws_url, "Connected to chain node");
		Ok(Self { client })
	}

	/// Unsigned form of the batch extrinsic at `nonce`. Signing and submission
	/// rebuild it from the same inputs, so both see the same payload.
	fn partial(
		&self,
		batch: &Batch,
		nonce: u64,
	) -> Result<PartialExtrinsic<EvmSubstrateConfig, Client>, DeliveryError> {
		let call = batch_call(batch).map_err(DeliveryError::Rejected)?;
		let params = DefaultExtrinsicParamsBuilder::<EvmSubstrateConfig>::new()
			.nonce(nonce)
			.build();
		self.client
			.tx()
			.create_partial_signed_offline(&call, params)
			.map_err(|e| DeliveryError::Rejected(format!("cannot build extrinsic: {}", e)))
	}

	async fn fetch(
		&self,
		pallet: &str,
		entry: &str,
		key: Value,
	) -> Result<Option<Value<u32>>, DeliveryError> {
		let context = format!("{}.{}", pallet, entry);
		let address = subxt::dynamic::storage(pallet, entry, vec![key]);
		let storage = self
			.client
			.storage()
			.at_latest()
			.await
			.map_err(network(&context))?;
		let thunk = storage.fetch(&address).await.map_err(network(&context))?;
		thunk
			.map(|thunk| thunk.to_value())
			.transpose()
			.map_err(|e| DeliveryError::Network(format!("cannot decode {}: {}", context, e)))
	}

	/// Runs `request` through the node's EVM runtime API. Network problems come
	/// back as [`DeliveryError::Network`], execution failures through `failed`.
	async fn dry_run(
		&self,
		request: &CallRequest,
		estimate: bool,
		failed: fn(String) -> DeliveryError,
	) -> Result<ExecutionInfo, DeliveryError> {
		let (method, args) = dry_run_args(request, estimate).map_err(failed)?;
		let payload =
			subxt::dynamic::runtime_api_call("EVMRuntimeRPCApi", method, Composite::unnamed(args));
		let result = self
			.client
			.runtime_api()
			.at_latest()
			.await
			.map_err(network("dry run"))?
			.call(payload)
			.await
			.map_err(network("dry run"))?
			.to_value()
			.map_err(|e| DeliveryError::Network(format!("cannot decode dry run: {}", e)))?;

		execution_info(&result, request.to.is_none()).map_err(failed)
	}
}

/// Decoded dispatch error of `ExtrinsicFailed` and `BatchInterrupted`.
fn dispatch_reason(
	event: &EventDetails<EvmSubstrateConfig>,
	metadata: &Metadata,
) -> Option<String> {
	let bytes = event.field_bytes();
	let error = match (event.pallet_name(), event.variant_name()) {
		("System", "ExtrinsicFailed") => bytes,
		// u32 item index first
		("Utility", "BatchInterrupted") => bytes.get(4..)?,
		_ => return None,
	};
	DispatchError::decode_from(error, metadata.clone())
		.ok()
		.map(|e| e.to_string())
}

/// Node pool notification as a [`TxStatus`]. `NoLongerInBestBlock` retracts the
/// last block the extrinsic was seen in.
fn tx_status(
	status: NodeStatus<EvmSubstrateConfig, Client>,
	last_block: &mut Option<BlockHash>,
) -> Option<TxStatus> {
	Some(match status {
		NodeStatus::Validated => TxStatus::Ready,
		NodeStatus::Broadcasted { .. } => TxStatus::Broadcast,
		NodeStatus::InBestBlock(included) => {
			let block = block_hash(included.block_hash());
			*last_block = Some(block);
			TxStatus::InBlock(block)
		},
		NodeStatus::InFinalizedBlock(included) => {
			TxStatus::Finalized(block_hash(included.block_hash()))
		},
		NodeStatus::NoLongerInBestBlock => TxStatus::Retracted(last_block.take()?),
		NodeStatus::Invalid { message } => TxStatus::Invalid(message),
		NodeStatus::Dropped { .. } => TxStatus::Dropped,
		NodeStatus::Error { message } => TxStatus::Invalid(format!("node error: {}", message)),
	})
}

/// Configuration schema for the node-backed chain.
pub struct SubstrateChainSchema;

impl SubstrateChainSchema {
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		SubstrateChainSchema.validate(config)
	}
}

impl ConfigSchema for SubstrateChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("ws_url", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(url) if url.starts_with("ws://") || url.starts_with("wss://") => Ok(()),
					_ => Err("expected a ws:// or wss:// URL".to_string()),
				}
			})],
			vec![],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl ChainClient for SubstrateChain {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(SubstrateChainSchema)
	}

	async fn estimate_resources(
		&self,
		request: &CallRequest,
	) -> Result<ResourceEstimate, DeliveryError> {
		let info = self
			.dry_run(request, true, DeliveryError::Estimation)
			.await?;
		Ok(ResourceEstimate {
			gas: info.used_gas,
			storage: info.used_storage,
		})
	}

	async fn signing_digest(
		&self,
		batch: &Batch,
		account: Address,
		nonce: u64,
	) -> Result<B256, DeliveryError> {
		let payload = self.partial(batch, nonce)?.signer_payload();
		debug!(
			account = %account,
			nonce,
			payload_len = payload.len(),
			"Built signing payload"
		);
		Ok(alloy_primitives::keccak256(payload))
	}

	async fn submit(&self, batch: SignedBatch) -> Result<SubmittedBatch, DeliveryError> {
		let signature = EthereumSignature::from_slice(&batch.signature.0).ok_or_else(|| {
			DeliveryError::Rejected(format!(
				"expected a 65-byte signature, got {} bytes",
				batch.signature.0.len()
			))
		})?;
		let extrinsic = self
			.partial(&batch.batch, batch.nonce)?
			.sign_with_address_and_signature(&signer_address(batch.signer), &signature);
		let tx_hash = TransactionHash(B256::from(extrinsic.hash().0));

		let progress = extrinsic
			.submit_and_watch()
			.await
			.map_err(|e| DeliveryError::Rejected(e.to_string()))?;

		info!(
			tx_hash = %truncate_id(&tx_hash.to_string()),
			signer = %batch.signer,
			nonce = batch.nonce,
			items = batch.batch.len(),
			"Submitted batch extrinsic"
		);

		let statuses = progress
			.scan(None, |last_block, status| {
				let next = match status {
					Ok(status) => Some(tx_status(status, last_block)),
					Err(e) => {
						warn!(error = %e, "Status subscription ended");
						None
					},
				};
				future::ready(next)
			})
			.filter_map(future::ready);

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
		let context = format!("block {}", block);
		let node_block = self
			.client
			.blocks()
			.at(H256(block.0 .0))
			.await
			.map_err(|_| DeliveryError::UnknownBlock(block))?;
		let extrinsics = node_block
			.extrinsics()
			.await
			.map_err(network(&context))?;
		let extrinsic = extrinsics
			.iter()
			.find(|extrinsic| extrinsic.hash().0 == tx_hash.0 .0)
			.ok_or_else(|| {
				DeliveryError::Network(format!("{} does not contain {}", context, tx_hash))
			})?;

		let metadata = self.client.metadata();
		let mut events = Vec::new();
		for event in extrinsic.events().await.map_err(network(&context))?.iter() {
			let event = event.map_err(network(&context))?;
			let fields = event.field_values().map_err(network(&context))?;
			let reason = dispatch_reason(&event, &metadata);
			events.push((
				event.index(),
				chain_event(event.pallet_name(), event.variant_name(), &fields, reason),
			));
		}

		Ok(attribute_items(events))
	}

	async fn call(&self, request: &CallRequest) -> Result<Bytes, DeliveryError> {
		if request.to.is_none() {
			return Err(DeliveryError::Call("view calls need a target".to_string()));
		}
		let info = self.dry_run(request, false, DeliveryError::Call).await?;
		Ok(Bytes::from(info.output))
	}

	async fn get_balance(&self, address: Address) -> Result<U256, DeliveryError> {
		let account = account_id(&NativeAccount::from_evm_address(address));
		let free = self
			.fetch("System", "Account", Value::from_bytes(account.0))
			.await?
			.and_then(|info| info.at("data").at("free").and_then(u256_of));
		Ok(free.unwrap_or_default())
	}

	async fn transaction_count(&self, address: Address) -> Result<u64, DeliveryError> {
		let nonce = self
			.fetch("EVM", "Accounts", Value::from_bytes(address))
			.await?
			.and_then(|info| info.at("nonce").and_then(Value::as_u128));
		Ok(nonce.map(|n| u64::try_from(n).unwrap_or(u64::MAX)).unwrap_or(0))
	}

	async fn account_nonce(&self, address: Address) -> Result<u64, DeliveryError> {
		let account = account_id(&NativeAccount::from_evm_address(address));
		self.client
			.tx()
			.account_nonce(&account)
			.await
			.map_err(network("account nonce"))
	}

	async fn evm_address_of(
		&self,
		account: &NativeAccount,
	) -> Result<Option<Address>, DeliveryError> {
		let bound = self
			.fetch("EvmAccounts", "EvmAddresses", Value::from_bytes(account.as_bytes()))
			.await?;
		Ok(bound
			.as_ref()
			.and_then(bytes_of)
			.filter(|bytes| bytes.len() == 20)
			.map(|bytes| Address::from_slice(&bytes)))
	}

	fn default_evm_address(&self, account: &NativeAccount) -> Address {
		runtime::default_evm_address(account)
	}
}

/// Factory for [`SubstrateChain`].
pub fn create_chain(config: &toml::Value) -> Result<Box<dyn ChainClient>, DeliveryError> {
	SubstrateChainSchema::validate_config(config)
		.map_err(|e| DeliveryError::Configuration(e.to_string()))?;

	let ws_url = config
		.get("ws_url")
		.and_then(toml::Value::as_str)
		.ok_or_else(|| DeliveryError::Configuration("ws_url is required".to_string()))?;

	// Connecting is async; the factory is not
	let chain = tokio::task::block_in_place(|| {
		tokio::runtime::Handle::current().block_on(async { SubstrateChain::new(ws_url).await })
	})?;

	Ok(Box::new(chain))
}

/// Registry for the node-backed chain.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "substrate";
	type Factory = ChainFactory;

	fn factory() -> Self::Factory {
		create_chain
	}
}

impl ChainRegistry for Registry {}
