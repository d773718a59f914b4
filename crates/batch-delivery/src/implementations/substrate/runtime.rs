//! Runtime shapes of an EVM-enabled Substrate chain: the signed-extrinsic config,
//! dynamic call values and the decoding of events and dry-run results.

use alloy_sol_types::decode_revert_reason;
use batch_types::{
	AccessListItem, Address, Batch, BatchMode, CallRequest, ChainEvent, EventRecord,
	NativeAccount, OperationRequest, RequestKind, U256,
};
use subxt::config::substrate::{BlakeTwo256, SubstrateHeader};
use subxt::config::{Config, Hasher, SubstrateExtrinsicParams};
use subxt::dynamic::{At, Value};
use subxt::ext::codec::{Encode, Output};
use subxt::ext::scale_value::{Composite, Primitive, ValueDef};
use subxt::tx::DynamicPayload;
use subxt::utils::{AccountId32, MultiAddress, H256};

/// Gas ceiling for dry runs.
pub const DRY_RUN_GAS_LIMIT: u64 = 29_000_000;
/// Storage ceiling for dry runs, in bytes.
pub const DRY_RUN_STORAGE_LIMIT: u32 = 640_000;

/// Position of the Ethereum variant in the runtime's multi-signature enum.
const ETHEREUM_SIGNATURE_VARIANT: u8 = 3;

/// Extrinsic format of a chain whose accounts may sign with Ethereum keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmSubstrateConfig {}

impl Config for EvmSubstrateConfig {
	type Hash = H256;
	type AccountId = AccountId32;
	type Address = MultiAddress<AccountId32, u32>;
	type Signature = EthereumSignature;
	type Hasher = BlakeTwo256;
	type Header = SubstrateHeader<u32, BlakeTwo256>;
	type ExtrinsicParams = SubstrateExtrinsicParams<Self>;
	type AssetId = u32;
}

/// Recoverable secp256k1 signature, `r ++ s ++ v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthereumSignature(pub [u8; 65]);

impl EthereumSignature {
	pub fn from_slice(bytes: &[u8]) -> Option<Self> {
		<[u8; 65]>::try_from(bytes).ok().map(Self)
	}
}

impl Encode for EthereumSignature {
	fn size_hint(&self) -> usize {
		1 + self.0.len()
	}

	fn encode_to<O: Output + ?Sized>(&self, dest: &mut O) {
		dest.push_byte(ETHEREUM_SIGNATURE_VARIANT);
		dest.write(&self.0);
	}
}

pub fn account_id(account: &NativeAccount) -> AccountId32 {
	AccountId32(*account.as_bytes())
}

/// Extrinsic address of the native account behind an Ethereum key.
pub fn signer_address(signer: Address) -> MultiAddress<AccountId32, u32> {
	MultiAddress::Id(account_id(&NativeAccount::from_evm_address(signer)))
}

/// `blake2_256("evm:" ++ id)[..20]`, unless the account embeds an EVM address.
pub fn default_evm_address(account: &NativeAccount) -> Address {
	account.embedded_evm_address().unwrap_or_else(|| {
		let hash = BlakeTwo256::hash(&account.default_address_preimage());
		Address::from_slice(&hash.0[..20])
	})
}

fn balance(value: U256) -> Result<u128, String> {
	u128::try_from(value).map_err(|_| format!("value {} exceeds the native balance range", value))
}

fn access_list(items: &[AccessListItem]) -> Value {
	Value::unnamed_composite(items.iter().map(|item| {
		Value::named_composite([
			("address", Value::from_bytes(item.address)),
			(
				"storage_keys",
				Value::unnamed_composite(item.storage_keys.iter().map(Value::from_bytes)),
			),
		])
	}))
}

/// `RuntimeCall` value of one batch item.
pub fn runtime_call(request: &OperationRequest) -> Result<Value, String> {
	let execution = |target: Option<Address>| -> Result<Vec<(&'static str, Value)>, String> {
		let mut fields = Vec::with_capacity(6);
		if let Some(target) = target {
			fields.push(("target", Value::from_bytes(target)));
		}
		fields.extend([
			("input", Value::from_bytes(&request.data)),
			("value", Value::u128(balance(request.value)?)),
			("gas_limit", Value::u128(request.gas_limit.into())),
			(
				"storage_limit",
				Value::u128(u32::try_from(request.storage_limit).unwrap_or(u32::MAX).into()),
			),
			("access_list", access_list(&request.access_list)),
		]);
		Ok(fields)
	};

	let (pallet, call) = match &request.kind {
		RequestKind::Create => ("EVM", Value::named_variant("create", execution(None)?)),
		RequestKind::Call { to } => ("EVM", Value::named_variant("call", execution(Some(*to))?)),
		RequestKind::Destroy { contract } => (
			"EVM",
			Value::named_variant("selfdestruct", [("contract", Value::from_bytes(contract))]),
		),
		RequestKind::ClaimDefaultAccount => (
			"EvmAccounts",
			Value::unnamed_variant("claim_default_account", Vec::<Value>::new()),
		),
	};
	Ok(Value::unnamed_variant(pallet, [call]))
}

/// `utility.batchAll` for atomic batches, `utility.batch` otherwise.
pub fn batch_call(batch: &Batch) -> Result<DynamicPayload, String> {
	let calls = batch
		.requests()
		.iter()
		.map(runtime_call)
		.collect::<Result<Vec<_>, _>>()?;
	let method = match batch.mode {
		BatchMode::Atomic => "batch_all",
		BatchMode::BestEffort => "batch",
	};
	Ok(subxt::dynamic::tx(
		"Utility",
		method,
		vec![("calls", Value::unnamed_composite(calls))],
	))
}

/// Method and positional arguments of the `EVMRuntimeRPCApi` dry run for
/// `request`.
pub fn dry_run_args(
	request: &CallRequest,
	estimate: bool,
) -> Result<(&'static str, Vec<Value>), String> {
	let mut args = vec![Value::from_bytes(request.from)];
	let method = match request.to {
		Some(to) => {
			args.push(Value::from_bytes(to));
			"call"
		},
		None => "create",
	};
	args.extend([
		Value::from_bytes(&request.data),
		Value::u128(balance(request.value)?),
		Value::u128(DRY_RUN_GAS_LIMIT.into()),
		Value::u128(DRY_RUN_STORAGE_LIMIT.into()),
		Value::unnamed_variant("None", Vec::<Value>::new()),
		Value::bool(estimate),
	]);
	Ok((method, args))
}

/// Successful dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionInfo {
	pub used_gas: u64,
	pub used_storage: i64,
	/// Return data of calls. Empty for creations.
	pub output: Vec<u8>,
}

/// Decodes a dry-run result, `Result<ExecutionInfo, DispatchError>`. Reverts
/// come back as `Err` with the revert reason. The `value` of a creation is the
/// new address, not return data.
pub fn execution_info<C>(result: &Value<C>, creation: bool) -> Result<ExecutionInfo, String> {
	let info = match &result.value {
		ValueDef::Variant(variant) if variant.name == "Ok" => variant
			.values
			.values()
			.next()
			.ok_or_else(|| "empty dry-run result".to_string())?,
		ValueDef::Variant(variant) if variant.name == "Err" => {
			let reason = variant.values.values().next().map(variant_path);
			return Err(format!(
				"dispatch error: {}",
				reason.unwrap_or_else(|| "unknown".to_string())
			));
		},
		_ => return Err("unexpected dry-run result".to_string()),
	};

	let output = match info.at("value") {
		Some(value) if !creation => bytes_of(value).unwrap_or_default(),
		_ => Vec::new(),
	};
	let exit_reason = info
		.at("exit_reason")
		.ok_or_else(|| "dry-run result has no exit reason".to_string())?;
	if !is_variant(exit_reason, "Succeed") {
		return Err(failure_reason(exit_reason, &output));
	}

	let used_gas = info
		.at("used_gas")
		.and_then(u256_of)
		.ok_or_else(|| "dry-run result has no gas usage".to_string())?;
	let used_storage = info
		.at("used_storage")
		.and_then(Value::as_i128)
		.and_then(|storage| i64::try_from(storage).ok())
		.ok_or_else(|| "dry-run result has no storage usage".to_string())?;

	Ok(ExecutionInfo {
		used_gas: used_gas.saturating_to(),
		used_storage,
		output,
	})
}

fn is_variant<C>(value: &Value<C>, name: &str) -> bool {
	matches!(&value.value, ValueDef::Variant(variant) if variant.name == name)
}

/// Variant names from the outermost inwards, e.g. `Revert::Reverted`.
pub fn variant_path<C>(value: &Value<C>) -> String {
	let mut path = Vec::new();
	let mut current = Some(value);
	while let Some(ValueDef::Variant(variant)) = current.map(|value| &value.value) {
		path.push(variant.name.as_str());
		current = variant.values.values().next();
	}
	if path.is_empty() {
		"unknown".to_string()
	} else {
		path.join("::")
	}
}

/// Revert message when the output carries one, else the exit reason.
fn failure_reason<C>(exit_reason: &Value<C>, output: &[u8]) -> String {
	if output.is_empty() {
		return variant_path(exit_reason);
	}
	decode_revert_reason(output)
		.filter(|reason| !reason.is_empty())
		.unwrap_or_else(|| variant_path(exit_reason))
}

/// Flattens a value made of bytes, such as `H160` or `Vec<u8>`.
pub fn bytes_of<C>(value: &Value<C>) -> Option<Vec<u8>> {
	match &value.value {
		ValueDef::Primitive(Primitive::U128(byte)) => u8::try_from(*byte).ok().map(|b| vec![b]),
		ValueDef::Composite(composite) => composite
			.values()
			.map(bytes_of)
			.collect::<Option<Vec<_>>>()
			.map(|parts| parts.concat()),
		_ => None,
	}
}

/// Accepts a primitive or a `U256([u64; 4])` composite.
pub fn u256_of<C>(value: &Value<C>) -> Option<U256> {
	match &value.value {
		ValueDef::Primitive(Primitive::U128(n)) => Some(U256::from(*n)),
		ValueDef::Primitive(Primitive::U256(bytes)) => Some(U256::from_le_bytes(*bytes)),
		ValueDef::Composite(composite) => {
			let values: Vec<_> = composite.values().collect();
			match values.as_slice() {
				[inner] => u256_of(inner),
				limbs => {
					let limbs = limbs
						.iter()
						.map(|limb| limb.as_u128().and_then(|n| u64::try_from(n).ok()))
						.collect::<Option<Vec<_>>>()?;
					<[u64; 4]>::try_from(limbs).ok().map(U256::from_limbs)
				},
			}
		},
		_ => None,
	}
}

fn address_at<C>(fields: &Composite<C>, name: &str) -> Option<Address> {
	let bytes = bytes_of(fields.at(name)?)?;
	(bytes.len() == 20).then(|| Address::from_slice(&bytes))
}

fn account_at<C>(fields: &Composite<C>, name: &str) -> Option<NativeAccount> {
	let bytes = bytes_of(fields.at(name)?)?;
	<[u8; 32]>::try_from(bytes)
		.ok()
		.map(|id| NativeAccount(id.into()))
}

fn execution_failure<C>(fields: &Composite<C>) -> String {
	let output = fields.at("output").and_then(bytes_of).unwrap_or_default();
	match fields.at("exit_reason") {
		Some(exit_reason) => failure_reason(exit_reason, &output),
		None => "unknown".to_string(),
	}
}

/// Maps a runtime event to a [`ChainEvent`]. `dispatch_reason` is the decoded
/// dispatch error of `ExtrinsicFailed` and `BatchInterrupted`.
pub fn chain_event<C>(
	pallet: &str,
	variant: &str,
	fields: &Composite<C>,
	dispatch_reason: Option<String>,
) -> ChainEvent {
	let reason = |fields: &Composite<C>, key: &str| {
		dispatch_reason
			.clone()
			.unwrap_or_else(|| fields.at(key).map(variant_path).unwrap_or_default())
	};
	let known = || -> Option<ChainEvent> {
		Some(match (pallet, variant) {
			("EVM", "Created") => ChainEvent::Created {
				from: address_at(fields, "from")?,
				contract: address_at(fields, "contract")?,
			},
			("EVM", "CreatedFailed") => ChainEvent::CreatedFailed {
				from: address_at(fields, "from")?,
				contract: address_at(fields, "contract")?,
				reason: execution_failure(fields),
			},
			("EVM", "Executed") => ChainEvent::Executed {
				from: address_at(fields, "from")?,
				contract: address_at(fields, "contract")?,
			},
			("EVM", "ExecutedFailed") => ChainEvent::ExecutedFailed {
				from: address_at(fields, "from")?,
				contract: address_at(fields, "contract")?,
				reason: execution_failure(fields),
			},
			("EVM", "ContractSelfdestructed") => ChainEvent::Destroyed {
				contract: address_at(fields, "contract")?,
			},
			("EvmAccounts", "ClaimAccount") => ChainEvent::AccountClaimed {
				account: account_at(fields, "account_id")?,
				evm_address: address_at(fields, "evm_address")?,
			},
			("Utility", "ItemCompleted") => ChainEvent::ItemCompleted,
			("Utility", "BatchCompleted") => ChainEvent::BatchCompleted,
			("Utility", "BatchInterrupted") => ChainEvent::BatchInterrupted {
				index: fields
					.at("index")?
					.as_u128()
					.and_then(|index| u32::try_from(index).ok())?,
				reason: reason(fields, "error"),
			},
			("System", "ExtrinsicSuccess") => ChainEvent::ExtrinsicSuccess,
			("System", "ExtrinsicFailed") => ChainEvent::ExtrinsicFailed {
				reason: reason(fields, "dispatch_error"),
			},
			_ => return None,
		})
	};

	known().unwrap_or_else(|| ChainEvent::Other {
		section: pallet.to_string(),
		method: variant.to_string(),
	})
}

/// Numbers the events of one batch extrinsic. Item events belong to the item
/// whose `ItemCompleted` has not been seen yet.
pub fn attribute_items(events: impl IntoIterator<Item = (u32, ChainEvent)>) -> Vec<EventRecord> {
	let mut item = 0u32;
	events
		.into_iter()
		.map(|(position, event)| {
			let call_index = match event {
				ChainEvent::ItemCompleted => {
					item += 1;
					Some(item - 1)
				},
				ChainEvent::Created { .. }
				| ChainEvent::CreatedFailed { .. }
				| ChainEvent::Executed { .. }
				| ChainEvent::ExecutedFailed { .. }
				| ChainEvent::Destroyed { .. }
				| ChainEvent::AccountClaimed { .. } => Some(item),
				_ => None,
			};
			EventRecord::new(position, call_index, event)
		})
		.collect()
}
