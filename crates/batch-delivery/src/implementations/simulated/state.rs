//! Ledger and block execution of the simulated chain.

use alloy_primitives::{keccak256, PrimitiveSignature};
use batch_types::{
	Address, BatchMode, BlockHash, Bytes, CallRequest, ChainEvent, EventRecord, NativeAccount,
	OperationRequest, RequestKind, ResourceEstimate, SignedBatch, TransactionHash, U256,
};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// Base cost of any item.
pub(super) const BASE_GAS: u64 = 21_000;
/// Extra cost of a contract creation.
pub(super) const CREATE_GAS: u64 = 32_000;
/// Cost per byte of call data.
pub(super) const DATA_BYTE_GAS: u64 = 16;

/// Predicate deciding whether a scripted failure applies.
pub(super) type CallPredicate = Box<dyn Fn(&CallRequest) -> bool + Send + Sync>;

/// Failure injected into estimation or execution.
pub(super) struct ScriptedFailure {
	pub matches: CallPredicate,
	pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub(super) struct AccountState {
	pub balance: U256,
	/// Nonce of signed extrinsics.
	pub nonce: u64,
	/// EVM transaction count.
	pub evm_nonce: u64,
}

#[derive(Debug, Clone)]
pub(super) struct Contract {
	pub code: Bytes,
	pub maintainer: Address,
	pub deposit: U256,
	pub balance: U256,
}

#[derive(Debug, Clone)]
pub(super) struct PendingRefund {
	pub due: Instant,
	pub to: Address,
	pub amount: U256,
}

/// One entry of a block log. Inherent events have no extrinsic.
#[derive(Debug, Clone)]
pub(super) struct LoggedEvent {
	pub extrinsic: Option<TransactionHash>,
	pub record: EventRecord,
}

/// Economic parameters of the simulated chain.
#[derive(Debug, Clone)]
pub(super) struct Economics {
	pub gas_price: U256,
	pub deposit_per_byte: U256,
	pub refund_delay: Duration,
}

/// Mutable ledger state.
#[derive(Default)]
pub(super) struct ChainState {
	pub block_number: u64,
	pub accounts: HashMap<Address, AccountState>,
	pub contracts: HashMap<Address, Contract>,
	pub blocks: HashMap<BlockHash, Vec<LoggedEvent>>,
	pub refunds: Vec<PendingRefund>,
	/// EVM addresses bound by claims.
	pub bindings: HashMap<NativeAccount, Address>,
	pub call_results: HashMap<(Address, Bytes), Bytes>,
	pub estimation_failures: Vec<ScriptedFailure>,
	pub execution_failures: Vec<ScriptedFailure>,
}

/// Effects of the items of one batch, applied to a scratch copy of the ledger.
#[derive(Clone)]
struct Ledger {
	accounts: HashMap<Address, AccountState>,
	contracts: HashMap<Address, Contract>,
	refunds: Vec<PendingRefund>,
	bindings: HashMap<NativeAccount, Address>,
}

/// Why an item failed, with the event it emitted if any.
struct ItemFailure {
	event: Option<ChainEvent>,
	reason: String,
}

impl From<ChainEvent> for ItemFailure {
	fn from(event: ChainEvent) -> Self {
		let reason = event.failure_reason().unwrap_or("reverted").to_string();
		Self {
			event: Some(event),
			reason,
		}
	}
}

pub(super) fn required_gas(request: &CallRequest) -> u64 {
	let data_gas = DATA_BYTE_GAS.saturating_mul(request.data.len() as u64);
	let create_gas = if request.to.is_none() { CREATE_GAS } else { 0 };
	BASE_GAS + create_gas + data_gas
}

/// Default EVM address of a native account: the embedded address of
/// Ethereum-key accounts, otherwise the first 20 bytes of
/// `keccak256("evm:" ++ account)`.
pub(super) fn default_evm_address(account: &NativeAccount) -> Address {
	account
		.embedded_evm_address()
		.unwrap_or_else(|| Address::from_slice(&keccak256(account.default_address_preimage())[..20]))
}

pub(super) fn block_hash(number: u64) -> BlockHash {
	let mut preimage = b"simulated-block".to_vec();
	preimage.extend_from_slice(&number.to_be_bytes());
	BlockHash(keccak256(preimage))
}

pub(super) fn extrinsic_hash(batch: &SignedBatch) -> TransactionHash {
	let mut preimage = batch.signer.to_vec();
	preimage.extend_from_slice(&batch.nonce.to_be_bytes());
	preimage.extend_from_slice(&batch.signature.0);
	TransactionHash(keccak256(preimage))
}

fn call_request(from: Address, request: &OperationRequest) -> CallRequest {
	let to = match &request.kind {
		RequestKind::Create => None,
		RequestKind::Call { to } => Some(*to),
		RequestKind::Destroy { contract } => Some(*contract),
		RequestKind::ClaimDefaultAccount => None,
	};
	CallRequest {
		from,
		to,
		value: request.value,
		data: request.data.clone(),
	}
}

impl ChainState {
	/// Credits refunds whose delay has elapsed.
	pub fn settle_refunds(&mut self, now: Instant) {
		let (due, pending): (Vec<_>, Vec<_>) =
			self.refunds.drain(..).partition(|refund| refund.due <= now);
		self.refunds = pending;
		for refund in due {
			let account = self.accounts.entry(refund.to).or_default();
			account.balance = account.balance.saturating_add(refund.amount);
		}
	}

	pub fn account(&self, address: &Address) -> AccountState {
		self.accounts.get(address).cloned().unwrap_or_default()
	}

	/// Dry run of a single call or creation.
	pub fn estimate(&self, request: &CallRequest) -> Result<ResourceEstimate, String> {
		if let Some(failure) = self
			.estimation_failures
			.iter()
			.find(|failure| (failure.matches)(request))
		{
			return Err(failure.reason.clone());
		}

		let storage = match request.to {
			None if request.data.is_empty() => return Err("empty init code".to_string()),
			None => request.data.len() as i64,
			Some(to) if !self.contracts.contains_key(&to) => {
				return Err(format!("no contract deployed at {}", to));
			},
			Some(_) => 0,
		};

		let balance = self.account(&request.from).balance;
		if balance < request.value {
			return Err("insufficient balance for transferred value".to_string());
		}

		Ok(ResourceEstimate {
			gas: required_gas(request),
			storage,
		})
	}

	/// Checks signature, nonce and fee payment of a signed batch.
	pub fn validate_extrinsic(
		&self,
		batch: &SignedBatch,
		gas_price: U256,
	) -> Result<(), String> {
		let digest = batch
			.batch
			.signing_digest(batch.nonce)
			.map_err(|e| format!("cannot encode batch: {}", e))?;
		let signature = PrimitiveSignature::from_raw(&batch.signature.0)
			.map_err(|e| format!("malformed signature: {}", e))?;
		let recovered = signature
			.recover_address_from_prehash(&digest)
			.map_err(|e| format!("bad signature: {}", e))?;
		if recovered != batch.signer {
			return Err("bad signature: signer mismatch".to_string());
		}

		let account = self.account(&batch.signer);
		if batch.nonce < account.nonce {
			return Err(format!(
				"stale nonce {} (expected {})",
				batch.nonce, account.nonce
			));
		}
		if batch.nonce > account.nonce {
			return Err(format!(
				"future nonce {} (expected {})",
				batch.nonce, account.nonce
			));
		}

		let fee = batch_fee(batch, gas_price);
		if account.balance < fee {
			return Err("inability to pay some fees".to_string());
		}

		Ok(())
	}

	/// Executes `batch` in a new block and returns the block's hash.
	pub fn produce_block(
		&mut self,
		batch: &SignedBatch,
		tx_hash: TransactionHash,
		economics: &Economics,
		now: Instant,
	) -> BlockHash {
		self.settle_refunds(now);
		self.block_number += 1;
		let hash = block_hash(self.block_number);

		let mut log = vec![LoggedEvent {
			extrinsic: None,
			record: EventRecord::new(
				0,
				None,
				ChainEvent::Other {
					section: "timestamp".to_string(),
					method: "Set".to_string(),
				},
			),
		}];
		let mut events = Vec::new();

		let signer = batch.signer;
		let fee = batch_fee(batch, economics.gas_price);
		{
			let account = self.accounts.entry(signer).or_default();
			account.nonce += 1;
			account.balance = account.balance.saturating_sub(fee);
		}

		let committed = Ledger {
			accounts: self.accounts.clone(),
			contracts: self.contracts.clone(),
			refunds: self.refunds.clone(),
			bindings: self.bindings.clone(),
		};
		let mut ledger = committed.clone();
		let mut failure = None;

		for (index, request) in batch.batch.requests().iter().enumerate() {
			let call_index = Some(index as u32);
			match self.apply(&mut ledger, signer, request, economics, now) {
				Ok(event) => {
					events.push((call_index, event));
					events.push((call_index, ChainEvent::ItemCompleted));
				},
				Err(item_failure) => {
					failure = Some((index, item_failure));
					break;
				},
			}
		}

		match (failure, batch.batch.mode) {
			(None, _) => {
				self.commit(ledger);
				events.push((None, ChainEvent::BatchCompleted));
				events.push((None, ChainEvent::ExtrinsicSuccess));
			},
			(Some((index, failure)), BatchMode::Atomic) => {
				// Everything the batch did is reverted, only the fee stays paid.
				self.commit(committed);
				events = failure
					.event
					.map(|event| (Some(index as u32), event))
					.into_iter()
					.collect();
				events.push((
					None,
					ChainEvent::ExtrinsicFailed {
						reason: format!("batch item {} failed: {}", index, failure.reason),
					},
				));
			},
			(Some((index, failure)), BatchMode::BestEffort) => {
				self.commit(ledger);
				if let Some(event) = failure.event {
					events.push((Some(index as u32), event));
				}
				events.push((
					None,
					ChainEvent::BatchInterrupted {
						index: index as u32,
						reason: failure.reason,
					},
				));
				events.push((None, ChainEvent::ExtrinsicSuccess));
			},
		}

		for (call_index, event) in events {
			let position = log.len() as u32;
			log.push(LoggedEvent {
				extrinsic: Some(tx_hash),
				record: EventRecord::new(position, call_index, event),
			});
		}
		self.blocks.insert(hash, log);

		hash
	}

	fn commit(&mut self, ledger: Ledger) {
		self.accounts = ledger.accounts;
		self.contracts = ledger.contracts;
		self.refunds = ledger.refunds;
		self.bindings = ledger.bindings;
	}

	/// Applies one item. On failure `ledger` is left partially modified and must
	/// not be committed in atomic mode.
	///
	/// EVM items advance the signer's transaction count; claims do not.
	fn apply(
		&self,
		ledger: &mut Ledger,
		from: Address,
		request: &OperationRequest,
		economics: &Economics,
		now: Instant,
	) -> Result<ChainEvent, ItemFailure> {
		let call = call_request(from, request);
		let evm_nonce = ledger.accounts.entry(from).or_default().evm_nonce;
		if request.kind != RequestKind::ClaimDefaultAccount {
			ledger.accounts.entry(from).or_default().evm_nonce += 1;
		}

		match &request.kind {
			RequestKind::Create => {
				let contract = from.create(evm_nonce);
				let failed = |reason: String| ChainEvent::CreatedFailed {
					from,
					contract,
					reason,
				};

				self.check_limits(&call, request, &ledger.contracts)
					.map_err(failed)?;
				let deposit = economics
					.deposit_per_byte
					.saturating_mul(U256::from(request.data.len()));
				debit(ledger, from, request.value.saturating_add(deposit)).map_err(failed)?;

				ledger.contracts.insert(
					contract,
					Contract {
						code: request.data.clone(),
						maintainer: from,
						deposit,
						balance: request.value,
					},
				);
				Ok(ChainEvent::Created { from, contract })
			},
			RequestKind::Call { to } => {
				let contract = *to;
				let failed = |reason: String| ChainEvent::ExecutedFailed {
					from,
					contract,
					reason,
				};

				self.check_limits(&call, request, &ledger.contracts)
					.map_err(failed)?;
				debit(ledger, from, request.value).map_err(failed)?;
				if let Some(target) = ledger.contracts.get_mut(&contract) {
					target.balance = target.balance.saturating_add(request.value);
				}
				Ok(ChainEvent::Executed { from, contract })
			},
			RequestKind::Destroy { contract } => {
				let contract = *contract;
				let failed = |reason: &str| ChainEvent::ExecutedFailed {
					from,
					contract,
					reason: reason.to_string(),
				};

				let target = ledger
					.contracts
					.get(&contract)
					.ok_or_else(|| failed("ContractNotFound"))?;
				if target.maintainer != from {
					return Err(failed("NoPermission").into());
				}
				let refund = target.deposit.saturating_add(target.balance);
				ledger.contracts.remove(&contract);
				ledger.refunds.push(PendingRefund {
					due: now + economics.refund_delay,
					to: from,
					amount: refund,
				});
				Ok(ChainEvent::Destroyed { contract })
			},
			RequestKind::ClaimDefaultAccount => claim_default_account(ledger, from),
		}
	}

	fn check_limits(
		&self,
		call: &CallRequest,
		request: &OperationRequest,
		contracts: &HashMap<Address, Contract>,
	) -> Result<(), String> {
		if let Some(failure) = self
			.execution_failures
			.iter()
			.find(|failure| (failure.matches)(call))
		{
			return Err(failure.reason.clone());
		}
		if let Some(to) = call.to {
			if !contracts.contains_key(&to) {
				return Err(format!("no contract deployed at {}", to));
			}
		}
		if request.gas_limit < required_gas(call) {
			return Err("OutOfGas".to_string());
		}
		if call.to.is_none() && request.storage_limit < request.data.len() as u64 {
			return Err("OutOfStorage".to_string());
		}
		Ok(())
	}
}

/// Binds the default EVM address of the native account behind `from`.
fn claim_default_account(ledger: &mut Ledger, from: Address) -> Result<ChainEvent, ItemFailure> {
	let account = NativeAccount::from_evm_address(from);
	let evm_address = default_evm_address(&account);
	let rejected = |reason: &str| ItemFailure {
		event: None,
		reason: reason.to_string(),
	};

	if ledger.bindings.contains_key(&account) {
		return Err(rejected("AccountIdHasMapped"));
	}
	if ledger.bindings.values().any(|bound| *bound == evm_address) {
		return Err(rejected("EthAddressHasMapped"));
	}
	ledger.bindings.insert(account, evm_address);
	Ok(ChainEvent::AccountClaimed {
		account,
		evm_address,
	})
}

fn debit(ledger: &mut Ledger, from: Address, amount: U256) -> Result<(), String> {
	let account = ledger.accounts.entry(from).or_default();
	account.balance = account
		.balance
		.checked_sub(amount)
		.ok_or_else(|| "InsufficientBalance".to_string())?;
	Ok(())
}

fn batch_fee(batch: &SignedBatch, gas_price: U256) -> U256 {
	let gas: u64 = batch
		.batch
		.requests()
		.iter()
		.map(|request| request.gas_limit)
		.fold(0u64, u64::saturating_add);
	gas_price.saturating_mul(U256::from(gas))
}
