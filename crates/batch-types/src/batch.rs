//! Encoded operation requests and the batches that carry them.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the chain treats a failing item inside a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
	/// All items succeed or the whole batch is reverted (`utility.batchAll`).
	#[default]
	Atomic,
	/// Execution stops at the first failing item; earlier items keep their
	/// effects (`utility.batch`).
	BestEffort,
}

/// Chain-level instruction an [`OperationRequest`] turns into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
	/// `evm.create`
	Create,
	/// `evm.call`
	Call { to: Address },
	/// `evm.selfdestruct`
	Destroy { contract: Address },
	/// `evmAccounts.claimDefaultAccount`
	ClaimDefaultAccount,
}

/// Entry of an EIP-2930 access list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessListItem {
	pub address: Address,
	pub storage_keys: Vec<B256>,
}

/// Encoded, resource-limited form of an operation, ready for batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
	/// Instruction kind and target.
	pub kind: RequestKind,
	/// Encoded call data (init code for creations).
	pub data: Bytes,
	/// Native value transferred with the request.
	pub value: U256,
	/// Computational limit.
	pub gas_limit: u64,
	/// Storage growth limit. Never negative.
	pub storage_limit: u64,
	/// Access list, always empty for now.
	pub access_list: Vec<AccessListItem>,
	/// False when the limits are conservative defaults substituted after a
	/// failed estimate.
	pub estimated: bool,
}

impl OperationRequest {
	/// Returns true if this request creates a contract.
	pub fn is_create(&self) -> bool {
		matches!(self.kind, RequestKind::Create)
	}
}

/// Ordered sequence of requests submitted as one unit.
///
/// Construct batches through the orchestrator's assembler, which rejects empty
/// request lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
	/// Local identifier, used for logging only.
	pub id: Uuid,
	/// Failure semantics requested from the chain.
	pub mode: BatchMode,
	requests: Vec<OperationRequest>,
}

impl Batch {
	/// Wraps `requests` in a batch without any validation.
	pub fn new(mode: BatchMode, requests: Vec<OperationRequest>) -> Self {
		Self {
			id: Uuid::new_v4(),
			mode,
			requests,
		}
	}

	pub fn requests(&self) -> &[OperationRequest] {
		&self.requests
	}

	pub fn len(&self) -> usize {
		self.requests.len()
	}

	pub fn is_empty(&self) -> bool {
		self.requests.is_empty()
	}

	/// Indices of the requests that create contracts, in batch order.
	pub fn create_indices(&self) -> Vec<usize> {
		self.requests
			.iter()
			.enumerate()
			.filter(|(_, request)| request.is_create())
			.map(|(index, _)| index)
			.collect()
	}

	/// Digest a signing authority signs for this batch at the given account nonce.
	///
	/// The digest covers the nonce followed by the canonical JSON form of the batch.
	pub fn signing_digest(&self, nonce: u64) -> Result<B256, serde_json::Error> {
		let mut payload = nonce.to_be_bytes().to_vec();
		payload.extend(serde_json::to_vec(self)?);
		Ok(keccak256(payload))
	}
}

/// Raw signature bytes produced by a signing authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

/// A batch together with the authorization to execute it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBatch {
	pub batch: Batch,
	/// Account the batch executes as.
	pub signer: Address,
	/// Account nonce the signature is bound to.
	pub nonce: u64,
	pub signature: Signature,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(kind: RequestKind) -> OperationRequest {
		OperationRequest {
			kind,
			data: Bytes::from_static(&[0x60, 0x80]),
			value: U256::ZERO,
			gas_limit: 21_000,
			storage_limit: 0,
			access_list: Vec::new(),
			estimated: true,
		}
	}

	#[test]
	fn test_create_indices() {
		let to = Address::repeat_byte(0x22);
		let batch = Batch::new(
			BatchMode::Atomic,
			vec![
				request(RequestKind::Create),
				request(RequestKind::Call { to }),
				request(RequestKind::Create),
			],
		);

		assert_eq!(batch.len(), 3);
		assert_eq!(batch.create_indices(), vec![0, 2]);
	}

	#[test]
	fn test_signing_digest_binds_nonce() {
		let batch = Batch::new(BatchMode::Atomic, vec![request(RequestKind::Create)]);

		let first = batch.signing_digest(1).unwrap();
		assert_eq!(first, batch.signing_digest(1).unwrap());
		assert_ne!(first, batch.signing_digest(2).unwrap());
	}

	#[test]
	fn test_batch_mode_serde() {
		let mode: BatchMode = serde_json::from_str("\"best_effort\"").unwrap();
		assert_eq!(mode, BatchMode::BestEffort);
		assert_eq!(BatchMode::default(), BatchMode::Atomic);
	}
}
