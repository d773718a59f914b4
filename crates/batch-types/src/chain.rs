//! Chain-facing types: hashes, simulation requests, status notifications and the
//! block execution log.

use crate::NativeAccount;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash of a submitted batch extrinsic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub B256);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Hash of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub B256);

impl fmt::Display for BlockHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Read-only call used for simulation and view queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
	pub from: Address,
	/// Target contract; `None` simulates a contract creation.
	pub to: Option<Address>,
	pub value: U256,
	pub data: Bytes,
}

/// Result of a resource-estimation dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEstimate {
	/// Computational cost.
	pub gas: u64,
	/// Net storage delta in bytes. Negative when the call frees storage.
	pub storage: i64,
}

/// Status notification emitted by the chain client for a submitted extrinsic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
	/// Waiting for an earlier nonce.
	Future,
	/// In the ready queue of the pool.
	Ready,
	/// Gossiped to peers.
	Broadcast,
	/// Included in a block.
	InBlock(BlockHash),
	/// The including block was retracted by a reorg.
	Retracted(BlockHash),
	/// Finality was not reached within the node's window.
	FinalityTimeout(BlockHash),
	/// Included in a finalized block.
	Finalized(BlockHash),
	/// Replaced by another extrinsic with the same nonce.
	Usurped(TransactionHash),
	/// Removed from the pool.
	Dropped,
	/// Rejected by the pool.
	Invalid(String),
}

impl TxStatus {
	/// Block hash if the status says the extrinsic was included.
	pub fn included_in(&self) -> Option<BlockHash> {
		match self {
			TxStatus::InBlock(block) | TxStatus::Finalized(block) => Some(*block),
			_ => None,
		}
	}

	/// Describes the status if it means the extrinsic will never be included.
	pub fn fatal_reason(&self) -> Option<String> {
		match self {
			TxStatus::Usurped(other) => Some(format!("usurped by {}", other)),
			TxStatus::Dropped => Some("dropped from the transaction pool".to_string()),
			TxStatus::Invalid(reason) => Some(format!("invalid: {}", reason)),
			_ => None,
		}
	}
}

/// Structured event from the block's execution log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
	/// `evm.Created`
	Created { from: Address, contract: Address },
	/// `evm.CreatedFailed`
	CreatedFailed {
		from: Address,
		contract: Address,
		reason: String,
	},
	/// `evm.Executed`
	Executed { from: Address, contract: Address },
	/// `evm.ExecutedFailed`
	ExecutedFailed {
		from: Address,
		contract: Address,
		reason: String,
	},
	/// `evm.ContractSelfdestructed`
	Destroyed { contract: Address },
	/// `evmAccounts.ClaimAccount`
	AccountClaimed {
		account: NativeAccount,
		evm_address: Address,
	},
	/// `utility.ItemCompleted`
	ItemCompleted,
	/// `utility.BatchCompleted`
	BatchCompleted,
	/// `utility.BatchInterrupted`
	BatchInterrupted { index: u32, reason: String },
	/// `system.ExtrinsicSuccess`
	ExtrinsicSuccess,
	/// `system.ExtrinsicFailed`
	ExtrinsicFailed { reason: String },
	/// Any event the orchestrator does not interpret.
	Other { section: String, method: String },
}

impl ChainEvent {
	/// Pallet section and method name, as shown by block explorers.
	pub fn name(&self) -> (&str, &str) {
		match self {
			ChainEvent::Created { .. } => ("evm", "Created"),
			ChainEvent::CreatedFailed { .. } => ("evm", "CreatedFailed"),
			ChainEvent::Executed { .. } => ("evm", "Executed"),
			ChainEvent::ExecutedFailed { .. } => ("evm", "ExecutedFailed"),
			ChainEvent::Destroyed { .. } => ("evm", "ContractSelfdestructed"),
			ChainEvent::AccountClaimed { .. } => ("evmAccounts", "ClaimAccount"),
			ChainEvent::ItemCompleted => ("utility", "ItemCompleted"),
			ChainEvent::BatchCompleted => ("utility", "BatchCompleted"),
			ChainEvent::BatchInterrupted { .. } => ("utility", "BatchInterrupted"),
			ChainEvent::ExtrinsicSuccess => ("system", "ExtrinsicSuccess"),
			ChainEvent::ExtrinsicFailed { .. } => ("system", "ExtrinsicFailed"),
			ChainEvent::Other { section, method } => (section.as_str(), method.as_str()),
		}
	}

	/// Failure reason if this event reports an execution failure.
	pub fn failure_reason(&self) -> Option<&str> {
		match self {
			ChainEvent::CreatedFailed { reason, .. }
			| ChainEvent::ExecutedFailed { reason, .. }
			| ChainEvent::BatchInterrupted { reason, .. }
			| ChainEvent::ExtrinsicFailed { reason } => Some(reason.as_str()),
			_ => None,
		}
	}
}

/// One entry of a block's execution log, filtered to a single extrinsic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
	/// Position of the event in the block log.
	pub position: u32,
	/// Index of the batch item that emitted the event, when the chain reports it.
	pub call_index: Option<u32>,
	pub event: ChainEvent,
}

impl EventRecord {
	pub fn new(position: u32, call_index: Option<u32>, event: ChainEvent) -> Self {
		Self {
			position,
			call_index,
			event,
		}
	}
}

impl fmt::Display for EventRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let (section, method) = self.event.name();
		match self.call_index {
			Some(index) => write!(f, "#{} {}.{} (item {})", self.position, section, method, index),
			None => write!(f, "#{} {}.{}", self.position, section, method),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_included_in() {
		let block = BlockHash(B256::repeat_byte(1));
		assert_eq!(TxStatus::InBlock(block).included_in(), Some(block));
		assert_eq!(TxStatus::Finalized(block).included_in(), Some(block));
		assert_eq!(TxStatus::Ready.included_in(), None);
		assert_eq!(TxStatus::Retracted(block).included_in(), None);
	}

	#[test]
	fn test_fatal_reason() {
		assert!(TxStatus::Dropped.fatal_reason().is_some());
		assert!(TxStatus::Invalid("stale".into())
			.fatal_reason()
			.unwrap()
			.contains("stale"));
		assert!(TxStatus::Broadcast.fatal_reason().is_none());
	}

	#[test]
	fn test_event_record_display() {
		let record = EventRecord::new(
			3,
			Some(1),
			ChainEvent::Created {
				from: Address::ZERO,
				contract: Address::repeat_byte(0xaa),
			},
		);
		assert_eq!(record.to_string(), "#3 evm.Created (item 1)");
		assert_eq!(
			ChainEvent::ExtrinsicFailed {
				reason: "BadOrigin".into()
			}
			.failure_reason(),
			Some("BadOrigin")
		);
	}
}
