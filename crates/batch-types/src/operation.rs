//! Operation descriptors.
//!
//! An [`Operation`] describes one intended on-chain action before anything has been
//! encoded or estimated. Operations are immutable once built: the constructors and
//! `with_*` methods consume `self`, and there are no setters afterwards.

use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes, U256};
use serde::Deserialize;
use std::sync::Arc;

/// Compiled contract interface: JSON ABI plus creation bytecode.
///
/// Deserializes from the `{ "abi": [...], "bytecode": "0x..." }` artifact layout
/// produced by hardhat and truffle. Bytecode is optional so that interface-only
/// artifacts can still be used for calls.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractArtifact {
	/// Contract ABI.
	pub abi: JsonAbi,
	/// Creation bytecode, required for deployments.
	#[serde(default)]
	pub bytecode: Option<Bytes>,
}

impl ContractArtifact {
	/// Creates an artifact from its parts.
	pub fn new(abi: JsonAbi, bytecode: Option<Bytes>) -> Self {
		Self { abi, bytecode }
	}

	/// Parses an artifact from its JSON representation.
	pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}
}

/// What an operation does on-chain.
#[derive(Debug, Clone)]
pub enum OperationKind {
	/// Deploy a new contract from the artifact's bytecode.
	Deploy {
		contract: Arc<ContractArtifact>,
		args: Vec<DynSolValue>,
	},
	/// Call `method` on an already deployed contract.
	Call {
		contract: Arc<ContractArtifact>,
		address: Address,
		method: String,
		args: Vec<DynSolValue>,
	},
	/// Destroy a contract and refund its storage deposit to the caller.
	Destroy { address: Address },
	/// Bind the signer's default EVM address to its native account.
	ClaimDefaultAccount,
}

/// An intended on-chain action.
#[derive(Debug, Clone)]
pub struct Operation {
	kind: OperationKind,
	value: U256,
	gas_limit: Option<u64>,
	storage_limit: Option<u64>,
	force: bool,
}

impl Operation {
	fn from_kind(kind: OperationKind) -> Self {
		Self {
			kind,
			value: U256::ZERO,
			gas_limit: None,
			storage_limit: None,
			force: false,
		}
	}

	/// Deploys `contract` with the given constructor arguments.
	pub fn deploy(contract: Arc<ContractArtifact>, args: Vec<DynSolValue>) -> Self {
		Self::from_kind(OperationKind::Deploy { contract, args })
	}

	/// Calls `method` on the contract at `address`.
	pub fn call(
		contract: Arc<ContractArtifact>,
		address: Address,
		method: impl Into<String>,
		args: Vec<DynSolValue>,
	) -> Self {
		Self::from_kind(OperationKind::Call {
			contract,
			address,
			method: method.into(),
			args,
		})
	}

	/// Destroys the contract at `address`.
	pub fn destroy(address: Address) -> Self {
		Self::from_kind(OperationKind::Destroy { address })
	}

	/// Claims the default EVM address of the executing account.
	pub fn claim_default_account() -> Self {
		Self::from_kind(OperationKind::ClaimDefaultAccount)
	}

	/// Attaches native value to the operation.
	pub fn with_value(mut self, value: U256) -> Self {
		self.value = value;
		self
	}

	/// Overrides the estimated gas limit.
	pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
		self.gas_limit = Some(gas_limit);
		self
	}

	/// Overrides the estimated storage limit.
	pub fn with_storage_limit(mut self, storage_limit: u64) -> Self {
		self.storage_limit = Some(storage_limit);
		self
	}

	/// Submits the operation even if resource estimation fails.
	///
	/// Needed when the operation depends on an earlier item of the same batch
	/// (for example a call into a contract the batch deploys first), because the
	/// estimate runs against chain state that does not contain that item yet.
	pub fn forced(mut self) -> Self {
		self.force = true;
		self
	}

	pub fn kind(&self) -> &OperationKind {
		&self.kind
	}

	pub fn value(&self) -> U256 {
		self.value
	}

	pub fn gas_limit(&self) -> Option<u64> {
		self.gas_limit
	}

	pub fn storage_limit(&self) -> Option<u64> {
		self.storage_limit
	}

	pub fn force(&self) -> bool {
		self.force
	}

	/// Returns true if this operation creates a contract.
	pub fn is_deploy(&self) -> bool {
		matches!(self.kind, OperationKind::Deploy { .. })
	}

	/// Short label for logs.
	pub fn label(&self) -> String {
		match &self.kind {
			OperationKind::Deploy { .. } => "deploy".to_string(),
			OperationKind::Call {
				method, address, ..
			} => format!("call {}@{}", method, address),
			OperationKind::Destroy { address } => format!("destroy {}", address),
			OperationKind::ClaimDefaultAccount => "claim default account".to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn artifact() -> Arc<ContractArtifact> {
		Arc::new(
			ContractArtifact::from_json(
				r#"{
					"abi": [
						{"type": "constructor", "inputs": [{"name": "supply", "type": "uint256"}], "stateMutability": "nonpayable"}
					],
					"bytecode": "0x6080"
				}"#,
			)
			.unwrap(),
		)
	}

	#[test]
	fn test_artifact_from_json() {
		let artifact = artifact();
		assert!(artifact.abi.constructor.is_some());
		assert_eq!(
			artifact.bytecode.as_ref().map(|code| code.to_vec()),
			Some(vec![0x60u8, 0x80])
		);
	}

	#[test]
	fn test_builder_methods() {
		let op = Operation::deploy(artifact(), vec![DynSolValue::Uint(U256::from(42u64), 256)])
			.with_value(U256::from(7u64))
			.with_gas_limit(100_000)
			.forced();

		assert!(op.is_deploy());
		assert!(op.force());
		assert_eq!(op.value(), U256::from(7u64));
		assert_eq!(op.gas_limit(), Some(100_000));
		assert_eq!(op.storage_limit(), None);
	}

	#[test]
	fn test_destroy_defaults() {
		let op = Operation::destroy(Address::repeat_byte(0x11));
		assert!(!op.is_deploy());
		assert!(!op.force());
		assert_eq!(op.value(), U256::ZERO);
		assert!(op.label().starts_with("destroy"));
	}

	#[test]
	fn test_claim_default_account() {
		let op = Operation::claim_default_account();
		assert!(matches!(op.kind(), OperationKind::ClaimDefaultAccount));
		assert!(!op.is_deploy());
		assert_eq!(op.label(), "claim default account");
	}
}
