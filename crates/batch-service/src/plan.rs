//! Batch plan files.
//!
//! A plan lists the operations of one batch in TOML:
//!
//! ```toml
//! mode = "atomic"
//!
//! [[operations]]
//! kind = "deploy"
//! artifact = "artifacts/Factory.json"
//! args = ["@predict:0"]
//!
//! [[operations]]
//! kind = "claim"
//!
//! [[operations]]
//! kind = "call"
//! artifact = "artifacts/Token.json"
//! address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
//! method = "approve"
//! args = ["@predict:0", "1000000000000000000"]
//! force = true
//! ```
//!
//! Arguments are strings coerced to the ABI type of the matching parameter. The
//! placeholder `@predict:N` stands for the address of the contract created by item
//! `N` of the same batch, and may also be used as a call or destroy target. Item `N`
//! must be a deployment. A `claim` entry binds the signer's default EVM address and
//! takes no other fields.

use alloy_dyn_abi::{DynSolType, Specifier};
use alloy_json_abi::Param;
use batch_types::{Address, BatchMode, ContractArtifact, DynSolValue, Operation, U256};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const PREDICT_PREFIX: &str = "@predict:";

#[derive(Debug, Error)]
pub enum PlanError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Parse error: {0}")]
	Parse(String),
	#[error("Artifact {path}: {reason}")]
	Artifact { path: PathBuf, reason: String },
	#[error("Operation {index}: {reason}")]
	Operation { index: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
	Deploy,
	Call,
	Destroy,
	Claim,
}

/// One `[[operations]]` entry, before argument coercion.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanOperation {
	pub kind: PlanKind,
	pub artifact: Option<PathBuf>,
	pub address: Option<String>,
	pub method: Option<String>,
	#[serde(default)]
	pub args: Vec<String>,
	pub value: Option<String>,
	pub gas_limit: Option<u64>,
	pub storage_limit: Option<u64>,
	#[serde(default)]
	pub force: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
	/// Overrides the configured submission mode.
	pub mode: Option<BatchMode>,
	pub operations: Vec<PlanOperation>,
}

impl Plan {
	pub async fn from_file(path: &Path) -> Result<Self, PlanError> {
		let content = tokio::fs::read_to_string(path).await?;
		content.parse()
	}

	/// Resolves the plan into operations.
	///
	/// Artifact paths are relative to `base_dir`. `predict(n)` returns the address
	/// created by a deployment preceded by `n` EVM items; claims do not advance the
	/// account's transaction count.
	pub async fn resolve<F>(
		&self,
		base_dir: &Path,
		predict: F,
	) -> Result<Vec<Operation>, PlanError>
	where
		F: Fn(u64) -> Address,
	{
		let mut evm_items = 0u64;
		let deploys: Vec<Option<u64>> = self
			.operations
			.iter()
			.map(|entry| {
				let offset = evm_items;
				if entry.kind != PlanKind::Claim {
					evm_items += 1;
				}
				(entry.kind == PlanKind::Deploy).then_some(offset)
			})
			.collect();
		let placeholder = |index: u64| -> Result<Address, String> {
			match usize::try_from(index).ok().and_then(|i| deploys.get(i).copied()) {
				Some(Some(offset)) => Ok(predict(offset)),
				Some(None) => Err(format!("item {} is not a deployment", index)),
				None => Err(format!("batch has no item {}", index)),
			}
		};
		let mut artifacts: HashMap<PathBuf, Arc<ContractArtifact>> = HashMap::new();
		let mut operations = Vec::with_capacity(self.operations.len());

		for (index, entry) in self.operations.iter().enumerate() {
			let invalid = |reason: String| PlanError::Operation { index, reason };
			let artifact = match &entry.artifact {
				Some(relative) => {
					let path = base_dir.join(relative);
					let artifact = match artifacts.get(&path).cloned() {
						Some(artifact) => artifact,
						None => {
							let artifact = Arc::new(load_artifact(&path).await?);
							artifacts.insert(path, Arc::clone(&artifact));
							artifact
						},
					};
					Some(artifact)
				},
				None => None,
			};

			let operation = match entry.kind {
				PlanKind::Deploy => {
					let artifact =
						artifact.ok_or_else(|| invalid("deploy needs an artifact".to_string()))?;
					let inputs = artifact
						.abi
						.constructor
						.as_ref()
						.map(|constructor| constructor.inputs.as_slice())
						.unwrap_or_default();
					let args = coerce_args(inputs, &entry.args, &placeholder).map_err(invalid)?;
					Operation::deploy(artifact, args)
				},
				PlanKind::Call => {
					let artifact =
						artifact.ok_or_else(|| invalid("call needs an artifact".to_string()))?;
					let address = target(entry, &placeholder).map_err(invalid)?;
					let method = entry
						.method
						.clone()
						.ok_or_else(|| invalid("call needs a method".to_string()))?;
					let function = artifact
						.abi
						.function(&method)
						.and_then(|overloads| {
							overloads
								.iter()
								.find(|function| function.inputs.len() == entry.args.len())
						})
						.ok_or_else(|| {
							invalid(format!(
								"no method '{}' with {} arguments",
								method,
								entry.args.len()
							))
						})?;
					let args =
						coerce_args(&function.inputs, &entry.args, &placeholder).map_err(invalid)?;
					Operation::call(Arc::clone(&artifact), address, method, args)
				},
				PlanKind::Destroy => Operation::destroy(target(entry, &placeholder).map_err(invalid)?),
				PlanKind::Claim => {
					if artifact.is_some()
						|| entry.address.is_some()
						|| entry.method.is_some()
						|| !entry.args.is_empty()
						|| entry.value.is_some()
					{
						return Err(invalid("claim takes no target, arguments or value".to_string()));
					}
					Operation::claim_default_account()
				},
			};

			operations.push(apply_options(operation, entry).map_err(invalid)?);
		}

		Ok(operations)
	}
}

impl std::str::FromStr for Plan {
	type Err = PlanError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let plan: Plan = toml::from_str(s).map_err(|e| PlanError::Parse(e.message().to_string()))?;
		if plan.operations.is_empty() {
			return Err(PlanError::Parse("plan has no operations".to_string()));
		}
		Ok(plan)
	}
}

async fn load_artifact(path: &Path) -> Result<ContractArtifact, PlanError> {
	let json = tokio::fs::read_to_string(path)
		.await
		.map_err(|e| PlanError::Artifact {
			path: path.to_path_buf(),
			reason: e.to_string(),
		})?;
	ContractArtifact::from_json(&json).map_err(|e| PlanError::Artifact {
		path: path.to_path_buf(),
		reason: e.to_string(),
	})
}

fn predicted_index(arg: &str) -> Option<Result<u64, String>> {
	arg.strip_prefix(PREDICT_PREFIX).map(|index| {
		index
			.parse::<u64>()
			.map_err(|_| format!("invalid placeholder '{}'", arg))
	})
}

fn address_arg<F: Fn(u64) -> Result<Address, String>>(
	arg: &str,
	predict: &F,
) -> Result<Address, String> {
	match predicted_index(arg) {
		Some(index) => predict(index?),
		None => arg
			.parse::<Address>()
			.map_err(|e| format!("invalid address '{}': {}", arg, e)),
	}
}

fn target<F: Fn(u64) -> Result<Address, String>>(
	entry: &PlanOperation,
	predict: &F,
) -> Result<Address, String> {
	let address = entry
		.address
		.as_deref()
		.ok_or_else(|| "missing target address".to_string())?;
	address_arg(address, predict)
}

fn coerce_args<F: Fn(u64) -> Result<Address, String>>(
	inputs: &[Param],
	args: &[String],
	predict: &F,
) -> Result<Vec<DynSolValue>, String> {
	if inputs.len() != args.len() {
		return Err(format!(
			"expected {} arguments, got {}",
			inputs.len(),
			args.len()
		));
	}

	inputs
		.iter()
		.zip(args)
		.map(|(param, arg)| {
			let ty: DynSolType = param
				.resolve()
				.map_err(|e| format!("unsupported type {}: {}", param.ty, e))?;
			if predicted_index(arg).is_some() {
				if ty != DynSolType::Address {
					return Err(format!("'{}' can only be used for an address", arg));
				}
				return address_arg(arg, predict).map(DynSolValue::Address);
			}
			ty.coerce_str(arg)
				.map_err(|e| format!("argument '{}' as {}: {}", arg, param.ty, e))
		})
		.collect()
}

fn apply_options(mut operation: Operation, entry: &PlanOperation) -> Result<Operation, String> {
	if let Some(value) = &entry.value {
		let value = value
			.parse::<U256>()
			.map_err(|e| format!("invalid value '{}': {}", value, e))?;
		operation = operation.with_value(value);
	}
	if let Some(gas_limit) = entry.gas_limit {
		operation = operation.with_gas_limit(gas_limit);
	}
	if let Some(storage_limit) = entry.storage_limit {
		operation = operation.with_storage_limit(storage_limit);
	}
	if entry.force {
		operation = operation.forced();
	}
	Ok(operation)
}
