//! Turning operations into encoded, resource-limited requests.

use crate::BatchError;
use alloy_dyn_abi::JsonAbiExt;
use batch_config::EstimationConfig;
use batch_types::{
	Address, Bytes, CallRequest, Operation, OperationKind, RequestKind, ResourceEstimate,
};

/// Storage limits are unsigned; a negative estimate means the call frees storage.
pub fn clamp_storage_limit(storage: i64) -> u64 {
	u64::try_from(storage).unwrap_or(0)
}

/// Encodes the call data of `operation`.
///
/// Deployments encode to the creation bytecode followed by the ABI-encoded
/// constructor arguments; calls to the selector of the overload whose arity matches
/// followed by the encoded arguments. Destroy and claim operations carry no data,
/// and a claim cannot transfer value.
pub fn encode_operation(operation: &Operation) -> Result<(RequestKind, Bytes), BatchError> {
	match operation.kind() {
		OperationKind::Deploy { contract, args } => {
			let bytecode = contract.bytecode.as_ref().ok_or_else(|| {
				BatchError::InvalidOperation("artifact has no creation bytecode".to_string())
			})?;

			let encoded_args = match &contract.abi.constructor {
				Some(constructor) => constructor.abi_encode_input(args).map_err(|e| {
					BatchError::InvalidOperation(format!("constructor arguments: {}", e))
				})?,
				None if args.is_empty() => Vec::new(),
				None => {
					return Err(BatchError::InvalidOperation(format!(
						"contract has no constructor but {} arguments were given",
						args.len()
					)));
				},
			};

			let mut data = bytecode.to_vec();
			data.extend_from_slice(&encoded_args);
			Ok((RequestKind::Create, data.into()))
		},
		OperationKind::Call {
			contract,
			address,
			method,
			args,
		} => {
			let overloads = contract.abi.function(method).ok_or_else(|| {
				BatchError::InvalidOperation(format!("unknown method '{}'", method))
			})?;
			let function = overloads
				.iter()
				.find(|function| function.inputs.len() == args.len())
				.ok_or_else(|| {
					BatchError::InvalidOperation(format!(
						"no overload of '{}' takes {} arguments",
						method,
						args.len()
					))
				})?;

			let data = function.abi_encode_input(args).map_err(|e| {
				BatchError::InvalidOperation(format!("arguments of '{}': {}", method, e))
			})?;
			Ok((RequestKind::Call { to: *address }, data.into()))
		},
		OperationKind::Destroy { address } => Ok((
			RequestKind::Destroy { contract: *address },
			Bytes::new(),
		)),
		OperationKind::ClaimDefaultAccount if !operation.value().is_zero() => Err(
			BatchError::InvalidOperation("claiming an account cannot transfer value".to_string()),
		),
		OperationKind::ClaimDefaultAccount => {
			Ok((RequestKind::ClaimDefaultAccount, Bytes::new()))
		},
	}
}

/// Dry-run request for an encoded operation, or `None` when the operation is
/// never estimated.
pub(crate) fn estimation_request(
	from: Address,
	operation: &Operation,
	kind: &RequestKind,
	data: &Bytes,
) -> Option<CallRequest> {
	let fully_overridden = operation.gas_limit().is_some() && operation.storage_limit().is_some();
	let to = match kind {
		RequestKind::Create => None,
		RequestKind::Call { to } => Some(*to),
		RequestKind::Destroy { .. } | RequestKind::ClaimDefaultAccount => return None,
	};
	if fully_overridden {
		return None;
	}

	Some(CallRequest {
		from,
		to,
		value: operation.value(),
		data: data.clone(),
	})
}

/// Final limits of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Limits {
	pub gas_limit: u64,
	pub storage_limit: u64,
	/// False when conservative defaults replaced a failed estimate.
	pub estimated: bool,
}

/// Combines the estimate (if one ran), the forced-default fallback and the
/// operation's overrides. Overrides always win.
pub(crate) fn resolve_limits(
	operation: &Operation,
	estimate: Option<Result<ResourceEstimate, String>>,
	defaults: &EstimationConfig,
) -> Result<Limits, BatchError> {
	let (gas, storage, estimated) = match estimate {
		None => (0, 0, true),
		Some(Ok(estimate)) => (estimate.gas, clamp_storage_limit(estimate.storage), true),
		Some(Err(reason)) if operation.force() => {
			tracing::warn!(
				operation = %operation.label(),
				reason = %reason,
				gas_limit = defaults.default_gas_limit,
				storage_limit = defaults.default_storage_limit,
				"Estimation failed, submitting forced operation with default limits"
			);
			(
				defaults.default_gas_limit,
				defaults.default_storage_limit,
				false,
			)
		},
		Some(Err(reason)) => {
			return Err(BatchError::ResourceEstimationFailed {
				operation: operation.label(),
				reason,
			});
		},
	};

	Ok(Limits {
		gas_limit: operation.gas_limit().unwrap_or(gas),
		storage_limit: operation.storage_limit().unwrap_or(storage),
		estimated,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use batch_types::{ContractArtifact, DynSolValue, U256};
	use std::sync::Arc;

	fn token() -> Arc<ContractArtifact> {
		Arc::new(
			ContractArtifact::from_json(
				r#"{
					"abi": [
						{"type": "constructor", "stateMutability": "nonpayable",
						 "inputs": [{"name": "supply", "type": "uint256"}]},
						{"type": "function", "name": "approve", "stateMutability": "nonpayable",
						 "inputs": [{"name": "spender", "type": "address"}, {"name": "amount", "type": "uint256"}],
						 "outputs": [{"name": "", "type": "bool"}]},
						{"type": "function", "name": "mint", "stateMutability": "nonpayable",
						 "inputs": [{"name": "amount", "type": "uint256"}], "outputs": []},
						{"type": "function", "name": "mint", "stateMutability": "nonpayable",
						 "inputs": [{"name": "to", "type": "address"}, {"name": "amount", "type": "uint256"}], "outputs": []}
					],
					"bytecode": "0x60806040"
				}"#,
			)
			.unwrap(),
		)
	}

	fn uint(value: u64) -> DynSolValue {
		DynSolValue::Uint(U256::from(value), 256)
	}

	#[test]
	fn test_clamp_storage_limit() {
		assert_eq!(clamp_storage_limit(-350), 0);
		assert_eq!(clamp_storage_limit(0), 0);
		assert_eq!(clamp_storage_limit(1_024), 1_024);
	}

	#[test]
	fn test_encode_deploy_appends_constructor_args() {
		let (kind, data) = encode_operation(&Operation::deploy(token(), vec![uint(1)])).unwrap();

		assert_eq!(kind, RequestKind::Create);
		assert_eq!(data.len(), 4 + 32);
		assert_eq!(&data[..4], &[0x60, 0x80, 0x60, 0x40]);
		assert_eq!(data[35], 1);
	}

	#[test]
	fn test_encode_call_selects_overload_by_arity() {
		let to = Address::repeat_byte(0x11);
		let (kind, one_arg) =
			encode_operation(&Operation::call(token(), to, "mint", vec![uint(5)])).unwrap();
		let (_, two_args) = encode_operation(&Operation::call(
			token(),
			to,
			"mint",
			vec![DynSolValue::Address(to), uint(5)],
		))
		.unwrap();

		assert_eq!(kind, RequestKind::Call { to });
		assert_eq!(one_arg.len(), 4 + 32);
		assert_eq!(two_args.len(), 4 + 64);
		assert_ne!(one_arg[..4], two_args[..4]);
	}

	#[test]
	fn test_encode_rejects_invalid_operations() {
		let to = Address::repeat_byte(0x11);
		let no_bytecode = Arc::new(ContractArtifact::new(token().abi.clone(), None));

		for operation in [
			Operation::deploy(no_bytecode, vec![uint(1)]),
			Operation::deploy(token(), vec![]),
			Operation::call(token(), to, "burn", vec![]),
			Operation::call(token(), to, "approve", vec![uint(1)]),
			Operation::call(token(), to, "approve", vec![uint(1), uint(2)]),
		] {
			assert!(
				matches!(encode_operation(&operation), Err(BatchError::InvalidOperation(_))),
				"{} should be invalid",
				operation.label()
			);
		}
	}

	#[test]
	fn test_destroy_is_never_estimated() {
		let operation = Operation::destroy(Address::repeat_byte(3));
		let (kind, data) = encode_operation(&operation).unwrap();

		assert!(data.is_empty());
		assert!(estimation_request(Address::ZERO, &operation, &kind, &data).is_none());
	}

	#[test]
	fn test_claim_is_never_estimated_and_carries_no_value() {
		let operation = Operation::claim_default_account();
		let (kind, data) = encode_operation(&operation).unwrap();

		assert_eq!(kind, RequestKind::ClaimDefaultAccount);
		assert!(data.is_empty());
		assert!(estimation_request(Address::ZERO, &operation, &kind, &data).is_none());

		let with_value = Operation::claim_default_account().with_value(U256::from(1u64));
		assert!(matches!(
			encode_operation(&with_value),
			Err(BatchError::InvalidOperation(_))
		));
	}

	#[test]
	fn test_full_overrides_skip_estimation() {
		let operation = Operation::deploy(token(), vec![uint(1)])
			.with_gas_limit(1)
			.with_storage_limit(2);
		let (kind, data) = encode_operation(&operation).unwrap();
		assert!(estimation_request(Address::ZERO, &operation, &kind, &data).is_none());

		let partial = Operation::deploy(token(), vec![uint(1)]).with_gas_limit(1);
		assert!(estimation_request(Address::ZERO, &partial, &kind, &data).is_some());
	}

	#[test]
	fn test_resolve_limits() {
		let defaults = EstimationConfig::default();
		let estimate = ResourceEstimate {
			gas: 90_000,
			storage: -64,
		};
		let operation = Operation::deploy(token(), vec![uint(1)]);

		let limits = resolve_limits(&operation, Some(Ok(estimate)), &defaults).unwrap();
		assert_eq!(
			limits,
			Limits {
				gas_limit: 90_000,
				storage_limit: 0,
				estimated: true
			}
		);

		let overridden = operation.clone().with_storage_limit(500);
		let limits = resolve_limits(&overridden, Some(Ok(estimate)), &defaults).unwrap();
		assert_eq!(limits.gas_limit, 90_000);
		assert_eq!(limits.storage_limit, 500);
	}

	#[test]
	fn test_failed_estimate_needs_force() {
		let defaults = EstimationConfig::default();
		let operation = Operation::deploy(token(), vec![uint(1)]);

		let result = resolve_limits(&operation, Some(Err("revert".into())), &defaults);
		assert!(matches!(
			result,
			Err(BatchError::ResourceEstimationFailed { .. })
		));

		let limits = resolve_limits(
			&operation.forced().with_gas_limit(7),
			Some(Err("revert".into())),
			&defaults,
		)
		.unwrap();
		assert_eq!(
			limits,
			Limits {
				gas_limit: 7,
				storage_limit: 100_000,
				estimated: false
			}
		);
	}
}
