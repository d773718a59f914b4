//! Batch assembly.

use crate::BatchError;
use batch_types::{Batch, BatchMode, OperationRequest};

/// Wraps `requests` in a batch, keeping their order exactly.
///
/// Only emptiness is checked: requests are validated when they are built, and
/// dependencies between items are the caller's responsibility.
pub fn assemble_batch(
	requests: Vec<OperationRequest>,
	mode: BatchMode,
) -> Result<Batch, BatchError> {
	if requests.is_empty() {
		return Err(BatchError::EmptyBatch);
	}
	Ok(Batch::new(mode, requests))
}

#[cfg(test)]
mod tests {
	use super::*;
	use batch_types::{Address, Bytes, RequestKind, U256};

	fn request(kind: RequestKind, gas_limit: u64) -> OperationRequest {
		OperationRequest {
			kind,
			data: Bytes::new(),
			value: U256::ZERO,
			gas_limit,
			storage_limit: 0,
			access_list: Vec::new(),
			estimated: true,
		}
	}

	#[test]
	fn test_empty_batch_rejected() {
		assert!(matches!(
			assemble_batch(Vec::new(), BatchMode::Atomic),
			Err(BatchError::EmptyBatch)
		));
	}

	#[test]
	fn test_order_and_mode_preserved() {
		let to = Address::repeat_byte(0xab);
		let requests = vec![
			request(RequestKind::Create, 1),
			request(RequestKind::Call { to }, 2),
			request(RequestKind::Destroy { contract: to }, 3),
		];

		let batch = assemble_batch(requests.clone(), BatchMode::BestEffort).unwrap();
		assert_eq!(batch.requests(), requests.as_slice());
		assert_eq!(batch.mode, BatchMode::BestEffort);
	}
}
