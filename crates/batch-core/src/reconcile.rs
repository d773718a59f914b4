//! Reconciliation of a block's event log against the submitted batch.

use batch_types::{Address, Batch, BatchFailure, ChainEvent, EventRecord, FailureKind};

/// Extracts the created contract addresses of `batch` from its events.
///
/// Any failure event fails the whole batch, even in best-effort mode where earlier
/// items kept their effects. The reported reason and item index come from one
/// event: the first failure that names a batch item, else the first failure.
///
/// Without failures, the `Created` events are matched in log order one-to-one with
/// the batch's create requests. When the chain reports which item emitted an
/// event, that index must agree with the match. Claims create no contracts.
pub fn reconcile_events(batch: &Batch, events: &[EventRecord]) -> Result<Vec<Address>, BatchFailure> {
	let failures: Vec<(&EventRecord, &str)> = events
		.iter()
		.filter_map(|record| record.event.failure_reason().map(|reason| (record, reason)))
		.collect();
	let culprit = failures
		.iter()
		.find(|(record, _)| failed_item(record).is_some())
		.or_else(|| failures.first());
	if let Some((record, reason)) = culprit {
		let mut failure = BatchFailure::new(FailureKind::Execution, *reason);
		if let Some(index) = failed_item(record) {
			failure = failure.at_operation(index);
		}
		tracing::debug!(event = %record, "Batch reported a failure");
		return Err(failure);
	}

	let created: Vec<(Option<u32>, Address)> = events
		.iter()
		.filter_map(|record| match record.event {
			ChainEvent::Created { contract, .. } => Some((record.call_index, contract)),
			_ => None,
		})
		.collect();
	let expected = batch.create_indices();

	if created.len() != expected.len() {
		return Err(BatchFailure::new(
			FailureKind::Reconciliation,
			format!(
				"expected {} created contracts, found {}",
				expected.len(),
				created.len()
			),
		));
	}

	created
		.into_iter()
		.zip(expected)
		.map(|((call_index, address), request_index)| match call_index {
			Some(call_index) if call_index as usize != request_index => Err(BatchFailure::new(
				FailureKind::Reconciliation,
				format!(
					"contract {} was created by item {}, expected item {}",
					address, call_index, request_index
				),
			)
			.at_operation(request_index)),
			_ => Ok(address),
		})
		.collect()
}

fn failed_item(record: &EventRecord) -> Option<usize> {
	match record.event {
		ChainEvent::BatchInterrupted { index, .. } => Some(index as usize),
		_ => record.call_index.map(|index| index as usize),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use batch_types::{BatchMode, Bytes, OperationRequest, RequestKind, U256};

	fn batch(kinds: Vec<RequestKind>) -> Batch {
		Batch::new(
			BatchMode::Atomic,
			kinds
				.into_iter()
				.map(|kind| OperationRequest {
					kind,
					data: Bytes::new(),
					value: U256::ZERO,
					gas_limit: 0,
					storage_limit: 0,
					access_list: Vec::new(),
					estimated: true,
				})
				.collect(),
		)
	}

	fn created(position: u32, call_index: Option<u32>, byte: u8) -> EventRecord {
		EventRecord::new(
			position,
			call_index,
			ChainEvent::Created {
				from: Address::ZERO,
				contract: Address::repeat_byte(byte),
			},
		)
	}

	fn call() -> RequestKind {
		RequestKind::Call {
			to: Address::repeat_byte(0xcc),
		}
	}

	#[test]
	fn test_addresses_follow_create_order() {
		let batch = batch(vec![RequestKind::Create, call(), RequestKind::Create]);
		let events = vec![
			created(1, Some(0), 0xa1),
			EventRecord::new(2, Some(1), ChainEvent::Executed {
				from: Address::ZERO,
				contract: Address::repeat_byte(0xcc),
			}),
			created(3, Some(2), 0xb2),
			EventRecord::new(4, None, ChainEvent::ExtrinsicSuccess),
		];

		assert_eq!(
			reconcile_events(&batch, &events).unwrap(),
			vec![Address::repeat_byte(0xa1), Address::repeat_byte(0xb2)]
		);
	}

	#[test]
	fn test_claim_creates_no_address() {
		let batch = batch(vec![RequestKind::ClaimDefaultAccount, RequestKind::Create]);
		let events = vec![
			EventRecord::new(1, Some(0), ChainEvent::AccountClaimed {
				account: batch_types::NativeAccount::from_evm_address(Address::ZERO),
				evm_address: Address::ZERO,
			}),
			created(2, Some(1), 0xa1),
		];

		assert_eq!(
			reconcile_events(&batch, &events).unwrap(),
			vec![Address::repeat_byte(0xa1)]
		);
	}

	#[test]
	fn test_positional_match_without_call_index() {
		let batch = batch(vec![call(), RequestKind::Create]);
		let events = vec![created(5, None, 0x01)];

		assert_eq!(
			reconcile_events(&batch, &events).unwrap(),
			vec![Address::repeat_byte(0x01)]
		);
	}

	#[test]
	fn test_failure_event_wins() {
		let batch = batch(vec![RequestKind::Create, call(), RequestKind::Create]);
		let events = vec![
			created(1, Some(0), 0xa1),
			EventRecord::new(2, Some(1), ChainEvent::ExecutedFailed {
				from: Address::ZERO,
				contract: Address::repeat_byte(0xcc),
				reason: "revert: not owner".into(),
			}),
			EventRecord::new(3, None, ChainEvent::ExtrinsicFailed {
				reason: "Module error".into(),
			}),
		];

		let failure = reconcile_events(&batch, &events).unwrap_err();
		assert_eq!(failure.kind, FailureKind::Execution);
		assert_eq!(failure.operation_index, Some(1));
		assert_eq!(failure.reason, "revert: not owner");
	}

	#[test]
	fn test_reason_and_index_from_same_event() {
		let batch = batch(vec![RequestKind::Create, call(), call()]);
		let events = vec![
			EventRecord::new(1, None, ChainEvent::ExtrinsicFailed {
				reason: "Module error".into(),
			}),
			EventRecord::new(2, Some(2), ChainEvent::ExecutedFailed {
				from: Address::ZERO,
				contract: Address::repeat_byte(0xcc),
				reason: "revert: not owner".into(),
			}),
		];

		let failure = reconcile_events(&batch, &events).unwrap_err();
		assert_eq!(failure.operation_index, Some(2));
		assert_eq!(failure.reason, "revert: not owner");
	}

	#[test]
	fn test_failure_without_item_index() {
		let batch = batch(vec![RequestKind::Create]);
		let events = vec![EventRecord::new(1, None, ChainEvent::ExtrinsicFailed {
			reason: "Module error".into(),
		})];

		let failure = reconcile_events(&batch, &events).unwrap_err();
		assert_eq!(failure.operation_index, None);
		assert_eq!(failure.reason, "Module error");
	}

	#[test]
	fn test_interrupted_batch_reports_index() {
		let batch = batch(vec![RequestKind::Create, call()]);
		let events = vec![
			created(1, None, 0xa1),
			EventRecord::new(2, None, ChainEvent::BatchInterrupted {
				index: 1,
				reason: "OutOfGas".into(),
			}),
		];

		let failure = reconcile_events(&batch, &events).unwrap_err();
		assert_eq!(failure.operation_index, Some(1));
	}

	#[test]
	fn test_count_mismatch() {
		let batch = batch(vec![RequestKind::Create, RequestKind::Create]);
		let events = vec![created(1, None, 0xa1)];

		let failure = reconcile_events(&batch, &events).unwrap_err();
		assert_eq!(failure.kind, FailureKind::Reconciliation);
	}

	#[test]
	fn test_call_index_mismatch() {
		let batch = batch(vec![RequestKind::Create, call()]);
		let events = vec![created(1, Some(1), 0xa1)];

		let failure = reconcile_events(&batch, &events).unwrap_err();
		assert_eq!(failure.kind, FailureKind::Reconciliation);
		assert_eq!(failure.operation_index, Some(0));
	}
}
