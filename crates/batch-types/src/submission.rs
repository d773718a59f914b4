//! Submission lifecycle types.
//!
//! A submitted batch moves through `Pending -> Submitted -> IncludedInBlock |
//! Finalized` and ends in exactly one terminal state: `Reconciled`, `Failed` or
//! `Errored`. Terminal states carry either the reconciled outcome or a
//! [`BatchFailure`] whose [`FailureKind`] tells the caller which corrective action
//! applies.

use crate::{BlockHash, EventRecord, TransactionHash};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Category of a batch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
	/// Resource estimation failed; adjust inputs or retry with `force`.
	Estimation,
	/// An item reverted on-chain; adjust inputs.
	Execution,
	/// The block log does not match the requested deployments.
	Reconciliation,
	/// Signing or transport rejected the batch before inclusion; resubmit.
	Transport,
	/// A bounded wait expired; check the network.
	TimedOut,
	/// The caller cancelled before the batch was submitted.
	Cancelled,
}

impl fmt::Display for FailureKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let label = match self {
			FailureKind::Estimation => "estimation failed",
			FailureKind::Execution => "execution failed",
			FailureKind::Reconciliation => "reconciliation mismatch",
			FailureKind::Transport => "submission rejected",
			FailureKind::TimedOut => "timed out",
			FailureKind::Cancelled => "cancelled",
		};
		f.write_str(label)
	}
}

/// Diagnostic attached to `Failed` and `Errored` states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
	pub kind: FailureKind,
	/// Human-readable reason.
	pub reason: String,
	/// Batch item the failure is attributed to, if known.
	pub operation_index: Option<usize>,
	/// Extrinsic hash, if the batch reached the chain.
	pub tx_hash: Option<TransactionHash>,
}

impl BatchFailure {
	pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
		Self {
			kind,
			reason: reason.into(),
			operation_index: None,
			tx_hash: None,
		}
	}

	pub fn at_operation(mut self, index: usize) -> Self {
		self.operation_index = Some(index);
		self
	}

	pub fn with_tx_hash(mut self, tx_hash: TransactionHash) -> Self {
		self.tx_hash = Some(tx_hash);
		self
	}
}

impl fmt::Display for BatchFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.operation_index {
			Some(index) => write!(f, "{} at item {}: {}", self.kind, index, self.reason),
			None => write!(f, "{}: {}", self.kind, self.reason),
		}
	}
}

/// Structured result of a reconciled batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
	pub batch_id: Uuid,
	pub tx_hash: TransactionHash,
	pub block_hash: BlockHash,
	/// Created contract addresses, in the order of the batch's create requests.
	pub addresses: Vec<Address>,
	/// The extrinsic's events from the including block.
	pub events: Vec<EventRecord>,
}

/// Observable state of a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionState {
	/// Waiting for the account to become free and for the signature.
	Pending,
	/// Signed and accepted by the chain client.
	Submitted { tx_hash: TransactionHash },
	/// Included in a (not yet final) block.
	IncludedInBlock { block_hash: BlockHash },
	/// Included in a finalized block.
	Finalized { block_hash: BlockHash },
	/// Terminal success.
	Reconciled(BatchOutcome),
	/// Terminal failure reported by the chain.
	Failed(BatchFailure),
	/// Terminal failure before any inclusion was observed.
	Errored(BatchFailure),
}

impl SubmissionState {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			SubmissionState::Reconciled(_)
				| SubmissionState::Failed(_)
				| SubmissionState::Errored(_)
		)
	}

	/// Short state name for logs.
	pub fn label(&self) -> &'static str {
		match self {
			SubmissionState::Pending => "pending",
			SubmissionState::Submitted { .. } => "submitted",
			SubmissionState::IncludedInBlock { .. } => "in_block",
			SubmissionState::Finalized { .. } => "finalized",
			SubmissionState::Reconciled(_) => "reconciled",
			SubmissionState::Failed(_) => "failed",
			SubmissionState::Errored(_) => "errored",
		}
	}
}
