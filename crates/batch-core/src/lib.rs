//! Core of the batch orchestrator.
//!
//! Turns high-level operations into encoded, resource-limited requests, assembles
//! them into a single batch extrinsic, follows the submission until it is included,
//! and reconciles the block's events into per-item outcomes. The
//! [`BatchOrchestrator`] ties these steps together over a [`ChainClient`] and a
//! [`SigningAuthority`] chosen at construction.
//!
//! [`ChainClient`]: batch_delivery::ChainClient
//! [`SigningAuthority`]: batch_account::SigningAuthority

use batch_types::{BatchFailure, FailureKind};
use thiserror::Error;

pub mod assembler;
pub mod builder;
pub mod engine;
pub mod queries;
pub mod reconcile;
pub mod request;
pub mod submission;

pub use builder::{BuilderError, OrchestratorBuilder, OrchestratorFactories};
pub use engine::BatchOrchestrator;
pub use submission::SubmissionStream;

/// Errors reported by the orchestrator.
///
/// Building and assembling fail synchronously; everything after submission is
/// reported through the [`SubmissionStream`] and converted with
/// `From<BatchFailure>` by [`SubmissionStream::outcome`].
#[derive(Debug, Error)]
pub enum BatchError {
	/// The operation cannot be encoded. Forcing does not help.
	#[error("Invalid operation: {0}")]
	InvalidOperation(String),
	#[error("Resource estimation failed for {operation}: {reason}")]
	ResourceEstimationFailed { operation: String, reason: String },
	#[error("Batch has no operations")]
	EmptyBatch,
	/// Signing, submission or status tracking failed; the batch may be resubmitted.
	#[error("Submission rejected: {0}")]
	SubmissionRejected(String),
	#[error("Execution failed{}: {reason}", index.map(|i| format!(" at item {}", i)).unwrap_or_default())]
	ExecutionFailed { index: Option<usize>, reason: String },
	#[error("Reconciliation mismatch: {0}")]
	ReconciliationMismatch(String),
	#[error("Timed out: {0}")]
	TimedOut(String),
	#[error("Submission cancelled")]
	Cancelled,
	#[error("Query failed: {0}")]
	Query(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl From<BatchFailure> for BatchError {
	fn from(failure: BatchFailure) -> Self {
		let BatchFailure {
			kind,
			reason,
			operation_index,
			..
		} = failure;

		match kind {
			FailureKind::Estimation => BatchError::ResourceEstimationFailed {
				operation: operation_index
					.map(|i| format!("item {}", i))
					.unwrap_or_else(|| "batch".to_string()),
				reason,
			},
			FailureKind::Execution => BatchError::ExecutionFailed {
				index: operation_index,
				reason,
			},
			FailureKind::Reconciliation => BatchError::ReconciliationMismatch(reason),
			FailureKind::Transport => BatchError::SubmissionRejected(reason),
			FailureKind::TimedOut => BatchError::TimedOut(reason),
			FailureKind::Cancelled => BatchError::Cancelled,
		}
	}
}
