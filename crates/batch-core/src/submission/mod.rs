//! Submission tracking.
//!
//! Every submitted batch gets its own tracker task. The tracker serializes
//! submissions per account, signs, submits, follows status notifications until the
//! first inclusion, reconciles the block's events, and reports each step as a
//! [`SubmissionState`] on the batch's [`SubmissionStream`]. The last item of the
//! stream is always terminal.

mod latch;

pub use latch::{Inclusion, TerminalLatch};

use crate::reconcile::reconcile_events;
use crate::BatchError;
use batch_account::SigningAuthority;
use batch_delivery::ChainClient;
use batch_types::{
	truncate_id, Address, Batch, BatchFailure, BatchOutcome, FailureKind, SignedBatch,
	SubmissionState, TransactionHash, TxStatus,
};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Observable progress of one submitted batch.
///
/// Dropping the stream does not stop the submission: a batch handed to the chain
/// cannot be revoked, and the account stays locked until the tracker reaches a
/// terminal state.
pub struct SubmissionStream {
	batch_id: Uuid,
	states: UnboundedReceiverStream<SubmissionState>,
	cancel: Option<oneshot::Sender<()>>,
}

impl SubmissionStream {
	pub fn batch_id(&self) -> Uuid {
		self.batch_id
	}

	/// Requests cancellation.
	///
	/// Honoured only while the tracker is still waiting for the account lock, the
	/// nonce or the signature; the stream then ends with `Errored(Cancelled)`. Once
	/// the batch is signed the request is ignored.
	pub fn cancel(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			let _ = cancel.send(());
		}
	}

	/// Drains the stream and converts its terminal state into a result.
	pub async fn outcome(mut self) -> Result<BatchOutcome, BatchError> {
		let mut terminal = None;
		while let Some(state) = self.next().await {
			if state.is_terminal() {
				terminal = Some(state);
			}
		}

		match terminal {
			Some(SubmissionState::Reconciled(outcome)) => Ok(outcome),
			Some(SubmissionState::Failed(failure)) | Some(SubmissionState::Errored(failure)) => {
				Err(failure.into())
			},
			_ => Err(BatchError::SubmissionRejected(
				"tracker stopped without a terminal state".to_string(),
			)),
		}
	}
}

impl Stream for SubmissionStream {
	type Item = SubmissionState;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		Pin::new(&mut self.states).poll_next(cx)
	}
}

/// Everything a tracker task needs.
pub(crate) struct Tracker {
	pub chain: Arc<dyn ChainClient>,
	pub signer: Arc<dyn SigningAuthority>,
	/// In-flight lock of the submitting account.
	pub account_lock: Arc<Mutex<()>>,
	pub status_timeout: Duration,
}

impl Tracker {
	/// Spawns the tracker task for `batch` and returns its stream.
	pub fn spawn(self, batch: Batch, account: Address) -> SubmissionStream {
		let (states, receiver) = mpsc::unbounded_channel();
		let (cancel, cancelled) = oneshot::channel();
		let batch_id = batch.id;

		tokio::spawn(async move {
			let emit = |state: SubmissionState| {
				debug!(state = state.label(), "Submission state");
				// The caller may have dropped the stream; the submission continues.
				let _ = states.send(state);
			};
			self.run(batch, account, cancelled, emit).await;
		});

		SubmissionStream {
			batch_id,
			states: UnboundedReceiverStream::new(receiver),
			cancel: Some(cancel),
		}
	}

	#[instrument(skip_all, fields(batch_id = %truncate_id(&batch.id.to_string()), account = %account))]
	async fn run<F>(
		self,
		batch: Batch,
		account: Address,
		mut cancelled: oneshot::Receiver<()>,
		emit: F,
	) where
		F: Fn(SubmissionState),
	{
		emit(SubmissionState::Pending);

		// A dropped stream closes the channel without a value; only an explicit
		// cancel matches.
		let prepared = tokio::select! {
			biased;
			Ok(()) = &mut cancelled => {
				info!("Submission cancelled before signing");
				Err(BatchFailure::new(
					FailureKind::Cancelled,
					"cancelled before the batch was signed",
				))
			}
			prepared = self.prepare(&batch, account) => prepared,
		};
		let (_guard, signed) = match prepared {
			Ok(prepared) => prepared,
			Err(failure) => {
				emit(SubmissionState::Errored(failure));
				return;
			},
		};

		let submitted = match self.chain.submit(signed).await {
			Ok(submitted) => submitted,
			Err(e) => {
				warn!(error = %e, "Batch rejected by the chain");
				emit(SubmissionState::Errored(BatchFailure::new(
					FailureKind::Transport,
					e.to_string(),
				)));
				return;
			},
		};
		let tx_hash = submitted.tx_hash;
		info!(tx_hash = %truncate_id(&tx_hash.to_string()), items = batch.len(), "Batch submitted");
		emit(SubmissionState::Submitted { tx_hash });

		let timeout = self.status_timeout;
		let inclusion = tokio::time::timeout(timeout, wait_for_inclusion(submitted.statuses))
			.await
			.unwrap_or_else(|_| {
				Err(BatchFailure::new(
					FailureKind::TimedOut,
					format!("no inclusion within {}s", timeout.as_secs()),
				))
			});
		let inclusion = match inclusion {
			Ok(inclusion) => inclusion,
			Err(failure) => {
				warn!(tx_hash = %truncate_id(&tx_hash.to_string()), reason = %failure, "Batch was not included");
				emit(SubmissionState::Errored(failure.with_tx_hash(tx_hash)));
				return;
			},
		};

		emit(inclusion.state());
		let terminal = self.reconcile(&batch, tx_hash, inclusion).await;
		match &terminal {
			SubmissionState::Reconciled(outcome) => info!(
				tx_hash = %truncate_id(&tx_hash.to_string()),
				created = outcome.addresses.len(),
				"Batch reconciled"
			),
			other => warn!(
				tx_hash = %truncate_id(&tx_hash.to_string()),
				state = other.label(),
				"Batch failed"
			),
		}
		emit(terminal);
	}

	/// Waits for the account, reads its nonce and obtains the signature over the
	/// chain's digest for that nonce.
	async fn prepare(
		&self,
		batch: &Batch,
		account: Address,
	) -> Result<(OwnedMutexGuard<()>, SignedBatch), BatchFailure> {
		let guard = Arc::clone(&self.account_lock).lock_owned().await;

		let nonce = self.chain.account_nonce(account).await.map_err(|e| {
			BatchFailure::new(FailureKind::Transport, format!("cannot read nonce: {}", e))
		})?;

		let digest = self
			.chain
			.signing_digest(batch, account, nonce)
			.await
			.map_err(|e| {
				BatchFailure::new(FailureKind::Transport, format!("cannot build digest: {}", e))
			})?;

		let signed = self
			.signer
			.sign_batch(account, batch, nonce, digest)
			.await
			.map_err(|e| BatchFailure::new(FailureKind::Transport, e.to_string()))?;
		debug!(nonce, "Batch signed");

		Ok((guard, signed))
	}

	async fn reconcile(
		&self,
		batch: &Batch,
		tx_hash: TransactionHash,
		inclusion: Inclusion,
	) -> SubmissionState {
		let block_hash = inclusion.block();
		let events = match self.chain.block_events(block_hash, tx_hash).await {
			Ok(events) => events,
			Err(e) => {
				return SubmissionState::Failed(
					BatchFailure::new(
						FailureKind::Reconciliation,
						format!("cannot read block events: {}", e),
					)
					.with_tx_hash(tx_hash),
				);
			},
		};

		match reconcile_events(batch, &events) {
			Ok(addresses) => SubmissionState::Reconciled(BatchOutcome {
				batch_id: batch.id,
				tx_hash,
				block_hash,
				addresses,
				events,
			}),
			Err(failure) => SubmissionState::Failed(failure.with_tx_hash(tx_hash)),
		}
	}
}

/// Follows notifications until the latch fires or the extrinsic is lost.
async fn wait_for_inclusion(
	mut statuses: BoxStream<'static, TxStatus>,
) -> Result<Inclusion, BatchFailure> {
	let mut latch = TerminalLatch::default();
	while let Some(status) = statuses.next().await {
		debug!(status = ?status, "Status notification");
		if let Some(inclusion) = latch.observe(&status) {
			return Ok(inclusion);
		}
		if let Some(reason) = status.fatal_reason() {
			return Err(BatchFailure::new(FailureKind::Transport, reason));
		}
	}

	Err(BatchFailure::new(
		FailureKind::Transport,
		"status stream ended before inclusion",
	))
}
