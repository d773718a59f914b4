//! One-shot latch over status notifications.

use batch_types::{BlockHash, SubmissionState, TxStatus};

/// First inclusion reported for an extrinsic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
	InBlock(BlockHash),
	Finalized(BlockHash),
}

impl Inclusion {
	pub fn block(&self) -> BlockHash {
		match self {
			Inclusion::InBlock(block) | Inclusion::Finalized(block) => *block,
		}
	}

	pub fn state(&self) -> SubmissionState {
		match self {
			Inclusion::InBlock(block_hash) => SubmissionState::IncludedInBlock {
				block_hash: *block_hash,
			},
			Inclusion::Finalized(block_hash) => SubmissionState::Finalized {
				block_hash: *block_hash,
			},
		}
	}
}

/// Fires on the first `InBlock` or `Finalized` notification and never again.
///
/// Nodes report `InBlock` and later `Finalized` for the same extrinsic, and may
/// repeat `InBlock` after a reorg; reconciliation must run exactly once.
#[derive(Debug, Default)]
pub struct TerminalLatch {
	fired: Option<Inclusion>,
}

impl TerminalLatch {
	/// Returns the inclusion if `status` is the first actionable one.
	pub fn observe(&mut self, status: &TxStatus) -> Option<Inclusion> {
		if self.fired.is_some() {
			return None;
		}
		let inclusion = match status {
			TxStatus::InBlock(block) => Inclusion::InBlock(*block),
			TxStatus::Finalized(block) => Inclusion::Finalized(*block),
			_ => return None,
		};
		self.fired = Some(inclusion);
		Some(inclusion)
	}

	pub fn fired(&self) -> Option<Inclusion> {
		self.fired
	}
}
