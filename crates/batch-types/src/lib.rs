//! Common types for the batch orchestrator.
//!
//! Shared by every crate of the workspace: operation descriptors, encoded requests
//! and batches, chain status and event types, submission states, and the config
//! validation framework used by pluggable implementations.

/// Native accounts and their EVM address bindings.
pub mod account;
/// Encoded requests, batches and signed batches.
pub mod batch;
/// Chain-facing types: hashes, statuses and execution events.
pub mod chain;
/// Operation descriptors built by callers.
pub mod operation;
/// Self-registration of configurable implementations.
pub mod registry;
/// Redacting string for private keys.
pub mod secret_string;
/// Submission lifecycle states and failures.
pub mod submission;
/// Display helpers.
pub mod utils;
/// Config schema validation.
pub mod validation;

pub use account::{AccountBinding, NativeAccount};
pub use batch::*;
pub use chain::*;
pub use operation::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use submission::*;
pub use utils::{format_units, truncate_id};
pub use validation::*;

pub use alloy_dyn_abi::DynSolValue;
pub use alloy_primitives::{Address, Bytes, B256, U256};
