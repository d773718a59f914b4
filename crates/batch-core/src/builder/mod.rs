//! Construction of a [`BatchOrchestrator`] from configuration.
//!
//! Every `[<section>.implementations.<name>]` table is handed to the factory
//! registered under `<name>`; the section's `primary` implementation is the one the
//! orchestrator uses.

use crate::engine::BatchOrchestrator;
use batch_account::{AccountError, SigningAuthority};
use batch_config::Config;
use batch_delivery::{ChainClient, DeliveryError};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while building an orchestrator.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions, keyed by implementation name.
pub struct OrchestratorFactories<CF, AF> {
	pub chain_factories: HashMap<String, CF>,
	pub account_factories: HashMap<String, AF>,
}

impl OrchestratorFactories<batch_delivery::ChainFactory, batch_account::AccountFactory> {
	/// Every implementation shipped with the workspace.
	pub fn all() -> Self {
		Self {
			chain_factories: batch_delivery::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			account_factories: batch_account::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
		}
	}
}

/// Builds a [`BatchOrchestrator`] with pluggable implementations.
pub struct OrchestratorBuilder {
	config: Config,
}

impl OrchestratorBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	pub fn build<CF, AF>(
		self,
		factories: OrchestratorFactories<CF, AF>,
	) -> Result<BatchOrchestrator, BuilderError>
	where
		CF: Fn(&toml::Value) -> Result<Box<dyn ChainClient>, DeliveryError>,
		AF: Fn(&toml::Value) -> Result<Box<dyn SigningAuthority>, AccountError>,
	{
		let chain = load_primary(
			"chain",
			&self.config.chain.primary,
			&self.config.chain.implementations,
			&factories.chain_factories,
		)?;
		let signer = load_primary(
			"account",
			&self.config.account.primary,
			&self.config.account.implementations,
			&factories.account_factories,
		)?;

		Ok(BatchOrchestrator::new(
			self.config,
			Arc::from(chain),
			Arc::from(signer),
		))
	}
}

/// Creates every configured implementation that has a factory and returns the
/// primary one.
fn load_primary<T: ?Sized, E: Display, F>(
	component: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<Box<T>, BuilderError>
where
	F: Fn(&toml::Value) -> Result<Box<T>, E>,
{
	let mut loaded = HashMap::new();
	for (name, config) in implementations {
		let Some(factory) = factories.get(name) else {
			tracing::warn!(component, implementation = %name, "No factory registered, skipping");
			continue;
		};
		match factory(config) {
			Ok(implementation) => {
				let is_primary = name == primary;
				tracing::info!(component, implementation = %name, enabled = %is_primary, "Loaded");
				loaded.insert(name.clone(), implementation);
			},
			Err(e) => {
				tracing::error!(
					component,
					implementation = %name,
					error = %e,
					"Failed to create implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			},
		}
	}

	if loaded.is_empty() {
		return Err(BuilderError::MissingComponent(format!(
			"no {} implementations available",
			component
		)));
	}
	loaded.remove(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} '{}' failed to load or has invalid configuration",
			component, primary
		))
	})
}

impl BatchOrchestrator {
	/// Builds an orchestrator from configuration with every shipped implementation
	/// available.
	pub fn from_config(config: Config) -> Result<Self, BuilderError> {
		OrchestratorBuilder::new(config).build(OrchestratorFactories::all())
	}
}
