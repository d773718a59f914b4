//! In-process signing with private keys from configuration.
//!
//! Config table:
//!
//! ```toml
//! [account.implementations.local]
//! private_keys = ["${DEPLOYER_KEY}", "0x..."]
//! ```

use crate::{AccountError, AccountFactory, AccountRegistry, SigningAuthority};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use batch_types::{
	Address, Batch, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, SecretString,
	Signature, SignedBatch, ValidationError, B256,
};
use tracing::debug;

/// Signs with a fixed set of private keys held in memory.
pub struct LocalSigningAuthority {
	signers: Vec<PrivateKeySigner>,
}

impl LocalSigningAuthority {
	/// Creates an authority from hex-encoded private keys.
	pub fn new(private_keys: &[SecretString]) -> Result<Self, AccountError> {
		let signers = private_keys
			.iter()
			.map(|key| {
				key.with_exposed(|hex| hex.parse::<PrivateKeySigner>())
					.map_err(|e| AccountError::InvalidKey(e.to_string()))
			})
			.collect::<Result<Vec<_>, _>>()?;

		if signers.is_empty() {
			return Err(AccountError::InvalidKey(
				"at least one private key is required".to_string(),
			));
		}

		Ok(Self { signers })
	}

	fn signer_for(&self, account: Address) -> Result<&PrivateKeySigner, AccountError> {
		self.signers
			.iter()
			.find(|signer| signer.address() == account)
			.ok_or(AccountError::UnknownAccount(account))
	}
}

/// Configuration schema for the local signing authority.
pub struct LocalSigningSchema;

impl LocalSigningSchema {
	/// Validates a config table before an authority is built from it.
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		LocalSigningSchema.validate(config)
	}
}

impl ConfigSchema for LocalSigningSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"private_keys",
				FieldType::Array(Box::new(FieldType::String)),
			)
			.with_validator(|value| {
				let keys = value.as_array().map(Vec::as_slice).unwrap_or_default();
				if keys.is_empty() {
					return Err("at least one private key is required".to_string());
				}
				for key in keys.iter().filter_map(toml::Value::as_str) {
					let hex = key.strip_prefix("0x").unwrap_or(key);
					if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
						return Err("private key must be 32 bytes of hex".to_string());
					}
				}
				Ok(())
			})],
			vec![],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl SigningAuthority for LocalSigningAuthority {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalSigningSchema)
	}

	async fn accounts(&self) -> Result<Vec<Address>, AccountError> {
		Ok(self.signers.iter().map(|signer| signer.address()).collect())
	}

	async fn sign_batch(
		&self,
		account: Address,
		batch: &Batch,
		nonce: u64,
		digest: B256,
	) -> Result<SignedBatch, AccountError> {
		let signer = self.signer_for(account)?;
		let signature = signer
			.sign_hash(&digest)
			.await
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;

		debug!(account = %account, nonce, items = batch.len(), "Signed batch");

		Ok(SignedBatch {
			batch: batch.clone(),
			signer: account,
			nonce,
			signature: Signature(signature.as_bytes().to_vec()),
		})
	}
}

/// Factory for [`LocalSigningAuthority`].
pub fn create_account(config: &toml::Value) -> Result<Box<dyn SigningAuthority>, AccountError> {
	LocalSigningSchema::validate_config(config)
		.map_err(|e| AccountError::InvalidKey(format!("Invalid configuration: {}", e)))?;

	let private_keys = config
		.get("private_keys")
		.and_then(toml::Value::as_array)
		.map(|keys| {
			keys.iter()
				.filter_map(toml::Value::as_str)
				.map(SecretString::from)
				.collect::<Vec<_>>()
		})
		.unwrap_or_default();

	Ok(Box::new(LocalSigningAuthority::new(&private_keys)?))
}

/// Registry for the local signing authority.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl AccountRegistry for Registry {}
