//! Native (32-byte) chain accounts and their relation to EVM addresses.
//!
//! Accounts controlled by an Ethereum key live on the native side under
//! `b"evm:" ++ address ++ [0u8; 8]`. Any other native account has no EVM address
//! until it claims one; before that the chain derives a default address from the
//! account id.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const EVM_PREFIX: &[u8; 4] = b"evm:";

/// 32-byte account id of the native (non-EVM) side of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NativeAccount(pub B256);

impl NativeAccount {
	/// Native account controlled by the Ethereum key behind `address`.
	pub fn from_evm_address(address: Address) -> Self {
		let mut id = [0u8; 32];
		id[..4].copy_from_slice(EVM_PREFIX);
		id[4..24].copy_from_slice(address.as_slice());
		Self(B256::from(id))
	}

	/// The EVM address embedded in the account id, if the account was derived
	/// with [`NativeAccount::from_evm_address`].
	pub fn embedded_evm_address(&self) -> Option<Address> {
		let id = self.0.as_slice();
		if &id[..4] == EVM_PREFIX && id[24..].iter().all(|byte| *byte == 0) {
			Some(Address::from_slice(&id[4..24]))
		} else {
			None
		}
	}

	/// Preimage the chain hashes to derive the default EVM address.
	pub fn default_address_preimage(&self) -> Vec<u8> {
		let mut preimage = EVM_PREFIX.to_vec();
		preimage.extend_from_slice(self.0.as_slice());
		preimage
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0 .0
	}
}

impl fmt::Display for NativeAccount {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for NativeAccount {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.parse::<B256>()
			.map(Self)
			.map_err(|e| format!("invalid native account {}: {}", s, e))
	}
}

/// What the chain knows about the EVM side of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBinding {
	pub native: NativeAccount,
	/// Address bound by a claim, `None` while unclaimed.
	pub evm_address: Option<Address>,
	/// Address the account gets when it claims its default.
	pub default_evm_address: Address,
}

impl AccountBinding {
	pub fn is_claimed(&self) -> bool {
		self.evm_address.is_some()
	}

	/// The bound address, or the default one while unclaimed.
	pub fn effective_evm_address(&self) -> Address {
		self.evm_address.unwrap_or(self.default_evm_address)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_evm_derived_account_round_trip() {
		let address = Address::repeat_byte(0xab);
		let account = NativeAccount::from_evm_address(address);

		assert_eq!(&account.as_bytes()[..4], b"evm:");
		assert_eq!(account.as_bytes()[24..], [0u8; 8]);
		assert_eq!(account.embedded_evm_address(), Some(address));
	}

	#[test]
	fn test_plain_account_has_no_embedded_address() {
		let account = NativeAccount(B256::repeat_byte(0x11));
		assert_eq!(account.embedded_evm_address(), None);

		let mut almost = *NativeAccount::from_evm_address(Address::ZERO).as_bytes();
		almost[31] = 1;
		assert_eq!(NativeAccount(B256::from(almost)).embedded_evm_address(), None);
	}

	#[test]
	fn test_parse_and_display() {
		let text = "0x1111111111111111111111111111111111111111111111111111111111111111";
		let account: NativeAccount = text.parse().unwrap();
		assert_eq!(account.to_string(), text);
		assert!("0x1234".parse::<NativeAccount>().is_err());
	}

	#[test]
	fn test_binding_effective_address() {
		let mut binding = AccountBinding {
			native: NativeAccount(B256::ZERO),
			evm_address: None,
			default_evm_address: Address::repeat_byte(1),
		};
		assert!(!binding.is_claimed());
		assert_eq!(binding.effective_evm_address(), Address::repeat_byte(1));

		binding.evm_address = Some(Address::repeat_byte(2));
		assert_eq!(binding.effective_evm_address(), Address::repeat_byte(2));
	}
}
