//! Mnemonic-derived account implementation.
//!
//! Derives a secp256k1 key from a BIP-39 mnemonic along the BIP-44 path
//! `m/44'/{coin_type}'/0'/0/0`. Terra accounts use coin type 330; chains
//! following the Cosmos Hub convention use 118.

use crate::{AccountError, AccountInterface, AccountService};
use async_trait::async_trait;
use bip32::{DerivationPath, Language, Mnemonic, XPrv};
use cosmrs::crypto::{secp256k1::SigningKey, PublicKey};
use deployer_types::SecretString;
use zeroize::Zeroizing;

/// Account backed by a key derived from a mnemonic.
pub struct MnemonicAccount {
	signing_key: SigningKey,
	public_key: PublicKey,
	address: String,
}

impl MnemonicAccount {
	/// Derives the account for `coin_type` and encodes its address with `prefix`.
	pub fn from_mnemonic(
		mnemonic: &SecretString,
		coin_type: u32,
		prefix: &str,
	) -> Result<Self, AccountError> {
		let seed = mnemonic.with_exposed(|phrase| {
			let normalized = Zeroizing::new(phrase.split_whitespace().collect::<Vec<_>>().join(" "));
			Mnemonic::new(normalized.as_str(), Language::English)
				.map(|m| m.to_seed(""))
				.map_err(|e| AccountError::InvalidKey(format!("Invalid mnemonic: {}", e)))
		})?;

		let path: DerivationPath = derivation_path(coin_type)
			.parse()
			.map_err(|e| AccountError::InvalidKey(format!("Invalid derivation path: {}", e)))?;
		let xprv = XPrv::derive_from_path(&seed, &path)
			.map_err(|e| AccountError::InvalidKey(format!("Key derivation failed: {}", e)))?;

		let key_bytes = Zeroizing::new(xprv.to_bytes());
		let signing_key = SigningKey::from_slice(key_bytes.as_slice())
			.map_err(|e| AccountError::InvalidKey(e.to_string()))?;
		let public_key = signing_key.public_key();
		let address = public_key
			.account_id(prefix)
			.map_err(|e| AccountError::InvalidKey(format!("Invalid prefix '{}': {}", prefix, e)))?
			.to_string();

		tracing::debug!(address = %address, coin_type, "Derived signing account");

		Ok(Self {
			signing_key,
			public_key,
			address,
		})
	}
}

fn derivation_path(coin_type: u32) -> String {
	format!("m/44'/{}'/0'/0/0", coin_type)
}

#[async_trait]
impl AccountInterface for MnemonicAccount {
	fn address(&self) -> &str {
		&self.address
	}

	fn public_key(&self) -> PublicKey {
		self.public_key
	}

	async fn sign_bytes(&self, message: &[u8]) -> Result<Vec<u8>, AccountError> {
		let signature = self
			.signing_key
			.sign(message)
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;
		Ok(signature.to_bytes().to_vec())
	}
}

/// Builds the signing identity from a mnemonic.
pub fn create_account(
	mnemonic: &SecretString,
	coin_type: u32,
	prefix: &str,
) -> Result<AccountService, AccountError> {
	let account = MnemonicAccount::from_mnemonic(mnemonic, coin_type, prefix)?;
	Ok(AccountService::new(Box::new(account)))
}
