//! Account management module for the contract deployer.
//!
//! This module provides the signing identity used to authorize transactions:
//! an account address, its public key and the ability to sign bytes. Keys are
//! derived in memory at start-up and never written anywhere.

use async_trait::async_trait;
use cosmrs::crypto::PublicKey;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod mnemonic;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// Error that occurs when signing operations fail.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// Error that occurs when a mnemonic or derived key is invalid.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
}

/// Trait defining the interface for account implementations.
///
/// Implementations hold a single secp256k1 key and expose what the chain
/// client needs to build and sign a transaction.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Bech32 account address.
	fn address(&self) -> &str;

	/// Public key placed in the transaction's signer info.
	fn public_key(&self) -> PublicKey;

	/// Signs `message` (a serialized sign doc) and returns the 64-byte
	/// compact signature.
	async fn sign_bytes(&self, message: &[u8]) -> Result<Vec<u8>, AccountError>;
}

/// The signing identity handed to the transaction submitter.
pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	/// Returns the account's bech32 address.
	pub fn address(&self) -> &str {
		self.implementation.address()
	}

	pub fn public_key(&self) -> PublicKey {
		self.implementation.public_key()
	}

	/// Signs a serialized sign doc with the managed key.
	pub async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, AccountError> {
		self.implementation.sign_bytes(message).await
	}
}
