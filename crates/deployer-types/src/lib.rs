//! Common types module for the contract deployer.
//!
//! This module defines the data types shared by every deployer crate: the
//! contract messages that make up a transaction, transaction options and
//! receipts, network settings and the secret wrapper used for mnemonics.

/// Receipt and event types returned by the chain after broadcast.
pub mod delivery;
/// Contract messages (store code, instantiate, execute) and coins.
pub mod message;
/// Network configuration types.
pub mod networks;
/// Secure string wrapper for mnemonics.
pub mod secret_string;
/// Transaction options, gas prices and signed transactions.
pub mod tx;
/// Small formatting helpers.
pub mod utils;

pub use delivery::*;
pub use message::*;
pub use networks::NetworkConfig;
pub use secret_string::SecretString;
pub use tx::*;
pub use utils::truncate_hash;
