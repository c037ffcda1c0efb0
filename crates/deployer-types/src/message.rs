//! Contract messages carried by a deployer transaction.
//!
//! A transaction batches an ordered list of [`Message`]s. The chain applies
//! them in sequence and atomically, so the order of the list is part of the
//! meaning of the transaction and is never changed after construction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A token amount in a single denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
	pub denom: String,
	pub amount: u128,
}

impl Coin {
	pub fn new(amount: u128, denom: impl Into<String>) -> Self {
		Self {
			denom: denom.into(),
			amount,
		}
	}
}

impl fmt::Display for Coin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{}", self.amount, self.denom)
	}
}

/// A single instruction for the chain's wasm module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
	/// Uploads optimized contract bytecode.
	StoreCode {
		sender: String,
		#[serde(with = "wasm_bytes")]
		wasm_byte_code: Vec<u8>,
	},
	/// Creates a contract instance from previously stored code.
	InstantiateContract {
		sender: String,
		admin: Option<String>,
		code_id: u64,
		label: String,
		msg: serde_json::Value,
		#[serde(default)]
		funds: Vec<Coin>,
	},
	/// Calls an execute entry point on an existing contract.
	ExecuteContract {
		sender: String,
		contract: String,
		msg: serde_json::Value,
		#[serde(default)]
		funds: Vec<Coin>,
	},
}

impl Message {
	/// Protobuf type URL of the message on a wasmd chain.
	pub fn type_url(&self) -> &'static str {
		match self {
			Message::StoreCode { .. } => "/cosmwasm.wasm.v1.MsgStoreCode",
			Message::InstantiateContract { .. } => "/cosmwasm.wasm.v1.MsgInstantiateContract",
			Message::ExecuteContract { .. } => "/cosmwasm.wasm.v1.MsgExecuteContract",
		}
	}

	/// Address that signs this message.
	pub fn sender(&self) -> &str {
		match self {
			Message::StoreCode { sender, .. }
			| Message::InstantiateContract { sender, .. }
			| Message::ExecuteContract { sender, .. } => sender,
		}
	}

	/// One-line description suitable for logs.
	///
	/// Bytecode is reported by size only; JSON payloads are printed compactly.
	pub fn summary(&self) -> String {
		match self {
			Message::StoreCode { wasm_byte_code, .. } => {
				format!("store_code({} bytes)", wasm_byte_code.len())
			},
			Message::InstantiateContract {
				code_id, label, msg, ..
			} => format!("instantiate(code_id={}, label={}, msg={})", code_id, label, msg),
			Message::ExecuteContract { contract, msg, .. } => {
				format!("execute(contract={}, msg={})", contract, msg)
			},
		}
	}
}

/// Serializes wasm bytecode as a hex string instead of a JSON number array.
mod wasm_bytes {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&hex::encode(bytes))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		hex::decode(s).map_err(serde::de::Error::custom)
	}
}
