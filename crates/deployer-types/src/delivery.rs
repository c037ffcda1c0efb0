//! Transaction delivery types for the deployer.
//!
//! This module defines what the chain hands back after a transaction is
//! broadcast or looked up: the receipt and the events it emitted.

use serde::{Deserialize, Serialize};

/// A key/value attribute on a transaction event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
	pub key: String,
	pub value: String,
}

/// An event emitted while executing a transaction (e.g. `store_code`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub attributes: Vec<EventAttribute>,
}

/// Transaction receipt as reported by the node.
///
/// A broadcast in sync mode only passes the mempool check, so `height` is 0
/// and `events` is empty until the receipt is fetched again after inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
	/// Upper-case hex transaction hash.
	pub txhash: String,
	/// Block height of inclusion, 0 if not yet included.
	pub height: u64,
	/// ABCI result code, 0 on success.
	pub code: u32,
	#[serde(default)]
	pub codespace: String,
	#[serde(default)]
	pub raw_log: String,
	#[serde(default)]
	pub gas_wanted: u64,
	#[serde(default)]
	pub gas_used: u64,
	#[serde(default)]
	pub events: Vec<TxEvent>,
}

impl TxReceipt {
	/// Whether the chain accepted the transaction.
	pub fn is_success(&self) -> bool {
		self.code == 0
	}

	/// Whether the transaction has been included in a block.
	pub fn is_included(&self) -> bool {
		self.height > 0
	}

	/// Returns every value of `key` on events of type `event_type`, in order.
	pub fn attribute_values(&self, event_type: &str, key: &str) -> Vec<&str> {
		self.events
			.iter()
			.filter(|event| event.kind == event_type)
			.flat_map(|event| event.attributes.iter())
			.filter(|attr| attr.key == key)
			.map(|attr| attr.value.as_str())
			.collect()
	}

	/// Returns the first value of `key` on an event of type `event_type`.
	pub fn attribute(&self, event_type: &str, key: &str) -> Option<&str> {
		self.attribute_values(event_type, key).into_iter().next()
	}
}
