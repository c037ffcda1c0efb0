//! Network configuration for the target chain.
//!
//! Holds the settings every component needs to talk to a single Cosmos
//! chain: the LCD endpoint, chain id, address prefix and fee defaults.

use serde::{Deserialize, Serialize};

/// Configuration for the chain the deployer talks to.
///
/// # Fields
///
/// * `lcd_url` - REST (LCD) endpoint of a node
/// * `chain_id` - Chain identifier, e.g. `pisco-1`
/// * `prefix` - Bech32 account prefix, e.g. `terra`
/// * `denom` - Staking denomination used to pay fees, e.g. `uluna`
/// * `gas_price` - Gas price amount (without denomination) for estimated fees
/// * `gas_adjustment` - Multiplier applied to simulated gas
/// * `request_timeout_seconds` - Per-request HTTP timeout
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkConfig {
	pub lcd_url: String,
	pub chain_id: String,
	pub prefix: String,
	pub denom: String,
	#[serde(default = "default_gas_price")]
	pub gas_price: String,
	#[serde(default = "default_gas_adjustment")]
	pub gas_adjustment: f64,
	#[serde(default = "default_request_timeout_seconds")]
	pub request_timeout_seconds: u64,
}

impl NetworkConfig {
	/// Gas price with the staking denomination appended, e.g. `0.015uluna`.
	pub fn gas_price_with_denom(&self) -> String {
		format!("{}{}", self.gas_price, self.denom)
	}
}

fn default_gas_price() -> String {
	"0.015".to_string()
}

fn default_gas_adjustment() -> f64 {
	3.5
}

fn default_request_timeout_seconds() -> u64 {
	30
}
