//! Transaction options and signed transactions.
//!
//! [`TxOptions`] is the request handed to the chain client's sign step. It
//! either asks the client to estimate the fee by simulation or carries a
//! complete manual fee (gas price, adjustment and limit).

use crate::{Coin, Message};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use thiserror::Error;

/// Gas price amount used when fee estimation is turned off.
pub const FALLBACK_GAS_PRICE: &str = "0.15";
/// Gas adjustment used when fee estimation is turned off.
pub const FALLBACK_GAS_ADJUSTMENT: f64 = 1.4;
/// Gas limit used when fee estimation is turned off.
pub const FALLBACK_GAS_LIMIT: u64 = 1_500_000;

/// Errors raised while building or checking transaction options.
#[derive(Debug, Error, PartialEq)]
pub enum TxError {
	#[error("Transaction must contain at least one message")]
	EmptyMessages,
	#[error("Chain ID cannot be empty")]
	EmptyChainId,
	#[error("Manual fee requires '{0}'")]
	MissingFeeField(&'static str),
	#[error("Invalid gas price '{0}'")]
	InvalidGasPrice(String),
	#[error("Invalid gas adjustment {0}")]
	InvalidGasAdjustment(f64),
	#[error("Fee amount overflow")]
	Overflow,
}

/// Options for creating and signing a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOptions {
	/// Messages in the order the chain must apply them.
	pub messages: Vec<Message>,
	/// Target chain.
	pub chain_id: String,
	/// Whether the client should simulate to find the gas limit.
	pub auto_estimate_fee: bool,
	/// Gas price with denomination, e.g. `0.15uluna`.
	pub gas_prices: Option<String>,
	/// Multiplier applied to simulated gas.
	pub gas_adjustment: Option<f64>,
	/// Explicit gas limit.
	pub gas: Option<u64>,
	pub memo: Option<String>,
}

impl TxOptions {
	/// Creates options that let the chain client estimate the fee.
	pub fn new(messages: Vec<Message>, chain_id: impl Into<String>) -> Self {
		Self {
			messages,
			chain_id: chain_id.into(),
			auto_estimate_fee: true,
			gas_prices: None,
			gas_adjustment: None,
			gas: None,
			memo: None,
		}
	}

	/// Switches to the fixed last-resort fee in the given staking denomination.
	pub fn with_fallback_fee(mut self, denom: &str) -> Self {
		self.auto_estimate_fee = false;
		self.gas_prices = Some(format!("{}{}", FALLBACK_GAS_PRICE, denom));
		self.gas_adjustment = Some(FALLBACK_GAS_ADJUSTMENT);
		self.gas = Some(FALLBACK_GAS_LIMIT);
		self
	}

	pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
		self.memo = Some(memo.into());
		self
	}

	/// Checks that the options describe a transaction that can be signed.
	pub fn validate(&self) -> Result<(), TxError> {
		if self.messages.is_empty() {
			return Err(TxError::EmptyMessages);
		}
		if self.chain_id.is_empty() {
			return Err(TxError::EmptyChainId);
		}
		if !self.auto_estimate_fee {
			let gas_prices = self
				.gas_prices
				.as_deref()
				.ok_or(TxError::MissingFeeField("gas_prices"))?;
			gas_prices.parse::<GasPrice>()?;
			let adjustment = self
				.gas_adjustment
				.ok_or(TxError::MissingFeeField("gas_adjustment"))?;
			if !(adjustment > 0.0) {
				return Err(TxError::InvalidGasAdjustment(adjustment));
			}
			self.gas.ok_or(TxError::MissingFeeField("gas"))?;
		}
		Ok(())
	}
}

/// A gas price such as `0.015uluna`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasPrice {
	pub amount: Decimal,
	pub denom: String,
}

impl GasPrice {
	pub fn new(amount: Decimal, denom: impl Into<String>) -> Self {
		Self {
			amount,
			denom: denom.into(),
		}
	}

	/// Fee owed for `gas` units, rounded up to a whole coin.
	pub fn fee_for(&self, gas: u64) -> Result<Coin, TxError> {
		let amount = (Decimal::from(gas) * self.amount)
			.ceil()
			.to_u128()
			.ok_or(TxError::Overflow)?;
		Ok(Coin::new(amount, self.denom.clone()))
	}
}

impl FromStr for GasPrice {
	type Err = TxError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		let split = s
			.find(|c: char| c.is_ascii_alphabetic())
			.ok_or_else(|| TxError::InvalidGasPrice(s.to_string()))?;
		let (amount, denom) = s.split_at(split);
		let amount =
			Decimal::from_str(amount).map_err(|_| TxError::InvalidGasPrice(s.to_string()))?;
		if amount.is_sign_negative() {
			return Err(TxError::InvalidGasPrice(s.to_string()));
		}
		Ok(Self::new(amount, denom))
	}
}

/// Applies a gas adjustment to simulated gas usage, rounding up.
pub fn adjust_gas(gas_used: u64, adjustment: f64) -> Result<u64, TxError> {
	let factor =
		Decimal::from_f64(adjustment).ok_or(TxError::InvalidGasAdjustment(adjustment))?;
	if factor <= Decimal::ZERO {
		return Err(TxError::InvalidGasAdjustment(adjustment));
	}
	(Decimal::from(gas_used) * factor)
		.ceil()
		.to_u64()
		.ok_or(TxError::Overflow)
}

/// A signed, encoded transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
	/// Protobuf-encoded `TxRaw`.
	pub tx_bytes: Vec<u8>,
	/// Upper-case hex SHA-256 of `tx_bytes`, as reported by the node.
	pub txhash: String,
	pub chain_id: String,
	pub fee: Coin,
	pub gas_limit: u64,
}

impl SignedTx {
	pub fn new(tx_bytes: Vec<u8>, chain_id: impl Into<String>, fee: Coin, gas_limit: u64) -> Self {
		let txhash = hex::encode_upper(Sha256::digest(&tx_bytes));
		Self {
			tx_bytes,
			txhash,
			chain_id: chain_id.into(),
			fee,
			gas_limit,
		}
	}
}
