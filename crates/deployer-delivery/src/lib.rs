//! Transaction delivery module for the contract deployer.
//!
//! This module turns a signing identity and an ordered batch of contract
//! messages into a broadcast transaction. Submission has two phases, sign
//! then broadcast, and a failure in either is logged and returned to the
//! caller tagged with the phase it happened in. Nothing is retried.
//!
//! The chain itself is reached through the [`ChainClient`] trait; the LCD
//! implementation lives under [`implementations::cosmos::lcd`].

use async_trait::async_trait;
use deployer_account::{AccountError, AccountService};
use deployer_types::{truncate_hash, Message, SignedTx, TxError, TxOptions, TxReceipt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Re-export implementations
pub mod implementations {
	pub mod cosmos {
		pub mod lcd;
	}
}

/// Errors reported by a chain client.
///
/// Remote failures are classified once, when the response is read, so callers
/// never have to inspect raw response bodies.
#[derive(Debug, Error)]
pub enum ChainClientError {
	/// The node answered with an error body carrying `code` and `message`.
	#[error("API error (status {status}): code={code} message={message}")]
	Api {
		status: u16,
		code: i64,
		message: String,
	},
	/// The node answered with an error status and some other body.
	#[error("HTTP error (status {status}): {body}")]
	Http { status: u16, body: String },
	/// No usable response was received.
	#[error("Transport error: {0}")]
	Transport(String),
	/// The transaction could not be built or encoded locally.
	#[error("Encoding error: {0}")]
	Encoding(String),
	/// The client is not configured for the requested chain.
	#[error("Unsupported chain: {0}")]
	UnsupportedChain(String),
	/// The signing identity failed.
	#[error(transparent)]
	Account(#[from] AccountError),
}

impl ChainClientError {
	/// Classifies an error response from the node.
	///
	/// A JSON object body with an integer `code` and a string `message` becomes
	/// [`ChainClientError::Api`]; anything else is kept verbatim as
	/// [`ChainClientError::Http`].
	pub fn from_response(status: u16, body: &str) -> Self {
		let structured = serde_json::from_str::<serde_json::Value>(body)
			.ok()
			.and_then(|value| {
				let code = value.get("code")?.as_i64()?;
				let message = value.get("message")?.as_str()?.to_string();
				Some((code, message))
			});

		match structured {
			Some((code, message)) => ChainClientError::Api {
				status,
				code,
				message,
			},
			None => ChainClientError::Http {
				status,
				body: body.to_string(),
			},
		}
	}

	/// Whether the node reported that the requested object does not exist.
	pub fn is_not_found(&self) -> bool {
		match self {
			ChainClientError::Api {
				status,
				code,
				message,
			} => *status == 404 || *code == 5 || message.contains("not found"),
			ChainClientError::Http { status, .. } => *status == 404,
			_ => false,
		}
	}

	/// Emits the operator-facing diagnostics for a failed phase.
	pub fn log_diagnostics(&self, phase: SubmissionPhase) {
		match self {
			ChainClientError::Api {
				status,
				code,
				message,
			} => tracing::error!(%phase, status, code, %message, "Error in {}", phase),
			ChainClientError::Http { status, body } => {
				tracing::error!(%phase, status, %body, "Error in {}", phase)
			},
			other => tracing::error!(%phase, error = %other, "Error in {}", phase),
		}
	}
}

impl From<TxError> for ChainClientError {
	fn from(err: TxError) -> Self {
		ChainClientError::Encoding(err.to_string())
	}
}

/// The phase of a submission an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionPhase {
	Sign,
	Broadcast,
}

impl fmt::Display for SubmissionPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SubmissionPhase::Sign => write!(f, "create and sign tx"),
			SubmissionPhase::Broadcast => write!(f, "broadcast tx"),
		}
	}
}

/// Errors returned by [`TransactionSubmitter`].
#[derive(Debug, Error)]
pub enum SubmissionError {
	/// The request was rejected before contacting the chain.
	#[error("Invalid submission: {0}")]
	InvalidRequest(String),
	/// Building, simulating or signing the transaction failed.
	#[error("Failed to create and sign transaction: {0}")]
	Sign(#[source] ChainClientError),
	/// The signed transaction could not be broadcast.
	#[error("Failed to broadcast transaction: {0}")]
	Broadcast(#[source] ChainClientError),
	/// The transaction was not found in a block within the polling bound.
	#[error("Transaction {txhash} not included after {attempts} attempts")]
	NotConfirmed { txhash: String, attempts: u32 },
	/// The chain reported a non-zero result code.
	#[error("Transaction {txhash} failed with code {code} ({codespace}): {raw_log}")]
	Rejected {
		txhash: String,
		code: u32,
		codespace: String,
		raw_log: String,
	},
	/// The caller's deadline elapsed before submission finished.
	#[error("Submission did not complete within {0:?}")]
	DeadlineExceeded(Duration),
}

impl SubmissionError {
	/// The submission phase that failed, if the error came from one.
	pub fn phase(&self) -> Option<SubmissionPhase> {
		match self {
			SubmissionError::Sign(_) => Some(SubmissionPhase::Sign),
			SubmissionError::Broadcast(_) => Some(SubmissionPhase::Broadcast),
			_ => None,
		}
	}

	fn rejected(receipt: TxReceipt) -> Self {
		SubmissionError::Rejected {
			txhash: receipt.txhash,
			code: receipt.code,
			codespace: receipt.codespace,
			raw_log: receipt.raw_log,
		}
	}
}

/// Capability for talking to a chain node.
///
/// Implementations must be safe to share between tasks. Signing and broadcast
/// are separate calls so the submitter can tell which phase failed.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Whether this client is configured for `chain_id`.
	fn supports_chain(&self, chain_id: &str) -> bool;

	/// Builds and signs a transaction for `identity`.
	///
	/// When `options.auto_estimate_fee` is set this simulates the transaction
	/// to find its gas before signing.
	async fn create_and_sign_tx(
		&self,
		identity: &AccountService,
		options: &TxOptions,
	) -> Result<SignedTx, ChainClientError>;

	/// Broadcasts a signed transaction and returns the node's acknowledgement.
	///
	/// Does not wait for the transaction to be included in a block.
	async fn broadcast(&self, tx: &SignedTx, chain_id: &str) -> Result<TxReceipt, ChainClientError>;

	/// Looks up a transaction; `None` while it is not yet known to the node.
	async fn get_tx(&self, txhash: &str) -> Result<Option<TxReceipt>, ChainClientError>;

	/// Runs a smart query against a contract.
	async fn query_contract_state(
		&self,
		address: &str,
		query: &serde_json::Value,
	) -> Result<serde_json::Value, ChainClientError>;

	/// Latest block height.
	async fn block_height(&self) -> Result<u64, ChainClientError>;
}

/// Bounds for waiting on transaction inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
	pub interval: Duration,
	pub max_attempts: u32,
}

impl Default for PollSettings {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(2),
			max_attempts: 30,
		}
	}
}

/// Submits batches of contract messages as single transactions.
///
/// The submitter holds no mutable state; one instance can serve concurrent
/// callers. Ordering between separate submissions is up to the caller, who
/// can use [`TransactionSubmitter::wait_for_inclusion`] to sequence
/// dependent transactions.
pub struct TransactionSubmitter {
	client: Arc<dyn ChainClient>,
	/// Staking denomination used for the fallback fee.
	fee_denom: String,
	polling: PollSettings,
}

impl TransactionSubmitter {
	pub fn new(client: Arc<dyn ChainClient>, fee_denom: impl Into<String>, polling: PollSettings) -> Self {
		Self {
			client,
			fee_denom: fee_denom.into(),
			polling,
		}
	}

	/// The underlying chain client, for queries.
	pub fn client(&self) -> &Arc<dyn ChainClient> {
		&self.client
	}

	/// Signs and broadcasts `messages` as one transaction.
	///
	/// With `auto_estimate_fee` off the fixed fallback fee is used (gas price
	/// 0.15 in the staking denomination, adjustment 1.4, gas 1,500,000).
	/// Returns the broadcast receipt exactly as the chain client produced it.
	#[instrument(skip_all, fields(chain_id = %chain_id, messages = messages.len(), sender = %identity.address()))]
	pub async fn submit(
		&self,
		identity: &AccountService,
		messages: Vec<Message>,
		chain_id: &str,
		auto_estimate_fee: bool,
	) -> Result<TxReceipt, SubmissionError> {
		let mut options = TxOptions::new(messages, chain_id);
		if !auto_estimate_fee {
			options = options.with_fallback_fee(&self.fee_denom);
		}
		options
			.validate()
			.map_err(|e| SubmissionError::InvalidRequest(e.to_string()))?;
		if !self.client.supports_chain(chain_id) {
			return Err(SubmissionError::InvalidRequest(format!(
				"Chain client is not configured for chain '{}'",
				chain_id
			)));
		}

		tracing::debug!(
			messages = ?options.messages.iter().map(Message::summary).collect::<Vec<_>>(),
			auto_estimate_fee,
			"Sending transaction"
		);

		let signed = match self.client.create_and_sign_tx(identity, &options).await {
			Ok(signed) => signed,
			Err(e) => {
				e.log_diagnostics(SubmissionPhase::Sign);
				return Err(SubmissionError::Sign(e));
			},
		};

		let receipt = match self.client.broadcast(&signed, chain_id).await {
			Ok(receipt) => receipt,
			Err(e) => {
				e.log_diagnostics(SubmissionPhase::Broadcast);
				return Err(SubmissionError::Broadcast(e));
			},
		};

		if receipt.is_success() {
			tracing::info!(
				txhash = %receipt.txhash,
				gas_limit = signed.gas_limit,
				fee = %signed.fee,
				"Broadcast transaction"
			);
		} else {
			tracing::warn!(
				txhash = %receipt.txhash,
				code = receipt.code,
				codespace = %receipt.codespace,
				raw_log = %receipt.raw_log,
				"Broadcast transaction was not accepted"
			);
		}

		Ok(receipt)
	}

	/// Like [`submit`](Self::submit), but gives up once `deadline` has elapsed.
	pub async fn submit_with_deadline(
		&self,
		deadline: Duration,
		identity: &AccountService,
		messages: Vec<Message>,
		chain_id: &str,
		auto_estimate_fee: bool,
	) -> Result<TxReceipt, SubmissionError> {
		tokio::time::timeout(
			deadline,
			self.submit(identity, messages, chain_id, auto_estimate_fee),
		)
		.await
		.map_err(|_| SubmissionError::DeadlineExceeded(deadline))?
	}

	/// Polls until `txhash` is included in a block.
	///
	/// Lookup errors are logged and count as an attempt. Fails with
	/// [`SubmissionError::NotConfirmed`] after `max_attempts` lookups.
	#[instrument(skip(self), fields(txhash = %truncate_hash(txhash)))]
	pub async fn wait_for_inclusion(&self, txhash: &str) -> Result<TxReceipt, SubmissionError> {
		for attempt in 1..=self.polling.max_attempts {
			tokio::time::sleep(self.polling.interval).await;

			match self.client.get_tx(txhash).await {
				Ok(Some(receipt)) if receipt.is_included() => {
					tracing::info!(height = receipt.height, code = receipt.code, "Transaction included");
					return Ok(receipt);
				},
				Ok(_) => tracing::debug!(attempt, "Transaction not yet included"),
				Err(e) => tracing::debug!(attempt, error = %e, "Failed to look up transaction"),
			}
		}

		Err(SubmissionError::NotConfirmed {
			txhash: txhash.to_string(),
			attempts: self.polling.max_attempts,
		})
	}

	/// Submits `messages` and waits for the transaction to be included.
	///
	/// Fails with [`SubmissionError::Rejected`] if either the broadcast or the
	/// committed result carries a non-zero code.
	pub async fn submit_and_confirm(
		&self,
		identity: &AccountService,
		messages: Vec<Message>,
		chain_id: &str,
		auto_estimate_fee: bool,
	) -> Result<TxReceipt, SubmissionError> {
		let receipt = self
			.submit(identity, messages, chain_id, auto_estimate_fee)
			.await?;
		if !receipt.is_success() {
			return Err(SubmissionError::rejected(receipt));
		}

		let committed = self.wait_for_inclusion(&receipt.txhash).await?;
		if !committed.is_success() {
			return Err(SubmissionError::rejected(committed));
		}
		Ok(committed)
	}
}
