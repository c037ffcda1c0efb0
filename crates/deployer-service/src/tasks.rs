//! Deployment tasks.
//!
//! Each task builds contract messages for the active signer, submits them as
//! one transaction and, where later steps depend on the result, waits for
//! the transaction to be included before reading its events.

use crate::refs::{RefsError, RefsStore};
use deployer_account::AccountService;
use deployer_delivery::{ChainClientError, SubmissionError, TransactionSubmitter};
use deployer_types::{Message, TxReceipt};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Version used in default instantiate labels.
pub const DEFAULT_CONTRACT_VERSION: &str = "v0.1.0";

#[derive(Debug, Error)]
pub enum TaskError {
	#[error("Failed to read artifact {path}: {source}")]
	Artifact {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error(transparent)]
	Submission(#[from] SubmissionError),
	#[error(transparent)]
	Chain(#[from] ChainClientError),
	#[error(transparent)]
	Refs(#[from] RefsError),
	#[error("Transaction {txhash} is missing '{event}.{attribute}'")]
	MissingEvent {
		txhash: String,
		event: &'static str,
		attribute: &'static str,
	},
	#[error("Expected {expected} code ids in transaction {txhash}, found {found}")]
	CodeIdMismatch {
		txhash: String,
		expected: usize,
		found: usize,
	},
	#[error("Invalid {field}: {reason}")]
	InvalidInput { field: &'static str, reason: String },
}

/// A contract stored by [`Deployer::store_code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCode {
	pub contract: String,
	pub code_id: u64,
}

/// A contract instantiated by [`Deployer::instantiate`] or [`Deployer::deploy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContract {
	pub contract: String,
	pub code_id: u64,
	pub address: String,
}

/// Runs deployment tasks for one signer on one chain.
pub struct Deployer {
	submitter: TransactionSubmitter,
	identity: AccountService,
	chain_id: String,
	auto_estimate_fee: bool,
	artifacts_dir: PathBuf,
	refs: RefsStore,
}

impl Deployer {
	pub fn new(
		submitter: TransactionSubmitter,
		identity: AccountService,
		chain_id: impl Into<String>,
		auto_estimate_fee: bool,
		artifacts_dir: impl Into<PathBuf>,
		refs: RefsStore,
	) -> Self {
		Self {
			submitter,
			identity,
			chain_id: chain_id.into(),
			auto_estimate_fee,
			artifacts_dir: artifacts_dir.into(),
			refs,
		}
	}

	pub fn sender(&self) -> &str {
		self.identity.address()
	}

	async fn submit_and_confirm(&self, messages: Vec<Message>) -> Result<TxReceipt, TaskError> {
		tracing::info!(
			sender = %self.sender(),
			messages = ?messages.iter().map(Message::summary).collect::<Vec<_>>(),
			"Submitting transaction"
		);
		Ok(self
			.submitter
			.submit_and_confirm(&self.identity, messages, &self.chain_id, self.auto_estimate_fee)
			.await?)
	}

	/// Stores the named artifacts in a single transaction and records their
	/// code ids, in the order given.
	pub async fn store_code(&self, contracts: &[String]) -> Result<Vec<StoredCode>, TaskError> {
		if contracts.is_empty() {
			return Err(TaskError::InvalidInput {
				field: "contracts",
				reason: "at least one contract name is required".into(),
			});
		}

		let mut messages = Vec::with_capacity(contracts.len());
		for contract in contracts {
			let path = self.artifacts_dir.join(format!("{}.wasm", contract));
			let wasm_byte_code = tokio::fs::read(&path)
				.await
				.map_err(|source| TaskError::Artifact { path, source })?;
			messages.push(Message::StoreCode {
				sender: self.sender().to_string(),
				wasm_byte_code,
			});
		}

		let receipt = self.submit_and_confirm(messages).await?;
		let code_ids = receipt
			.attribute_values("store_code", "code_id")
			.into_iter()
			.map(|value| parse_code_id(&receipt.txhash, value))
			.collect::<Result<Vec<_>, _>>()?;
		if code_ids.len() != contracts.len() {
			return Err(TaskError::CodeIdMismatch {
				txhash: receipt.txhash,
				expected: contracts.len(),
				found: code_ids.len(),
			});
		}

		let mut stored = Vec::with_capacity(contracts.len());
		for (contract, code_id) in contracts.iter().zip(code_ids) {
			self.refs
				.record_code_id(&self.chain_id, contract, code_id)
				.await?;
			tracing::info!(contract = %contract, code_id, "Stored code");
			stored.push(StoredCode {
				contract: contract.clone(),
				code_id,
			});
		}
		Ok(stored)
	}

	/// Instantiates `code_id` with the sender as admin and records the address.
	///
	/// The label defaults to `{contract}-{version}`.
	pub async fn instantiate(
		&self,
		contract: &str,
		code_id: u64,
		msg: Value,
		label: Option<String>,
		version: Option<&str>,
	) -> Result<DeployedContract, TaskError> {
		let label = label.unwrap_or_else(|| {
			format!(
				"{}-{}",
				contract,
				version.unwrap_or(DEFAULT_CONTRACT_VERSION)
			)
		});
		let message = Message::InstantiateContract {
			sender: self.sender().to_string(),
			admin: Some(self.sender().to_string()),
			code_id,
			label,
			msg,
			funds: vec![],
		};

		let receipt = self.submit_and_confirm(vec![message]).await?;
		let address = receipt
			.attribute("instantiate", "_contract_address")
			.ok_or_else(|| TaskError::MissingEvent {
				txhash: receipt.txhash.clone(),
				event: "instantiate",
				attribute: "_contract_address",
			})?
			.to_string();

		self.refs
			.record_address(&self.chain_id, contract, &address)
			.await?;
		tracing::info!(contract = %contract, code_id, address = %address, "Instantiated contract");

		Ok(DeployedContract {
			contract: contract.to_string(),
			code_id,
			address,
		})
	}

	/// Calls an execute entry point, e.g. `update_config`.
	pub async fn execute(&self, contract: &str, msg: Value) -> Result<TxReceipt, TaskError> {
		let message = Message::ExecuteContract {
			sender: self.sender().to_string(),
			contract: contract.to_string(),
			msg,
			funds: vec![],
		};
		self.submit_and_confirm(vec![message]).await
	}

	pub async fn query(&self, contract: &str, msg: &Value) -> Result<Value, TaskError> {
		Ok(self
			.submitter
			.client()
			.query_contract_state(contract, msg)
			.await?)
	}

	pub async fn block_height(&self) -> Result<u64, TaskError> {
		Ok(self.submitter.client().block_height().await?)
	}

	/// Stores the contract's artifact, then instantiates it once the store
	/// transaction is included.
	pub async fn deploy(
		&self,
		contract: &str,
		msg: Value,
		label: Option<String>,
		version: Option<&str>,
	) -> Result<DeployedContract, TaskError> {
		let stored = self.store_code(&[contract.to_string()]).await?;
		let code_id = stored
			.first()
			.map(|s| s.code_id)
			.ok_or_else(|| TaskError::InvalidInput {
				field: "contracts",
				reason: format!("no code stored for {}", contract),
			})?;
		self.instantiate(contract, code_id, msg, label, version)
			.await
	}
}

fn parse_code_id(txhash: &str, value: &str) -> Result<u64, TaskError> {
	value.parse().map_err(|_| TaskError::MissingEvent {
		txhash: txhash.to_string(),
		event: "store_code",
		attribute: "code_id",
	})
}

/// Parses a JSON argument given on the command line.
pub fn parse_json_arg(field: &'static str, raw: &str) -> Result<Value, TaskError> {
	serde_json::from_str(raw).map_err(|e| TaskError::InvalidInput {
		field,
		reason: e.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use deployer_account::implementations::mnemonic::create_account;
	use deployer_delivery::{MockChainClient, PollSettings};
	use deployer_types::{Coin, EventAttribute, SecretString, SignedTx, TxEvent};
	use serde_json::json;
	use std::sync::Arc;
	use std::time::Duration;
	use tempfile::TempDir;

	const TEST_MNEMONIC: &str = "notice oak worry limit wrap speak medal online prefer cluster roof addict wrist behave treat actual wasp year salad speed social layer crew genius";
	const SENDER: &str = "terra1x46rqay4d3cssq8gxxvqz8xt6nwlz4td20k38v";
	const CHAIN_ID: &str = "pisco-1";

	fn signed_tx() -> SignedTx {
		SignedTx::new(vec![9, 9, 9], CHAIN_ID, Coin::new(225_000, "uluna"), 1_500_000)
	}

	fn receipt(height: u64, events: Vec<TxEvent>) -> TxReceipt {
		TxReceipt {
			txhash: signed_tx().txhash,
			height,
			code: 0,
			codespace: String::new(),
			raw_log: String::new(),
			gas_wanted: 1_500_000,
			gas_used: 900_000,
			events,
		}
	}

	fn event(kind: &str, key: &str, value: &str) -> TxEvent {
		TxEvent {
			kind: kind.into(),
			attributes: vec![EventAttribute {
				key: key.into(),
				value: value.into(),
			}],
		}
	}

	/// Mock that accepts every transaction and returns `committed` as the
	/// included receipts, one per lookup.
	fn client_with_commits(committed: Vec<TxReceipt>) -> MockChainClient {
		let mut client = MockChainClient::new();
		client
			.expect_supports_chain()
			.returning(|chain_id| chain_id == CHAIN_ID);
		client
			.expect_create_and_sign_tx()
			.times(committed.len())
			.returning(|_, _| Ok(signed_tx()));
		client
			.expect_broadcast()
			.times(committed.len())
			.returning(|_, _| Ok(receipt(0, vec![])));

		let mut committed = committed.into_iter();
		client
			.expect_get_tx()
			.returning(move |_| Ok(committed.next()));
		client
	}

	fn deployer(client: MockChainClient, dir: &TempDir, auto_estimate_fee: bool) -> Deployer {
		let submitter = TransactionSubmitter::new(
			Arc::new(client),
			"uluna",
			PollSettings {
				interval: Duration::from_secs(2),
				max_attempts: 5,
			},
		);
		let identity = create_account(&SecretString::from(TEST_MNEMONIC), 330, "terra").unwrap();
		Deployer::new(
			submitter,
			identity,
			CHAIN_ID,
			auto_estimate_fee,
			dir.path().join("artifacts"),
			RefsStore::new(dir.path().join("refs.json")),
		)
	}

	fn write_artifact(dir: &TempDir, name: &str) {
		let artifacts = dir.path().join("artifacts");
		std::fs::create_dir_all(&artifacts).unwrap();
		std::fs::write(artifacts.join(format!("{}.wasm", name)), b"\0asm").unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn test_store_code_batches_artifacts_and_records_ids() {
		let dir = TempDir::new().unwrap();
		for name in ["member", "distribution", "thread"] {
			write_artifact(&dir, name);
		}

		let committed = receipt(
			1_000,
			vec![
				event("store_code", "code_id", "11"),
				event("store_code", "code_id", "12"),
				event("store_code", "code_id", "13"),
			],
		);
		let deployer = deployer(client_with_commits(vec![committed]), &dir, true);

		let contracts: Vec<String> = vec!["member".into(), "distribution".into(), "thread".into()];
		let stored = deployer.store_code(&contracts).await.unwrap();

		assert_eq!(
			stored.iter().map(|s| s.code_id).collect::<Vec<_>>(),
			vec![11, 12, 13]
		);
		let refs = deployer.refs.load().await.unwrap();
		assert_eq!(refs[CHAIN_ID]["distribution"].code_id, Some(12));
	}

	#[tokio::test]
	async fn test_store_code_missing_artifact() {
		let dir = TempDir::new().unwrap();
		let mut client = MockChainClient::new();
		client.expect_create_and_sign_tx().never();
		let deployer = deployer(client, &dir, true);

		let err = deployer
			.store_code(&["absent".to_string()])
			.await
			.unwrap_err();
		assert!(matches!(err, TaskError::Artifact { .. }));
	}

	#[tokio::test(start_paused = true)]
	async fn test_instantiate_uses_sender_as_admin_and_default_label() {
		let dir = TempDir::new().unwrap();
		let committed = receipt(
			1_001,
			vec![event("instantiate", "_contract_address", "terra1member")],
		);

		let mut client = MockChainClient::new();
		client.expect_supports_chain().returning(|_| true);
		client
			.expect_create_and_sign_tx()
			.withf(|_, options| {
				matches!(
					options.messages.as_slice(),
					[Message::InstantiateContract { admin: Some(admin), label, code_id: 42, .. }]
						if admin == SENDER && label == "member-v0.1.0"
				) && !options.auto_estimate_fee
					&& options.gas == Some(1_500_000)
			})
			.times(1)
			.returning(|_, _| Ok(signed_tx()));
		client
			.expect_broadcast()
			.times(1)
			.returning(|_, _| Ok(receipt(0, vec![])));
		client
			.expect_get_tx()
			.returning(move |_| Ok(Some(committed.clone())));

		let deployer = deployer(client, &dir, false);
		let deployed = deployer
			.instantiate("member", 42, json!({}), None, None)
			.await
			.unwrap();

		assert_eq!(deployed.address, "terra1member");
		assert_eq!(
			deployer.refs.get(CHAIN_ID, "member").await.unwrap().unwrap().address,
			Some("terra1member".into())
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_deploy_stores_then_instantiates() {
		let dir = TempDir::new().unwrap();
		write_artifact(&dir, "cw-friend");

		let client = client_with_commits(vec![
			receipt(2_000, vec![event("store_code", "code_id", "77")]),
			receipt(
				2_001,
				vec![event("instantiate", "_contract_address", "terra1friend")],
			),
		]);
		let deployer = deployer(client, &dir, true);

		let deployed = deployer
			.deploy(
				"cw-friend",
				json!({"fee_denom": "uluna"}),
				Some("cw-friend".into()),
				None,
			)
			.await
			.unwrap();

		assert_eq!(
			deployed,
			DeployedContract {
				contract: "cw-friend".into(),
				code_id: 77,
				address: "terra1friend".into(),
			}
		);
		let entry = deployer.refs.get(CHAIN_ID, "cw-friend").await.unwrap().unwrap();
		assert_eq!(entry.code_id, Some(77));
		assert_eq!(entry.address.as_deref(), Some("terra1friend"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_missing_instantiate_event() {
		let dir = TempDir::new().unwrap();
		let deployer = deployer(client_with_commits(vec![receipt(5, vec![])]), &dir, true);

		let err = deployer
			.instantiate("member", 1, json!({}), None, Some("v1.0.0"))
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			TaskError::MissingEvent {
				event: "instantiate",
				..
			}
		));
	}

	#[tokio::test]
	async fn test_sign_failure_surfaces_from_execute() {
		let dir = TempDir::new().unwrap();
		let mut client = MockChainClient::new();
		client.expect_supports_chain().returning(|_| true);
		client
			.expect_create_and_sign_tx()
			.times(1)
			.returning(|_, _| Err(ChainClientError::Transport("connection refused".into())));
		client.expect_broadcast().never();

		let deployer = deployer(client, &dir, true);
		let err = deployer
			.execute(
				"terra1member",
				json!({"update_config": {"distribution_contract_addr": "terra1dist"}}),
			)
			.await
			.unwrap_err();

		assert!(matches!(
			err,
			TaskError::Submission(SubmissionError::Sign(ChainClientError::Transport(_)))
		));
	}

	#[tokio::test]
	async fn test_query_and_block_height() {
		let dir = TempDir::new().unwrap();
		let mut client = MockChainClient::new();
		client
			.expect_query_contract_state()
			.withf(|address, query| address == "terra1member" && query == &json!({"config": {}}))
			.returning(|_, _| Ok(json!({"admin_addr": SENDER})));
		client.expect_block_height().returning(|| Ok(8_123_456));

		let deployer = deployer(client, &dir, true);

		let config = deployer
			.query("terra1member", &json!({"config": {}}))
			.await
			.unwrap();
		assert_eq!(config["admin_addr"], SENDER);
		assert_eq!(deployer.block_height().await.unwrap(), 8_123_456);
	}

	#[test]
	fn test_parse_json_arg() {
		assert_eq!(
			parse_json_arg("msg", r#"{"config":{}}"#).unwrap(),
			json!({"config": {}})
		);
		assert!(matches!(
			parse_json_arg("msg", "{config"),
			Err(TaskError::InvalidInput { field: "msg", .. })
		));
	}
}
