//! LCD (REST) chain client for Cosmos SDK chains running wasmd.
//!
//! Transactions are built and signed locally with `cosmrs` and then posted to
//! the node's REST gateway. When fee estimation is requested the transaction
//! is simulated first and the reported gas is scaled by the gas adjustment.

use crate::{ChainClient, ChainClientError};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use cosmrs::cosmwasm::{MsgExecuteContract, MsgInstantiateContract, MsgStoreCode};
use cosmrs::proto::cosmos::tx::v1beta1::TxRaw;
use cosmrs::tendermint::chain;
use cosmrs::tx::{Body, Fee, Msg, Raw, SignDoc, SignerInfo};
use cosmrs::{AccountId, Any};
use deployer_account::AccountService;
use deployer_types::{
	adjust_gas, Coin, GasPrice, Message, NetworkConfig, SignedTx, TxError, TxEvent, TxOptions,
	TxReceipt,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Chain client backed by a node's LCD endpoint.
pub struct LcdClient {
	http: reqwest::Client,
	/// Base URL without a trailing slash.
	base_url: String,
	chain_id: String,
	/// Default gas price for estimated fees.
	gas_price: GasPrice,
	/// Default gas adjustment for estimated fees.
	gas_adjustment: f64,
}

/// Account number and sequence needed to sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
	pub account_number: u64,
	pub sequence: u64,
}

#[derive(Serialize)]
struct TxBytesRequest<'a> {
	tx_bytes: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	mode: Option<&'a str>,
}

#[derive(Deserialize)]
struct SimulateResponse {
	gas_info: GasInfo,
}

#[derive(Deserialize)]
struct GasInfo {
	#[serde(with = "string_or_number")]
	gas_used: u64,
}

#[derive(Deserialize)]
struct TxResponseEnvelope {
	tx_response: LcdTxResponse,
}

/// `tx_response` as rendered by the REST gateway. Integers may arrive as
/// strings or numbers depending on the node version.
#[derive(Debug, Deserialize)]
struct LcdTxResponse {
	txhash: String,
	#[serde(default, with = "string_or_number")]
	height: u64,
	#[serde(default)]
	code: u32,
	#[serde(default)]
	codespace: String,
	#[serde(default)]
	raw_log: String,
	#[serde(default, with = "string_or_number")]
	gas_wanted: u64,
	#[serde(default, with = "string_or_number")]
	gas_used: u64,
	#[serde(default)]
	events: Vec<TxEvent>,
}

impl From<LcdTxResponse> for TxReceipt {
	fn from(response: LcdTxResponse) -> Self {
		TxReceipt {
			txhash: response.txhash,
			height: response.height,
			code: response.code,
			codespace: response.codespace,
			raw_log: response.raw_log,
			gas_wanted: response.gas_wanted,
			gas_used: response.gas_used,
			events: response.events,
		}
	}
}

impl LcdClient {
	/// Creates a client for the chain described by `network`.
	pub fn new(network: &NetworkConfig) -> Result<Self, ChainClientError> {
		let http = reqwest::Client::builder()
			.timeout(Duration::from_secs(network.request_timeout_seconds))
			.build()
			.map_err(|e| ChainClientError::Transport(format!("Failed to build HTTP client: {}", e)))?;
		let gas_price = network.gas_price_with_denom().parse::<GasPrice>()?;

		Ok(Self {
			http,
			base_url: network.lcd_url.trim_end_matches('/').to_string(),
			chain_id: network.chain_id.clone(),
			gas_price,
			gas_adjustment: network.gas_adjustment,
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url, path)
	}

	async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChainClientError> {
		tracing::debug!(path, "LCD GET");
		let response = self
			.http
			.get(self.url(path))
			.send()
			.await
			.map_err(|e| ChainClientError::Transport(e.to_string()))?;
		Self::handle_response(response).await
	}

	async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
		&self,
		path: &str,
		body: &B,
	) -> Result<T, ChainClientError> {
		tracing::debug!(path, "LCD POST");
		let response = self
			.http
			.post(self.url(path))
			.json(body)
			.send()
			.await
			.map_err(|e| ChainClientError::Transport(e.to_string()))?;
		Self::handle_response(response).await
	}

	async fn handle_response<T: DeserializeOwned>(
		response: reqwest::Response,
	) -> Result<T, ChainClientError> {
		let status = response.status();
		let body = response
			.text()
			.await
			.map_err(|e| ChainClientError::Transport(e.to_string()))?;

		if !status.is_success() {
			return Err(ChainClientError::from_response(status.as_u16(), &body));
		}

		serde_json::from_str(&body).map_err(|e| {
			ChainClientError::Transport(format!("Unexpected response from node: {}", e))
		})
	}

	/// Fetches the account number and current sequence of `address`.
	pub async fn account_info(&self, address: &str) -> Result<AccountInfo, ChainClientError> {
		let value: Value = self
			.get_json(&format!("/cosmos/auth/v1beta1/accounts/{}", address))
			.await?;
		parse_account_info(&value)
	}

	/// Simulates `tx_bytes` and returns the gas it used.
	async fn simulate(&self, tx_bytes: &[u8]) -> Result<u64, ChainClientError> {
		let request = TxBytesRequest {
			tx_bytes: STANDARD.encode(tx_bytes),
			mode: None,
		};
		let response: SimulateResponse = self
			.post_json("/cosmos/tx/v1beta1/simulate", &request)
			.await?;
		Ok(response.gas_info.gas_used)
	}
}

#[async_trait]
impl ChainClient for LcdClient {
	fn supports_chain(&self, chain_id: &str) -> bool {
		self.chain_id == chain_id
	}

	async fn create_and_sign_tx(
		&self,
		identity: &AccountService,
		options: &TxOptions,
	) -> Result<SignedTx, ChainClientError> {
		if !self.supports_chain(&options.chain_id) {
			return Err(ChainClientError::UnsupportedChain(options.chain_id.clone()));
		}

		let body = build_body(&options.messages, options.memo.as_deref().unwrap_or_default())?;
		let account = self.account_info(identity.address()).await?;

		let (gas_limit, price) = if options.auto_estimate_fee {
			let price = match options.gas_prices.as_deref() {
				Some(prices) => prices.parse::<GasPrice>()?,
				None => self.gas_price.clone(),
			};
			let adjustment = options.gas_adjustment.unwrap_or(self.gas_adjustment);

			let draft_fee = Fee {
				amount: vec![],
				gas_limit: 0,
				payer: None,
				granter: None,
			};
			let draft = sign_tx(identity, &body, draft_fee, &options.chain_id, account).await?;
			let gas_used = self.simulate(&draft).await?;
			let gas_limit = adjust_gas(gas_used, adjustment)?;
			tracing::debug!(gas_used, gas_limit, adjustment, "Estimated gas");
			(gas_limit, price)
		} else {
			let price = options
				.gas_prices
				.as_deref()
				.ok_or(TxError::MissingFeeField("gas_prices"))?
				.parse::<GasPrice>()?;
			let gas_limit = options.gas.ok_or(TxError::MissingFeeField("gas"))?;
			(gas_limit, price)
		};

		let fee = price.fee_for(gas_limit)?;
		let tx_bytes = sign_tx(
			identity,
			&body,
			Fee::from_amount_and_gas(to_cosmos_coin(&fee)?, gas_limit),
			&options.chain_id,
			account,
		)
		.await?;

		Ok(SignedTx::new(tx_bytes, options.chain_id.clone(), fee, gas_limit))
	}

	async fn broadcast(&self, tx: &SignedTx, chain_id: &str) -> Result<TxReceipt, ChainClientError> {
		if !self.supports_chain(chain_id) {
			return Err(ChainClientError::UnsupportedChain(chain_id.to_string()));
		}

		let request = TxBytesRequest {
			tx_bytes: STANDARD.encode(&tx.tx_bytes),
			mode: Some("BROADCAST_MODE_SYNC"),
		};
		let response: TxResponseEnvelope = self
			.post_json("/cosmos/tx/v1beta1/txs", &request)
			.await?;
		Ok(response.tx_response.into())
	}

	async fn get_tx(&self, txhash: &str) -> Result<Option<TxReceipt>, ChainClientError> {
		match self
			.get_json::<TxResponseEnvelope>(&format!("/cosmos/tx/v1beta1/txs/{}", txhash))
			.await
		{
			Ok(response) => Ok(Some(response.tx_response.into())),
			Err(e) if e.is_not_found() => Ok(None),
			Err(e) => Err(e),
		}
	}

	async fn query_contract_state(
		&self,
		address: &str,
		query: &Value,
	) -> Result<Value, ChainClientError> {
		let encoded = URL_SAFE.encode(
			serde_json::to_vec(query).map_err(|e| ChainClientError::Encoding(e.to_string()))?,
		);
		let mut response: Value = self
			.get_json(&format!(
				"/cosmwasm/wasm/v1/contract/{}/smart/{}",
				address, encoded
			))
			.await?;
		Ok(response
			.get_mut("data")
			.map(Value::take)
			.unwrap_or(Value::Null))
	}

	async fn block_height(&self) -> Result<u64, ChainClientError> {
		let value: Value = self
			.get_json("/cosmos/base/tendermint/v1beta1/blocks/latest")
			.await?;
		parse_block_height(&value)
	}
}

/// Converts deployer messages to protobuf `Any`s, keeping their order.
fn build_body(messages: &[Message], memo: &str) -> Result<Body, ChainClientError> {
	let msgs = messages
		.iter()
		.map(to_any)
		.collect::<Result<Vec<_>, _>>()?;
	Ok(Body::new(msgs, memo, 0u32))
}

fn to_any(message: &Message) -> Result<Any, ChainClientError> {
	let any = match message {
		Message::StoreCode {
			sender,
			wasm_byte_code,
		} => MsgStoreCode {
			sender: parse_account(sender)?,
			wasm_byte_code: wasm_byte_code.clone(),
			instantiate_permission: None,
		}
		.to_any(),
		Message::InstantiateContract {
			sender,
			admin,
			code_id,
			label,
			msg,
			funds,
		} => MsgInstantiateContract {
			sender: parse_account(sender)?,
			admin: admin.as_deref().map(parse_account).transpose()?,
			code_id: *code_id,
			label: Some(label.clone()),
			msg: encode_json(msg)?,
			funds: to_cosmos_coins(funds)?,
		}
		.to_any(),
		Message::ExecuteContract {
			sender,
			contract,
			msg,
			funds,
		} => MsgExecuteContract {
			sender: parse_account(sender)?,
			contract: parse_account(contract)?,
			msg: encode_json(msg)?,
			funds: to_cosmos_coins(funds)?,
		}
		.to_any(),
	};
	any.map_err(|e| ChainClientError::Encoding(e.to_string()))
}

fn parse_account(address: &str) -> Result<AccountId, ChainClientError> {
	address
		.parse()
		.map_err(|e| ChainClientError::Encoding(format!("Invalid address '{}': {}", address, e)))
}

fn encode_json(msg: &Value) -> Result<Vec<u8>, ChainClientError> {
	serde_json::to_vec(msg).map_err(|e| ChainClientError::Encoding(e.to_string()))
}

fn to_cosmos_coin(coin: &Coin) -> Result<cosmrs::Coin, ChainClientError> {
	cosmrs::Coin::new(coin.amount, &coin.denom)
		.map_err(|e| ChainClientError::Encoding(format!("Invalid coin '{}': {}", coin, e)))
}

fn to_cosmos_coins(coins: &[Coin]) -> Result<Vec<cosmrs::Coin>, ChainClientError> {
	coins.iter().map(to_cosmos_coin).collect()
}

/// Signs `body` in direct mode and returns the encoded `TxRaw`.
async fn sign_tx(
	identity: &AccountService,
	body: &Body,
	fee: Fee,
	chain_id: &str,
	account: AccountInfo,
) -> Result<Vec<u8>, ChainClientError> {
	let chain_id = chain_id
		.parse::<chain::Id>()
		.map_err(|e| ChainClientError::Encoding(format!("Invalid chain id: {}", e)))?;
	let auth_info =
		SignerInfo::single_direct(Some(identity.public_key()), account.sequence).auth_info(fee);
	let sign_doc = SignDoc::new(body, &auth_info, &chain_id, account.account_number)
		.map_err(|e| ChainClientError::Encoding(e.to_string()))?;

	let sign_bytes = sign_doc
		.clone()
		.into_bytes()
		.map_err(|e| ChainClientError::Encoding(e.to_string()))?;
	let signature = identity.sign(&sign_bytes).await?;

	Raw::from(TxRaw {
		body_bytes: sign_doc.body_bytes,
		auth_info_bytes: sign_doc.auth_info_bytes,
		signatures: vec![signature],
	})
	.to_bytes()
	.map_err(|e| ChainClientError::Encoding(e.to_string()))
}

/// Reads account number and sequence from an `accounts/{addr}` response.
///
/// Vesting accounts nest the base account one or two levels down.
fn parse_account_info(value: &Value) -> Result<AccountInfo, ChainClientError> {
	let account = value
		.get("account")
		.ok_or_else(|| ChainClientError::Transport("Account response missing 'account'".into()))?;
	let base = account
		.pointer("/base_vesting_account/base_account")
		.or_else(|| account.get("base_account"))
		.unwrap_or(account);

	Ok(AccountInfo {
		account_number: read_u64(base, "account_number")?.unwrap_or(0),
		sequence: read_u64(base, "sequence")?.unwrap_or(0),
	})
}

fn parse_block_height(value: &Value) -> Result<u64, ChainClientError> {
	value
		.pointer("/block/header")
		.or_else(|| value.pointer("/sdk_block/header"))
		.map(|header| read_u64(header, "height"))
		.transpose()?
		.flatten()
		.ok_or_else(|| ChainClientError::Transport("Block response missing height".into()))
}

fn read_u64(value: &Value, field: &str) -> Result<Option<u64>, ChainClientError> {
	match value.get(field) {
		None | Some(Value::Null) => Ok(None),
		Some(Value::Number(n)) => n
			.as_u64()
			.map(Some)
			.ok_or_else(|| ChainClientError::Transport(format!("Invalid {}: {}", field, n))),
		Some(Value::String(s)) => s
			.parse()
			.map(Some)
			.map_err(|_| ChainClientError::Transport(format!("Invalid {}: {}", field, s))),
		Some(other) => Err(ChainClientError::Transport(format!(
			"Invalid {}: {}",
			field, other
		))),
	}
}

/// Deserializes a `u64` rendered either as a JSON string or number.
mod string_or_number {
	use serde::{Deserialize, Deserializer};

	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Repr {
		Number(u64),
		String(String),
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
	where
		D: Deserializer<'de>,
	{
		match Repr::deserialize(deserializer)? {
			Repr::Number(n) => Ok(n),
			Repr::String(s) if s.is_empty() => Ok(0),
			Repr::String(s) => s.parse().map_err(serde::de::Error::custom),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use deployer_account::implementations::mnemonic::create_account;
	use deployer_types::SecretString;
	use serde_json::json;

	const TEST_MNEMONIC: &str = "notice oak worry limit wrap speak medal online prefer cluster roof addict wrist behave treat actual wasp year salad speed social layer crew genius";
	const SENDER: &str = "terra1x46rqay4d3cssq8gxxvqz8xt6nwlz4td20k38v";

	fn network() -> NetworkConfig {
		NetworkConfig {
			lcd_url: "https://pisco-lcd.terra.dev/".into(),
			chain_id: "pisco-1".into(),
			prefix: "terra".into(),
			denom: "uluna".into(),
			gas_price: "0.015".into(),
			gas_adjustment: 3.5,
			request_timeout_seconds: 10,
		}
	}

	#[test]
	fn test_client_configuration() {
		let client = LcdClient::new(&network()).unwrap();

		assert!(client.supports_chain("pisco-1"));
		assert!(!client.supports_chain("phoenix-1"));
		assert_eq!(
			client.url("/cosmos/tx/v1beta1/txs"),
			"https://pisco-lcd.terra.dev/cosmos/tx/v1beta1/txs"
		);
		assert_eq!(client.gas_price, "0.015uluna".parse::<GasPrice>().unwrap());
	}

	#[test]
	fn test_invalid_gas_price_rejected() {
		let mut network = network();
		network.gas_price = "free".into();
		assert!(matches!(
			LcdClient::new(&network),
			Err(ChainClientError::Encoding(_))
		));
	}

	#[test]
	fn test_parse_account_info_variants() {
		let base = json!({
			"account": {
				"@type": "/cosmos.auth.v1beta1.BaseAccount",
				"address": SENDER,
				"account_number": "42",
				"sequence": "7"
			}
		});
		assert_eq!(
			parse_account_info(&base).unwrap(),
			AccountInfo {
				account_number: 42,
				sequence: 7
			}
		);

		let vesting = json!({
			"account": {
				"@type": "/cosmos.vesting.v1beta1.ContinuousVestingAccount",
				"base_vesting_account": {
					"base_account": {"account_number": 3, "sequence": 11}
				}
			}
		});
		assert_eq!(
			parse_account_info(&vesting).unwrap(),
			AccountInfo {
				account_number: 3,
				sequence: 11
			}
		);

		let fresh = json!({"account": {"address": SENDER, "account_number": "9"}});
		assert_eq!(parse_account_info(&fresh).unwrap().sequence, 0);

		assert!(parse_account_info(&json!({})).is_err());
	}

	#[test]
	fn test_parse_block_height() {
		let value = json!({"block": {"header": {"chain_id": "pisco-1", "height": "8123456"}}});
		assert_eq!(parse_block_height(&value).unwrap(), 8_123_456);

		let value = json!({"sdk_block": {"header": {"height": "12"}}});
		assert_eq!(parse_block_height(&value).unwrap(), 12);

		assert!(parse_block_height(&json!({"block": {}})).is_err());
	}

	#[test]
	fn test_tx_response_conversion() {
		let body = json!({
			"tx_response": {
				"height": "0",
				"txhash": "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855",
				"codespace": "",
				"code": 0,
				"data": "",
				"raw_log": "[]",
				"logs": [],
				"info": "",
				"gas_wanted": "0",
				"gas_used": "0",
				"tx": null,
				"timestamp": "",
				"events": []
			}
		});
		let receipt: TxReceipt = serde_json::from_value::<TxResponseEnvelope>(body)
			.unwrap()
			.tx_response
			.into();

		assert!(receipt.is_success());
		assert!(!receipt.is_included());
		assert_eq!(receipt.raw_log, "[]");

		let committed = json!({
			"tx_response": {
				"height": 1532,
				"txhash": "ABCD",
				"code": 0,
				"gas_wanted": "350000",
				"gas_used": 281234,
				"events": [
					{"type": "store_code", "attributes": [
						{"key": "code_id", "value": "117", "index": true}
					]}
				]
			}
		});
		let receipt: TxReceipt = serde_json::from_value::<TxResponseEnvelope>(committed)
			.unwrap()
			.tx_response
			.into();

		assert_eq!(receipt.height, 1532);
		assert_eq!(receipt.gas_wanted, 350_000);
		assert_eq!(receipt.gas_used, 281_234);
		assert_eq!(receipt.attribute("store_code", "code_id"), Some("117"));
	}

	#[test]
	fn test_simulate_response_parsing() {
		let response: SimulateResponse = serde_json::from_value(json!({
			"gas_info": {"gas_wanted": "0", "gas_used": "104227"},
			"result": {"data": "", "log": "", "events": []}
		}))
		.unwrap();
		assert_eq!(response.gas_info.gas_used, 104_227);
	}

	#[test]
	fn test_messages_keep_order() {
		let messages = vec![
			Message::StoreCode {
				sender: SENDER.into(),
				wasm_byte_code: vec![0x00, 0x61, 0x73, 0x6d],
			},
			Message::InstantiateContract {
				sender: SENDER.into(),
				admin: Some(SENDER.into()),
				code_id: 1,
				label: "cw-member-v0.1.0".into(),
				msg: json!({}),
				funds: vec![Coin::new(1_000, "uluna")],
			},
			Message::ExecuteContract {
				sender: SENDER.into(),
				contract: SENDER.into(),
				msg: json!({"update_config": {}}),
				funds: vec![],
			},
		];

		let body = build_body(&messages, "").unwrap();
		let type_urls: Vec<_> = body.messages.iter().map(|m| m.type_url.as_str()).collect();
		assert_eq!(
			type_urls,
			vec![
				"/cosmwasm.wasm.v1.MsgStoreCode",
				"/cosmwasm.wasm.v1.MsgInstantiateContract",
				"/cosmwasm.wasm.v1.MsgExecuteContract",
			]
		);
	}

	#[test]
	fn test_invalid_sender_is_encoding_error() {
		let messages = vec![Message::ExecuteContract {
			sender: "not-an-address".into(),
			contract: SENDER.into(),
			msg: json!({}),
			funds: vec![],
		}];
		assert!(matches!(
			build_body(&messages, ""),
			Err(ChainClientError::Encoding(_))
		));
	}

	#[tokio::test]
	async fn test_signed_tx_decodes() {
		let identity = create_account(&SecretString::from(TEST_MNEMONIC), 330, "terra").unwrap();
		let body = build_body(
			&[Message::ExecuteContract {
				sender: SENDER.into(),
				contract: SENDER.into(),
				msg: json!({"update_config": {}}),
				funds: vec![],
			}],
			"deploy",
		)
		.unwrap();
		let fee = Fee::from_amount_and_gas(
			to_cosmos_coin(&Coin::new(225_000, "uluna")).unwrap(),
			1_500_000u64,
		);
		let account = AccountInfo {
			account_number: 42,
			sequence: 7,
		};

		let bytes = sign_tx(&identity, &body, fee, "pisco-1", account)
			.await
			.unwrap();
		let tx = cosmrs::Tx::from_bytes(&bytes).unwrap();

		assert_eq!(tx.body.messages.len(), 1);
		assert_eq!(tx.body.memo, "deploy");
		assert_eq!(tx.auth_info.fee.gas_limit, 1_500_000);
		assert_eq!(tx.auth_info.signer_infos[0].sequence, 7);
		assert_eq!(tx.signatures.len(), 1);
		assert_eq!(tx.signatures[0].len(), 64);
	}
}
