//! Main entry point for the contract deployer.
//!
//! This binary stores, instantiates and configures CosmWasm contracts on a
//! Terra-style chain. Every task signs with the configured tester mnemonic and
//! submits through the LCD chain client.

use clap::{Parser, Subcommand};
use deployer_account::implementations::mnemonic::create_account;
use deployer_config::Config;
use deployer_delivery::implementations::cosmos::lcd::LcdClient;
use deployer_delivery::{PollSettings, TransactionSubmitter};
use std::path::PathBuf;
use std::sync::Arc;

mod refs;
mod tasks;

use refs::RefsStore;
use tasks::{parse_json_arg, Deployer};

/// Command-line arguments for the deployer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "deployer.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Tester account to sign with (1-based), overriding the configuration
	#[arg(long, env = "TESTER_ID")]
	tester: Option<usize>,

	/// Use the fixed fallback fee instead of simulating
	#[arg(long)]
	manual_fee: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Store one or more contract artifacts in a single transaction
	StoreCode {
		/// Contract names; `<artifacts_dir>/<name>.wasm` is uploaded
		#[arg(required = true)]
		contracts: Vec<String>,
	},
	/// Instantiate stored code with the signer as admin
	Instantiate {
		contract: String,
		#[arg(long)]
		code_id: u64,
		/// Instantiate message as JSON
		#[arg(long, default_value = "{}")]
		msg: String,
		/// Defaults to `<contract>-<version>`
		#[arg(long)]
		label: Option<String>,
		#[arg(long)]
		version: Option<String>,
	},
	/// Execute a message on a contract
	Execute {
		address: String,
		/// Execute message as JSON
		#[arg(long)]
		msg: String,
	},
	/// Run a smart query against a contract
	Query {
		address: String,
		/// Query message as JSON
		#[arg(long)]
		msg: String,
	},
	/// Store and instantiate a contract
	Deploy {
		contract: String,
		#[arg(long, default_value = "{}")]
		msg: String,
		#[arg(long)]
		label: Option<String>,
		#[arg(long)]
		version: Option<String>,
	},
	/// Print the latest block height
	BlockHeight,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_target(true)
		.init();

	let config = Config::from_file(&args.config).await?;
	tracing::info!(
		chain_id = %config.network.chain_id,
		lcd_url = %config.network.lcd_url,
		"Loaded configuration"
	);

	let deployer = build_deployer(&config, args.tester, args.manual_fee)?;
	tracing::info!(sender = %deployer.sender(), "Using signer");

	run(&deployer, args.command).await?;
	Ok(())
}

/// Wires the signer, chain client and refs file from configuration.
fn build_deployer(
	config: &Config,
	tester: Option<usize>,
	manual_fee: bool,
) -> Result<Deployer, Box<dyn std::error::Error>> {
	let mnemonic = config
		.account
		.mnemonic(tester)
		.ok_or("No mnemonic configured")?;
	let identity = create_account(
		mnemonic,
		config.account.coin_type(),
		&config.network.prefix,
	)?;

	let client = Arc::new(LcdClient::new(&config.network)?);
	let confirmation = &config.delivery.confirmation;
	let submitter = TransactionSubmitter::new(
		client,
		config.network.denom.clone(),
		PollSettings {
			interval: confirmation.poll_interval(),
			max_attempts: confirmation.max_attempts,
		},
	);

	Ok(Deployer::new(
		submitter,
		identity,
		config.network.chain_id.clone(),
		config.delivery.auto_estimate_fee && !manual_fee,
		config.deploy.artifacts_dir.clone(),
		RefsStore::new(config.deploy.refs_file.clone()),
	))
}

async fn run(deployer: &Deployer, command: Command) -> Result<(), Box<dyn std::error::Error>> {
	match command {
		Command::StoreCode { contracts } => {
			for stored in deployer.store_code(&contracts).await? {
				println!("{}: code_id {}", stored.contract, stored.code_id);
			}
		},
		Command::Instantiate {
			contract,
			code_id,
			msg,
			label,
			version,
		} => {
			let msg = parse_json_arg("msg", &msg)?;
			let deployed = deployer
				.instantiate(&contract, code_id, msg, label, version.as_deref())
				.await?;
			println!("{}: {}", deployed.contract, deployed.address);
		},
		Command::Execute { address, msg } => {
			let msg = parse_json_arg("msg", &msg)?;
			let receipt = deployer.execute(&address, msg).await?;
			println!("{} (height {})", receipt.txhash, receipt.height);
		},
		Command::Query { address, msg } => {
			let msg = parse_json_arg("msg", &msg)?;
			let result = deployer.query(&address, &msg).await?;
			println!("{}", serde_json::to_string_pretty(&result)?);
		},
		Command::Deploy {
			contract,
			msg,
			label,
			version,
		} => {
			let msg = parse_json_arg("msg", &msg)?;
			let deployed = deployer
				.deploy(&contract, msg, label, version.as_deref())
				.await?;
			println!(
				"{}: code_id {} address {}",
				deployed.contract, deployed.code_id, deployed.address
			);
		},
		Command::BlockHeight => {
			println!("{}", deployer.block_height().await?);
		},
	}
	Ok(())
}
