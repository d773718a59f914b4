//! Command-line front end of the batch orchestrator.
//!
//! Loads the configuration, builds a [`BatchOrchestrator`] from the configured chain
//! and signing implementations, and runs one subcommand against it.

use batch_config::Config;
use batch_core::BatchOrchestrator;
use batch_types::{Address, U256};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod plan;

/// Command-line arguments for the batcher.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "BATCHER_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
	/// List the signing accounts and their balances
	Accounts,
	/// Build, submit and follow the batch described by a plan file
	Submit {
		#[arg(short, long)]
		plan: PathBuf,
	},
	/// Show the EVM address binding of the default account and claim its default
	/// address if it has none
	Claim {
		/// Only show the binding
		#[arg(long)]
		check: bool,
	},
	/// Wait until an account's balance exceeds a threshold
	WaitBalance {
		#[arg(long)]
		address: Address,
		/// Threshold in the smallest unit
		#[arg(long)]
		above: U256,
	},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config_path = args.config.to_string_lossy();
	let config = Config::from_file(&config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.batcher.id);

	let orchestrator = BatchOrchestrator::from_config(config)?;

	match args.command {
		Command::Accounts => {
			commands::accounts(&orchestrator).await?;
		},
		Command::Submit { plan } => {
			commands::submit(&orchestrator, &plan).await?;
		},
		Command::Claim { check } => {
			commands::claim(&orchestrator, check).await?;
		},
		Command::WaitBalance { address, above } => {
			commands::wait_balance(&orchestrator, address, above).await?;
		},
	}

	Ok(())
}
