//! Subcommands of the `batcher` binary.

use crate::plan::Plan;
use batch_core::{assembler, BatchOrchestrator};
use batch_core::SubmissionStream;
use batch_types::{
	format_units, truncate_id, AccountBinding, Address, BatchOutcome, SubmissionState, U256,
};
use futures::StreamExt;
use std::error::Error;
use std::path::Path;

/// Native token decimals used when printing balances.
const NATIVE_DECIMALS: u8 = 18;

/// Prints every signing account with its free balance.
pub async fn accounts(orchestrator: &BatchOrchestrator) -> Result<Vec<Address>, Box<dyn Error>> {
	let accounts = orchestrator.accounts().await?;
	for account in &accounts {
		let balance = orchestrator.native_balance(*account).await?;
		println!("{}  {}", account, format_units(balance, NATIVE_DECIMALS));
	}
	Ok(accounts)
}

/// Builds, submits and follows the batch described by the plan at `path`.
pub async fn submit(
	orchestrator: &BatchOrchestrator,
	path: &Path,
) -> Result<BatchOutcome, Box<dyn Error>> {
	let plan = Plan::from_file(path).await?;
	let account = orchestrator.default_account().await?;

	let predict = orchestrator.contract_address_predictor(account).await?;
	let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
	let operations = plan.resolve(base_dir, predict).await?;
	tracing::info!(
		account = %account,
		operations = operations.len(),
		"Resolved plan"
	);

	let requests = orchestrator
		.build_operation_requests(account, &operations)
		.await?;
	let batch = match plan.mode {
		Some(mode) => assembler::assemble_batch(requests, mode)?,
		None => orchestrator.assemble_batch(requests)?,
	};
	println!("batch {} ({} items, {:?})", batch.id, batch.len(), batch.mode);

	let outcome = follow(orchestrator.submit_batch(batch, account)).await?;
	for (index, address) in outcome.addresses.iter().enumerate() {
		println!("created[{}] {}", index, address);
	}
	Ok(outcome)
}

/// Prints the EVM binding of the default account. Unless `check_only` is set,
/// an unbound account then claims its default address.
pub async fn claim(
	orchestrator: &BatchOrchestrator,
	check_only: bool,
) -> Result<AccountBinding, Box<dyn Error>> {
	let account = orchestrator.default_account().await?;
	let binding = orchestrator.account_binding(account).await?;
	match binding.evm_address {
		Some(bound) => println!("{}  claimed {}", binding.native, bound),
		None => println!("{}  default {}", binding.native, binding.default_evm_address),
	}
	if check_only || binding.is_claimed() {
		return Ok(binding);
	}

	follow(orchestrator.claim_default_account(account).await?).await?;
	let binding = orchestrator.account_binding(account).await?;
	if let Some(bound) = binding.evm_address {
		println!("{}  claimed {}", binding.native, bound);
	}
	Ok(binding)
}

/// Prints every state of `stream` and returns the outcome of a reconciled batch.
async fn follow(mut stream: SubmissionStream) -> Result<BatchOutcome, Box<dyn Error>> {
	let mut terminal = None;
	while let Some(state) = stream.next().await {
		println!("{}", describe(&state));
		if state.is_terminal() {
			terminal = Some(state);
		}
	}

	match terminal {
		Some(SubmissionState::Reconciled(outcome)) => Ok(outcome),
		Some(SubmissionState::Failed(failure)) | Some(SubmissionState::Errored(failure)) => {
			Err(Box::new(batch_core::BatchError::from(failure)))
		},
		_ => Err("submission ended without a result".into()),
	}
}

/// Waits until `address` holds more than `above`.
pub async fn wait_balance(
	orchestrator: &BatchOrchestrator,
	address: Address,
	above: U256,
) -> Result<U256, Box<dyn Error>> {
	let balance = orchestrator.wait_for_balance_above(address, above).await?;
	println!("{}  {}", address, format_units(balance, NATIVE_DECIMALS));
	Ok(balance)
}

/// One-line rendering of a state transition.
pub fn describe(state: &SubmissionState) -> String {
	let detail = match state {
		SubmissionState::Pending => String::new(),
		SubmissionState::Submitted { tx_hash } => truncate_id(&tx_hash.to_string()),
		SubmissionState::IncludedInBlock { block_hash }
		| SubmissionState::Finalized { block_hash } => truncate_id(&block_hash.to_string()),
		SubmissionState::Reconciled(outcome) => {
			format!("{} created, {} events", outcome.addresses.len(), outcome.events.len())
		},
		SubmissionState::Failed(failure) | SubmissionState::Errored(failure) => failure.to_string(),
	};

	if detail.is_empty() {
		state.label().to_string()
	} else {
		format!("{:<10} {}", state.label(), detail)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use batch_config::ConfigBuilder;
	use batch_types::{BatchFailure, FailureKind};
	use tempfile::TempDir;

	const ACCOUNT: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

	const TOKEN: &str = r#"{
		"abi": [
			{"type": "constructor", "stateMutability": "nonpayable",
			 "inputs": [{"name": "supply", "type": "uint256"}]},
			{"type": "function", "name": "mint", "stateMutability": "nonpayable",
			 "inputs": [{"name": "amount", "type": "uint256"}], "outputs": []}
		],
		"bytecode": "0x6080604052348015600f57600080fd5b50"
	}"#;

	fn table(source: &str) -> toml::Value {
		toml::Value::Table(source.parse::<toml::Table>().unwrap())
	}

	fn orchestrator() -> BatchOrchestrator {
		let config = ConfigBuilder::new()
			.chain(
				"simulated",
				table(&format!(
					"block_time_ms = 5\ngenesis = [{{ address = \"{}\", balance = \"1000000000000000000\" }}]",
					ACCOUNT
				)),
			)
			.account(
				"local",
				table("private_keys = [\"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80\"]"),
			)
			.build();
		BatchOrchestrator::from_config(config).unwrap()
	}

	fn write_plan(dir: &TempDir, plan: &str) -> std::path::PathBuf {
		std::fs::write(dir.path().join("Token.json"), TOKEN).unwrap();
		let path = dir.path().join("plan.toml");
		std::fs::write(&path, plan).unwrap();
		path
	}

	#[tokio::test]
	async fn test_accounts() {
		let accounts = accounts(&orchestrator()).await.unwrap();
		assert_eq!(accounts.len(), 1);
		assert_eq!(accounts[0].to_string(), ACCOUNT);
	}

	#[tokio::test]
	async fn test_submit_plan() {
		let dir = TempDir::new().unwrap();
		let path = write_plan(
			&dir,
			r#"
			[[operations]]
			kind = "deploy"
			artifact = "Token.json"
			args = ["1000"]

			[[operations]]
			kind = "call"
			artifact = "Token.json"
			address = "@predict:0"
			method = "mint"
			args = ["5"]
			force = true
			"#,
		);

		let account: Address = ACCOUNT.parse().unwrap();
		let outcome = submit(&orchestrator(), &path).await.unwrap();
		assert_eq!(outcome.addresses, vec![account.create(0)]);
	}

	#[tokio::test]
	async fn test_submit_plan_failure() {
		let dir = TempDir::new().unwrap();
		let path = write_plan(
			&dir,
			r#"
			mode = "best_effort"

			[[operations]]
			kind = "destroy"
			address = "0x000000000000000000000000000000000000dEaD"
			"#,
		);

		let error = submit(&orchestrator(), &path).await.unwrap_err();
		assert!(error.to_string().contains("ContractNotFound"));
	}

	#[tokio::test]
	async fn test_claim() {
		let orchestrator = orchestrator();
		let account: Address = ACCOUNT.parse().unwrap();

		let checked = claim(&orchestrator, true).await.unwrap();
		assert!(!checked.is_claimed());

		let claimed = claim(&orchestrator, false).await.unwrap();
		assert_eq!(claimed.evm_address, Some(account));

		// Already bound: nothing is submitted again.
		let again = claim(&orchestrator, false).await.unwrap();
		assert_eq!(again, claimed);
	}

	#[test]
	fn test_describe() {
		assert_eq!(describe(&SubmissionState::Pending), "pending");

		let failed = SubmissionState::Failed(
			BatchFailure::new(FailureKind::Execution, "OutOfGas").at_operation(2),
		);
		let line = describe(&failed);
		assert!(line.starts_with("failed"));
		assert!(line.contains("item 2"));
	}
}
