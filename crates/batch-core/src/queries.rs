//! Read-only queries used to check the effects of a reconciled batch.
//!
//! Token and pool queries are plain `eth_call`s encoded from the ERC-20 and
//! Uniswap-V2 style interfaces below. [`poll_until`] repeats a query until its
//! result satisfies a predicate, within a bounded time.

use crate::BatchError;
use alloy_sol_types::{sol, SolCall};
use batch_delivery::ChainClient;
use batch_types::{Address, Bytes, CallRequest, U256};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

sol! {
	/// ERC-20 views.
	interface IERC20 {
		function balanceOf(address account) external view returns (uint256 balance);
		function allowance(address owner, address spender) external view returns (uint256 remaining);
	}

	/// Pair lookup on a pool factory.
	interface IPoolFactory {
		function getPair(address tokenA, address tokenB) external view returns (address pair);
	}
}

async fn view<C: SolCall>(
	chain: &dyn ChainClient,
	to: Address,
	call: C,
) -> Result<C::Return, BatchError> {
	let request = CallRequest {
		from: Address::ZERO,
		to: Some(to),
		value: U256::ZERO,
		data: Bytes::from(call.abi_encode()),
	};
	let data = chain
		.call(&request)
		.await
		.map_err(|e| BatchError::Query(format!("{} on {}: {}", C::SIGNATURE, to, e)))?;

	C::abi_decode_returns(&data, true)
		.map_err(|e| BatchError::Query(format!("cannot decode {}: {}", C::SIGNATURE, e)))
}

/// Free native balance of `address`.
pub async fn native_balance(chain: &dyn ChainClient, address: Address) -> Result<U256, BatchError> {
	chain
		.get_balance(address)
		.await
		.map_err(|e| BatchError::Query(format!("balance of {}: {}", address, e)))
}

/// ERC-20 balance of `owner` in `token`.
pub async fn token_balance(
	chain: &dyn ChainClient,
	token: Address,
	owner: Address,
) -> Result<U256, BatchError> {
	let result = view(chain, token, IERC20::balanceOfCall { account: owner }).await?;
	Ok(result.balance)
}

/// Amount of `token` that `spender` may still move on behalf of `owner`.
pub async fn allowance(
	chain: &dyn ChainClient,
	token: Address,
	owner: Address,
	spender: Address,
) -> Result<U256, BatchError> {
	let result = view(chain, token, IERC20::allowanceCall { owner, spender }).await?;
	Ok(result.remaining)
}

/// Pool token supply of the `token_a`/`token_b` pair held by `holder`.
///
/// Fails if the factory has no pair for the two tokens.
pub async fn pool_liquidity(
	chain: &dyn ChainClient,
	factory: Address,
	token_a: Address,
	token_b: Address,
	holder: Address,
) -> Result<U256, BatchError> {
	let pair = view(
		chain,
		factory,
		IPoolFactory::getPairCall {
			tokenA: token_a,
			tokenB: token_b,
		},
	)
	.await?
	.pair;

	if pair == Address::ZERO {
		return Err(BatchError::Query(format!(
			"no pair for {} and {} on factory {}",
			token_a, token_b, factory
		)));
	}
	token_balance(chain, pair, holder).await
}

/// Runs `query` until `predicate` accepts its result.
///
/// Attempts are spaced by `interval`; the last sleep is shortened so the deadline is
/// never overshot. Query errors are returned as they occur.
pub async fn poll_until<T, Q, Fut, P>(
	mut query: Q,
	mut predicate: P,
	interval: Duration,
	timeout: Duration,
) -> Result<T, BatchError>
where
	Q: FnMut() -> Fut,
	Fut: Future<Output = Result<T, BatchError>>,
	P: FnMut(&T) -> bool,
{
	let deadline = Instant::now() + timeout;
	let mut attempts = 0u32;

	loop {
		attempts += 1;
		let value = query().await?;
		if predicate(&value) {
			tracing::debug!(attempts, "Poll condition met");
			return Ok(value);
		}

		let now = Instant::now();
		if now >= deadline {
			tracing::warn!(attempts, timeout_secs = timeout.as_secs(), "Poll timed out");
			return Err(BatchError::TimedOut(format!(
				"condition not met after {} attempts in {:?}",
				attempts, timeout
			)));
		}
		tokio::time::sleep(interval.min(deadline - now)).await;
	}
}
