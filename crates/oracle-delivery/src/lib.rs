//! Transaction delivery module for the cricket oracle.
//!
//! Three layers live here, leaf-first:
//! - [`ChainClient`]: a thin handle to one ledger endpoint. Submits signed
//!   bytes, reads nonce/fee/receipt data, and never retries on its own.
//! - [`TransactionBuilder`]: turns an intended [`ContractCall`] into a fully
//!   parameterized [`oracle_types::PendingTransaction`].
//! - [`SubmissionPipeline`]: build, sign, submit and await for one call,
//!   classified into a [`oracle_types::SubmissionResult`].

use alloy::sol_types::SolCall;
use async_trait::async_trait;
use oracle_config::NetworkConfig;
use oracle_types::{
	Address, Bytes, ConfigSchema, ContractCall, ImplementationRegistry, SignedTransaction,
	TransactionHash, TransactionReceipt, U256,
};
use std::time::Duration;
use thiserror::Error;

pub mod builder;
pub mod pipeline;

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
	pub mod mock;
}

pub use builder::{FeePolicy, TransactionBuilder};
pub use pipeline::SubmissionPipeline;

/// Errors that can occur talking to the ledger.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// Transport failure. Always retryable by the caller.
	#[error("Network error: {0}")]
	Network(String),
	/// The node rejected a broadcast with an error response.
	#[error("Refused by node: {0}")]
	Refused(String),
	/// The dry-run of a call reverted; the call must not be submitted.
	#[error("Estimation error: {0}")]
	Estimation(String),
	/// No receipt was observed within the wait window.
	#[error("Timed out: {0}")]
	Timeout(String),
	/// Returned data did not match the expected ABI.
	#[error("Decode error: {0}")]
	Decode(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// How long and how often to wait for a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionOptions {
	pub timeout: Duration,
	pub poll_interval: Duration,
	/// Blocks, counting the inclusion block, before a receipt counts.
	pub confirmations: u64,
}

impl Default for SubmissionOptions {
	fn default() -> Self {
		Self {
			timeout: Duration::from_secs(120),
			poll_interval: Duration::from_secs(1),
			confirmations: 1,
		}
	}
}

/// Interface to a single ledger endpoint.
///
/// Implementations hold only a connection handle. Reads must be safe to call
/// concurrently with each other and with `submit`.
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	fn chain_id(&self) -> u64;

	/// Broadcasts a signed transaction and returns its hash.
	async fn submit(&self, tx: &SignedTransaction) -> Result<TransactionHash, DeliveryError>;

	/// Current receipt for `hash`, `None` while the transaction is not mined.
	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;

	/// Next nonce for `address`, counting transactions still in the mempool.
	async fn get_nonce(&self, address: Address) -> Result<u64, DeliveryError>;

	/// Current legacy gas price in wei.
	async fn get_gas_price(&self) -> Result<u128, DeliveryError>;

	/// Dry-runs `call` from `from` and returns the gas it used.
	///
	/// A reverting dry-run is `DeliveryError::Estimation`.
	async fn estimate_gas(&self, from: Address, call: &ContractCall) -> Result<u64, DeliveryError>;

	/// Executes a read-only call against the latest state.
	async fn call(&self, call: &ContractCall) -> Result<Bytes, DeliveryError>;

	async fn get_balance(&self, address: Address) -> Result<U256, DeliveryError>;

	async fn get_block_number(&self) -> Result<u64, DeliveryError>;

	/// Polls for the receipt of `hash` until it has enough confirmations or
	/// `options.timeout` elapses.
	///
	/// A timeout does not mean the transaction failed, only that it was not
	/// observed in time. Poll errors are treated as transient.
	async fn wait_for_receipt(
		&self,
		hash: &TransactionHash,
		options: &SubmissionOptions,
	) -> Result<TransactionReceipt, DeliveryError> {
		let start = tokio::time::Instant::now();
		let deadline = start + options.timeout;

		loop {
			match self.get_receipt(hash).await {
				Ok(Some(receipt)) => {
					if options.confirmations <= 1 {
						return Ok(receipt);
					}
					match self.get_block_number().await {
						Ok(current)
							if current.saturating_sub(receipt.block_number) + 1
								>= options.confirmations =>
						{
							return Ok(receipt);
						},
						Ok(_) => tracing::debug!(tx_hash = %hash, "Waiting for confirmations"),
						Err(e) => tracing::debug!(tx_hash = %hash, error = %e, "Block poll failed"),
					}
				},
				Ok(None) => {},
				Err(e) => tracing::debug!(tx_hash = %hash, error = %e, "Receipt poll failed"),
			}

			let now = tokio::time::Instant::now();
			if now >= deadline {
				return Err(DeliveryError::Timeout(format!(
					"no receipt for {} after {}ms",
					hash,
					options.timeout.as_millis()
				)));
			}
			tokio::time::sleep(options.poll_interval.min(deadline - now)).await;
		}
	}
}

/// Performs a typed read-only call and decodes its return data.
pub async fn read_contract<C: SolCall>(
	client: &dyn ChainClient,
	to: Address,
	call: C,
) -> Result<C::Return, DeliveryError> {
	let request = ContractCall::new(to, C::SIGNATURE, call.abi_encode());
	let data = client.call(&request).await?;
	C::abi_decode_returns(&data)
		.map_err(|e| DeliveryError::Decode(format!("{}: {}", C::SIGNATURE, e)))
}

/// Type alias for chain client factory functions.
pub type DeliveryFactory =
	fn(&toml::Value, &NetworkConfig) -> Result<Box<dyn ChainClient>, DeliveryError>;

/// Registry trait for chain client implementations.
pub trait DeliveryRegistry: ImplementationRegistry<Factory = DeliveryFactory> {}

/// Get all registered chain client implementations as `(name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, DeliveryFactory)> {
	use implementations::{evm::alloy, mock};

	vec![
		(alloy::Registry::NAME, alloy::Registry::factory()),
		(mock::Registry::NAME, mock::Registry::factory()),
	]
}
