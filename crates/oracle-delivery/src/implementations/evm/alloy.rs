//! Alloy-based chain client.
//!
//! Talks JSON-RPC over HTTP to one EVM endpoint. Signing happens in the
//! account layer, so only raw, already-signed transactions are broadcast
//! here and the provider carries no wallet.

use crate::{ChainClient, DeliveryError, DeliveryFactory, DeliveryRegistry};
use alloy::network::TransactionBuilder;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use oracle_config::NetworkConfig;
use oracle_types::{
	truncate_id, Address, Bytes, ConfigSchema, ContractCall, Field, FieldType,
	ImplementationRegistry, Schema, SignedTransaction, TransactionHash, TransactionReceipt,
	ValidationError, U256,
};

/// Chain client backed by an alloy HTTP provider.
pub struct AlloyChainClient {
	provider: DynProvider,
	chain_id: u64,
}

impl AlloyChainClient {
	/// Connects to `rpc_url`. No request is made until the first call.
	pub fn new(rpc_url: &str, chain_id: u64) -> Result<Self, DeliveryError> {
		let url = rpc_url
			.parse()
			.map_err(|e| DeliveryError::Configuration(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;

		let provider = ProviderBuilder::new().connect_http(url).erased();

		Ok(Self { provider, chain_id })
	}

	fn request_for(from: Option<Address>, call: &ContractCall) -> TransactionRequest {
		let request = TransactionRequest::default()
			.with_to(call.to)
			.with_input(call.data.clone())
			.with_value(call.value);
		match from {
			Some(from) => request.with_from(from),
			None => request,
		}
	}
}

/// Maps a transport error, keeping node-side rejections apart from I/O.
fn classify(context: &str, error: RpcError<TransportErrorKind>) -> DeliveryError {
	match error.as_error_resp() {
		Some(payload) => DeliveryError::Estimation(format!("{}: {}", context, payload.message)),
		None => DeliveryError::Network(format!("{}: {}", context, error)),
	}
}

fn network(context: &str, error: RpcError<TransportErrorKind>) -> DeliveryError {
	DeliveryError::Network(format!("{}: {}", context, error))
}

/// Node messages meaning the exact transaction is already in its pool.
const ALREADY_KNOWN: [&str; 3] = ["already known", "known transaction", "already imported"];

/// Maps a failed `eth_sendRawTransaction`.
///
/// `node_message` is the JSON-RPC error message when the node answered at
/// all. An answer means the node saw the transaction and refused it, which
/// a resend will not change, unless the refusal says the node already holds
/// this very transaction. No answer is a transport failure.
fn broadcast_failure(
	hash: TransactionHash,
	node_message: Option<&str>,
	error: &dyn std::fmt::Display,
) -> Result<TransactionHash, DeliveryError> {
	match node_message {
		Some(message) => {
			let lower = message.to_lowercase();
			if ALREADY_KNOWN.iter().any(|known| lower.contains(known)) {
				tracing::debug!(
					tx_hash = %truncate_id(&hash.to_string()),
					"Node already holds transaction"
				);
				return Ok(hash);
			}
			Err(DeliveryError::Refused(message.to_string()))
		},
		None => Err(DeliveryError::Network(format!(
			"Failed to send transaction: {}",
			error
		))),
	}
}

#[async_trait]
impl ChainClient for AlloyChainClient {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyChainSchema)
	}

	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn submit(&self, tx: &SignedTransaction) -> Result<TransactionHash, DeliveryError> {
		let pending = match self.provider.send_raw_transaction(&tx.raw).await {
			Ok(pending) => pending,
			Err(e) => {
				let message = e.as_error_resp().map(|payload| payload.message.as_ref());
				return broadcast_failure(tx.hash, message, &e);
			},
		};

		let hash = TransactionHash(*pending.tx_hash());
		if hash != tx.hash {
			tracing::warn!(
				expected = %tx.hash,
				reported = %hash,
				"Node reported a different transaction hash"
			);
		}
		tracing::debug!(
			tx_hash = %truncate_id(&hash.to_string()),
			chain_id = self.chain_id,
			"Broadcast raw transaction"
		);
		Ok(hash)
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash.0)
			.await
			.map_err(|e| network("Failed to get receipt", e))?;

		Ok(receipt.and_then(|receipt| {
			// Receipts for pending blocks carry no number yet
			let block_number = receipt.block_number?;
			Some(TransactionReceipt {
				hash: TransactionHash(receipt.transaction_hash),
				block_number,
				success: receipt.status(),
				gas_used: receipt.gas_used,
				logs: receipt
					.inner
					.logs()
					.iter()
					.map(|log| log.inner.clone())
					.collect(),
			})
		}))
	}

	async fn get_nonce(&self, address: Address) -> Result<u64, DeliveryError> {
		self.provider
			.get_transaction_count(address)
			.pending()
			.await
			.map_err(|e| network("Failed to get nonce", e))
	}

	async fn get_gas_price(&self) -> Result<u128, DeliveryError> {
		self.provider
			.get_gas_price()
			.await
			.map_err(|e| network("Failed to get gas price", e))
	}

	async fn estimate_gas(&self, from: Address, call: &ContractCall) -> Result<u64, DeliveryError> {
		self.provider
			.estimate_gas(Self::request_for(Some(from), call))
			.await
			.map_err(|e| classify(&format!("Gas estimation for {} failed", call.function), e))
	}

	async fn call(&self, call: &ContractCall) -> Result<Bytes, DeliveryError> {
		self.provider
			.call(Self::request_for(None, call))
			.await
			.map_err(|e| network(&format!("Call to {} failed", call.function), e))
	}

	async fn get_balance(&self, address: Address) -> Result<U256, DeliveryError> {
		self.provider
			.get_balance(address)
			.await
			.map_err(|e| network("Failed to get balance", e))
	}

	async fn get_block_number(&self) -> Result<u64, DeliveryError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| network("Failed to get block number", e))
	}
}

/// Configuration schema for the alloy chain client.
///
/// Everything needed comes from `[network]`; the only option is an RPC URL
/// that overrides the network one, for pointing delivery at a private
/// endpoint while reads keep the public one.
pub struct AlloyChainSchema;

impl ConfigSchema for AlloyChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("rpc_url", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
					_ => Err("rpc_url must be an http(s) URL".to_string()),
				}
			})],
		);
		schema.validate(config)
	}
}

/// Factory function to create an alloy chain client from configuration.
///
/// Configuration parameters:
/// - `rpc_url` (optional): overrides `network.rpc_url`
pub fn create_alloy_client(
	config: &toml::Value,
	network: &NetworkConfig,
) -> Result<Box<dyn ChainClient>, DeliveryError> {
	AlloyChainSchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(format!("Invalid configuration: {}", e)))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.unwrap_or(&network.rpc_url);

	Ok(Box::new(AlloyChainClient::new(rpc_url, network.chain_id)?))
}

/// Registry for the alloy chain client.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = DeliveryFactory;

	fn factory() -> Self::Factory {
		create_alloy_client
	}
}

impl DeliveryRegistry for Registry {}
