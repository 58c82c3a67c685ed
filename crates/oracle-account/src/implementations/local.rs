//! Local private-key account.
//!
//! Holds the oracle's key in memory and signs legacy transactions with it.
//! The key arrives through configuration (usually `${PRIVATE_KEY}`) and is
//! kept in a `SecretString` until the signer is built.

use crate::{AccountError, AccountFactory, AccountInterface, AccountRegistry};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::keccak256;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use oracle_types::{
	with_0x_prefix, Address, ConfigSchema, Field, FieldType, ImplementationRegistry,
	PendingTransaction, Schema, SecretString, SignedTransaction, TransactionHash,
	ValidationError,
};

/// Account backed by a private key held in process memory.
pub struct LocalWallet {
	signer: PrivateKeySigner,
	wallet: EthereumWallet,
}

impl LocalWallet {
	/// Builds a wallet from a hex private key, with or without `0x`.
	pub fn new(private_key: &SecretString) -> Result<Self, AccountError> {
		let signer: PrivateKeySigner = private_key.with_exposed(|key| {
			with_0x_prefix(key)
				.parse()
				.map_err(|_| AccountError::InvalidKey("Invalid private key format".to_string()))
		})?;
		let wallet = EthereumWallet::from(signer.clone());
		Ok(Self { signer, wallet })
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalWalletSchema)
	}

	async fn address(&self) -> Result<Address, AccountError> {
		Ok(self.signer.address())
	}

	async fn sign_transaction(
		&self,
		tx: &PendingTransaction,
	) -> Result<SignedTransaction, AccountError> {
		if tx.from != self.signer.address() {
			return Err(AccountError::SigningFailed(format!(
				"transaction sender {} does not match account {}",
				tx.from,
				self.signer.address()
			)));
		}

		// Gas price without fee caps builds a legacy transaction
		let request = TransactionRequest::default()
			.with_from(tx.from)
			.with_to(tx.to)
			.with_input(tx.data.clone())
			.with_value(tx.value)
			.with_chain_id(tx.chain_id)
			.with_nonce(tx.nonce)
			.with_gas_price(tx.gas_price)
			.with_gas_limit(tx.gas_limit);

		let envelope = request
			.build(&self.wallet)
			.await
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;

		let raw = envelope.encoded_2718();
		Ok(SignedTransaction {
			hash: TransactionHash(keccak256(&raw)),
			raw: raw.into(),
			transaction: tx.clone(),
		})
	}
}

/// Configuration schema for the local wallet.
pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("private_key", FieldType::String).with_validator(|value| {
				let key = value.as_str().unwrap_or_default();
				let key = key.strip_prefix("0x").unwrap_or(key);
				if key.len() != 64 {
					return Err("private key must be 64 hex characters".to_string());
				}
				if hex::decode(key).is_err() {
					return Err("private key must be valid hex".to_string());
				}
				Ok(())
			})],
			vec![],
		);
		schema.validate(config)
	}
}

/// Factory function to create a local wallet from configuration.
///
/// Configuration parameters:
/// - `private_key`: hex key, usually `"${PRIVATE_KEY}"`
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(e.to_string()))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.ok_or_else(|| AccountError::InvalidKey("private_key is required".to_string()))?;

	Ok(Box::new(LocalWallet::new(&private_key)?))
}

/// Registry for the local wallet implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl AccountRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use oracle_types::{Bytes, U256};

	// Well-known development key (anvil account 0)
	const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

	fn pending(from: Address, nonce: u64) -> PendingTransaction {
		PendingTransaction {
			chain_id: 31337,
			from,
			to: Address::repeat_byte(0x42),
			data: Bytes::from(vec![0x01, 0x02, 0x03, 0x04]),
			value: U256::ZERO,
			nonce,
			gas_price: 1_000_000_000,
			gas_limit: 200_000,
			function: "openBall(1)".to_string(),
		}
	}

	#[tokio::test]
	async fn test_address_from_key() {
		let wallet = LocalWallet::new(&SecretString::from(DEV_KEY)).unwrap();
		let expected: Address = DEV_ADDRESS.parse().unwrap();
		assert_eq!(wallet.address().await.unwrap(), expected);
	}

	#[tokio::test]
	async fn test_signing_is_deterministic() {
		let wallet = LocalWallet::new(&SecretString::from(DEV_KEY)).unwrap();
		let from = wallet.address().await.unwrap();

		let first = wallet.sign_transaction(&pending(from, 7)).await.unwrap();
		let second = wallet.sign_transaction(&pending(from, 7)).await.unwrap();
		assert_eq!(first.raw, second.raw);
		assert_eq!(first.hash, second.hash);

		let other_nonce = wallet.sign_transaction(&pending(from, 8)).await.unwrap();
		assert_ne!(first.hash, other_nonce.hash);
	}

	#[tokio::test]
	async fn test_rejects_foreign_sender() {
		let wallet = LocalWallet::new(&SecretString::from(DEV_KEY)).unwrap();
		let result = wallet
			.sign_transaction(&pending(Address::repeat_byte(0x01), 0))
			.await;
		assert!(matches!(result, Err(AccountError::SigningFailed(_))));
	}

	#[test]
	fn test_factory_validates_key() {
		let bad: toml::Value = toml::from_str("private_key = \"0x1234\"").unwrap();
		assert!(matches!(create_account(&bad), Err(AccountError::InvalidKey(_))));

		let good: toml::Value =
			toml::from_str(&format!("private_key = \"{}\"", &DEV_KEY[2..])).unwrap();
		assert!(create_account(&good).is_ok());
	}
}
