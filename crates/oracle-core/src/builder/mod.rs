//! Builder pattern for constructing match orchestrators.
//!
//! Composes a [`MatchOrchestrator`] from pluggable storage, account and
//! chain client implementations chosen by name in the configuration.

use crate::event_bus::EventBus;
use crate::orchestrator::MatchOrchestrator;
use crate::state::MatchStore;
use crate::OracleContext;
use oracle_account::{AccountError, AccountInterface, AccountService};
use oracle_config::{Config, NetworkConfig};
use oracle_delivery::{
	ChainClient, DeliveryError, FeePolicy, SubmissionOptions, SubmissionPipeline,
	TransactionBuilder,
};
use oracle_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during orchestrator construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for every pluggable component, keyed by implementation name.
pub struct OracleFactories<SF, AF, DF> {
	pub storage_factories: HashMap<String, SF>,
	pub account_factories: HashMap<String, AF>,
	pub delivery_factories: HashMap<String, DF>,
}

/// Builder for constructing a MatchOrchestrator with pluggable implementations.
pub struct OracleBuilder {
	config: Config,
}

impl OracleBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the orchestrator from the primary implementation of each component.
	pub async fn build<SF, AF, DF>(
		self,
		factories: OracleFactories<SF, AF, DF>,
	) -> Result<MatchOrchestrator, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
		DF: Fn(&toml::Value, &NetworkConfig) -> Result<Box<dyn ChainClient>, DeliveryError>,
	{
		let storage_backend = load_primary(
			"storage",
			&self.config.storage.primary,
			&self.config.storage.implementations,
			&factories.storage_factories,
			|factory, config| factory(config),
		)?;
		let storage = Arc::new(StorageService::new(storage_backend));

		let account_impl = load_primary(
			"account",
			&self.config.account.primary,
			&self.config.account.implementations,
			&factories.account_factories,
			|factory, config| factory(config),
		)?;
		let account = Arc::new(AccountService::new(account_impl));

		// Fetch the oracle address once during initialization
		let oracle_address = account.get_address().await.map_err(|e| {
			tracing::error!(component = "account", error = %e, "Failed to get oracle address");
			BuilderError::Config(format!("Failed to get oracle address: {}", e))
		})?;

		let network = &self.config.network;
		let client: Arc<dyn ChainClient> = Arc::from(load_primary(
			"delivery",
			&self.config.delivery.primary,
			&self.config.delivery.implementations,
			&factories.delivery_factories,
			|factory, config| factory(config, network),
		)?);

		if client.chain_id() != network.chain_id {
			return Err(BuilderError::Config(format!(
				"Chain client reports chain {} but network is configured for {}",
				client.chain_id(),
				network.chain_id
			)));
		}

		let fee_policy = FeePolicy::estimated(self.config.delivery.gas_multiplier)
			.map_err(|e| BuilderError::Config(e.to_string()))?
			.with_fixed_limit(self.config.delivery.gas_limit);
		let options = SubmissionOptions {
			timeout: self.config.oracle.receipt_timeout(),
			poll_interval: self.config.oracle.poll_interval(),
			confirmations: self.config.oracle.min_confirmations,
		};
		let pipeline = Arc::new(SubmissionPipeline::new(
			client.clone(),
			TransactionBuilder::new(client.clone(), fee_policy),
			options,
		));

		tracing::info!(
			oracle_id = %self.config.oracle.id,
			oracle_address = %oracle_address,
			chain_id = network.chain_id,
			factory = %network.factory_address,
			"Oracle ready"
		);

		let ctx = OracleContext {
			client,
			pipeline,
			account,
			store: Arc::new(MatchStore::new(storage)),
			events: EventBus::default(),
			factory: network.factory_address,
		};
		Ok(MatchOrchestrator::new(ctx, self.config.sequence.clone()))
	}
}

/// Creates every configured implementation of one component and returns the
/// primary one.
fn load_primary<F, T, E>(
	component: &'static str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
	create: impl Fn(&F, &toml::Value) -> Result<T, E>,
) -> Result<T, BuilderError>
where
	E: std::fmt::Display,
{
	let mut loaded = HashMap::new();
	for (name, config) in implementations {
		let Some(factory) = factories.get(name) else {
			tracing::warn!(component, implementation = %name, "No factory registered, skipping");
			continue;
		};
		match create(factory, config) {
			Ok(implementation) => {
				let is_primary = primary == name;
				tracing::info!(component, implementation = %name, enabled = %is_primary, "Loaded");
				loaded.insert(name.clone(), implementation);
			},
			Err(e) => {
				tracing::error!(
					component,
					implementation = %name,
					error = %e,
					"Failed to create implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			},
		}
	}

	if loaded.is_empty() {
		return Err(BuilderError::MissingComponent(format!(
			"No valid {} implementations available",
			component
		)));
	}

	loaded.remove(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} '{}' failed to load or has invalid configuration",
			component, primary
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::DEV_KEY;

	fn config(delivery_primary: &str) -> Config {
		let toml = format!(
			r#"
[oracle]
id = "oracle-test"
receipt_timeout_seconds = 1
poll_interval_ms = 5

[network]
rpc_url = "http://localhost:8545"
chain_id = 31337
factory_address = "0xfafafafafafafafafafafafafafafafafafafafa"

[account]
primary = "local"
[account.implementations.local]
private_key = "{key}"

[delivery]
primary = "{delivery}"
[delivery.implementations.{delivery}]

[sequence]
pacing_ms = 0
betting_window_ms = 0
settle_delay_ms = 0

[storage]
primary = "memory"
[storage.implementations.memory]
"#,
			key = DEV_KEY,
			delivery = delivery_primary
		);
		toml.parse().unwrap()
	}

	fn factories() -> OracleFactories<
		oracle_storage::StorageFactory,
		oracle_account::AccountFactory,
		oracle_delivery::DeliveryFactory,
	> {
		OracleFactories {
			storage_factories: oracle_storage::get_all_implementations()
				.into_iter()
				.map(|(name, f)| (name.to_string(), f))
				.collect(),
			account_factories: oracle_account::get_all_implementations()
				.into_iter()
				.map(|(name, f)| (name.to_string(), f))
				.collect(),
			delivery_factories: oracle_delivery::get_all_implementations()
				.into_iter()
				.map(|(name, f)| (name.to_string(), f))
				.collect(),
		}
	}

	#[tokio::test]
	async fn test_build_and_create_match() {
		let orchestrator = OracleBuilder::new(config("mock"))
			.build(factories())
			.await
			.unwrap();

		let handle = orchestrator.create_match("RCB", "CSK", 1).await.unwrap();
		assert_ne!(handle.contract_address, oracle_types::Address::ZERO);
		assert_eq!(
			orchestrator.context().factory,
			oracle_types::Address::repeat_byte(0xfa)
		);
		assert_eq!(orchestrator.sequence_config().pacing_ms, 0);
	}

	#[tokio::test]
	async fn test_unregistered_implementation() {
		let result = OracleBuilder::new(config("evm_ws")).build(factories()).await;
		assert!(matches!(
			result,
			Err(BuilderError::MissingComponent(msg)) if msg.contains("delivery")
		));
	}
}
