//! Dynamic factory registry for oracle implementations.
//!
//! Every storage, account and chain client implementation registers itself
//! here by name, so the configuration alone decides what gets instantiated.

use oracle_account::AccountFactory;
use oracle_config::Config;
use oracle_core::{MatchOrchestrator, OracleBuilder, OracleFactories};
use oracle_delivery::DeliveryFactory;
use oracle_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Global registry for all implementation factories
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub account: HashMap<String, AccountFactory>,
	pub delivery: HashMap<String, DeliveryFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			account: HashMap::new(),
			delivery: HashMap::new(),
		}
	}

	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	pub fn register_account(&mut self, name: impl Into<String>, factory: AccountFactory) {
		self.account.insert(name.into(), factory);
	}

	pub fn register_delivery(&mut self, name: impl Into<String>, factory: DeliveryFactory) {
		self.delivery.insert(name.into(), factory);
	}
}

impl Default for FactoryRegistry {
	fn default() -> Self {
		Self::new()
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the global registry, filling it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in oracle_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		for (name, factory) in oracle_account::get_all_implementations() {
			tracing::debug!("Registering account implementation: {}", name);
			registry.register_account(name, factory);
		}

		for (name, factory) in oracle_delivery::get_all_implementations() {
			tracing::debug!("Registering delivery implementation: {}", name);
			registry.register_delivery(name, factory);
		}

		registry
	})
}

/// Picks the registered factory for every configured implementation name.
macro_rules! build_factories {
	($registry:expr, $config_impls:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $config_impls.keys() {
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

/// Builds an orchestrator from the registry and the configuration.
pub async fn build_orchestrator_from_config(
	config: Config,
) -> Result<MatchOrchestrator, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let storage_factories =
		build_factories!(registry, config.storage.implementations, storage, "storage");
	let account_factories =
		build_factories!(registry, config.account.implementations, account, "account");
	let delivery_factories = build_factories!(
		registry,
		config.delivery.implementations,
		delivery,
		"delivery"
	);

	let factories = OracleFactories {
		storage_factories,
		account_factories,
		delivery_factories,
	};

	Ok(OracleBuilder::new(config).build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;

	const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	fn config(extra_delivery: &str) -> Config {
		format!(
			r#"
[oracle]
id = "oracle-cli-test"

[network]
rpc_url = "http://localhost:8545"
chain_id = 31337
factory_address = "0xfafafafafafafafafafafafafafafafafafafafa"

[account]
primary = "local"
[account.implementations.local]
private_key = "{DEV_KEY}"

[delivery]
primary = "mock"
[delivery.implementations.mock]
{extra_delivery}

[storage]
primary = "memory"
[storage.implementations.memory]
"#
		)
		.parse()
		.unwrap()
	}

	#[test]
	fn test_registry_knows_every_implementation() {
		let registry = get_registry();
		for name in ["memory", "file"] {
			assert!(registry.storage.contains_key(name), "storage {name}");
		}
		assert!(registry.account.contains_key("local"));
		for name in ["mock", "evm_alloy"] {
			assert!(registry.delivery.contains_key(name), "delivery {name}");
		}
	}

	#[tokio::test]
	async fn test_builds_from_config() {
		let orchestrator = build_orchestrator_from_config(config("")).await.unwrap();
		assert_eq!(orchestrator.context().client.chain_id(), 31337);
		assert!(orchestrator.active_games().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_unknown_implementation_is_named() {
		let result =
			build_orchestrator_from_config(config("[delivery.implementations.evm_ws]")).await;
		let message = result.err().map(|e| e.to_string()).unwrap_or_default();
		assert!(message.contains("Unknown delivery implementation 'evm_ws'"));
		assert!(message.contains("evm_alloy, mock"));
	}
}
