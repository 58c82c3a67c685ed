//! Transaction building.
//!
//! Nonce and gas price are fetched from the chain client on every build;
//! both go stale within a few blocks so nothing here is cached.

use crate::{ChainClient, DeliveryError};
use oracle_types::{Address, ContractCall, PendingTransaction};
use std::sync::Arc;

/// Smallest multiplier applied over a gas estimate.
pub const MIN_GAS_MULTIPLIER: f64 = 1.5;

/// How the gas limit of a transaction is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeePolicy {
	gas_multiplier: f64,
	gas_limit: Option<u64>,
}

impl FeePolicy {
	/// Estimates every call and scales the estimate by `gas_multiplier`.
	pub fn estimated(gas_multiplier: f64) -> Result<Self, DeliveryError> {
		if !(gas_multiplier >= MIN_GAS_MULTIPLIER) {
			return Err(DeliveryError::Configuration(format!(
				"gas multiplier must be at least {}, got {}",
				MIN_GAS_MULTIPLIER, gas_multiplier
			)));
		}
		Ok(Self {
			gas_multiplier,
			gas_limit: None,
		})
	}

	/// Uses `gas_limit` for every call that does not carry its own.
	pub fn with_fixed_limit(mut self, gas_limit: Option<u64>) -> Self {
		self.gas_limit = gas_limit;
		self
	}

	pub fn gas_multiplier(&self) -> f64 {
		self.gas_multiplier
	}

	/// Gas limit for an estimate, rounded up.
	pub fn apply(&self, estimate: u64) -> u64 {
		(estimate as f64 * self.gas_multiplier).ceil() as u64
	}
}

/// Produces unsigned transactions from contract calls.
pub struct TransactionBuilder {
	client: Arc<dyn ChainClient>,
	policy: FeePolicy,
}

impl TransactionBuilder {
	pub fn new(client: Arc<dyn ChainClient>, policy: FeePolicy) -> Self {
		Self { client, policy }
	}

	pub fn policy(&self) -> &FeePolicy {
		&self.policy
	}

	/// Builds a transaction for `call` sent from `from`.
	///
	/// The nonce is the ledger's pending nonce, raised to `min_nonce` when
	/// the caller already issued higher nonces the ledger has not seen yet.
	/// The gas limit comes from the call, then the policy's fixed limit, then
	/// a scaled estimate. A reverting estimate is returned as
	/// `DeliveryError::Estimation` and nothing is built.
	pub async fn build(
		&self,
		from: Address,
		call: &ContractCall,
		min_nonce: Option<u64>,
	) -> Result<PendingTransaction, DeliveryError> {
		let gas_limit = match call.gas_limit.or(self.policy.gas_limit) {
			Some(limit) => limit,
			None => {
				let estimate = self.client.estimate_gas(from, call).await?;
				self.policy.apply(estimate)
			},
		};

		let chain_nonce = self.client.get_nonce(from).await?;
		let nonce = min_nonce.map_or(chain_nonce, |floor| chain_nonce.max(floor));
		let gas_price = self.client.get_gas_price().await?;

		tracing::debug!(
			function = %call.function,
			nonce,
			gas_limit,
			gas_price,
			"Built transaction"
		);

		Ok(PendingTransaction {
			chain_id: self.client.chain_id(),
			from,
			to: call.to,
			data: call.data.clone(),
			value: call.value,
			nonce,
			gas_price,
			gas_limit,
			function: call.function.clone(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::mock::{Fault, MockLedger};
	use oracle_types::contracts::ICricketBettingFactory;
	use alloy::sol_types::SolCall;

	fn create_call(factory: Address) -> ContractCall {
		let data = ICricketBettingFactory::createGameCall {
			teamA: "RCB".into(),
			teamB: "CSK".into(),
			matchId: oracle_types::U256::from(1u64),
		}
		.abi_encode();
		ContractCall::new(factory, "createGame", data)
	}

	#[test]
	fn test_policy_rejects_low_multiplier() {
		assert!(FeePolicy::estimated(1.2).is_err());
		assert!(FeePolicy::estimated(f64::NAN).is_err());
		let policy = FeePolicy::estimated(1.5).unwrap();
		assert_eq!(policy.apply(100_001), 150_002);
	}

	#[tokio::test]
	async fn test_build_scales_estimate() {
		let ledger = Arc::new(MockLedger::new(31337, Address::repeat_byte(0xfa)));
		let builder = TransactionBuilder::new(ledger.clone(), FeePolicy::estimated(2.0).unwrap());
		let from = Address::repeat_byte(0x01);

		let tx = builder
			.build(from, &create_call(ledger.factory()), None)
			.await
			.unwrap();

		assert_eq!(tx.gas_limit, ledger.gas_estimate() * 2);
		assert_eq!(tx.nonce, 0);
		assert_eq!(tx.chain_id, 31337);
		assert_eq!(tx.gas_price, ledger.gas_price());
	}

	#[tokio::test]
	async fn test_fixed_limit_skips_estimation() {
		let ledger = Arc::new(MockLedger::new(31337, Address::repeat_byte(0xfa)));
		ledger.inject("createGame", Fault::Estimation, None).await;
		let policy = FeePolicy::estimated(2.0)
			.unwrap()
			.with_fixed_limit(Some(300_000));
		let builder = TransactionBuilder::new(ledger.clone(), policy);

		let tx = builder
			.build(Address::repeat_byte(0x01), &create_call(ledger.factory()), Some(5))
			.await
			.unwrap();

		assert_eq!(tx.gas_limit, 300_000);
		assert_eq!(tx.nonce, 5);
		assert_eq!(ledger.estimations("createGame").await, 0);
	}

	#[tokio::test]
	async fn test_estimation_failure_surfaces() {
		let ledger = Arc::new(MockLedger::new(31337, Address::repeat_byte(0xfa)));
		ledger.inject("createGame", Fault::Estimation, None).await;
		let builder = TransactionBuilder::new(ledger.clone(), FeePolicy::estimated(2.0).unwrap());

		let result = builder
			.build(Address::repeat_byte(0x01), &create_call(ledger.factory()), None)
			.await;
		assert!(matches!(result, Err(DeliveryError::Estimation(_))));
	}
}
