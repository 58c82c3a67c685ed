//! Core orchestration for the cricket oracle.
//!
//! The [`lifecycle::BallLifecycle`] drives single balls through
//! Closed -> Open -> (Resolved | Cancelled), refreshing the on-chain phase
//! before every transition. The [`orchestrator::MatchOrchestrator`] creates
//! matches and composes ball lifecycles into paced, resumable sequences.
//! Both are built around an explicitly passed [`OracleContext`] holding the
//! chain client, submission pipeline, signing account, checkpoint store and
//! event bus for one orchestrator instance.

use oracle_account::AccountService;
use oracle_delivery::{ChainClient, SubmissionPipeline};
use oracle_types::{Address, OracleEvent, SubmissionRecord, SubmissionResult};
use std::sync::Arc;

pub mod builder;
pub mod event_bus;
pub mod lifecycle;
pub mod orchestrator;
pub mod outcome;
pub mod recovery;
pub mod state;

pub use builder::{BuilderError, OracleBuilder, OracleFactories};
pub use event_bus::EventBus;
pub use lifecycle::{BallLifecycle, LifecycleError, RevertCause, TransitionResult};
pub use orchestrator::{
	MatchOrchestrator, OrchestratorError, OwedReport, SequenceSummary, FUNDING_GAS_LIMIT,
};
pub use outcome::{FixedOutcomes, OutcomeSource, RandomOutcomes};
pub use recovery::{RecoveryError, RecoveryReport, RecoveryService};
pub use state::MatchStore;

/// Everything an orchestrator instance acts through.
///
/// Cloning is cheap; clones share the same pipeline, so nonce
/// serialization for the account holds across them.
#[derive(Clone)]
pub struct OracleContext {
	pub client: Arc<dyn ChainClient>,
	pub pipeline: Arc<SubmissionPipeline>,
	pub account: Arc<AccountService>,
	pub store: Arc<MatchStore>,
	pub events: EventBus,
	/// Address of the match factory contract.
	pub factory: Address,
}

impl OracleContext {
	/// Publishes the record of one pipeline execution.
	pub(crate) fn record_submission(
		&self,
		match_id: Option<u64>,
		function: &str,
		result: &SubmissionResult,
	) {
		let record = SubmissionRecord {
			match_id,
			function: function.to_string(),
			outcome: result.kind(),
			tx_hash: result.tx_hash(),
			block_number: result.block_number(),
			events: result
				.receipt()
				.map(|r| oracle_types::decode_match_events(&r.logs))
				.unwrap_or_default(),
			error: match result {
				SubmissionResult::Rejected { reason, .. } => Some(reason.to_string()),
				SubmissionResult::Reverted { .. } => Some("execution reverted".to_string()),
				SubmissionResult::TimedOut { .. } => Some("no receipt before timeout".to_string()),
				SubmissionResult::Confirmed { .. } => None,
			},
		};
		self.events.publish(OracleEvent::Submission(record)).ok();
	}
}

#[cfg(test)]
pub(crate) mod test_utils {
	use super::*;
	use alloy::sol_types::SolCall;
	use oracle_account::implementations::local::LocalWallet;
	use oracle_delivery::implementations::mock::MockLedger;
	use oracle_delivery::{FeePolicy, SubmissionOptions, TransactionBuilder};
	use oracle_storage::implementations::memory::MemoryStorage;
	use oracle_storage::StorageService;
	use oracle_types::contracts::{find_created_game, ICricketBettingFactory};
	use oracle_types::{ContractCall, MatchHandle, SecretString, U256};
	use std::time::Duration;

	pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	pub fn factory() -> Address {
		Address::repeat_byte(0xfa)
	}

	/// Context over a fresh mock ledger and in-memory storage.
	pub fn context() -> (OracleContext, Arc<MockLedger>) {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		context_with_storage(storage)
	}

	pub fn context_with_storage(storage: Arc<StorageService>) -> (OracleContext, Arc<MockLedger>) {
		let ledger = Arc::new(MockLedger::new(31337, factory()));
		(context_on(ledger.clone(), storage), ledger)
	}

	/// Context sharing an existing ledger, as a restarted process would.
	pub fn context_on(ledger: Arc<MockLedger>, storage: Arc<StorageService>) -> OracleContext {
		let client: Arc<dyn ChainClient> = ledger;
		let builder = TransactionBuilder::new(client.clone(), FeePolicy::estimated(2.0).unwrap());
		let options = SubmissionOptions {
			timeout: Duration::from_millis(40),
			poll_interval: Duration::from_millis(5),
			confirmations: 1,
		};
		let wallet = LocalWallet::new(&SecretString::from(DEV_KEY)).unwrap();

		OracleContext {
			pipeline: Arc::new(SubmissionPipeline::new(client.clone(), builder, options)),
			client,
			account: Arc::new(AccountService::new(Box::new(wallet))),
			store: Arc::new(MatchStore::new(storage)),
			events: EventBus::new(256),
			factory: factory(),
		}
	}

	/// Deploys an RCB vs CSK game through the pipeline.
	pub async fn deploy(ctx: &OracleContext, match_id: u64) -> MatchHandle {
		let call = ICricketBettingFactory::createGameCall {
			teamA: "RCB".into(),
			teamB: "CSK".into(),
			matchId: U256::from(match_id),
		};
		let result = ctx
			.pipeline
			.execute(
				&ctx.account,
				ContractCall::new(ctx.factory, "createGame", call.abi_encode()),
			)
			.await;
		let receipt = result.receipt().expect("createGame confirmed");
		let game = find_created_game(&receipt.logs, ctx.factory).expect("GameCreated emitted");
		MatchHandle::new(match_id, "RCB", "CSK", game)
	}
}
