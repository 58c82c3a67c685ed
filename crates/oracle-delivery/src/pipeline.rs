//! Submission pipeline: build, sign, submit, await.
//!
//! Each account has one nonce cursor behind an async mutex. Acquiring a
//! nonce, signing and broadcasting happen inside that critical section, so
//! concurrent executions for one account get gap-free, strictly increasing
//! nonces. Waiting for the receipt happens after the lock is released.
//! Different accounts never contend.
//!
//! The pipeline never retries. Whether a `Rejected` or `TimedOut` result is
//! worth a fresh attempt is the caller's decision.

use crate::{ChainClient, DeliveryError, SubmissionOptions, TransactionBuilder};
use dashmap::DashMap;
use oracle_account::AccountService;
use oracle_types::{truncate_id, Address, ContractCall, RejectReason, SubmissionResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Next nonce this process expects to issue for an account.
///
/// Only a floor over the ledger's pending nonce. `None` means the ledger is
/// trusted as is.
#[derive(Debug, Default)]
struct NonceCursor {
	next: Option<u64>,
}

/// Executes contract calls as single ledger transactions.
pub struct SubmissionPipeline {
	client: Arc<dyn ChainClient>,
	builder: TransactionBuilder,
	nonces: DashMap<Address, Arc<Mutex<NonceCursor>>>,
	defaults: SubmissionOptions,
}

impl SubmissionPipeline {
	pub fn new(
		client: Arc<dyn ChainClient>,
		builder: TransactionBuilder,
		defaults: SubmissionOptions,
	) -> Self {
		Self {
			client,
			builder,
			nonces: DashMap::new(),
			defaults,
		}
	}

	pub fn client(&self) -> &Arc<dyn ChainClient> {
		&self.client
	}

	pub fn defaults(&self) -> &SubmissionOptions {
		&self.defaults
	}

	/// Executes `call` from `account` with the default wait options.
	pub async fn execute(&self, account: &AccountService, call: ContractCall) -> SubmissionResult {
		self.execute_with(account, call, &self.defaults).await
	}

	/// Executes `call` from `account`, waiting for its receipt per `options`.
	///
	/// Exactly one broadcast happens per call, unless the build or signing
	/// step fails first, in which case nothing is broadcast.
	#[instrument(skip_all, fields(function = %call.function))]
	pub async fn execute_with(
		&self,
		account: &AccountService,
		call: ContractCall,
		options: &SubmissionOptions,
	) -> SubmissionResult {
		let from = match account.get_address().await {
			Ok(address) => address,
			Err(e) => {
				return SubmissionResult::Rejected {
					tx_hash: None,
					reason: RejectReason::Signing(e.to_string()),
				}
			},
		};

		let cursor = self
			.nonces
			.entry(from)
			.or_insert_with(|| Arc::new(Mutex::new(NonceCursor::default())))
			.clone();

		let (tx_hash, nonce) = {
			let mut cursor = cursor.lock().await;

			let pending = match self.builder.build(from, &call, cursor.next).await {
				Ok(pending) => pending,
				Err(DeliveryError::Estimation(detail)) => {
					tracing::warn!(error = %detail, "Estimation failed, not submitting");
					return SubmissionResult::Rejected {
						tx_hash: None,
						reason: RejectReason::Estimation(detail),
					};
				},
				Err(e) => {
					return SubmissionResult::Rejected {
						tx_hash: None,
						reason: RejectReason::Network(e.to_string()),
					}
				},
			};

			let signed = match account.sign(&pending).await {
				Ok(signed) => signed,
				Err(e) => {
					return SubmissionResult::Rejected {
						tx_hash: None,
						reason: RejectReason::Signing(e.to_string()),
					}
				},
			};

			match self.client.submit(&signed).await {
				Ok(_) => {},
				Err(DeliveryError::Refused(detail)) => {
					// A stale nonce is the usual cause; trust the ledger next time
					tracing::warn!(nonce = pending.nonce, error = %detail, "Broadcast refused");
					cursor.next = None;
					return SubmissionResult::Rejected {
						tx_hash: None,
						reason: RejectReason::Refused(detail),
					};
				},
				Err(e) => {
					// Cursor stays put; the next build re-reads the ledger nonce
					tracing::warn!(nonce = pending.nonce, error = %e, "Broadcast failed");
					return SubmissionResult::Rejected {
						tx_hash: Some(signed.hash),
						reason: RejectReason::Network(e.to_string()),
					};
				},
			}

			cursor.next = Some(pending.nonce + 1);
			(signed.hash, pending.nonce)
		};

		tracing::info!(
			nonce,
			tx_hash = %truncate_id(&tx_hash.to_string()),
			"Submitted transaction"
		);

		match self.client.wait_for_receipt(&tx_hash, options).await {
			Ok(receipt) if receipt.success => {
				tracing::info!(
					block = receipt.block_number,
					gas_used = receipt.gas_used,
					"Transaction confirmed"
				);
				SubmissionResult::Confirmed {
					tx_hash,
					nonce,
					receipt,
				}
			},
			Ok(receipt) => {
				tracing::warn!(block = receipt.block_number, "Transaction reverted");
				SubmissionResult::Reverted {
					tx_hash,
					nonce,
					receipt,
				}
			},
			Err(e) => {
				// Broadcast happened; the transaction may still land. If the
				// mempool dropped it instead, the ledger's pending nonce falls
				// back to `nonce` and a local floor above it would never mine.
				tracing::warn!(error = %e, "No receipt observed");
				self.reset_nonce(from).await;
				SubmissionResult::TimedOut { tx_hash, nonce }
			},
		}
	}

	/// Forgets the local nonce cursor for `address`.
	///
	/// The next build uses the ledger's pending nonce as is. Called whenever
	/// a broadcast transaction went unobserved, since a dropped one would
	/// otherwise leave a gap below the cursor.
	pub async fn reset_nonce(&self, address: Address) {
		if let Some(cursor) = self.nonces.get(&address).map(|c| c.clone()) {
			cursor.lock().await.next = None;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::mock::{Fault, MockLedger};
	use crate::FeePolicy;
	use alloy::sol_types::SolCall;
	use oracle_account::implementations::local::LocalWallet;
	use oracle_types::contracts::ICricketBettingFactory;
	use oracle_types::{SecretString, SubmissionKind, U256};
	use std::collections::HashSet;
	use std::time::Duration;

	const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

	fn account(key: &str) -> AccountService {
		AccountService::new(Box::new(LocalWallet::new(&SecretString::from(key)).unwrap()))
	}

	fn fast_options() -> SubmissionOptions {
		SubmissionOptions {
			timeout: Duration::from_millis(50),
			poll_interval: Duration::from_millis(5),
			confirmations: 1,
		}
	}

	fn setup(ledger: Arc<MockLedger>) -> SubmissionPipeline {
		let builder = TransactionBuilder::new(ledger.clone(), FeePolicy::estimated(2.0).unwrap());
		SubmissionPipeline::new(ledger, builder, fast_options())
	}

	fn create_call(ledger: &MockLedger, match_id: u64) -> ContractCall {
		let data = ICricketBettingFactory::createGameCall {
			teamA: "RCB".into(),
			teamB: "CSK".into(),
			matchId: U256::from(match_id),
		}
		.abi_encode();
		ContractCall::new(ledger.factory(), format!("createGame({})", match_id), data)
	}

	#[tokio::test]
	async fn test_confirmed_execution() {
		let ledger = Arc::new(MockLedger::new(31337, Address::repeat_byte(0xfa)));
		let pipeline = setup(ledger.clone());
		let account = account(DEV_KEY);

		let result = pipeline.execute(&account, create_call(&ledger, 1)).await;

		assert_eq!(result.kind(), SubmissionKind::Confirmed);
		let receipt = result.receipt().unwrap();
		assert!(receipt.success);
		assert!(!receipt.logs.is_empty());
		assert_eq!(ledger.submissions("createGame").await, 1);
	}

	#[tokio::test]
	async fn test_classifies_each_failure() {
		let ledger = Arc::new(MockLedger::new(31337, Address::repeat_byte(0xfa)));
		let pipeline = setup(ledger.clone());
		let account = account(DEV_KEY);

		ledger.inject("createGame", Fault::Revert, Some(1)).await;
		let reverted = pipeline.execute(&account, create_call(&ledger, 1)).await;
		assert_eq!(reverted.kind(), SubmissionKind::Reverted);
		assert!(reverted.block_number().is_some());

		ledger.inject("createGame", Fault::Timeout, Some(1)).await;
		let timed_out = pipeline.execute(&account, create_call(&ledger, 2)).await;
		assert_eq!(timed_out.kind(), SubmissionKind::TimedOut);
		assert!(timed_out.tx_hash().is_some());

		ledger.inject("createGame", Fault::Network, Some(1)).await;
		let rejected = pipeline.execute(&account, create_call(&ledger, 3)).await;
		assert!(matches!(
			rejected,
			SubmissionResult::Rejected {
				reason: RejectReason::Network(_),
				..
			}
		));

		ledger.inject("createGame", Fault::Estimation, Some(1)).await;
		let not_sent = pipeline.execute(&account, create_call(&ledger, 4)).await;
		assert!(matches!(
			not_sent,
			SubmissionResult::Rejected {
				tx_hash: None,
				reason: RejectReason::Estimation(_)
			}
		));

		// Network and estimation failures consumed no nonce
		let ok = pipeline.execute(&account, create_call(&ledger, 5)).await;
		assert!(ok.is_confirmed());
		let from = account.get_address().await.unwrap();
		assert_eq!(ledger.submitted_nonces(from).await, vec![0, 1, 2]);
	}

	#[tokio::test]
	async fn test_dropped_transaction_nonce_is_reused() {
		let ledger = Arc::new(MockLedger::new(31337, Address::repeat_byte(0xfa)));
		let pipeline = setup(ledger.clone());
		let account = account(DEV_KEY);
		let from = account.get_address().await.unwrap();

		assert!(pipeline.execute(&account, create_call(&ledger, 1)).await.is_confirmed());

		// Evicted from the mempool: the ledger never advances past nonce 1
		ledger.inject("createGame", Fault::Drop, Some(1)).await;
		let dropped = pipeline.execute(&account, create_call(&ledger, 2)).await;
		assert!(matches!(dropped, SubmissionResult::TimedOut { nonce: 1, .. }));
		assert_eq!(ledger.get_nonce(from).await.unwrap(), 1);

		let next = pipeline.execute(&account, create_call(&ledger, 3)).await;
		assert!(matches!(next, SubmissionResult::Confirmed { nonce: 1, .. }));
		let again = pipeline.execute(&account, create_call(&ledger, 4)).await;
		assert!(matches!(again, SubmissionResult::Confirmed { nonce: 2, .. }));
		assert_eq!(ledger.submitted_nonces(from).await, vec![0, 1, 1, 2]);
	}

	#[tokio::test]
	async fn test_refused_broadcast_is_not_retryable_network() {
		let ledger = Arc::new(MockLedger::new(31337, Address::repeat_byte(0xfa)));
		let pipeline = setup(ledger.clone());
		let account = account(DEV_KEY);

		ledger.inject("createGame", Fault::Refuse, Some(1)).await;
		let refused = pipeline.execute(&account, create_call(&ledger, 1)).await;
		assert!(matches!(
			refused,
			SubmissionResult::Rejected {
				tx_hash: None,
				reason: RejectReason::Refused(_),
			}
		));
		assert_eq!(ledger.submissions("createGame").await, 0);

		let ok = pipeline.execute(&account, create_call(&ledger, 1)).await;
		assert!(matches!(ok, SubmissionResult::Confirmed { nonce: 0, .. }));
	}

	#[tokio::test]
	async fn test_concurrent_executions_get_gap_free_nonces() {
		let ledger = Arc::new(
			MockLedger::new(31337, Address::repeat_byte(0xfa)).with_latency(Duration::from_millis(2)),
		);
		let pipeline = setup(ledger.clone());
		let account = account(DEV_KEY);
		let n = 12u64;

		let results = futures::future::join_all(
			(0..n).map(|i| pipeline.execute(&account, create_call(&ledger, 100 + i))),
		)
		.await;

		assert!(results.iter().all(SubmissionResult::is_confirmed));

		let from = account.get_address().await.unwrap();
		let nonces = ledger.submitted_nonces(from).await;
		assert_eq!(nonces, (0..n).collect::<Vec<_>>());

		let hashes: HashSet<_> = results.iter().filter_map(SubmissionResult::tx_hash).collect();
		assert_eq!(hashes.len(), n as usize);
	}

	#[tokio::test]
	async fn test_accounts_do_not_share_nonces() {
		let ledger = Arc::new(MockLedger::new(31337, Address::repeat_byte(0xfa)));
		let pipeline = setup(ledger.clone());
		let first = account(DEV_KEY);
		let second = account(OTHER_KEY);

		let (a, b) = tokio::join!(
			pipeline.execute(&first, create_call(&ledger, 1)),
			pipeline.execute(&second, create_call(&ledger, 2)),
		);
		assert!(a.is_confirmed() && b.is_confirmed());

		let a_from = first.get_address().await.unwrap();
		let b_from = second.get_address().await.unwrap();
		assert_eq!(ledger.submitted_nonces(a_from).await, vec![0]);
		assert_eq!(ledger.submitted_nonces(b_from).await, vec![0]);
	}
}
