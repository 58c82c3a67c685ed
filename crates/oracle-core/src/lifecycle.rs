//! Ball lifecycle state machine.
//!
//! One [`BallLifecycle`] drives the balls of one match contract. The local
//! phase of each ball is only a cache: every transition first re-reads the
//! on-chain phase, checks it against the transition table, and only then
//! submits. A confirmed receipt moves the cache to the target phase. A
//! reverted or timed out submission leaves it unknown, so the next caller
//! is forced to refresh before deciding anything.

use crate::state::{BallRecord, BallTransition};
use crate::OracleContext;
use alloy::sol_types::SolCall;
use dashmap::DashMap;
use oracle_delivery::{read_contract, DeliveryError};
use oracle_types::contracts::{ball_call_label, ICricketBettingGame};
use oracle_types::{
	Address, BallEvent, BallInfo, BallNumber, BallOutcome, BallPhase, BallState, ContractCall,
	InvalidBallNumber, MatchEvent, MatchHandle, OracleEvent, RejectReason, SubmissionKind,
	SubmissionResult, TransactionHash,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Errors raised before or outside a submission.
///
/// Ledger-side failures are not errors; they come back as a
/// [`TransitionResult`].
#[derive(Debug, Error)]
pub enum LifecycleError {
	#[error(transparent)]
	InvalidBall(#[from] InvalidBallNumber),
	#[error("Outcome {0} cannot be reported")]
	InvalidOutcome(BallOutcome),
	#[error("Network error: {0}")]
	Network(String),
	/// The contract returned data this oracle does not understand.
	#[error("Protocol mismatch: {0}")]
	ProtocolMismatch(String),
	/// A close confirmed but the report it owes could not be checkpointed.
	/// The ball is closed on-chain and no report was attempted.
	#[error("Ball {ball} closed in {close_tx} but its owed report could not be saved: {detail}")]
	OwedReportNotSaved {
		ball: BallNumber,
		close_tx: TransactionHash,
		outcome: BallOutcome,
		detail: String,
	},
	#[error("Storage error: {0}")]
	Storage(String),
}

fn read_error(e: DeliveryError) -> LifecycleError {
	match e {
		DeliveryError::Decode(detail) => LifecycleError::ProtocolMismatch(detail),
		other => LifecycleError::Network(other.to_string()),
	}
}

/// Why a transition did not take effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", rename_all = "camelCase")]
pub enum RevertCause {
	/// Mined with failed status.
	Ledger {
		tx_hash: TransactionHash,
		block_number: u64,
	},
	/// Closed on-chain, but never seen open, so there is no betting round
	/// to report on.
	NeverOpened,
	/// The refreshed phase does not allow the transition; nothing was sent.
	Precondition {
		required: Vec<BallPhase>,
		actual: BallPhase,
	},
}

/// Outcome of one lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum TransitionResult {
	Confirmed {
		ball: BallNumber,
		phase: BallPhase,
		submission: SubmissionResult,
	},
	Reverted {
		ball: BallNumber,
		cause: RevertCause,
	},
	/// No receipt was observed. The transaction may still land.
	TimedOut {
		ball: BallNumber,
		tx_hash: TransactionHash,
	},
	Rejected {
		ball: BallNumber,
		tx_hash: Option<TransactionHash>,
		reason: RejectReason,
	},
	/// Close confirmed but report did not. The ball is closed and unresolved
	/// on-chain and needs a report, not another close.
	PartialCompletion {
		ball: BallNumber,
		close_tx: TransactionHash,
		outcome: BallOutcome,
		report: Box<TransitionResult>,
	},
}

impl TransitionResult {
	pub fn ball(&self) -> BallNumber {
		match self {
			Self::Confirmed { ball, .. }
			| Self::Reverted { ball, .. }
			| Self::TimedOut { ball, .. }
			| Self::Rejected { ball, .. }
			| Self::PartialCompletion { ball, .. } => *ball,
		}
	}

	pub fn is_confirmed(&self) -> bool {
		matches!(self, Self::Confirmed { .. })
	}

	/// Whether this is a transport failure worth a fresh attempt.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::Rejected {
				reason: RejectReason::Network(_),
				..
			}
		)
	}

	/// Hash of the last transaction involved, if any.
	pub fn tx_hash(&self) -> Option<TransactionHash> {
		match self {
			Self::Confirmed { submission, .. } => submission.tx_hash(),
			Self::Reverted {
				cause: RevertCause::Ledger { tx_hash, .. },
				..
			} => Some(*tx_hash),
			Self::Reverted { .. } => None,
			Self::TimedOut { tx_hash, .. } => Some(*tx_hash),
			Self::Rejected { tx_hash, .. } => *tx_hash,
			Self::PartialCompletion {
				report, close_tx, ..
			} => report.tx_hash().or(Some(*close_tx)),
		}
	}

	pub fn label(&self) -> &'static str {
		match self {
			Self::Confirmed { .. } => "confirmed",
			Self::Reverted { .. } => "reverted",
			Self::TimedOut { .. } => "timed_out",
			Self::Rejected { .. } => "rejected",
			Self::PartialCompletion { .. } => "partial_completion",
		}
	}
}

/// Drives the balls of one match contract.
pub struct BallLifecycle {
	match_id: u64,
	game: Address,
	ctx: OracleContext,
	settle_delay: Duration,
	states: DashMap<BallNumber, BallState>,
}

impl BallLifecycle {
	/// `settle_delay` is waited between a confirmed close and its report.
	pub fn new(ctx: OracleContext, handle: &MatchHandle, settle_delay: Duration) -> Self {
		Self {
			match_id: handle.match_id,
			game: handle.contract_address,
			ctx,
			settle_delay,
			states: DashMap::new(),
		}
	}

	pub fn match_id(&self) -> u64 {
		self.match_id
	}

	pub fn game(&self) -> Address {
		self.game
	}

	/// Cached view of `ball`; `phase` is `None` until refreshed.
	pub fn state(&self, ball: BallNumber) -> BallState {
		self.states
			.get(&ball)
			.map(|s| s.clone())
			.unwrap_or_else(|| BallState::unknown(ball))
	}

	/// Reads `getBallInfo` for `ball`.
	pub async fn ball_info(&self, ball: u32) -> Result<BallInfo, LifecycleError> {
		self.read_ball(BallNumber::new(ball)?).await
	}

	/// Re-reads the on-chain phase of `ball` into the cache.
	pub async fn refresh(&self, ball: u32) -> Result<BallState, LifecycleError> {
		let ball = BallNumber::new(ball)?;
		let info = self.refresh_ball(ball).await?;
		Ok(BallState {
			ball,
			phase: Some(info.phase),
			outcome: info.outcome,
		})
	}

	/// Opens betting on `ball`. Requires the ball to be Closed.
	#[instrument(skip_all, fields(match_id = self.match_id, ball = ball))]
	pub async fn open(&self, ball: u32) -> Result<TransitionResult, LifecycleError> {
		let ball = BallNumber::new(ball)?;
		let call = self.game_call(
			ball_call_label("openBall", ball),
			ICricketBettingGame::openBallCall {
				ballNumber: ball.as_u256(),
			},
		);
		self.transition(ball, BallTransition::Open, call, None).await
	}

	/// Closes betting on `ball`. Requires the ball to be Open.
	#[instrument(skip_all, fields(match_id = self.match_id, ball = ball))]
	pub async fn close(&self, ball: u32) -> Result<TransitionResult, LifecycleError> {
		let ball = BallNumber::new(ball)?;
		self.close_ball(ball).await
	}

	/// Reports the result of a closed `ball`.
	#[instrument(skip_all, fields(match_id = self.match_id, ball = ball, outcome = %outcome))]
	pub async fn report(
		&self,
		ball: u32,
		outcome: BallOutcome,
	) -> Result<TransitionResult, LifecycleError> {
		let ball = BallNumber::new(ball)?;
		if !outcome.is_reportable() {
			return Err(LifecycleError::InvalidOutcome(outcome));
		}
		self.report_ball(ball, outcome).await
	}

	/// Closes `ball`, then reports `outcome` for it.
	///
	/// The report is only attempted once the close confirmed. When the close
	/// confirmed and the report did not, the result is `PartialCompletion`
	/// and the owed report is checkpointed. If that checkpoint cannot be
	/// written the report is not attempted and
	/// [`LifecycleError::OwedReportNotSaved`] is returned.
	#[instrument(skip_all, fields(match_id = self.match_id, ball = ball, outcome = %outcome))]
	pub async fn close_then_report(
		&self,
		ball: u32,
		outcome: BallOutcome,
	) -> Result<TransitionResult, LifecycleError> {
		let ball = BallNumber::new(ball)?;
		if !outcome.is_reportable() {
			return Err(LifecycleError::InvalidOutcome(outcome));
		}

		let close = self.close_ball(ball).await?;
		let close_tx = match &close {
			TransitionResult::Confirmed { submission, .. } => submission.tx_hash(),
			_ => None,
		};
		let Some(close_tx) = close_tx else {
			tracing::warn!(result = close.label(), "Close did not confirm, skipping report");
			return Ok(close);
		};

		if let Err(e) = self
			.ctx
			.store
			.update_ball_with(self.match_id, ball, |r| r.pending_report = Some(outcome))
			.await
		{
			tracing::error!(
				close_tx = %close_tx,
				error = %e,
				"Ball closed but owed report could not be checkpointed"
			);
			return Err(LifecycleError::OwedReportNotSaved {
				ball,
				close_tx,
				outcome,
				detail: e.to_string(),
			});
		}

		if !self.settle_delay.is_zero() {
			tokio::time::sleep(self.settle_delay).await;
		}

		let report = self.report_ball(ball, outcome).await?;
		if report.is_confirmed() {
			return Ok(report);
		}

		tracing::warn!(
			result = report.label(),
			"Ball closed but not resolved, report still owed"
		);
		self.ctx
			.events
			.publish(OracleEvent::Ball(BallEvent::PartiallyCompleted {
				match_id: self.match_id,
				ball,
				close_tx,
				pending_outcome: outcome,
			}))
			.ok();

		Ok(TransitionResult::PartialCompletion {
			ball,
			close_tx,
			outcome,
			report: Box::new(report),
		})
	}

	/// Cancels `ball` and triggers refunds. Valid from Closed or Open.
	#[instrument(skip_all, fields(match_id = self.match_id, ball = ball))]
	pub async fn cancel(&self, ball: u32, reason: &str) -> Result<TransitionResult, LifecycleError> {
		let ball = BallNumber::new(ball)?;
		let call = self.game_call(
			ball_call_label("cancelBall", ball),
			ICricketBettingGame::cancelBallCall {
				ballNumber: ball.as_u256(),
				reason: reason.to_string(),
			},
		);
		self.transition(ball, BallTransition::Cancel, call, None).await
	}

	/// Halts every further state change on the match contract.
	#[instrument(skip_all, fields(match_id = self.match_id))]
	pub async fn emergency_pause(&self) -> SubmissionResult {
		let call = self.game_call(
			"emergencyPause".to_string(),
			ICricketBettingGame::emergencyPauseCall {},
		);
		let result = self.ctx.pipeline.execute(&self.ctx.account, call).await;
		self.ctx
			.record_submission(Some(self.match_id), "emergencyPause", &result);

		if result.is_confirmed() {
			tracing::warn!("Match contract paused");
			self.ctx
				.events
				.publish(OracleEvent::Match(MatchEvent::Paused {
					match_id: self.match_id,
				}))
				.ok();
		}
		result
	}

	async fn close_ball(&self, ball: BallNumber) -> Result<TransitionResult, LifecycleError> {
		let call = self.game_call(
			ball_call_label("closeBall", ball),
			ICricketBettingGame::closeBallCall {
				ballNumber: ball.as_u256(),
			},
		);
		self.transition(ball, BallTransition::Close, call, None).await
	}

	async fn report_ball(
		&self,
		ball: BallNumber,
		outcome: BallOutcome,
	) -> Result<TransitionResult, LifecycleError> {
		let call = self.game_call(
			ball_call_label("reportBallResult", ball),
			ICricketBettingGame::reportBallResultCall {
				ballNumber: ball.as_u256(),
				outcome: outcome.code(),
			},
		);
		self.transition(ball, BallTransition::Report, call, Some(outcome))
			.await
	}

	fn game_call<C: SolCall>(&self, label: String, call: C) -> ContractCall {
		ContractCall::new(self.game, label, call.abi_encode())
	}

	async fn read_ball(&self, ball: BallNumber) -> Result<BallInfo, LifecycleError> {
		let info = read_contract(
			self.ctx.client.as_ref(),
			self.game,
			ICricketBettingGame::getBallInfoCall {
				ballNumber: ball.as_u256(),
			},
		)
		.await
		.map_err(read_error)?;

		let phase = BallPhase::from_code(info.state).ok_or_else(|| {
			LifecycleError::ProtocolMismatch(format!("unknown phase code {}", info.state))
		})?;
		let outcome = BallOutcome::from_code(info.result).ok_or_else(|| {
			LifecycleError::ProtocolMismatch(format!("unknown outcome code {}", info.result))
		})?;

		Ok(BallInfo {
			phase,
			outcome,
			total_pool: info.totalPool,
			outcome_pools: info.bets,
			bettor_count: info.bettorCount,
			distributed: info.distributed,
			refunded: info.refunded,
		})
	}

	async fn refresh_ball(&self, ball: BallNumber) -> Result<BallInfo, LifecycleError> {
		let info = self.read_ball(ball).await?;
		self.cache(ball, Some(info.phase), Some(info.outcome));

		let (phase, outcome) = (info.phase, info.outcome);
		self.checkpoint(ball, |r| {
			r.phase = Some(phase);
			r.outcome = outcome;
			r.opened |= phase == BallPhase::Open;
			if phase.is_terminal() {
				r.pending_report = None;
			}
		})
		.await;
		Ok(info)
	}

	fn cache(&self, ball: BallNumber, phase: Option<BallPhase>, outcome: Option<BallOutcome>) {
		let mut state = self
			.states
			.entry(ball)
			.or_insert_with(|| BallState::unknown(ball));
		state.phase = phase;
		if let Some(outcome) = outcome {
			state.outcome = outcome;
		}
	}

	async fn checkpoint<F>(&self, ball: BallNumber, updater: F)
	where
		F: FnOnce(&mut BallRecord),
	{
		// The ledger already holds the outcome; a lost checkpoint only costs a refresh
		if let Err(e) = self
			.ctx
			.store
			.update_ball_with(self.match_id, ball, updater)
			.await
		{
			tracing::warn!(ball = %ball, error = %e, "Failed to checkpoint ball");
		}
	}

	async fn transition(
		&self,
		ball: BallNumber,
		transition: BallTransition,
		call: ContractCall,
		reported: Option<BallOutcome>,
	) -> Result<TransitionResult, LifecycleError> {
		let current = match self.refresh_ball(ball).await {
			Ok(info) => info.phase,
			Err(LifecycleError::Network(detail)) => {
				tracing::warn!(error = %detail, "Phase refresh failed");
				return Ok(TransitionResult::Rejected {
					ball,
					tx_hash: None,
					reason: RejectReason::Network(detail),
				});
			},
			Err(e) => return Err(e),
		};

		if !transition.allowed_from(current) {
			tracing::info!(
				transition = %transition,
				phase = %current,
				"Transition not allowed from current phase"
			);
			return Ok(TransitionResult::Reverted {
				ball,
				cause: RevertCause::Precondition {
					required: transition.predecessors(),
					actual: current,
				},
			});
		}

		// A Closed ball that never opened looks the same on-chain as one
		// whose betting ended; only the checkpoint tells them apart
		if transition == BallTransition::Report && !self.was_opened(ball).await? {
			tracing::info!(phase = %current, "Ball was never seen open, not reporting");
			return Ok(TransitionResult::Reverted {
				ball,
				cause: RevertCause::NeverOpened,
			});
		}

		let function = call.function.clone();
		let result = self.ctx.pipeline.execute(&self.ctx.account, call).await;
		self.ctx
			.record_submission(Some(self.match_id), &function, &result);

		let kind = result.kind();
		let tx_hash = result.tx_hash();

		match result {
			SubmissionResult::Confirmed { .. } => {
				let target = transition.target();
				self.cache(ball, Some(target), reported);
				self.checkpoint(ball, |r| {
					r.phase = Some(target);
					r.opened |= target == BallPhase::Open;
					if let Some(outcome) = reported {
						r.outcome = outcome;
					}
					if target.is_terminal() {
						r.pending_report = None;
					}
					r.last_tx = tx_hash;
					r.last_result = Some(kind);
				})
				.await;

				tracing::info!(phase = %target, "Ball transition confirmed");
				self.ctx
					.events
					.publish(OracleEvent::Ball(BallEvent::PhaseChanged {
						match_id: self.match_id,
						ball,
						from: Some(current),
						to: target,
					}))
					.ok();

				Ok(TransitionResult::Confirmed {
					ball,
					phase: target,
					submission: result,
				})
			},
			SubmissionResult::Reverted {
				tx_hash, receipt, ..
			} => {
				tracing::warn!(block = receipt.block_number, "Ball transition reverted");
				self.forget_phase(ball, Some(tx_hash), kind).await;
				Ok(TransitionResult::Reverted {
					ball,
					cause: RevertCause::Ledger {
						tx_hash,
						block_number: receipt.block_number,
					},
				})
			},
			SubmissionResult::TimedOut { tx_hash, .. } => {
				tracing::warn!(tx_hash = %tx_hash, "Ball transition not observed, phase unknown");
				self.forget_phase(ball, Some(tx_hash), kind).await;
				self.ctx
					.events
					.publish(OracleEvent::Ball(BallEvent::Ambiguous {
						match_id: self.match_id,
						ball,
						tx_hash,
					}))
					.ok();
				Ok(TransitionResult::TimedOut { ball, tx_hash })
			},
			SubmissionResult::Rejected { tx_hash, reason } => {
				tracing::warn!(reason = %reason, "Ball transition rejected");
				self.forget_phase(ball, tx_hash, kind).await;
				Ok(TransitionResult::Rejected {
					ball,
					tx_hash,
					reason,
				})
			},
		}
	}

	async fn was_opened(&self, ball: BallNumber) -> Result<bool, LifecycleError> {
		let record = self
			.ctx
			.store
			.load_ball(self.match_id, ball)
			.await
			.map_err(|e| LifecycleError::Storage(e.to_string()))?;
		Ok(record.is_some_and(|r| r.is_reportable()))
	}

	/// Records a failed submission. Anything that was broadcast may have
	/// moved the phase, so the cached phase is dropped in that case.
	async fn forget_phase(
		&self,
		ball: BallNumber,
		tx_hash: Option<TransactionHash>,
		kind: SubmissionKind,
	) {
		let broadcast = tx_hash.is_some();
		if broadcast {
			self.cache(ball, None, None);
		}
		self.checkpoint(ball, |r| {
			if broadcast {
				r.phase = None;
			}
			r.last_tx = tx_hash.or(r.last_tx);
			r.last_result = Some(kind);
		})
		.await;
	}
}
