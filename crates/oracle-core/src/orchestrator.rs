//! Match orchestration.
//!
//! The [`MatchOrchestrator`] deploys game contracts and runs ball sequences
//! over them: open, wait out the betting window, close, report, pace, next.
//! A sequence halts without rolling anything back on the first failure it
//! cannot classify as partial or retry away, and returns a summary saying
//! exactly which balls completed, which are owed a report, which are
//! ambiguous and which failed.

use crate::lifecycle::{BallLifecycle, LifecycleError, RevertCause, TransitionResult};
use crate::outcome::OutcomeSource;
use crate::recovery::{RecoveryError, RecoveryReport, RecoveryService};
use crate::state::StoreError;
use crate::OracleContext;
use alloy::sol_types::SolCall;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use oracle_config::{PartialCompletionPolicy, SequenceConfig};
use oracle_delivery::{read_contract, DeliveryError};
use oracle_types::contracts::{find_created_game, ICricketBettingFactory, ICricketBettingGame};
use oracle_types::{
	Address, BallInfo, BallNumber, BallOutcome, BallPhase, ContractCall, InvalidBallNumber,
	MatchEvent, MatchHandle, MatchInfo, OracleEvent, SubmissionResult, MAX_BALLS, U256,
};
use serde::Serialize;
use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;

/// Gas limit for plain value transfers from the oracle account.
pub const FUNDING_GAS_LIMIT: u64 = 100_000;

#[derive(Debug, Error)]
pub enum OrchestratorError {
	/// `createGame` did not confirm.
	#[error("Match creation failed: {}", .0.kind())]
	Creation(Box<SubmissionResult>),
	/// A confirmed receipt or a read is missing what the contract should
	/// return. Not retryable.
	#[error("Protocol mismatch: {0}")]
	ProtocolMismatch(String),
	#[error(transparent)]
	InvalidBall(#[from] InvalidBallNumber),
	#[error("Invalid ball range {start}..={end}")]
	InvalidRange { start: u32, end: u32 },
	#[error("Lifecycle error: {0}")]
	Lifecycle(LifecycleError),
	#[error("Network error: {0}")]
	Network(String),
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Match {0} not found")]
	MatchNotFound(u64),
	#[error("Account error: {0}")]
	Account(String),
}

impl From<LifecycleError> for OrchestratorError {
	fn from(e: LifecycleError) -> Self {
		match e {
			LifecycleError::ProtocolMismatch(detail) => Self::ProtocolMismatch(detail),
			LifecycleError::InvalidBall(e) => Self::InvalidBall(e),
			LifecycleError::Storage(detail) => Self::Storage(detail),
			other => Self::Lifecycle(other),
		}
	}
}

impl From<StoreError> for OrchestratorError {
	fn from(e: StoreError) -> Self {
		Self::Storage(e.to_string())
	}
}

impl From<RecoveryError> for OrchestratorError {
	fn from(e: RecoveryError) -> Self {
		match e {
			RecoveryError::MatchNotFound(id) => Self::MatchNotFound(id),
			RecoveryError::Storage(detail) => Self::Storage(detail),
			RecoveryError::Reconcile { source, .. } => source.into(),
		}
	}
}

fn read_error(e: DeliveryError) -> OrchestratorError {
	match e {
		DeliveryError::Decode(detail) => OrchestratorError::ProtocolMismatch(detail),
		other => OrchestratorError::Network(other.to_string()),
	}
}

/// A closed ball whose report has not confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwedReport {
	pub ball: BallNumber,
	pub outcome: BallOutcome,
	/// Result of the most recent report attempt.
	pub last_attempt: TransitionResult,
}

/// What a sequence run achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceSummary {
	pub match_id: u64,
	/// Balls resolved by this run.
	pub completed: Vec<BallNumber>,
	/// Balls closed on-chain that still need a report.
	pub partial: Vec<OwedReport>,
	/// Balls whose last submission was never observed.
	pub ambiguous: Vec<TransitionResult>,
	/// Balls already terminal before this run reached them.
	pub skipped: Vec<BallNumber>,
	/// The failure the run halted on, if any.
	pub failed: Option<TransitionResult>,
	/// Stopped by the caller or because outcomes ran out.
	pub stopped: bool,
	/// Match cursor when the run ended.
	pub cursor: u32,
}

impl SequenceSummary {
	fn new(match_id: u64) -> Self {
		Self {
			match_id,
			completed: Vec::new(),
			partial: Vec::new(),
			ambiguous: Vec::new(),
			skipped: Vec::new(),
			failed: None,
			stopped: false,
			cursor: 0,
		}
	}

	/// Every ball of the range ended terminal.
	pub fn is_clean(&self) -> bool {
		self.is_settled() && !self.stopped
	}

	/// Nothing failed and no ball was left owing a report or in an unknown
	/// phase. A run that stopped early can still be settled.
	pub fn is_settled(&self) -> bool {
		self.partial.is_empty() && self.ambiguous.is_empty() && self.failed.is_none()
	}
}

/// Next step for one ball, decided from the checkpoint and a fresh read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BallPlan {
	Skip,
	Full,
	CloseAndReport(Option<BallOutcome>),
	ReportOnly(BallOutcome),
}

enum Flow {
	Continue,
	Halt(String),
}

/// Creates matches and runs ball sequences against them.
pub struct MatchOrchestrator {
	ctx: OracleContext,
	sequence: SequenceConfig,
	stop: watch::Sender<bool>,
}

impl MatchOrchestrator {
	pub fn new(ctx: OracleContext, sequence: SequenceConfig) -> Self {
		let (stop, _) = watch::channel(false);
		Self {
			ctx,
			sequence,
			stop,
		}
	}

	pub fn context(&self) -> &OracleContext {
		&self.ctx
	}

	pub fn sequence_config(&self) -> &SequenceConfig {
		&self.sequence
	}

	/// Stops running sequences before their next ball. Sticky.
	///
	/// A submission already broadcast is owned by the ledger and is still
	/// awaited; only the scheduling of later steps is prevented.
	pub fn stop(&self) {
		tracing::info!("Stop requested");
		self.stop.send_replace(true);
	}

	pub fn is_stopped(&self) -> bool {
		*self.stop.borrow()
	}

	/// Lifecycle driver for the balls of `handle`.
	pub fn lifecycle(&self, handle: &MatchHandle) -> BallLifecycle {
		BallLifecycle::new(
			self.ctx.clone(),
			handle,
			Duration::from_millis(self.sequence.settle_delay_ms),
		)
	}

	/// Stored handle of `match_id`.
	pub async fn handle(&self, match_id: u64) -> Result<MatchHandle, OrchestratorError> {
		self.ctx
			.store
			.load_match(match_id)
			.await?
			.map(|record| record.handle)
			.ok_or(OrchestratorError::MatchNotFound(match_id))
	}

	/// Deploys a game contract for a match through the factory.
	#[instrument(skip_all, fields(match_id = match_id))]
	pub async fn create_match(
		&self,
		team_a: &str,
		team_b: &str,
		match_id: u64,
	) -> Result<MatchHandle, OrchestratorError> {
		let call = ICricketBettingFactory::createGameCall {
			teamA: team_a.to_string(),
			teamB: team_b.to_string(),
			matchId: U256::from(match_id),
		};
		let result = self
			.ctx
			.pipeline
			.execute(
				&self.ctx.account,
				ContractCall::new(self.ctx.factory, "createGame", call.abi_encode()),
			)
			.await;
		self.ctx
			.record_submission(Some(match_id), "createGame", &result);

		if !result.is_confirmed() {
			tracing::warn!(result = %result.kind(), "Match creation did not confirm");
			return Err(OrchestratorError::Creation(Box::new(result)));
		}

		let game = result
			.receipt()
			.and_then(|receipt| find_created_game(&receipt.logs, self.ctx.factory))
			.ok_or_else(|| {
				OrchestratorError::ProtocolMismatch(
					"createGame confirmed without a GameCreated event".to_string(),
				)
			})?;

		let mut handle = MatchHandle::new(match_id, team_a, team_b, game);
		handle.creation_tx = result.tx_hash();
		self.ctx.store.save_match(&handle, None).await?;

		tracing::info!(game = %game, "Match created");
		self.ctx
			.events
			.publish(OracleEvent::Match(MatchEvent::Created {
				handle: handle.clone(),
			}))
			.ok();
		Ok(handle)
	}

	/// Runs `balls` of the match, drawing outcomes from `source`.
	///
	/// Balls already terminal on-chain are skipped. Balls left open or owed a
	/// report by an earlier run are picked up where they stopped.
	#[instrument(skip_all, fields(match_id = handle.match_id, start = balls.start(), end = balls.end()))]
	pub async fn run_sequence(
		&self,
		handle: &mut MatchHandle,
		balls: RangeInclusive<u32>,
		source: &mut dyn OutcomeSource,
	) -> Result<SequenceSummary, OrchestratorError> {
		let (start, end) = (*balls.start(), *balls.end());
		BallNumber::new(start)?;
		BallNumber::new(end)?;
		if start > end {
			return Err(OrchestratorError::InvalidRange { start, end });
		}

		self.ctx.store.save_match(handle, Some(start..=end)).await?;
		let lifecycle = self.lifecycle(handle);
		let mut summary = SequenceSummary::new(handle.match_id);
		let mut halted = None;

		for n in balls {
			let ball = BallNumber::new(n)?;
			if self.is_stopped() {
				summary.stopped = true;
				halted = Some((ball, "stop requested".to_string()));
				break;
			}

			let plan = self.plan_ball(&lifecycle, ball).await?;
			tracing::debug!(ball = n, plan = ?plan, "Planned ball");

			let flow = match plan {
				BallPlan::Skip => {
					summary.skipped.push(ball);
					self.advance(handle, ball).await?;
					continue;
				},
				BallPlan::Full => match source.next_outcome(ball) {
					Some(outcome) => {
						self.play_ball(&lifecycle, handle, ball, outcome, &mut summary)
							.await?
					},
					None => {
						summary.stopped = true;
						Flow::Halt("outcome source exhausted".to_string())
					},
				},
				BallPlan::CloseAndReport(owed) => match owed.or_else(|| source.next_outcome(ball)) {
					Some(outcome) => {
						self.settle_ball(&lifecycle, handle, ball, outcome, &mut summary)
							.await?
					},
					None => {
						summary.stopped = true;
						Flow::Halt("outcome source exhausted".to_string())
					},
				},
				BallPlan::ReportOnly(outcome) => {
					self.report_owed(&lifecycle, handle, ball, outcome, &mut summary)
						.await?
				},
			};

			if let Flow::Halt(reason) = flow {
				halted = Some((ball, reason));
				break;
			}

			if n < end {
				self.pace().await;
			}
		}

		summary.cursor = handle.cursor;
		let event = match halted {
			Some((ball, reason)) => {
				tracing::warn!(ball = %ball, reason = %reason, "Sequence halted");
				MatchEvent::SequenceHalted {
					match_id: handle.match_id,
					ball,
					reason,
				}
			},
			None => {
				tracing::info!(
					completed = summary.completed.len(),
					partial = summary.partial.len(),
					"Sequence completed"
				);
				MatchEvent::SequenceCompleted {
					match_id: handle.match_id,
					completed: summary.completed.len(),
				}
			},
		};
		self.ctx.events.publish(OracleEvent::Match(event)).ok();
		Ok(summary)
	}

	/// Reloads an interrupted match and continues its sequence.
	#[instrument(skip_all, fields(match_id = match_id))]
	pub async fn resume(
		&self,
		match_id: u64,
		source: &mut dyn OutcomeSource,
	) -> Result<(RecoveryReport, SequenceSummary), OrchestratorError> {
		let (mut handle, report) = RecoveryService::new(self.ctx.clone())
			.recover(match_id)
			.await?;

		// Balls before the recorded start were never part of the sequence
		let first = report.sequence_start.max(handle.cursor + 1);
		if first > report.sequence_end {
			tracing::info!("Nothing left to resume");
			let mut summary = SequenceSummary::new(match_id);
			summary.cursor = handle.cursor;
			return Ok((report, summary));
		}

		let summary = self
			.run_sequence(&mut handle, first..=report.sequence_end, source)
			.await?;
		Ok((report, summary))
	}

	/// Opens `count` consecutive balls starting at `start`.
	///
	/// Stops at the first ball that does not confirm and never goes past the
	/// last ball of the match.
	#[instrument(skip_all, fields(match_id = handle.match_id, start = start, count = count))]
	pub async fn open_batch(
		&self,
		handle: &MatchHandle,
		start: u32,
		count: u32,
	) -> Result<Vec<TransitionResult>, OrchestratorError> {
		BallNumber::new(start)?;
		let end = start.saturating_add(count.saturating_sub(1)).min(MAX_BALLS);
		let lifecycle = self.lifecycle(handle);
		let mut results = Vec::new();

		if count == 0 {
			return Ok(results);
		}

		for n in start..=end {
			if self.is_stopped() {
				break;
			}
			if n > start {
				self.pace().await;
			}

			let result = self.with_retry(|| lifecycle.open(n)).await?;
			let confirmed = result.is_confirmed();
			results.push(result);
			if !confirmed {
				tracing::warn!(ball = n, "Batch open stopped");
				break;
			}
		}
		Ok(results)
	}

	/// Removes a game contract from the factory's active list.
	#[instrument(skip_all, fields(game = %game))]
	pub async fn remove_game(&self, game: Address) -> SubmissionResult {
		let call = ICricketBettingFactory::removeGameCall { gameAddress: game };
		let result = self
			.ctx
			.pipeline
			.execute(
				&self.ctx.account,
				ContractCall::new(self.ctx.factory, "removeGame", call.abi_encode()),
			)
			.await;
		self.ctx.record_submission(None, "removeGame", &result);
		result
	}

	/// Game contracts the factory lists as active.
	pub async fn active_games(&self) -> Result<Vec<Address>, OrchestratorError> {
		read_contract(
			self.ctx.client.as_ref(),
			self.ctx.factory,
			ICricketBettingFactory::getActiveGamesCall {},
		)
		.await
		.map_err(read_error)
	}

	/// Sends `amount` wei from the oracle account to `to`.
	#[instrument(skip_all, fields(to = %to, amount = %amount))]
	pub async fn fund(&self, to: Address, amount: U256) -> SubmissionResult {
		let call = ContractCall::transfer(to, amount).with_gas_limit(FUNDING_GAS_LIMIT);
		let result = self.ctx.pipeline.execute(&self.ctx.account, call).await;
		self.ctx.record_submission(None, "transfer", &result);
		result
	}

	pub async fn balance(&self, address: Address) -> Result<U256, OrchestratorError> {
		self.ctx
			.client
			.get_balance(address)
			.await
			.map_err(|e| OrchestratorError::Network(e.to_string()))
	}

	/// Address transactions are signed with.
	pub async fn oracle_address(&self) -> Result<Address, OrchestratorError> {
		self.ctx
			.account
			.get_address()
			.await
			.map_err(|e| OrchestratorError::Account(e.to_string()))
	}

	/// Reads `getMatchInfo` from a game contract.
	pub async fn match_info(&self, game: Address) -> Result<MatchInfo, OrchestratorError> {
		let info = read_contract(
			self.ctx.client.as_ref(),
			game,
			ICricketBettingGame::getMatchInfoCall {},
		)
		.await
		.map_err(read_error)?;

		Ok(MatchInfo {
			team_a: info.teamA,
			team_b: info.teamB,
			match_id: info.matchId,
			current_ball: info.currentBall,
			total_balls: info.totalBalls,
		})
	}

	pub async fn ball_info(
		&self,
		handle: &MatchHandle,
		ball: u32,
	) -> Result<BallInfo, OrchestratorError> {
		Ok(self.lifecycle(handle).ball_info(ball).await?)
	}

	async fn plan_ball(
		&self,
		lifecycle: &BallLifecycle,
		ball: BallNumber,
	) -> Result<BallPlan, OrchestratorError> {
		let owed = self
			.ctx
			.store
			.load_ball(lifecycle.match_id(), ball)
			.await?
			.and_then(|record| record.pending_report);

		let phase = self.read_phase(lifecycle, ball).await?;
		Ok(match phase {
			BallPhase::Resolved | BallPhase::Cancelled => BallPlan::Skip,
			BallPhase::Open => BallPlan::CloseAndReport(owed),
			BallPhase::Closed => match owed {
				Some(outcome) => BallPlan::ReportOnly(outcome),
				None => BallPlan::Full,
			},
		})
	}

	/// Refreshes the on-chain phase, retrying transport failures.
	async fn read_phase(
		&self,
		lifecycle: &BallLifecycle,
		ball: BallNumber,
	) -> Result<BallPhase, OrchestratorError> {
		let mut backoff = self.backoff();
		let mut attempt = 1;
		loop {
			match lifecycle.refresh(ball.get()).await {
				Ok(state) => {
					return state.phase.ok_or_else(|| {
						OrchestratorError::ProtocolMismatch(format!("no phase read for ball {}", ball))
					})
				},
				Err(LifecycleError::Network(detail)) if attempt < self.sequence.retry.max_attempts => {
					let Some(delay) = backoff.next_backoff() else {
						return Err(OrchestratorError::Network(detail));
					};
					tracing::warn!(ball = %ball, attempt, error = %detail, "Phase read failed, retrying");
					tokio::time::sleep(delay).await;
					attempt += 1;
				},
				Err(LifecycleError::Network(detail)) => return Err(OrchestratorError::Network(detail)),
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Open, betting window, close and report.
	async fn play_ball(
		&self,
		lifecycle: &BallLifecycle,
		handle: &mut MatchHandle,
		ball: BallNumber,
		outcome: BallOutcome,
		summary: &mut SequenceSummary,
	) -> Result<Flow, OrchestratorError> {
		let n = ball.get();
		let opened = self.with_retry(|| lifecycle.open(n)).await?;

		if !opened.is_confirmed() {
			let landed = matches!(opened, TransitionResult::TimedOut { .. })
				&& self.read_phase(lifecycle, ball).await? == BallPhase::Open;
			if !landed {
				return Ok(self.halt_on(summary, opened));
			}
			tracing::info!(ball = n, "Open landed after timeout");
		}

		if self.sequence.betting_window_ms > 0 {
			tokio::time::sleep(Duration::from_millis(self.sequence.betting_window_ms)).await;
		}

		self.settle_ball(lifecycle, handle, ball, outcome, summary)
			.await
	}

	/// Close then report an open ball.
	async fn settle_ball(
		&self,
		lifecycle: &BallLifecycle,
		handle: &mut MatchHandle,
		ball: BallNumber,
		outcome: BallOutcome,
		summary: &mut SequenceSummary,
	) -> Result<Flow, OrchestratorError> {
		let n = ball.get();
		let result = self
			.with_retry(|| lifecycle.close_then_report(n, outcome))
			.await?;

		match result {
			TransitionResult::Confirmed { .. } => {
				self.complete(handle, ball, summary).await?;
				Ok(Flow::Continue)
			},
			TransitionResult::PartialCompletion { report, .. } => {
				self.owe_report(lifecycle, handle, ball, outcome, *report, summary)
					.await
			},
			TransitionResult::TimedOut { .. } => {
				// The close may have landed; if so only the report is left
				if self.read_phase(lifecycle, ball).await? == BallPhase::Closed {
					self.report_owed(lifecycle, handle, ball, outcome, summary)
						.await
				} else {
					Ok(self.halt_on(summary, result))
				}
			},
			other => Ok(self.halt_on(summary, other)),
		}
	}

	/// Report for a ball that is already closed.
	async fn report_owed(
		&self,
		lifecycle: &BallLifecycle,
		handle: &mut MatchHandle,
		ball: BallNumber,
		outcome: BallOutcome,
		summary: &mut SequenceSummary,
	) -> Result<Flow, OrchestratorError> {
		let n = ball.get();
		let result = self.with_retry(|| lifecycle.report(n, outcome)).await?;
		if result.is_confirmed() {
			self.complete(handle, ball, summary).await?;
			return Ok(Flow::Continue);
		}
		self.owe_report(lifecycle, handle, ball, outcome, result, summary)
			.await
	}

	/// Applies the partial completion policy to a closed, unresolved ball.
	async fn owe_report(
		&self,
		lifecycle: &BallLifecycle,
		handle: &mut MatchHandle,
		ball: BallNumber,
		outcome: BallOutcome,
		mut last_attempt: TransitionResult,
		summary: &mut SequenceSummary,
	) -> Result<Flow, OrchestratorError> {
		if self.sequence.partial_completion == PartialCompletionPolicy::RetryReport {
			let mut backoff = self.backoff();
			let mut attempt = 1;
			while attempt < self.sequence.retry.max_attempts && !is_precondition(&last_attempt) {
				let Some(delay) = backoff.next_backoff() else {
					break;
				};
				tracing::info!(ball = %ball, attempt, "Retrying owed report");
				tokio::time::sleep(delay).await;
				attempt += 1;

				last_attempt = lifecycle.report(ball.get(), outcome).await?;
				if last_attempt.is_confirmed() || resolved_elsewhere(&last_attempt) {
					self.complete(handle, ball, summary).await?;
					return Ok(Flow::Continue);
				}
			}
		}

		tracing::warn!(ball = %ball, outcome = %outcome, "Ball closed with report owed");
		summary.partial.push(OwedReport {
			ball,
			outcome,
			last_attempt,
		});
		Ok(Flow::Continue)
	}

	async fn complete(
		&self,
		handle: &mut MatchHandle,
		ball: BallNumber,
		summary: &mut SequenceSummary,
	) -> Result<(), OrchestratorError> {
		summary.completed.push(ball);
		self.advance(handle, ball).await
	}

	/// Moves the cursor onto `ball` when every ball before it is done, then
	/// over the balls right after it that an earlier run already finished.
	async fn advance(
		&self,
		handle: &mut MatchHandle,
		ball: BallNumber,
	) -> Result<(), OrchestratorError> {
		if handle.next_ball() != Some(ball) {
			return Ok(());
		}
		handle.advance_to(ball);
		while let Some(next) = handle.next_ball() {
			let finished = self
				.ctx
				.store
				.load_ball(handle.match_id, next)
				.await?
				.is_some_and(|record| record.is_terminal());
			if !finished {
				break;
			}
			handle.advance_to(next);
		}
		self.ctx.store.save_match(handle, None).await?;
		Ok(())
	}

	fn halt_on(&self, summary: &mut SequenceSummary, result: TransitionResult) -> Flow {
		let reason = format!("ball {} {}", result.ball(), result.label());
		if matches!(result, TransitionResult::TimedOut { .. }) {
			summary.ambiguous.push(result);
		} else {
			summary.failed = Some(result);
		}
		Flow::Halt(reason)
	}

	/// Repeats `attempt` while it comes back as a transport rejection.
	async fn with_retry<F, Fut>(&self, mut attempt: F) -> Result<TransitionResult, OrchestratorError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<TransitionResult, LifecycleError>>,
	{
		let mut backoff = self.backoff();
		let mut tries = 1;
		loop {
			let result = attempt().await?;
			if !result.is_retryable() || tries >= self.sequence.retry.max_attempts {
				return Ok(result);
			}
			let Some(delay) = backoff.next_backoff() else {
				return Ok(result);
			};
			tracing::warn!(
				ball = %result.ball(),
				attempt = tries,
				delay_ms = delay.as_millis() as u64,
				"Transport failure, retrying"
			);
			tokio::time::sleep(delay).await;
			tries += 1;
		}
	}

	fn backoff(&self) -> ExponentialBackoff {
		let retry = &self.sequence.retry;
		ExponentialBackoffBuilder::new()
			.with_initial_interval(Duration::from_millis(retry.initial_interval_ms))
			.with_max_interval(Duration::from_millis(retry.max_interval_ms))
			.with_multiplier(retry.multiplier)
			.with_randomization_factor(0.0)
			.with_max_elapsed_time(None)
			.build()
	}

	/// Waits the pacing delay, returning early on stop.
	async fn pace(&self) {
		if self.sequence.pacing_ms == 0 {
			return;
		}
		let mut stop = self.stop.subscribe();
		tokio::select! {
			_ = tokio::time::sleep(Duration::from_millis(self.sequence.pacing_ms)) => {},
			_ = stop.wait_for(|stopped| *stopped) => {},
		}
	}
}

/// An earlier report that timed out has since landed.
fn resolved_elsewhere(result: &TransitionResult) -> bool {
	matches!(
		result,
		TransitionResult::Reverted {
			cause: RevertCause::Precondition {
				actual: BallPhase::Resolved,
				..
			},
			..
		}
	)
}

fn is_precondition(result: &TransitionResult) -> bool {
	matches!(
		result,
		TransitionResult::Reverted {
			cause: RevertCause::Precondition { .. } | RevertCause::NeverOpened,
			..
		}
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::outcome::FixedOutcomes;
	use crate::test_utils::{context, context_on, context_with_storage};
	use oracle_config::RetryConfig;
	use oracle_delivery::implementations::mock::Fault;
	use oracle_storage::implementations::file::FileStorage;
	use oracle_storage::StorageService;
	use oracle_types::{RejectReason, SubmissionKind, TransactionHash};
	use std::sync::Arc;

	fn fast_sequence() -> SequenceConfig {
		SequenceConfig {
			pacing_ms: 0,
			betting_window_ms: 0,
			settle_delay_ms: 0,
			partial_completion: PartialCompletionPolicy::Surface,
			retry: RetryConfig {
				initial_interval_ms: 1,
				max_interval_ms: 5,
				multiplier: 2.0,
				max_attempts: 3,
			},
		}
	}

	fn orchestrator(ctx: OracleContext) -> MatchOrchestrator {
		MatchOrchestrator::new(ctx, fast_sequence())
	}

	fn outcomes(n: usize) -> FixedOutcomes {
		FixedOutcomes::new(BallOutcome::REPORTABLE.into_iter().cycle().take(n))
	}

	fn balls(numbers: &[u32]) -> Vec<BallNumber> {
		numbers.iter().map(|n| BallNumber::new(*n).unwrap()).collect()
	}

	#[test]
	fn test_stopped_run_is_settled_only_without_leftovers() {
		let ball = BallNumber::new(3).unwrap();
		let mut summary = SequenceSummary::new(1);
		summary.stopped = true;
		assert!(summary.is_settled());
		assert!(!summary.is_clean());

		summary.ambiguous.push(TransitionResult::TimedOut {
			ball,
			tx_hash: TransactionHash(oracle_types::B256::repeat_byte(0x01)),
		});
		assert!(!summary.is_settled());

		summary.ambiguous.clear();
		summary.partial.push(OwedReport {
			ball,
			outcome: BallOutcome::Wicket,
			last_attempt: TransitionResult::Rejected {
				ball,
				tx_hash: None,
				reason: RejectReason::Network("connection reset".to_string()),
			},
		});
		assert!(!summary.is_settled());
	}

	#[tokio::test]
	async fn test_create_match_decodes_address() {
		let (ctx, ledger) = context();
		let mut events = ctx.events.subscribe();
		let orch = orchestrator(ctx.clone());

		let handle = orch.create_match("RCB", "CSK", 214235245).await.unwrap();
		assert_eq!(handle.contract_address, ledger.factory().create(0));
		assert_eq!(handle.cursor, 0);
		assert!(handle.creation_tx.is_some());
		assert_eq!(orch.handle(214235245).await.unwrap(), handle);

		let info = orch.match_info(handle.contract_address).await.unwrap();
		assert_eq!(info.team_a, "RCB");
		assert_eq!(info.match_id, U256::from(214235245u64));
		assert_eq!(info.total_balls, U256::from(MAX_BALLS));
		assert_eq!(orch.active_games().await.unwrap(), vec![handle.contract_address]);

		let mut saw_created = false;
		while let Ok(event) = events.try_recv() {
			match event {
				OracleEvent::Submission(record) => {
					assert_eq!(record.outcome, SubmissionKind::Confirmed);
					assert_eq!(record.function, "createGame");
					assert_eq!(record.events.len(), 1);
				},
				OracleEvent::Match(MatchEvent::Created { handle: created }) => {
					assert_eq!(created, handle);
					saw_created = true;
				},
				_ => {},
			}
		}
		assert!(saw_created);
	}

	#[tokio::test]
	async fn test_create_match_failure() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);

		ledger.inject("createGame", Fault::Revert, Some(1)).await;
		let result = orch.create_match("RCB", "CSK", 1).await;
		assert!(matches!(result, Err(OrchestratorError::Creation(r)) if r.kind() == SubmissionKind::Reverted));
		assert!(matches!(
			orch.handle(1).await,
			Err(OrchestratorError::MatchNotFound(1))
		));
	}

	#[tokio::test]
	async fn test_run_sequence_completes() {
		let (ctx, ledger) = context();
		let mut events = ctx.events.subscribe();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 2).await.unwrap();

		let summary = orch
			.run_sequence(&mut handle, 1..=6, &mut outcomes(6))
			.await
			.unwrap();

		assert!(summary.is_clean());
		assert_eq!(summary.completed, balls(&[1, 2, 3, 4, 5, 6]));
		assert_eq!(summary.cursor, 6);
		assert_eq!(handle.cursor, 6);
		assert_eq!(ledger.submissions("reportBallResult").await, 6);

		for (i, outcome) in BallOutcome::REPORTABLE.iter().enumerate() {
			let info = orch.ball_info(&handle, i as u32 + 1).await.unwrap();
			assert_eq!(info.phase, BallPhase::Resolved);
			assert_eq!(info.outcome, *outcome);
		}

		let mut completed_event = false;
		while let Ok(event) = events.try_recv() {
			if let OracleEvent::Match(MatchEvent::SequenceCompleted { completed, .. }) = event {
				assert_eq!(completed, 6);
				completed_event = true;
			}
		}
		assert!(completed_event);
	}

	#[tokio::test]
	async fn test_sequence_halts_on_revert() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 3).await.unwrap();

		let mut source = outcomes(5);
		orch.run_sequence(&mut handle, 1..=1, &mut source)
			.await
			.unwrap();
		assert_eq!(handle.cursor, 1);
		// Ball 2's close reverts
		ledger.inject("closeBall", Fault::Revert, Some(1)).await;
		let summary = orch
			.run_sequence(&mut handle, 2..=5, &mut source)
			.await
			.unwrap();

		assert_eq!(summary.completed, Vec::<BallNumber>::new());
		assert!(matches!(
			summary.failed,
			Some(TransitionResult::Reverted {
				cause: RevertCause::Ledger { .. },
				..
			})
		));
		assert_eq!(summary.failed.as_ref().map(|r| r.ball().get()), Some(2));
		assert_eq!(handle.cursor, 1);
		assert_eq!(ledger.submissions("openBall").await, 2);
		assert_eq!(ledger.submissions("reportBallResult").await, 1);
	}

	#[tokio::test]
	async fn test_sequence_retries_network_rejections() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 4).await.unwrap();

		ledger.inject("openBall", Fault::Network, Some(2)).await;
		let summary = orch
			.run_sequence(&mut handle, 1..=2, &mut outcomes(2))
			.await
			.unwrap();

		assert!(summary.is_clean());
		assert_eq!(summary.completed, balls(&[1, 2]));
		assert_eq!(ledger.submissions("openBall").await, 2);
	}

	#[tokio::test]
	async fn test_retries_are_bounded() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 5).await.unwrap();

		ledger.inject("openBall", Fault::Network, None).await;
		let summary = orch
			.run_sequence(&mut handle, 1..=3, &mut outcomes(3))
			.await
			.unwrap();

		assert!(matches!(
			summary.failed,
			Some(TransitionResult::Rejected {
				reason: RejectReason::Network(_),
				..
			})
		));
		assert!(summary.completed.is_empty());
		assert_eq!(ledger.estimations("openBall").await, 3);
	}

	#[tokio::test]
	async fn test_refused_broadcast_is_not_retried() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 16).await.unwrap();

		ledger.inject("closeBall", Fault::Refuse, Some(1)).await;
		let summary = orch
			.run_sequence(&mut handle, 1..=2, &mut outcomes(2))
			.await
			.unwrap();

		assert!(matches!(
			summary.failed,
			Some(TransitionResult::Rejected {
				reason: RejectReason::Refused(_),
				..
			})
		));
		assert!(summary.completed.is_empty());
		assert_eq!(ledger.estimations("closeBall").await, 1);
		assert_eq!(ledger.submissions("closeBall").await, 0);
		assert_eq!(ledger.submissions("openBall").await, 1);
	}

	#[tokio::test]
	async fn test_sequence_from_later_ball_keeps_cursor() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 17).await.unwrap();

		let summary = orch
			.run_sequence(&mut handle, 5..=6, &mut outcomes(2))
			.await
			.unwrap();
		assert_eq!(summary.completed, balls(&[5, 6]));
		assert_eq!(handle.cursor, 0);
		assert_eq!(orch.handle(17).await.unwrap().cursor, 0);
		assert_eq!(ledger.submissions("openBall").await, 2);

		// Filling in the earlier balls carries the cursor over 5 and 6
		let summary = orch
			.run_sequence(&mut handle, 1..=4, &mut outcomes(4))
			.await
			.unwrap();
		assert!(summary.is_clean());
		assert_eq!(handle.cursor, 6);
		assert_eq!(orch.handle(17).await.unwrap().cursor, 6);
	}

	#[tokio::test]
	async fn test_resume_stays_inside_the_recorded_range() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 18).await.unwrap();

		// Source runs dry after ball 5
		let first = orch
			.run_sequence(&mut handle, 5..=7, &mut outcomes(1))
			.await
			.unwrap();
		assert!(first.stopped);
		assert_eq!(first.completed, balls(&[5]));

		let (report, summary) = orch.resume(18, &mut outcomes(5)).await.unwrap();
		assert_eq!(report.sequence_start, 5);
		assert_eq!(report.sequence_end, 7);
		assert_eq!(summary.completed, balls(&[6, 7]));
		assert_eq!(summary.skipped, balls(&[5]));
		assert_eq!(summary.cursor, 0);
		assert_eq!(ledger.submissions("openBall").await, 3);

		let untouched = orch.ball_info(&handle, 1).await.unwrap();
		assert_eq!(untouched.phase, BallPhase::Closed);
	}

	#[tokio::test]
	async fn test_partial_completion_is_surfaced() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 6).await.unwrap();

		ledger.inject("reportBallResult", Fault::Revert, Some(1)).await;
		let summary = orch
			.run_sequence(&mut handle, 1..=3, &mut outcomes(3))
			.await
			.unwrap();

		assert_eq!(summary.completed, balls(&[2, 3]));
		assert_eq!(summary.partial.len(), 1);
		assert_eq!(summary.partial[0].ball.get(), 1);
		assert_eq!(summary.partial[0].outcome, BallOutcome::Boundary);
		assert!(!summary.is_clean());
		// Cursor stays behind the unresolved ball
		assert_eq!(handle.cursor, 0);

		// A second run reports ball 1 without closing it again
		let rerun = orch
			.run_sequence(&mut handle, 1..=3, &mut outcomes(0))
			.await
			.unwrap();
		assert_eq!(rerun.completed, balls(&[1]));
		assert_eq!(rerun.skipped, balls(&[2, 3]));
		assert_eq!(handle.cursor, 3);
		assert_eq!(ledger.submissions("closeBall").await, 3);
	}

	#[tokio::test]
	async fn test_retry_report_policy() {
		let (ctx, ledger) = context();
		let mut sequence = fast_sequence();
		sequence.partial_completion = PartialCompletionPolicy::RetryReport;
		let orch = MatchOrchestrator::new(ctx, sequence);
		let mut handle = orch.create_match("RCB", "CSK", 7).await.unwrap();

		ledger.inject("reportBallResult", Fault::Revert, Some(2)).await;
		let summary = orch
			.run_sequence(&mut handle, 1..=1, &mut outcomes(1))
			.await
			.unwrap();

		assert!(summary.is_clean());
		assert_eq!(summary.completed, balls(&[1]));
		assert_eq!(ledger.submissions("reportBallResult").await, 3);
		assert_eq!(ledger.submissions("closeBall").await, 1);
	}

	#[tokio::test]
	async fn test_lost_receipt_continues_when_phase_moved() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 8).await.unwrap();

		ledger.inject("openBall", Fault::LostReceipt, Some(1)).await;
		let summary = orch
			.run_sequence(&mut handle, 1..=2, &mut outcomes(2))
			.await
			.unwrap();

		assert!(summary.is_clean());
		assert_eq!(summary.completed, balls(&[1, 2]));
		assert_eq!(ledger.submissions("openBall").await, 2);
	}

	#[tokio::test]
	async fn test_dropped_transaction_is_ambiguous() {
		let (ctx, ledger) = context();
		let mut events = ctx.events.subscribe();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 9).await.unwrap();

		ledger.inject("openBall", Fault::Timeout, Some(1)).await;
		let summary = orch
			.run_sequence(&mut handle, 1..=4, &mut outcomes(4))
			.await
			.unwrap();

		assert!(summary.completed.is_empty());
		assert!(summary.failed.is_none());
		assert_eq!(summary.ambiguous.len(), 1);
		assert!(matches!(
			summary.ambiguous[0],
			TransitionResult::TimedOut { .. }
		));
		assert_eq!(ledger.submissions("closeBall").await, 0);

		let mut halted = false;
		while let Ok(event) = events.try_recv() {
			if let OracleEvent::Match(MatchEvent::SequenceHalted { ball, .. }) = event {
				assert_eq!(ball.get(), 1);
				halted = true;
			}
		}
		assert!(halted);
	}

	#[tokio::test]
	async fn test_stop_prevents_next_ball() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 10).await.unwrap();

		orch.stop();
		let summary = orch
			.run_sequence(&mut handle, 1..=3, &mut outcomes(3))
			.await
			.unwrap();

		assert!(summary.stopped);
		assert!(summary.completed.is_empty());
		assert_eq!(ledger.submissions("openBall").await, 0);
	}

	#[tokio::test]
	async fn test_exhausted_source_stops() {
		let (ctx, _ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 11).await.unwrap();

		let summary = orch
			.run_sequence(&mut handle, 1..=5, &mut outcomes(2))
			.await
			.unwrap();
		assert_eq!(summary.completed, balls(&[1, 2]));
		assert!(summary.stopped);
	}

	#[tokio::test]
	async fn test_invalid_ranges() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 12).await.unwrap();

		for range in [0..=3, 118..=121, 5..=4] {
			let result = orch
				.run_sequence(&mut handle, range, &mut outcomes(3))
				.await;
			assert!(matches!(
				result,
				Err(OrchestratorError::InvalidBall(_)) | Err(OrchestratorError::InvalidRange { .. })
			));
		}
		assert_eq!(ledger.estimations("openBall").await, 0);
	}

	#[tokio::test]
	async fn test_open_batch() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);
		let handle = orch.create_match("RCB", "CSK", 13).await.unwrap();

		let opened = orch.open_batch(&handle, 118, 10).await.unwrap();
		assert_eq!(opened.len(), 3);
		assert!(opened.iter().all(TransitionResult::is_confirmed));

		// Ball 2 is opened out of band, so the batch stops there
		ledger.set_phase(handle.contract_address, 2, BallPhase::Open).await;
		let opened = orch.open_batch(&handle, 1, 5).await.unwrap();
		assert_eq!(opened.len(), 2);
		assert!(opened[0].is_confirmed());
		assert!(matches!(
			opened[1],
			TransitionResult::Reverted {
				cause: RevertCause::Precondition { .. },
				..
			}
		));

		assert!(orch.open_batch(&handle, 5, 0).await.unwrap().is_empty());
		assert!(matches!(
			orch.open_batch(&handle, 121, 1).await,
			Err(OrchestratorError::InvalidBall(_))
		));
	}

	#[tokio::test]
	async fn test_fund_and_balance() {
		let (ctx, ledger) = context();
		let orch = orchestrator(ctx);

		let result = orch
			.fund(ledger.factory(), U256::from(10u64).pow(U256::from(18)))
			.await;
		assert!(result.is_confirmed());
		assert_eq!(
			orch.balance(ledger.factory()).await.unwrap(),
			U256::from(10u64).pow(U256::from(18))
		);
		assert_eq!(ledger.estimations("transfer").await, 0);
	}

	#[tokio::test]
	async fn test_remove_game() {
		let (ctx, _ledger) = context();
		let orch = orchestrator(ctx);
		let handle = orch.create_match("RCB", "CSK", 14).await.unwrap();

		assert!(orch.remove_game(handle.contract_address).await.is_confirmed());
		assert!(orch.active_games().await.unwrap().is_empty());

		let again = orch.remove_game(handle.contract_address).await;
		assert!(matches!(
			again,
			SubmissionResult::Rejected {
				reason: RejectReason::Estimation(_),
				..
			}
		));
	}

	#[tokio::test]
	async fn test_resume_after_restart() {
		let dir = tempfile::tempdir().unwrap();
		let storage = || {
			Arc::new(StorageService::new(Box::new(FileStorage::new(
				dir.path().to_path_buf(),
			))))
		};

		let (ctx, ledger) = context_with_storage(storage());
		let orch = orchestrator(ctx);
		let mut handle = orch.create_match("RCB", "CSK", 15).await.unwrap();

		// First process: the first close is dropped and the run halts
		ledger.inject("closeBall", Fault::Timeout, Some(1)).await;
		let first = orch
			.run_sequence(&mut handle, 1..=5, &mut outcomes(5))
			.await
			.unwrap();
		assert_eq!(first.ambiguous.len(), 1);
		assert_eq!(handle.cursor, 0);
		drop(orch);

		// Second process over the same ledger and storage directory
		let orch = orchestrator(context_on(ledger.clone(), storage()));
		let (report, summary) = orch.resume(15, &mut outcomes(5)).await.unwrap();

		assert_eq!(report.sequence_end, 5);
		assert_eq!(report.ambiguous, balls(&[1]));
		assert!(summary.is_clean());
		assert_eq!(summary.completed, balls(&[1, 2, 3, 4, 5]));
		assert_eq!(summary.cursor, 5);
		assert_eq!(orch.handle(15).await.unwrap().cursor, 5);

		// Nothing left afterwards
		let (_, done) = orch.resume(15, &mut outcomes(0)).await.unwrap();
		assert!(done.completed.is_empty());
		assert_eq!(done.cursor, 5);
	}
}
