//! Recovery of interrupted sequences from storage.
//!
//! A checkpointed match is reloaded, every ball that was touched but not
//! finished is reconciled against the ledger, and the cursor is moved over
//! any balls that turn out to be terminal already. The caller then resumes
//! the sequence from the first ball after the cursor.

use crate::lifecycle::{BallLifecycle, LifecycleError};
use crate::state::StoreError;
use crate::OracleContext;
use oracle_types::{BallNumber, BallPhase, MatchHandle, MAX_BALLS};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur during recovery operations.
#[derive(Debug, Error)]
pub enum RecoveryError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Match {0} has no checkpoint")]
	MatchNotFound(u64),
	#[error("Reconciliation failed for ball {ball}: {source}")]
	Reconcile {
		ball: BallNumber,
		#[source]
		source: LifecycleError,
	},
}

impl From<StoreError> for RecoveryError {
	fn from(e: StoreError) -> Self {
		Self::Storage(e.to_string())
	}
}

/// Report of the recovery operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
	pub match_id: u64,
	/// Cursor after reconciliation.
	pub cursor: u32,
	/// First ball of the interrupted sequence.
	pub sequence_start: u32,
	/// Last ball of the interrupted sequence.
	pub sequence_end: u32,
	/// Number of balls re-read from the ledger.
	pub reconciled: usize,
	/// Balls whose last submission left the phase unknown.
	pub ambiguous: Vec<BallNumber>,
	/// Closed balls still owed a report.
	pub owed_reports: Vec<BallNumber>,
}

/// Restores sequence state from storage.
pub struct RecoveryService {
	ctx: OracleContext,
}

impl RecoveryService {
	pub fn new(ctx: OracleContext) -> Self {
		Self { ctx }
	}

	/// Reloads `match_id` and reconciles its unfinished balls with the ledger.
	#[instrument(skip_all, fields(match_id = match_id))]
	pub async fn recover(
		&self,
		match_id: u64,
	) -> Result<(MatchHandle, RecoveryReport), RecoveryError> {
		let record = self
			.ctx
			.store
			.load_match(match_id)
			.await?
			.ok_or(RecoveryError::MatchNotFound(match_id))?;

		let mut handle = record.handle;
		let sequence_start = record.sequence_start.unwrap_or(1).max(1);
		let sequence_end = record.sequence_end.unwrap_or(MAX_BALLS).min(MAX_BALLS);
		let balls = BallLifecycle::new(self.ctx.clone(), &handle, Duration::ZERO);

		let mut report = RecoveryReport {
			match_id,
			sequence_start,
			sequence_end,
			..Default::default()
		};
		// The cursor only moves over balls directly after it
		let first = sequence_start.max(handle.cursor + 1);
		let mut contiguous = first == handle.cursor + 1;

		for n in first..=sequence_end {
			let Ok(ball) = BallNumber::new(n) else {
				continue;
			};
			let Some(stored) = self.ctx.store.load_ball(match_id, ball).await? else {
				// Nothing beyond an untouched ball was ever started
				contiguous = false;
				continue;
			};

			let phase = if stored.is_terminal() {
				stored.phase
			} else {
				if stored.phase.is_none() {
					report.ambiguous.push(ball);
				}
				let state = balls
					.refresh(n)
					.await
					.map_err(|source| RecoveryError::Reconcile { ball, source })?;
				report.reconciled += 1;

				if state.phase == Some(BallPhase::Closed) && stored.pending_report.is_some() {
					report.owed_reports.push(ball);
				}
				state.phase
			};

			let terminal = phase.is_some_and(BallPhase::is_terminal);
			if terminal && contiguous {
				handle.advance_to(ball);
			} else {
				contiguous = false;
			}
		}

		report.cursor = handle.cursor;
		self.ctx.store.save_match(&handle, None).await?;

		tracing::info!(
			cursor = report.cursor,
			reconciled = report.reconciled,
			owed_reports = report.owed_reports.len(),
			"Recovered match"
		);
		Ok((handle, report))
	}
}
