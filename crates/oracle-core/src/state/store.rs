//! Checkpoints for in-flight sequences.
//!
//! Only what is needed to resume is kept: the match handle with its cursor,
//! the range the sequence was asked to cover, and per ball the last phase
//! observed, the last transaction and any report still owed. The ledger
//! stays the source of truth; these records only say where to look.

use chrono::{DateTime, Utc};
use oracle_storage::{StorageError, StorageService};
use oracle_types::{
	BallNumber, BallOutcome, BallPhase, MatchHandle, StorageKey, SubmissionKind, TransactionHash,
};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for StoreError {
	fn from(e: StorageError) -> Self {
		Self::Storage(e.to_string())
	}
}

/// Stored match handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
	pub handle: MatchHandle,
	/// First ball of the most recent sequence run.
	#[serde(default)]
	pub sequence_start: Option<u32>,
	/// Last ball of the most recent sequence run.
	pub sequence_end: Option<u32>,
	pub updated_at: DateTime<Utc>,
}

/// Last known state of one ball.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallRecord {
	pub ball: BallNumber,
	/// `None` when the last submission left the phase unknown.
	pub phase: Option<BallPhase>,
	pub outcome: BallOutcome,
	/// Outcome to report once the ball is closed, set after a partial completion.
	pub pending_report: Option<BallOutcome>,
	/// The ball was seen open at least once, so a later Closed phase means
	/// betting ended rather than never started.
	#[serde(default)]
	pub opened: bool,
	pub last_tx: Option<TransactionHash>,
	pub last_result: Option<SubmissionKind>,
	pub updated_at: DateTime<Utc>,
}

impl BallRecord {
	pub fn new(ball: BallNumber) -> Self {
		Self {
			ball,
			phase: None,
			outcome: BallOutcome::Pending,
			pending_report: None,
			opened: false,
			last_tx: None,
			last_result: None,
			updated_at: Utc::now(),
		}
	}

	pub fn is_terminal(&self) -> bool {
		self.phase.is_some_and(BallPhase::is_terminal)
	}

	/// Whether a report may follow: the ball was closed after betting, or a
	/// report is already owed.
	pub fn is_reportable(&self) -> bool {
		self.opened || self.pending_report.is_some()
	}
}

/// Typed access to match and ball records.
pub struct MatchStore {
	storage: Arc<StorageService>,
}

impl MatchStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	fn ball_id(match_id: u64, ball: BallNumber) -> String {
		format!("{}:{}", match_id, ball)
	}

	pub async fn save_match(
		&self,
		handle: &MatchHandle,
		sequence: Option<RangeInclusive<u32>>,
	) -> Result<(), StoreError> {
		// Keep a previously recorded range unless a new one is given
		let (sequence_start, sequence_end) = match sequence {
			Some(range) => (Some(*range.start()), Some(*range.end())),
			None => self
				.load_match(handle.match_id)
				.await?
				.map(|record| (record.sequence_start, record.sequence_end))
				.unwrap_or_default(),
		};
		let record = MatchRecord {
			handle: handle.clone(),
			sequence_start,
			sequence_end,
			updated_at: Utc::now(),
		};
		self.storage
			.store(StorageKey::Matches, &handle.match_id.to_string(), &record)
			.await?;
		Ok(())
	}

	pub async fn load_match(&self, match_id: u64) -> Result<Option<MatchRecord>, StoreError> {
		Ok(self
			.storage
			.retrieve_optional(StorageKey::Matches, &match_id.to_string())
			.await?)
	}

	pub async fn load_ball(
		&self,
		match_id: u64,
		ball: BallNumber,
	) -> Result<Option<BallRecord>, StoreError> {
		Ok(self
			.storage
			.retrieve_optional(StorageKey::Balls, &Self::ball_id(match_id, ball))
			.await?)
	}

	/// Applies `updater` to the ball's record, creating it if needed, and
	/// persists the result.
	pub async fn update_ball_with<F>(
		&self,
		match_id: u64,
		ball: BallNumber,
		updater: F,
	) -> Result<BallRecord, StoreError>
	where
		F: FnOnce(&mut BallRecord),
	{
		let mut record = self
			.load_ball(match_id, ball)
			.await?
			.unwrap_or_else(|| BallRecord::new(ball));

		updater(&mut record);
		record.updated_at = Utc::now();

		self.storage
			.store(StorageKey::Balls, &Self::ball_id(match_id, ball), &record)
			.await?;
		Ok(record)
	}
}
