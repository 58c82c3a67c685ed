//! Event types published by the orchestrator.
//!
//! Events are data, not log lines: a surrounding CLI or telemetry consumer
//! subscribes to the event bus and decides how to render or ship them.

use crate::{
	BallNumber, BallOutcome, BallPhase, MatchContractEvent, MatchHandle, SubmissionKind,
	TransactionHash,
};
use serde::{Deserialize, Serialize};

/// Main event type encompassing all oracle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OracleEvent {
	/// One pipeline execution finished.
	Submission(SubmissionRecord),
	/// Events about a single ball.
	Ball(BallEvent),
	/// Events about a whole match.
	Match(MatchEvent),
}

/// Per-operation result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
	pub match_id: Option<u64>,
	pub function: String,
	pub outcome: SubmissionKind,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tx_hash: Option<TransactionHash>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub block_number: Option<u64>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub events: Vec<MatchContractEvent>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Events related to one ball.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BallEvent {
	/// The ball's phase moved on-chain.
	PhaseChanged {
		match_id: u64,
		ball: BallNumber,
		from: Option<BallPhase>,
		to: BallPhase,
	},
	/// Close confirmed but report did not; the ball needs a follow-up report.
	PartiallyCompleted {
		match_id: u64,
		ball: BallNumber,
		close_tx: TransactionHash,
		pending_outcome: BallOutcome,
	},
	/// A submission timed out; the on-chain phase is unknown until refreshed.
	Ambiguous {
		match_id: u64,
		ball: BallNumber,
		tx_hash: TransactionHash,
	},
}

/// Events related to a whole match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MatchEvent {
	/// A game contract was deployed for the match.
	Created { handle: MatchHandle },
	/// The emergency pause was confirmed.
	Paused { match_id: u64 },
	/// A sequence stopped before its last ball.
	SequenceHalted {
		match_id: u64,
		ball: BallNumber,
		reason: String,
	},
	/// A sequence ran to its last ball.
	SequenceCompleted { match_id: u64, completed: usize },
}
