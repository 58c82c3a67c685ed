//! Ball-level types.
//!
//! A ball is one bettable delivery. Its betting window moves through
//! Closed -> Open -> (Resolved | Cancelled) on the game contract, and the
//! orchestrator mirrors that phase locally as a cache of the ledger.

use crate::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of balls in a match (20 overs of 6 deliveries).
pub const MAX_BALLS: u32 = 120;

/// A ball number that has been checked against `1..=MAX_BALLS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BallNumber(u32);

/// Error returned for ball numbers outside `1..=MAX_BALLS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Ball number {0} is outside 1..=120")]
pub struct InvalidBallNumber(pub u32);

impl BallNumber {
	/// The first ball of a match.
	pub const FIRST: Self = Self(1);
	/// The last ball of a match.
	pub const LAST: Self = Self(MAX_BALLS);

	pub fn new(number: u32) -> Result<Self, InvalidBallNumber> {
		if (1..=MAX_BALLS).contains(&number) {
			Ok(Self(number))
		} else {
			Err(InvalidBallNumber(number))
		}
	}

	pub fn get(self) -> u32 {
		self.0
	}

	/// The following ball, or `None` after the last ball.
	pub fn next(self) -> Option<Self> {
		Self::new(self.0 + 1).ok()
	}

	/// The ball number as the `uint256` the game contract expects.
	pub fn as_u256(self) -> U256 {
		U256::from(self.0)
	}
}

impl TryFrom<u32> for BallNumber {
	type Error = InvalidBallNumber;

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl From<BallNumber> for u32 {
	fn from(ball: BallNumber) -> Self {
		ball.0
	}
}

impl fmt::Display for BallNumber {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Phase of a ball's betting window.
///
/// Codes match the `state` field returned by `getBallInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BallPhase {
	Closed,
	Open,
	Resolved,
	Cancelled,
}

impl BallPhase {
	pub fn from_code(code: u8) -> Option<Self> {
		match code {
			0 => Some(Self::Closed),
			1 => Some(Self::Open),
			2 => Some(Self::Resolved),
			3 => Some(Self::Cancelled),
			_ => None,
		}
	}

	pub fn code(self) -> u8 {
		match self {
			Self::Closed => 0,
			Self::Open => 1,
			Self::Resolved => 2,
			Self::Cancelled => 3,
		}
	}

	/// Resolved and Cancelled accept no further transitions.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Resolved | Self::Cancelled)
	}
}

impl fmt::Display for BallPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Closed => "CLOSED",
			Self::Open => "OPEN",
			Self::Resolved => "RESOLVED",
			Self::Cancelled => "CANCELLED",
		};
		f.write_str(name)
	}
}

/// Result of a delivery as recorded by the game contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BallOutcome {
	/// No result reported yet.
	Pending,
	/// Four or six runs.
	Boundary,
	/// Batsman out.
	Wicket,
	/// No runs.
	DotBall,
	OneRun,
	TwoRuns,
	/// Wide or no ball.
	Extras,
}

/// Error returned when parsing an unknown outcome name or code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown ball outcome: {0}")]
pub struct UnknownOutcome(pub String);

impl BallOutcome {
	/// The six reportable outcomes, in contract code order.
	pub const REPORTABLE: [BallOutcome; 6] = [
		BallOutcome::Boundary,
		BallOutcome::Wicket,
		BallOutcome::DotBall,
		BallOutcome::OneRun,
		BallOutcome::TwoRuns,
		BallOutcome::Extras,
	];

	pub fn from_code(code: u8) -> Option<Self> {
		match code {
			0 => Some(Self::Pending),
			1..=6 => Some(Self::REPORTABLE[(code - 1) as usize]),
			_ => None,
		}
	}

	pub fn code(self) -> u8 {
		match self {
			Self::Pending => 0,
			Self::Boundary => 1,
			Self::Wicket => 2,
			Self::DotBall => 3,
			Self::OneRun => 4,
			Self::TwoRuns => 5,
			Self::Extras => 6,
		}
	}

	/// Whether this outcome can be passed to `reportBallResult`.
	pub fn is_reportable(self) -> bool {
		self != Self::Pending
	}
}

impl fmt::Display for BallOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Pending => "PENDING",
			Self::Boundary => "BOUNDARY",
			Self::Wicket => "WICKET",
			Self::DotBall => "DOT_BALL",
			Self::OneRun => "ONE_RUN",
			Self::TwoRuns => "TWO_RUNS",
			Self::Extras => "EXTRAS",
		};
		f.write_str(name)
	}
}

impl FromStr for BallOutcome {
	type Err = UnknownOutcome;

	/// Accepts contract codes (`"1"`) and names in any case with optional
	/// `_`/`-` separators (`"dot_ball"`, `"DOT-BALL"`, `"dotball"`).
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if let Ok(code) = s.parse::<u8>() {
			return Self::from_code(code).ok_or_else(|| UnknownOutcome(s.to_string()));
		}

		let normalized: String = s
			.chars()
			.filter(|c| *c != '_' && *c != '-')
			.collect::<String>()
			.to_lowercase();

		match normalized.as_str() {
			"pending" => Ok(Self::Pending),
			"boundary" => Ok(Self::Boundary),
			"wicket" => Ok(Self::Wicket),
			"dotball" => Ok(Self::DotBall),
			"onerun" => Ok(Self::OneRun),
			"tworuns" => Ok(Self::TwoRuns),
			"extras" => Ok(Self::Extras),
			_ => Err(UnknownOutcome(s.to_string())),
		}
	}
}

/// Local view of one ball.
///
/// This is a cache of the ledger: `phase` is `None` when the last
/// submission left the on-chain phase unknown (timeout, revert) and must
/// be refreshed before the next transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallState {
	pub ball: BallNumber,
	pub phase: Option<BallPhase>,
	pub outcome: BallOutcome,
}

impl BallState {
	pub fn unknown(ball: BallNumber) -> Self {
		Self {
			ball,
			phase: None,
			outcome: BallOutcome::Pending,
		}
	}
}

/// Decoded `getBallInfo` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallInfo {
	pub phase: BallPhase,
	pub outcome: BallOutcome,
	/// Total amount staked on this ball, in wei.
	pub total_pool: U256,
	/// Amount staked per reportable outcome, in `BallOutcome::REPORTABLE` order.
	pub outcome_pools: [U256; 6],
	pub bettor_count: U256,
	pub distributed: bool,
	pub refunded: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_ball_number_bounds() {
		assert!(BallNumber::new(0).is_err());
		assert!(BallNumber::new(1).is_ok());
		assert!(BallNumber::new(120).is_ok());
		assert_eq!(BallNumber::new(121), Err(InvalidBallNumber(121)));
		assert_eq!(BallNumber::LAST.next(), None);
		assert_eq!(BallNumber::FIRST.next().map(BallNumber::get), Some(2));
	}

	#[test]
	fn test_ball_number_serde_rejects_out_of_range() {
		let ball: BallNumber = serde_json::from_str("42").unwrap();
		assert_eq!(ball.get(), 42);
		assert!(serde_json::from_str::<BallNumber>("121").is_err());
	}

	#[test]
	fn test_outcome_parsing() {
		assert_eq!("boundary".parse::<BallOutcome>().unwrap(), BallOutcome::Boundary);
		assert_eq!("DOT_BALL".parse::<BallOutcome>().unwrap(), BallOutcome::DotBall);
		assert_eq!("two-runs".parse::<BallOutcome>().unwrap(), BallOutcome::TwoRuns);
		assert_eq!("6".parse::<BallOutcome>().unwrap(), BallOutcome::Extras);
		assert!("7".parse::<BallOutcome>().is_err());
		assert!("six".parse::<BallOutcome>().is_err());
	}

	#[test]
	fn test_outcome_codes() {
		for (i, outcome) in BallOutcome::REPORTABLE.iter().enumerate() {
			assert_eq!(outcome.code() as usize, i + 1);
			assert!(outcome.is_reportable());
		}
		assert!(!BallOutcome::Pending.is_reportable());
		assert_eq!(BallOutcome::from_code(0), Some(BallOutcome::Pending));
	}

	#[test]
	fn test_phase_codes() {
		assert_eq!(BallPhase::from_code(1), Some(BallPhase::Open));
		assert_eq!(BallPhase::from_code(4), None);
		assert!(BallPhase::Cancelled.is_terminal());
		assert!(!BallPhase::Open.is_terminal());
	}
}
