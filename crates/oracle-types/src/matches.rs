//! Match-level types.

use crate::{Address, BallNumber, TransactionHash, U256};
use serde::{Deserialize, Serialize};

/// Handle to a match whose game contract has been deployed.
///
/// Created from a confirmed `createGame` receipt. Every ball up to and
/// including `cursor` needs nothing further from the oracle; it only moves
/// forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchHandle {
	pub match_id: u64,
	pub team_a: String,
	pub team_b: String,
	/// Address of the deployed game contract.
	pub contract_address: Address,
	/// Last ball of the finished prefix, 0 before the first ball completes.
	pub cursor: u32,
	/// Hash of the creation transaction, when known.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub creation_tx: Option<TransactionHash>,
}

impl MatchHandle {
	pub fn new(
		match_id: u64,
		team_a: impl Into<String>,
		team_b: impl Into<String>,
		contract_address: Address,
	) -> Self {
		Self {
			match_id,
			team_a: team_a.into(),
			team_b: team_b.into(),
			contract_address,
			cursor: 0,
			creation_tx: None,
		}
	}

	/// Moves the cursor to `ball` if that is further than the current cursor.
	pub fn advance_to(&mut self, ball: BallNumber) {
		self.cursor = self.cursor.max(ball.get());
	}

	/// The ball after the cursor, if the match has one.
	pub fn next_ball(&self) -> Option<BallNumber> {
		BallNumber::new(self.cursor + 1).ok()
	}
}

/// Decoded `getMatchInfo` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInfo {
	pub team_a: String,
	pub team_b: String,
	pub match_id: U256,
	pub current_ball: U256,
	pub total_balls: U256,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cursor_is_monotonic() {
		let mut handle = MatchHandle::new(1, "RCB", "CSK", Address::ZERO);
		assert_eq!(handle.next_ball().map(BallNumber::get), Some(1));

		handle.advance_to(BallNumber::new(5).unwrap());
		handle.advance_to(BallNumber::new(3).unwrap());
		assert_eq!(handle.cursor, 5);
		assert_eq!(handle.next_ball().map(BallNumber::get), Some(6));

		handle.advance_to(BallNumber::LAST);
		assert_eq!(handle.next_ball(), None);
	}
}
