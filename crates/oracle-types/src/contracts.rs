//! Solidity bindings for the cricket betting contracts.
//!
//! The factory deploys one game contract per match; the game contract holds
//! the per-ball betting windows. Only the call/result contract is modelled
//! here, the pooling and payout rules live on-chain.

use crate::{Address, BallNumber, BallOutcome, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize};

sol! {
	/// Factory that deploys a game contract per match.
	interface ICricketBettingFactory {
		event GameCreated(address indexed gameAddress, string teamA, string teamB, uint256 matchId);

		function createGame(string teamA, string teamB, uint256 matchId) external returns (address gameAddress);
		function removeGame(address gameAddress) external;
		function getActiveGames() external view returns (address[] games);
	}

	/// Per-match game contract.
	interface ICricketBettingGame {
		event BallOpened(uint256 indexed ballNumber);
		event BallClosed(uint256 indexed ballNumber);
		event BallResultReported(uint256 indexed ballNumber, uint8 outcome);
		event BallCancelled(uint256 indexed ballNumber, string reason);
		event EmergencyPaused();

		function openBall(uint256 ballNumber) external;
		function closeBall(uint256 ballNumber) external;
		function reportBallResult(uint256 ballNumber, uint8 outcome) external;
		function cancelBall(uint256 ballNumber, string reason) external;
		function emergencyPause() external;

		function getMatchInfo() external view returns (string teamA, string teamB, uint256 matchId, uint256 currentBall, uint256 totalBalls);
		function getBallInfo(uint256 ballNumber) external view returns (uint8 state, uint8 result, uint256 totalPool, uint256[6] bets, uint256 bettorCount, bool distributed, bool refunded);
	}
}

/// A decoded event emitted by the factory or a game contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum MatchContractEvent {
	GameCreated {
		game_address: Address,
		team_a: String,
		team_b: String,
		match_id: String,
	},
	BallOpened {
		ball: u32,
	},
	BallClosed {
		ball: u32,
	},
	BallResultReported {
		ball: u32,
		outcome: BallOutcome,
	},
	BallCancelled {
		ball: u32,
		reason: String,
	},
	EmergencyPaused,
}

fn ball_from_u256(value: alloy::primitives::U256) -> u32 {
	value.try_into().unwrap_or(u32::MAX)
}

/// Decodes every recognised factory/game event in `logs`.
///
/// Logs with unknown signatures are skipped; they are not an error because a
/// receipt may carry logs from unrelated contracts.
pub fn decode_match_events(logs: &[Log]) -> Vec<MatchContractEvent> {
	use ICricketBettingFactory::GameCreated;
	use ICricketBettingGame::{
		BallCancelled, BallClosed, BallOpened, BallResultReported, EmergencyPaused,
	};

	logs.iter()
		.filter_map(|log| {
			let topic0 = *log.data.topics().first()?;
			let data = &log.data;

			if topic0 == GameCreated::SIGNATURE_HASH {
				let e = GameCreated::decode_log_data(data).ok()?;
				Some(MatchContractEvent::GameCreated {
					game_address: e.gameAddress,
					team_a: e.teamA,
					team_b: e.teamB,
					match_id: e.matchId.to_string(),
				})
			} else if topic0 == BallOpened::SIGNATURE_HASH {
				let e = BallOpened::decode_log_data(data).ok()?;
				Some(MatchContractEvent::BallOpened {
					ball: ball_from_u256(e.ballNumber),
				})
			} else if topic0 == BallClosed::SIGNATURE_HASH {
				let e = BallClosed::decode_log_data(data).ok()?;
				Some(MatchContractEvent::BallClosed {
					ball: ball_from_u256(e.ballNumber),
				})
			} else if topic0 == BallResultReported::SIGNATURE_HASH {
				let e = BallResultReported::decode_log_data(data).ok()?;
				Some(MatchContractEvent::BallResultReported {
					ball: ball_from_u256(e.ballNumber),
					outcome: BallOutcome::from_code(e.outcome)?,
				})
			} else if topic0 == BallCancelled::SIGNATURE_HASH {
				let e = BallCancelled::decode_log_data(data).ok()?;
				Some(MatchContractEvent::BallCancelled {
					ball: ball_from_u256(e.ballNumber),
					reason: e.reason,
				})
			} else if topic0 == EmergencyPaused::SIGNATURE_HASH {
				Some(MatchContractEvent::EmergencyPaused)
			} else {
				None
			}
		})
		.collect()
}

/// Finds the address of the game deployed by `factory` in a creation receipt.
pub fn find_created_game(logs: &[Log], factory: Address) -> Option<Address> {
	logs.iter()
		.filter(|log| log.address == factory)
		.find_map(|log| {
			ICricketBettingFactory::GameCreated::decode_log_data(&log.data)
				.ok()
				.map(|e| e.gameAddress)
		})
}

/// Human-readable label for a ball transition call.
pub fn ball_call_label(function: &str, ball: BallNumber) -> String {
	format!("{}({})", function, ball)
}
