//! Ball transitions and the phases each may start from.
//!
//! The ledger enforces the same rules; checking them locally against a
//! freshly read phase avoids paying for a transaction that must revert.

use once_cell::sync::Lazy;
use oracle_types::BallPhase;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A phase-changing call on a ball.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BallTransition {
	Open,
	Close,
	Report,
	Cancel,
}

// Static transition table - each transition maps to the phases it may leave
static PREDECESSORS: Lazy<HashMap<BallTransition, HashSet<BallPhase>>> = Lazy::new(|| {
	let mut m = HashMap::new();
	m.insert(BallTransition::Open, HashSet::from([BallPhase::Closed]));
	m.insert(BallTransition::Close, HashSet::from([BallPhase::Open]));
	m.insert(BallTransition::Report, HashSet::from([BallPhase::Closed]));
	m.insert(
		BallTransition::Cancel,
		HashSet::from([BallPhase::Closed, BallPhase::Open]),
	);
	m
});

impl BallTransition {
	/// Phase the ball is in once this transition confirms.
	pub fn target(self) -> BallPhase {
		match self {
			Self::Open => BallPhase::Open,
			Self::Close => BallPhase::Closed,
			Self::Report => BallPhase::Resolved,
			Self::Cancel => BallPhase::Cancelled,
		}
	}

	/// Game contract function issuing this transition.
	pub fn function(self) -> &'static str {
		match self {
			Self::Open => "openBall",
			Self::Close => "closeBall",
			Self::Report => "reportBallResult",
			Self::Cancel => "cancelBall",
		}
	}

	pub fn allowed_from(self, phase: BallPhase) -> bool {
		PREDECESSORS
			.get(&self)
			.is_some_and(|set| set.contains(&phase))
	}

	/// Phases this transition may start from, in code order.
	pub fn predecessors(self) -> Vec<BallPhase> {
		let mut phases: Vec<_> = PREDECESSORS
			.get(&self)
			.map(|set| set.iter().copied().collect())
			.unwrap_or_default();
		phases.sort_by_key(|p| p.code());
		phases
	}
}

impl fmt::Display for BallTransition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.function())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const ALL: [BallTransition; 4] = [
		BallTransition::Open,
		BallTransition::Close,
		BallTransition::Report,
		BallTransition::Cancel,
	];

	#[test]
	fn test_terminal_phases_accept_nothing() {
		for transition in ALL {
			assert!(!transition.allowed_from(BallPhase::Resolved));
			assert!(!transition.allowed_from(BallPhase::Cancelled));
		}
	}

	#[test]
	fn test_table() {
		assert!(BallTransition::Open.allowed_from(BallPhase::Closed));
		assert!(!BallTransition::Open.allowed_from(BallPhase::Open));
		assert!(BallTransition::Close.allowed_from(BallPhase::Open));
		assert!(!BallTransition::Report.allowed_from(BallPhase::Open));
		assert_eq!(
			BallTransition::Cancel.predecessors(),
			vec![BallPhase::Closed, BallPhase::Open]
		);
		assert_eq!(BallTransition::Report.target(), BallPhase::Resolved);
	}
}
