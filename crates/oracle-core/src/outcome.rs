//! Where ball outcomes come from during a sequence run.

use oracle_types::{BallNumber, BallOutcome, UnknownOutcome};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Supplies the outcome to report for each ball of a sequence.
///
/// Returning `None` ends the sequence before `ball` is opened.
pub trait OutcomeSource: Send {
	fn next_outcome(&mut self, ball: BallNumber) -> Option<BallOutcome>;
}

/// Replays a fixed list of outcomes in order.
#[derive(Debug, Clone, Default)]
pub struct FixedOutcomes {
	queue: VecDeque<BallOutcome>,
}

impl FixedOutcomes {
	pub fn new(outcomes: impl IntoIterator<Item = BallOutcome>) -> Self {
		Self {
			queue: outcomes.into_iter().collect(),
		}
	}

	/// Parses outcome names or codes, e.g. `["boundary", "3"]`.
	pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, UnknownOutcome> {
		let outcomes = names
			.iter()
			.map(|n| n.as_ref().trim().parse::<BallOutcome>())
			.collect::<Result<Vec<_>, _>>()?;
		if let Some(pending) = outcomes.iter().find(|o| !o.is_reportable()) {
			return Err(UnknownOutcome(pending.to_string()));
		}
		Ok(Self::new(outcomes))
	}

	pub fn remaining(&self) -> usize {
		self.queue.len()
	}
}

impl OutcomeSource for FixedOutcomes {
	fn next_outcome(&mut self, _ball: BallNumber) -> Option<BallOutcome> {
		self.queue.pop_front()
	}
}

/// Draws uniformly from the six reportable outcomes.
pub struct RandomOutcomes {
	rng: StdRng,
}

impl RandomOutcomes {
	/// A fixed `seed` makes the draw reproducible.
	pub fn new(seed: Option<u64>) -> Self {
		let rng = match seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_os_rng(),
		};
		Self { rng }
	}
}

impl OutcomeSource for RandomOutcomes {
	fn next_outcome(&mut self, _ball: BallNumber) -> Option<BallOutcome> {
		let index = self.rng.random_range(0..BallOutcome::REPORTABLE.len());
		Some(BallOutcome::REPORTABLE[index])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_fixed_outcomes_run_out() {
		let mut source = FixedOutcomes::from_names(&["boundary", "WICKET", "3"]).unwrap();
		let ball = BallNumber::FIRST;
		assert_eq!(source.next_outcome(ball), Some(BallOutcome::Boundary));
		assert_eq!(source.next_outcome(ball), Some(BallOutcome::Wicket));
		assert_eq!(source.next_outcome(ball), Some(BallOutcome::DotBall));
		assert_eq!(source.next_outcome(ball), None);
	}

	#[test]
	fn test_fixed_outcomes_reject_pending() {
		assert!(FixedOutcomes::from_names(&["pending"]).is_err());
		assert!(FixedOutcomes::from_names(&["six"]).is_err());
	}

	#[test]
	fn test_seeded_random_is_reproducible() {
		let mut a = RandomOutcomes::new(Some(7));
		let mut b = RandomOutcomes::new(Some(7));
		for n in 1..=20 {
			let ball = BallNumber::new(n).unwrap();
			let outcome = a.next_outcome(ball).unwrap();
			assert!(outcome.is_reportable());
			assert_eq!(Some(outcome), b.next_outcome(ball));
		}
	}
}
