//! Ball state machine and persisted sequence checkpoints.

pub mod store;
pub mod transitions;

pub use store::{BallRecord, MatchRecord, MatchStore, StoreError};
pub use transitions::BallTransition;
