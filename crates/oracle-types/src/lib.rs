//! Common types module for the cricket oracle.
//!
//! This module defines the data model shared by every oracle component:
//! contract calls and transactions flowing down to the ledger, receipts and
//! submission results flowing back up, and the ball/match views the
//! orchestrator keeps in sync with the on-chain game contract.

/// Ball-level types: numbers, phases, outcomes and on-chain ball info.
pub mod ball;
/// Solidity bindings for the factory and game contracts.
pub mod contracts;
/// Transaction delivery types for ledger interactions.
pub mod delivery;
/// Event types published by the orchestrator.
pub mod events;
/// Match-level types: handles and on-chain match info.
pub mod matches;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Redacting wrapper for key material.
pub mod secret_string;
/// Storage namespaces.
pub mod storage;
/// Utility functions for display formatting.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use alloy::primitives::{Address, Bytes, Log, B256, U256};
pub use ball::*;
pub use contracts::{decode_match_events, MatchContractEvent};
pub use delivery::*;
pub use events::*;
pub use matches::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use storage::StorageKey;
pub use utils::{format_ether, truncate_id, with_0x_prefix};
pub use validation::*;
