//! Transaction delivery types for the oracle.
//!
//! This module defines the values that travel through the submission
//! pipeline: an intended contract call, the fully parameterized transaction
//! built from it, the signed payload handed to the chain client, and the
//! receipt and classified result that come back.

use crate::{Address, Bytes, Log, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub B256);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

/// Transaction receipt containing execution details.
///
/// Provides information about a transaction after it has been included in a block,
/// including its success status and the logs it emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	/// The hash of the transaction.
	pub hash: TransactionHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
	/// Gas consumed by the transaction.
	pub gas_used: u64,
	/// Logs emitted during execution.
	#[serde(default)]
	pub logs: Vec<Log>,
}

/// An intended contract call, before any account or fee data is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
	/// Target contract.
	pub to: Address,
	/// ABI-encoded calldata, selector first.
	pub data: Bytes,
	/// Native value sent with the call, in wei.
	pub value: U256,
	/// Human-readable label such as `openBall(3)`, used in logs and records.
	pub function: String,
	/// Fixed gas limit; when absent the builder estimates one.
	pub gas_limit: Option<u64>,
}

impl ContractCall {
	pub fn new(to: Address, function: impl Into<String>, data: impl Into<Bytes>) -> Self {
		Self {
			to,
			data: data.into(),
			value: U256::ZERO,
			function: function.into(),
			gas_limit: None,
		}
	}

	/// A plain value transfer with no calldata.
	pub fn transfer(to: Address, value: U256) -> Self {
		Self {
			to,
			data: Bytes::new(),
			value,
			function: "transfer".to_string(),
			gas_limit: None,
		}
	}

	pub fn with_value(mut self, value: U256) -> Self {
		self.value = value;
		self
	}

	pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
		self.gas_limit = Some(gas_limit);
		self
	}

	/// The 4-byte function selector, if the calldata carries one.
	pub fn selector(&self) -> Option<[u8; 4]> {
		self.data.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
	}
}

/// A fully parameterized, unsigned transaction.
///
/// Produced by the transaction builder and consumed exactly once by the
/// submission pipeline. Nonce and gas price are only valid briefly, so these
/// are never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
	pub chain_id: u64,
	pub from: Address,
	pub to: Address,
	pub data: Bytes,
	pub value: U256,
	pub nonce: u64,
	/// Legacy gas price in wei.
	pub gas_price: u128,
	pub gas_limit: u64,
	pub function: String,
}

/// A signed transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
	/// Hash of the signed envelope; the ledger will report it under this id.
	pub hash: TransactionHash,
	/// EIP-2718 encoded bytes for `eth_sendRawTransaction`.
	pub raw: Bytes,
	/// The transaction that was signed.
	pub transaction: PendingTransaction,
}

/// Why a submission never reached a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum RejectReason {
	/// The dry-run reverted; nothing was submitted.
	Estimation(String),
	/// Transport failure talking to the ledger. Retryable with a fresh nonce.
	Network(String),
	/// The node answered and refused the transaction, e.g. for insufficient
	/// funds or a stale nonce. Not retryable as is.
	Refused(String),
	/// The account could not sign the transaction.
	Signing(String),
}

impl fmt::Display for RejectReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Estimation(e) => write!(f, "estimation failed: {}", e),
			Self::Network(e) => write!(f, "network error: {}", e),
			Self::Refused(e) => write!(f, "refused by node: {}", e),
			Self::Signing(e) => write!(f, "signing failed: {}", e),
		}
	}
}

/// Classified outcome of one pipeline execution. Terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SubmissionResult {
	/// Included in a block with success status.
	Confirmed {
		tx_hash: TransactionHash,
		nonce: u64,
		receipt: TransactionReceipt,
	},
	/// Included in a block but execution reverted. Authoritative.
	Reverted {
		tx_hash: TransactionHash,
		nonce: u64,
		receipt: TransactionReceipt,
	},
	/// Broadcast, but no receipt was observed within the timeout.
	/// The transaction may still land.
	TimedOut { tx_hash: TransactionHash, nonce: u64 },
	/// Never broadcast, or the broadcast itself failed.
	Rejected {
		tx_hash: Option<TransactionHash>,
		reason: RejectReason,
	},
}

impl SubmissionResult {
	pub fn tx_hash(&self) -> Option<TransactionHash> {
		match self {
			Self::Confirmed { tx_hash, .. }
			| Self::Reverted { tx_hash, .. }
			| Self::TimedOut { tx_hash, .. } => Some(*tx_hash),
			Self::Rejected { tx_hash, .. } => *tx_hash,
		}
	}

	pub fn receipt(&self) -> Option<&TransactionReceipt> {
		match self {
			Self::Confirmed { receipt, .. } | Self::Reverted { receipt, .. } => Some(receipt),
			_ => None,
		}
	}

	pub fn block_number(&self) -> Option<u64> {
		self.receipt().map(|r| r.block_number)
	}

	pub fn is_confirmed(&self) -> bool {
		matches!(self, Self::Confirmed { .. })
	}

	/// Short classification label for logs and records.
	pub fn kind(&self) -> SubmissionKind {
		match self {
			Self::Confirmed { .. } => SubmissionKind::Confirmed,
			Self::Reverted { .. } => SubmissionKind::Reverted,
			Self::TimedOut { .. } => SubmissionKind::TimedOut,
			Self::Rejected { .. } => SubmissionKind::Rejected,
		}
	}
}

/// Outcome classes of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionKind {
	Confirmed,
	Reverted,
	TimedOut,
	Rejected,
}

impl fmt::Display for SubmissionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Confirmed => "confirmed",
			Self::Reverted => "reverted",
			Self::TimedOut => "timed_out",
			Self::Rejected => "rejected",
		};
		f.write_str(s)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_call_selector() {
		let call = ContractCall::new(Address::ZERO, "f()", vec![0xde, 0xad, 0xbe, 0xef, 0x01]);
		assert_eq!(call.selector(), Some([0xde, 0xad, 0xbe, 0xef]));

		let transfer = ContractCall::transfer(Address::ZERO, U256::from(1));
		assert_eq!(transfer.selector(), None);
	}

	#[test]
	fn test_hash_display_is_prefixed() {
		let hash = TransactionHash(B256::repeat_byte(0xab));
		let shown = hash.to_string();
		assert!(shown.starts_with("0xabab"));
		assert_eq!(shown.len(), 66);
	}

	#[test]
	fn test_rejected_without_hash() {
		let result = SubmissionResult::Rejected {
			tx_hash: None,
			reason: RejectReason::Estimation("execution reverted".into()),
		};
		assert_eq!(result.tx_hash(), None);
		assert_eq!(result.block_number(), None);
		assert_eq!(result.kind(), SubmissionKind::Rejected);
	}
}
