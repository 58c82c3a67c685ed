//! String formatting utilities.
//!
//! Hex prefix management, short ids for log lines, and wei amounts rendered
//! in ether for balance output.

use crate::U256;

/// Truncates a hex string for display purposes.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Adds "0x" prefix to a hex string if it doesn't already have one.
pub fn with_0x_prefix(hex_str: &str) -> String {
	if hex_str.to_lowercase().starts_with("0x") {
		hex_str.to_string()
	} else {
		format!("0x{}", hex_str)
	}
}

/// Formats a wei amount as ether with trailing zeros removed.
///
/// `1_500_000_000_000_000_000` becomes `"1.5"`, one wei becomes
/// `"0.000000000000000001"`.
pub fn format_ether(wei: U256) -> String {
	const DECIMALS: usize = 18;
	let amount = wei.to_string();

	let (integer_part, decimal_part) = if amount.len() <= DECIMALS {
		("0".to_string(), format!("{:0>width$}", amount, width = DECIMALS))
	} else {
		let split = amount.len() - DECIMALS;
		(amount[..split].to_string(), amount[split..].to_string())
	};

	let decimal_trimmed = decimal_part.trim_end_matches('0');
	if decimal_trimmed.is_empty() {
		integer_part
	} else {
		format!("{}.{}", integer_part, decimal_trimmed)
	}
}
