//! Display helpers shared by the orchestrator and the CLI.

use alloy_primitives::U256;

/// Truncates a hex identifier for log output.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Formats a raw on-chain amount with the given number of decimals.
///
/// Trailing zeros of the fractional part are dropped, so `1.500` renders as `1.5`
/// and whole amounts render without a decimal point.
pub fn format_units(amount: U256, decimals: u8) -> String {
	let digits = amount.to_string();
	if decimals == 0 {
		return digits;
	}

	let places = decimals as usize;
	let (integer, fraction) = if digits.len() <= places {
		("0".to_string(), format!("{:0>width$}", digits, width = places))
	} else {
		let split = digits.len() - places;
		(digits[..split].to_string(), digits[split..].to_string())
	};

	let fraction = fraction.trim_end_matches('0');
	if fraction.is_empty() {
		integer
	} else {
		format!("{}.{}", integer, fraction)
	}
}
