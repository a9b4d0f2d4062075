//! Wei ↔ ether rendering.

use alloy_primitives::U256;

const WEI_DECIMALS: usize = 18;

/// Render a wei amount in ether with trailing zeros trimmed,
/// always keeping one fractional digit (`0.0`, `1.5`, `0.000000000000000001`).
pub fn format_ether(wei: U256) -> String {
    let digits = wei.to_string();
    let padded = format!("{digits:0>width$}", width = WEI_DECIMALS + 1);
    let (whole, frac) = padded.split_at(padded.len() - WEI_DECIMALS);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{frac}")
    }
}

/// [`format_ether`] for a decimal wei string; `None` if it does not parse.
pub fn format_ether_str(wei: &str) -> Option<String> {
    U256::from_str_radix(wei, 10).ok().map(format_ether)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats() {
        assert_eq!(format_ether(U256::ZERO), "0.0");
        assert_eq!(format_ether(U256::from(1_500_000_000_000_000_000u128)), "1.5");
        assert_eq!(format_ether(U256::from(1u64)), "0.000000000000000001");
        assert_eq!(format_ether(U256::from(42_000_000_000_000_000_000u128)), "42.0");
        assert_eq!(format_ether_str("250000000000000000").as_deref(), Some("0.25"));
        assert_eq!(format_ether_str("nope"), None);
    }
}
