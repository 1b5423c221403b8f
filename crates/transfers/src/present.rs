//! Display strings shared by the reporter and the dashboard. Aggregates
//! keep full precision; rounding happens only here.

use rust_decimal::{Decimal, RoundingStrategy};

/// Placeholder for a volume with no priced events behind it.
pub const NOT_AVAILABLE: &str = "n/a";
pub const UNKNOWN_CHAIN: &str = "unknown";

/// `$1,234.57`, or `n/a` when nothing was priced.
pub fn usd(value: Option<Decimal>) -> String {
    let Some(v) = value else {
        return NOT_AVAILABLE.to_string();
    };
    let rounded = v.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.2}", rounded.abs());
    let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), "00"));
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{sign}${}.{frac}", group_thousands(whole))
}

pub fn count(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let sign = if n < 0 { "-" } else { "" };
    format!("{sign}{}", group_thousands(&digits))
}

pub fn chain(name: Option<&str>) -> &str {
    name.filter(|n| !n.is_empty()).unwrap_or(UNKNOWN_CHAIN)
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usd_rounds_to_cents() {
        assert_eq!(usd(Some(Decimal::new(1_234_565, 3))), "$1,234.57");
        assert_eq!(usd(Some(Decimal::from(150))), "$150.00");
        assert_eq!(usd(Some(Decimal::new(-5, 1))), "-$0.50");
        assert_eq!(usd(Some(Decimal::from(1_000_000))), "$1,000,000.00");
    }

    #[test]
    fn test_missing_volume_is_not_zero() {
        assert_eq!(usd(None), "n/a");
        assert_eq!(usd(Some(Decimal::ZERO)), "$0.00");
    }

    #[test]
    fn test_count_and_chain() {
        assert_eq!(count(0), "0");
        assert_eq!(count(1234567), "1,234,567");
        assert_eq!(chain(None), "unknown");
        assert_eq!(chain(Some("")), "unknown");
        assert_eq!(chain(Some("osmosis")), "osmosis");
    }
}
