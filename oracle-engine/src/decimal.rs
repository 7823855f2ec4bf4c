//! Strict decimal parsing for provider replies (§3, §8).
//!
//! The chain validates the reported decimal byte-for-byte, so the daemon
//! parses values only to compare and select among them — it never reformats
//! or averages them. `BigDecimal` gives exact (non-float) comparison.

use bigdecimal::BigDecimal;
use std::str::FromStr;

use crate::errors::OracleError;

/// Parses `raw` as a finite decimal. Fractional notation (anything
/// containing `/`) is rejected, as is the empty string.
pub fn parse_decimal(raw: &str) -> Result<BigDecimal, OracleError> {
    if raw.is_empty() {
        return Err(OracleError::Malformed("empty decimal string".to_string()));
    }
    if raw.contains('/') {
        return Err(OracleError::Malformed(format!("fractional notation rejected: {raw}")));
    }
    BigDecimal::from_str(raw)
        .map_err(|e| OracleError::Malformed(format!("could not parse '{raw}' as decimal: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_fraction() {
        assert!(parse_decimal("1/3").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_decimal("").is_err());
    }

    #[test]
    fn accepts_simple_decimal() {
        assert!(parse_decimal("1.25").is_ok());
    }

    #[test]
    fn accepts_small_decimal() {
        assert!(parse_decimal("0.0000001").is_ok());
    }

    #[test]
    fn rejects_non_decimal_text() {
        assert!(parse_decimal("abc").is_err());
    }

    #[test]
    fn exact_comparison_is_not_float_rounding() {
        let a = parse_decimal("0.1").unwrap();
        let b = parse_decimal("0.1000").unwrap();
        assert_eq!(a, b);
    }
}
