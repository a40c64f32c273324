//! Human-readable amount parsing into integer atomic units.
//!
//! All financial comparisons in this engine are over integers in the
//! asset's smallest unit. This module is the only place a decimal string
//! (e.g. a configured price of `"0.05"`) is converted; past this point no
//! floating point is involved.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Error parsing a decimal amount string into atomic units.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    /// The string is not a valid decimal number.
    #[error("invalid decimal amount: {0}")]
    InvalidDecimal(String),
    /// The amount is negative.
    #[error("amount must not be negative: {0}")]
    Negative(String),
    /// More fractional digits than the asset supports.
    #[error("amount {amount} has more than {decimals} decimal places")]
    ExcessPrecision {
        /// The offending input.
        amount: String,
        /// Decimal places the asset supports.
        decimals: u8,
    },
    /// The value does not fit in a `u64` after scaling.
    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

/// Parses a decimal string into atomic units for an asset with the given
/// number of decimal places.
///
/// `parse_atomic("10.50", 6)` yields `10_500_000`.
///
/// # Errors
///
/// Returns [`AmountParseError`] on malformed, negative, over-precise, or
/// out-of-range input.
pub fn parse_atomic(input: &str, decimals: u8) -> Result<u64, AmountParseError> {
    let value: Decimal = input
        .trim()
        .parse()
        .map_err(|_| AmountParseError::InvalidDecimal(input.to_owned()))?;

    if value.is_sign_negative() && !value.is_zero() {
        return Err(AmountParseError::Negative(input.to_owned()));
    }
    if value.scale() > u32::from(decimals) {
        // Reject silently-lossy input rather than rounding someone's money.
        let normalized = value.normalize();
        if normalized.scale() > u32::from(decimals) {
            return Err(AmountParseError::ExcessPrecision {
                amount: input.to_owned(),
                decimals,
            });
        }
    }

    let scaled = value
        .checked_mul(Decimal::from(10u64.pow(u32::from(decimals))))
        .ok_or_else(|| AmountParseError::OutOfRange(input.to_owned()))?;
    scaled
        .normalize()
        .to_u64()
        .ok_or_else(|| AmountParseError::OutOfRange(input.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(parse_atomic("10.50", 6).unwrap(), 10_500_000);
        assert_eq!(parse_atomic("0.05", 6).unwrap(), 50_000);
        assert_eq!(parse_atomic("1", 9).unwrap(), 1_000_000_000);
        assert_eq!(parse_atomic("0", 6).unwrap(), 0);
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(matches!(
            parse_atomic("-1.5", 6),
            Err(AmountParseError::Negative(_))
        ));
        assert!(matches!(
            parse_atomic("abc", 6),
            Err(AmountParseError::InvalidDecimal(_))
        ));
    }

    #[test]
    fn rejects_excess_precision() {
        assert!(matches!(
            parse_atomic("0.1234567", 6),
            Err(AmountParseError::ExcessPrecision { .. })
        ));
        // Trailing zeros beyond the scale are not a precision loss.
        assert_eq!(parse_atomic("0.1234500", 6).unwrap(), 123_450);
    }
}
