//! Numeric field parsing shared by the venue mappers.
//!
//! Venues ship prices and amounts as decimal strings. Values are parsed
//! through [`Decimal`] and converted to `f64` only at the model boundary.
//! A field that fails to parse drops the level it belongs to, never the
//! whole frame.

use std::str::FromStr;

use chrono::DateTime;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::warn;

use crate::models::{Order, Side};
use crate::{ConfluenceError, Result};

/// Parses a decimal string (plain or scientific notation) into `f64`.
///
/// # Errors
///
/// Returns [`ConfluenceError::Mapping`] if `raw` is not a number.
pub fn number(field: &'static str, raw: &str) -> Result<f64> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
        .and_then(|d| d.to_f64())
        .ok_or_else(|| ConfluenceError::mapping(field, raw))
}

/// Converts an already-decoded decimal into `f64`.
///
/// # Errors
///
/// Returns [`ConfluenceError::Mapping`] if the value is out of range.
pub fn decimal(field: &'static str, value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| ConfluenceError::mapping(field, value.to_string()))
}

/// Parses an RFC 3339 timestamp into milliseconds since epoch.
///
/// # Errors
///
/// Returns [`ConfluenceError::Mapping`] if `raw` is not RFC 3339.
pub fn rfc3339_millis(field: &'static str, raw: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| ConfluenceError::mapping(field, raw))
}

/// Converts fractional seconds (e.g. `"1688671955.5732"`) to milliseconds.
///
/// # Errors
///
/// Returns [`ConfluenceError::Mapping`] if `raw` is not a number.
pub fn seconds_millis(field: &'static str, raw: &str) -> Result<i64> {
    let seconds = Decimal::from_str(raw.trim()).map_err(|_| ConfluenceError::mapping(field, raw))?;
    (seconds * Decimal::ONE_THOUSAND)
        .trunc()
        .to_i64()
        .ok_or_else(|| ConfluenceError::mapping(field, raw))
}

/// Maps `[price, amount]` string pairs into book levels.
///
/// Levels whose price or amount does not parse are logged and skipped.
pub fn levels<S: AsRef<str>>(symbol: &str, side: Side, raw: &[[S; 2]]) -> Vec<Order> {
    raw.iter()
        .filter_map(|[price, amount]| {
            match (
                number("price", price.as_ref()),
                number("amount", amount.as_ref()),
            ) {
                (Ok(price), Ok(amount)) => Some(Order::new(symbol, side, price, amount)),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(symbol, side = side.as_str(), error = %e, "Dropping book level");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parses_plain_and_scientific() {
        assert_eq!(number("price", "0.0024").unwrap(), 0.0024);
        assert_eq!(number("price", "1e-8").unwrap(), 0.00000001);
        assert_eq!(number("amount", " 42 ").unwrap(), 42.0);
    }

    #[test]
    fn rejects_sentinels() {
        let err = number("price", "n/a").unwrap_err();
        assert!(matches!(err, ConfluenceError::Mapping { field: "price", .. }));
        assert!(number("price", "").is_err());
    }

    #[test]
    fn decimal_converts() {
        assert_eq!(decimal("qty", dec!(1.25)).unwrap(), 1.25);
    }

    #[test]
    fn timestamps_to_millis() {
        assert_eq!(
            rfc3339_millis("timestamp", "2024-01-15T10:30:00.123456Z").unwrap(),
            1_705_314_600_123
        );
        assert_eq!(seconds_millis("time", "1688671955.5732").unwrap(), 1_688_671_955_573);
        assert!(seconds_millis("time", "soon").is_err());
    }

    #[test]
    fn bad_level_is_dropped_not_frame() {
        let raw = [["100", "1.0"], ["n/a", "2.0"], ["99", "0"]];
        let orders = levels("BTC-USDT", Side::Buy, &raw);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].price, 100.0);
        assert!(orders[1].remove);
    }
}
