//! Executed trades.

use serde::{Deserialize, Serialize};

use super::Side;
use super::event::Payload;
use super::symbol::Symbol;

/// A single executed trade, public or own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue-unique trade id.
    pub id: String,
    /// Order that produced the fill (own trades only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<f64>,
    /// Execution time in milliseconds since epoch.
    pub timestamp: i64,
}

impl Payload for Trade {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

/// Selects a page of own trades.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeFilter {
    pub symbol: Option<Symbol>,
    /// Only trades with an id at or after this one.
    pub from_id: Option<String>,
    /// Only trades at or after this time (ms).
    pub since: Option<i64>,
    /// Page size; venues clamp to their own maximum.
    pub limit: Option<usize>,
    /// Position of the page for venues that page by offset.
    pub offset: Option<usize>,
}

impl TradeFilter {
    #[must_use]
    pub fn for_symbol(symbol: Symbol) -> Self {
        Self {
            symbol: Some(symbol),
            ..Self::default()
        }
    }
}
