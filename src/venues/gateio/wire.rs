//! Gate.io spot API v4 responses.

use serde::Deserialize;
use serde_json::Value;

use crate::{ConfluenceError, Result};

#[derive(Debug, Deserialize)]
pub struct CurrencyPair {
    pub id: String,
    pub base: String,
    pub quote: String,
    /// Taker fee in percent.
    pub fee: String,
    pub min_base_amount: Option<String>,
    pub max_base_amount: Option<String>,
    pub amount_precision: u32,
    pub precision: u32,
    pub trade_status: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderBook {
    pub id: Option<u64>,
    pub asks: Vec<[String; 2]>,
    pub bids: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
pub struct TradeRow {
    pub id: String,
    pub create_time_ms: String,
    /// Taker side.
    pub side: String,
    pub amount: String,
    pub price: String,
}

#[derive(Debug, Deserialize)]
pub struct Ticker {
    pub currency_pair: String,
    pub last: String,
    /// Percent change over 24h.
    pub change_percentage: String,
    pub base_volume: String,
    pub quote_volume: String,
    pub high_24h: String,
    pub low_24h: String,
}

/// `[unix seconds, quote volume, close, high, low, open, base volume,
/// window closed]`; every element is a string.
#[derive(Debug, Deserialize)]
pub struct Candlestick(pub Vec<Value>);

impl Candlestick {
    /// Returns the string element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::Mapping`] when it is absent or not a
    /// string.
    pub fn field(&self, index: usize, name: &'static str) -> Result<&str> {
        self.0
            .get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| ConfluenceError::mapping(name, "missing"))
    }
}

pub mod candle {
    pub const TIME: usize = 0;
    pub const CLOSE: usize = 2;
    pub const HIGH: usize = 3;
    pub const LOW: usize = 4;
    pub const OPEN: usize = 5;
    pub const BASE_VOLUME: usize = 6;
}
