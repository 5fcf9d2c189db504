//! OHLCV candles.

use serde::{Deserialize, Serialize};

use super::event::Payload;

/// One OHLCV bar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    /// Start of the bar in milliseconds since epoch.
    pub timestamp: i64,
    /// Bar length in seconds.
    pub discretization: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Payload for Candle {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}
