//! Ticker quotes.

use serde::{Deserialize, Serialize};

use super::event::Payload;

/// Rolling 24h ticker for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last: f64,
    pub high: f64,
    pub low: f64,
    /// Absolute price change over the window.
    pub change: f64,
    /// Relative change in percent.
    pub change_percent: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
}

impl Payload for Quote {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}
