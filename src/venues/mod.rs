//! Concrete venue adapters and the factory that selects them by name.
//!
//! Every adapter hands out the same set of seams: a [`SymbolSource`],
//! one [`Feed`] per market-data kind and, where the venue supports it, a
//! [`TradingApi`]. Adapters own no runtime state; the providers do.

pub mod binance;
pub mod bitfinex;
pub mod gateio;
pub mod kraken;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Options;
use crate::models::{Candle, OrderBook, Quote, Trade};
use crate::provider::SymbolSource;
use crate::stream::Feed;
use crate::trading::TradingApi;
use crate::transport::{HttpHelper, proxy};
use crate::{ConfluenceError, Result};

/// A supported venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    Binance,
    Bitfinex,
    GateIo,
    Kraken,
}

impl Venue {
    pub const ALL: [Venue; 4] = [Venue::Binance, Venue::Bitfinex, Venue::GateIo, Venue::Kraken];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Bitfinex => "bitfinex",
            Venue::GateIo => "gateio",
            Venue::Kraken => "kraken",
        }
    }

    /// Builds the adapter for this venue.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::Config`] for settings the venue cannot
    /// express (e.g. an unsupported candle interval) or the HTTP client
    /// error from the proxy provider.
    pub fn adapter(&self, options: &Options) -> Result<Adapter> {
        match self {
            Venue::Binance => binance::adapter(options),
            Venue::Bitfinex => bitfinex::adapter(options),
            Venue::GateIo => gateio::adapter(options),
            Venue::Kraken => kraken::adapter(options),
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = ConfluenceError;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "bitfinex" => Ok(Venue::Bitfinex),
            "gate" | "gateio" | "gate.io" => Ok(Venue::GateIo),
            "kraken" => Ok(Venue::Kraken),
            _ => Err(ConfluenceError::UnknownVenue(name.to_string())),
        }
    }
}

/// The seams one venue provides.
pub struct Adapter {
    pub venue: Venue,
    /// Public REST helper shared by the feeds.
    pub http: HttpHelper,
    pub symbols: Arc<dyn SymbolSource>,
    pub orders: Arc<dyn Feed<Item = OrderBook>>,
    pub trades: Arc<dyn Feed<Item = Vec<Trade>>>,
    pub quotes: Arc<dyn Feed<Item = Quote>>,
    pub candles: Arc<dyn Feed<Item = Vec<Candle>>>,
    /// `None` for venues without a private API.
    pub trading: Option<Arc<dyn TradingApi>>,
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("venue", &self.venue)
            .field("http", &self.http)
            .field("trading", &self.trading.is_some())
            .finish_non_exhaustive()
    }
}

/// HTTP client for `venue`, from the configured proxy provider if any.
pub(crate) fn client(options: &Options, venue: Venue) -> Result<reqwest::Client> {
    match &options.proxy {
        Some(provider) => provider.client(venue.as_str()),
        None => proxy::default_client(),
    }
}

/// Returns the override if set, otherwise the venue default.
pub(crate) fn endpoint(configured: Option<&String>, default: &str) -> String {
    configured.map_or_else(|| default.to_string(), |url| url.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("Kraken".parse::<Venue>().unwrap(), Venue::Kraken);
        assert_eq!("BINANCE".parse::<Venue>().unwrap(), Venue::Binance);
        for name in ["gate", "gateio", "Gate.io"] {
            assert_eq!(name.parse::<Venue>().unwrap(), Venue::GateIo);
        }
        assert!(matches!(
            "mtgox".parse::<Venue>(),
            Err(ConfluenceError::UnknownVenue(name)) if name == "mtgox"
        ));
    }

    #[test]
    fn display_round_trips() {
        for venue in Venue::ALL {
            assert_eq!(venue.to_string().parse::<Venue>().unwrap(), venue);
        }
    }

    #[test]
    fn endpoint_override_wins() {
        let custom = "http://127.0.0.1:8080/".to_string();
        assert_eq!(endpoint(Some(&custom), "https://api"), "http://127.0.0.1:8080");
        assert_eq!(endpoint(None, "https://api"), "https://api");
    }
}
