//! The aggregation façade: one [`Exchange`] per venue, built by name.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Options;
use crate::provider::{
    CandlesProvider, OrdersProvider, QuotesProvider, SymbolsProvider, TradesProvider,
};
use crate::trading::Trading;
use crate::venues::Venue;
use crate::Result;

/// Every provider of one venue, wired to a shared cancellation root.
///
/// Dropping the exchange cancels every group, poller and private task it
/// started.
#[derive(Debug)]
pub struct Exchange {
    pub venue: Venue,
    pub symbols: SymbolsProvider,
    pub orders: OrdersProvider,
    pub trades: TradesProvider,
    pub quotes: QuotesProvider,
    pub candles: CandlesProvider,
    /// `None` for venues without a private API.
    pub trading: Option<Trading>,
    token: CancellationToken,
}

impl Exchange {
    /// Builds the providers for `options.name`.
    ///
    /// Must be called inside a Tokio runtime; nothing is spawned until a
    /// provider subscribes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::UnknownVenue`](crate::ConfluenceError::UnknownVenue)
    /// for an unsupported name, or the adapter's configuration error.
    pub fn new(options: &Options) -> Result<Self> {
        let venue: Venue = options.name.parse()?;
        let adapter = venue.adapter(options)?;
        let settings = &options.settings;
        let token = CancellationToken::new();

        let exchange = Self {
            venue,
            symbols: SymbolsProvider::new(adapter.symbols, adapter.http.clone(), &token),
            orders: OrdersProvider::new(adapter.orders, adapter.http.clone(), settings.clone(), &token),
            trades: TradesProvider::new(adapter.trades, adapter.http.clone(), settings.clone(), &token),
            quotes: QuotesProvider::new(adapter.quotes, adapter.http.clone(), settings.clone(), &token),
            candles: CandlesProvider::new(adapter.candles, adapter.http, settings.clone(), &token),
            trading: adapter
                .trading
                .map(|api| Trading::new(api, settings.clone(), &token)),
            token,
        };
        info!(
            venue = %venue,
            trading = exchange.trading.is_some(),
            private = options.credentials.is_some(),
            "Exchange ready"
        );
        Ok(exchange)
    }

    /// Stops everything this exchange started.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Builds an [`Exchange`] for the venue named in `options`.
///
/// # Errors
///
/// As [`Exchange::new`].
pub fn new(options: &Options) -> Result<Exchange> {
    Exchange::new(options)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ConfluenceError;
    use crate::config::Settings;

    #[tokio::test]
    async fn venues_build_by_name() {
        for name in ["kraken", "bitfinex", "binance", "gate.io"] {
            let exchange = new(&Options::new(name)).unwrap();
            assert_eq!(exchange.venue.to_string(), name.replace('.', ""));
        }
    }

    #[tokio::test]
    async fn gateio_has_no_trading() {
        let exchange = new(&Options::new("gateio")).unwrap();
        assert!(exchange.trading.is_none());
        assert_eq!(exchange.trades.shard_limit(), 10);

        let exchange = new(&Options::new("binance")).unwrap();
        assert!(exchange.trading.is_some());
    }

    #[tokio::test]
    async fn unknown_venue_is_rejected() {
        assert!(matches!(
            new(&Options::new("mtgox")),
            Err(ConfluenceError::UnknownVenue(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_candle_interval_is_a_config_error() {
        let settings = Settings {
            candle_interval: Duration::from_secs(7),
            ..Settings::default()
        };
        let options = Options::new("kraken").with_settings(settings);
        assert!(matches!(new(&options), Err(ConfluenceError::Config(_))));
    }
}
