//! Kraken: REST v0 for metadata and snapshots, WebSocket v2 for streams.

mod feeds;
mod trading;
pub mod wire;

use std::sync::Arc;

use super::{Adapter, Venue, client, endpoint};
use crate::auth;
use crate::config::Options;
use crate::transport::HttpHelper;
use crate::{ConfluenceError, Result};

pub use feeds::{BookFeed, CandlesFeed, Pairs, QuotesFeed, TradesFeed};
pub use trading::KrakenTrading;

pub const REST_URL: &str = "https://api.kraken.com";
pub const WS_URL: &str = "wss://ws.kraken.com/v2";
pub const WS_AUTH_URL: &str = "wss://ws-auth.kraken.com/v2";

/// Builds the Kraken adapter.
///
/// A WebSocket override replaces both the public and the private URL.
///
/// # Errors
///
/// Returns [`ConfluenceError::Config`] if the candle interval is not a
/// Kraken OHLC interval.
pub fn adapter(options: &Options) -> Result<Adapter> {
    let settings = &options.settings;
    let seconds = settings.candle_interval.as_secs();
    let minutes = seconds / 60;
    if seconds % 60 != 0 || !feeds::CANDLE_MINUTES.contains(&minutes) {
        return Err(ConfluenceError::Config(format!(
            "kraken has no {seconds}s candle interval"
        )));
    }

    let rest = endpoint(options.endpoints.rest.as_ref(), REST_URL);
    let ws = endpoint(options.endpoints.ws.as_ref(), WS_URL);
    let ws_auth = endpoint(options.endpoints.ws.as_ref(), WS_AUTH_URL);

    let http = HttpHelper::new(rest, client(options, Venue::Kraken)?);
    let private = http
        .clone()
        .with_credentials(options.credentials.clone(), auth::kraken());

    Ok(Adapter {
        venue: Venue::Kraken,
        http,
        symbols: Arc::new(Pairs),
        orders: Arc::new(BookFeed {
            ws_url: ws.clone(),
            depth: settings.book_depth,
        }),
        trades: Arc::new(TradesFeed { ws_url: ws.clone() }),
        quotes: Arc::new(QuotesFeed { ws_url: ws.clone() }),
        candles: Arc::new(CandlesFeed { ws_url: ws, minutes }),
        trading: Some(trading::api(private, ws_auth)),
    })
}
