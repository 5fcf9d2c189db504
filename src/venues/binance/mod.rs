//! Binance spot: REST v3 plus combined WebSocket streams.

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
pub use trading::BinanceTrading;

pub const REST_URL: &str = "https://api.binance.com";
/// Stream host; public groups use `/stream`, the user stream `/ws/<key>`.
pub const WS_URL: &str = "wss://stream.binance.com:9443";

/// Builds the Binance adapter.
///
/// # Errors
///
/// Returns [`ConfluenceError::Config`] if the candle interval is not a
/// kline interval.
pub fn adapter(options: &Options) -> Result<Adapter> {
    let settings = &options.settings;
    let seconds = settings.candle_interval.as_secs();
    let interval = feeds::interval(seconds).ok_or_else(|| {
        ConfluenceError::Config(format!("binance has no {seconds}s kline interval"))
    })?;

    let rest = endpoint(options.endpoints.rest.as_ref(), REST_URL);
    let ws = endpoint(options.endpoints.ws.as_ref(), WS_URL);
    let streams = format!("{ws}/stream");

    let http = HttpHelper::new(rest, client(options, Venue::Binance)?);
    let private = http
        .clone()
        .with_credentials(options.credentials.clone(), auth::binance());

    Ok(Adapter {
        venue: Venue::Binance,
        http,
        symbols: Arc::new(Pairs),
        orders: Arc::new(BookFeed {
            ws_url: streams.clone(),
            depth: settings.book_depth,
        }),
        trades: Arc::new(TradesFeed { ws_url: streams.clone() }),
        quotes: Arc::new(QuotesFeed { ws_url: streams.clone() }),
        candles: Arc::new(CandlesFeed {
            ws_url: streams,
            interval,
            seconds,
        }),
        trading: Some(trading::api(private, ws)),
    })
}
