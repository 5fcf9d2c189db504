//! Bitfinex: public REST and WebSocket v2 on `api-pub`, authenticated
//! REST v2 on `api`.

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
pub use trading::BitfinexTrading;

pub const REST_URL: &str = "https://api-pub.bitfinex.com";
pub const AUTH_REST_URL: &str = "https://api.bitfinex.com";
pub const WS_URL: &str = "wss://api-pub.bitfinex.com/ws/2";

/// Builds the Bitfinex adapter.
///
/// A REST override replaces both the public and the authenticated host.
///
/// # Errors
///
/// Returns [`ConfluenceError::Config`] if the candle interval has no
/// Bitfinex timeframe.
pub fn adapter(options: &Options) -> Result<Adapter> {
    let settings = &options.settings;
    let seconds = settings.candle_interval.as_secs();
    let timeframe = feeds::timeframe(seconds).ok_or_else(|| {
        ConfluenceError::Config(format!("bitfinex has no {seconds}s candle timeframe"))
    })?;

    let rest = endpoint(options.endpoints.rest.as_ref(), REST_URL);
    let auth_rest = endpoint(options.endpoints.rest.as_ref(), AUTH_REST_URL);
    let ws = endpoint(options.endpoints.ws.as_ref(), WS_URL);

    let http_client = client(options, Venue::Bitfinex)?;
    let http = HttpHelper::new(rest, http_client.clone());
    let private = HttpHelper::new(auth_rest, http_client)
        .with_credentials(options.credentials.clone(), auth::bitfinex());

    Ok(Adapter {
        venue: Venue::Bitfinex,
        http: http.clone(),
        symbols: Arc::new(Pairs),
        orders: Arc::new(BookFeed {
            ws_url: ws.clone(),
            depth: settings.book_depth,
        }),
        trades: Arc::new(TradesFeed { ws_url: ws.clone() }),
        quotes: Arc::new(QuotesFeed { ws_url: ws.clone() }),
        candles: Arc::new(CandlesFeed {
            ws_url: ws,
            timeframe,
            seconds,
        }),
        trading: Some(trading::api(private, http)),
    })
}
