//! Gate.io spot: REST v4 polling, no private API.

mod feeds;
pub mod wire;

use std::sync::Arc;

use super::{Adapter, Venue, client, endpoint};
use crate::config::Options;
use crate::transport::HttpHelper;
use crate::{ConfluenceError, Result};

pub use feeds::{BookFeed, CandlesFeed, Pairs, QuotesFeed, TradesFeed};

pub const REST_URL: &str = "https://api.gateio.ws/api/v4";

/// Builds the Gate.io adapter.
///
/// # Errors
///
/// Returns [`ConfluenceError::Config`] if the candle interval is not a
/// Gate.io interval.
pub fn adapter(options: &Options) -> Result<Adapter> {
    let settings = &options.settings;
    let seconds = settings.candle_interval.as_secs();
    let interval = feeds::interval(seconds).ok_or_else(|| {
        ConfluenceError::Config(format!("gateio has no {seconds}s candle interval"))
    })?;

    let rest = endpoint(options.endpoints.rest.as_ref(), REST_URL);
    let http = HttpHelper::new(rest, client(options, Venue::GateIo)?);

    Ok(Adapter {
        venue: Venue::GateIo,
        http,
        symbols: Arc::new(Pairs),
        orders: Arc::new(BookFeed { depth: settings.book_depth }),
        trades: Arc::new(TradesFeed),
        quotes: Arc::new(QuotesFeed),
        candles: Arc::new(CandlesFeed { interval, seconds }),
        trading: None,
    })
}
