//! Kraken wire formats: REST envelopes and WebSocket v2 channel messages.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::{ConfluenceError, Result};

/// Every REST response is `{"error": [...], "result": ...}`.
#[derive(Debug, Deserialize)]
pub struct RestResponse<T> {
    #[serde(default)]
    pub error: Vec<String>,
    pub result: Option<T>,
}

impl<T> RestResponse<T> {
    /// Unwraps `result`, turning a non-empty `error` list into an error.
    ///
    /// `EAPI:` key, signature and nonce failures map to
    /// [`ConfluenceError::Auth`].
    pub fn into_result(self) -> Result<T> {
        if !self.error.is_empty() {
            let message = self.error.join(", ");
            return Err(if self.error.iter().any(|e| is_auth_error(e)) {
                ConfluenceError::Auth(message)
            } else {
                ConfluenceError::Venue(message)
            });
        }
        self.result
            .ok_or_else(|| ConfluenceError::MalformedMessage("response without result".to_string()))
    }
}

/// Returns `true` for Kraken errors caused by the API key itself.
pub fn is_auth_error(error: &str) -> bool {
    error.starts_with("EAPI:Invalid key")
        || error.starts_with("EAPI:Invalid signature")
        || error.starts_with("EAPI:Invalid nonce")
        || error.starts_with("EGeneral:Permission denied")
}

// -- Public REST --

/// One entry of `/0/public/AssetPairs`.
#[derive(Debug, Deserialize)]
pub struct AssetPair {
    pub altname: String,
    pub wsname: Option<String>,
    pub pair_decimals: u32,
    pub lot_decimals: u32,
    /// Volume-tiered taker fees as `[volume, percent]`.
    #[serde(default)]
    pub fees: Vec<[Decimal; 2]>,
    pub ordermin: Option<String>,
    pub status: Option<String>,
}

/// Book of `/0/public/Depth`; levels are `[price, volume, timestamp]`.
#[derive(Debug, Deserialize)]
pub struct DepthBook {
    pub asks: Vec<(String, String, i64)>,
    pub bids: Vec<(String, String, i64)>,
}

/// Row of `/0/public/Trades`:
/// `[price, volume, time, side, order type, misc, trade id]`.
#[derive(Debug, Deserialize)]
pub struct TradeRow(
    pub String,
    pub String,
    pub f64,
    pub String,
    pub String,
    pub String,
    pub u64,
);

/// Entry of `/0/public/Ticker`. Arrays hold `[today, last 24h]`
/// except `c` (`[price, volume]`).
#[derive(Debug, Deserialize)]
pub struct TickerInfo {
    pub c: Vec<String>,
    pub v: Vec<String>,
    pub p: Vec<String>,
    pub l: Vec<String>,
    pub h: Vec<String>,
    pub o: String,
}

/// Row of `/0/public/OHLC`:
/// `[time, open, high, low, close, vwap, volume, count]`.
#[derive(Debug, Deserialize)]
pub struct OhlcRow(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub u64,
);

/// Decodes the per-pair entries of a result map that also carries a
/// `last` cursor (`Trades`, `OHLC`).
///
/// # Errors
///
/// Returns [`ConfluenceError::Json`] if an entry has the wrong shape.
pub fn pair_entries<T: DeserializeOwned>(
    result: HashMap<String, serde_json::Value>,
) -> Result<Vec<(String, T)>> {
    result
        .into_iter()
        .filter(|(key, _)| key != "last")
        .map(|(key, value)| Ok((key, serde_json::from_value(value)?)))
        .collect()
}

// -- Private REST --

#[derive(Debug, Deserialize)]
pub struct BalanceEntry {
    pub balance: String,
    pub hold_trade: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenOrders {
    pub open: HashMap<String, OrderInfo>,
}

#[derive(Debug, Deserialize)]
pub struct OrderInfo {
    pub status: String,
    pub opentm: f64,
    pub descr: OrderDescr,
    pub vol: String,
    pub vol_exec: String,
    pub cl_ord_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderDescr {
    /// Pair altname (`XBTUSD`).
    pub pair: String,
    #[serde(rename = "type")]
    pub side: String,
    pub ordertype: String,
    pub price: String,
}

#[derive(Debug, Deserialize)]
pub struct TradesHistory {
    pub trades: HashMap<String, OwnTrade>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct OwnTrade {
    pub ordertxid: String,
    /// Internal pair key (`XXBTZUSD`).
    pub pair: String,
    pub time: f64,
    #[serde(rename = "type")]
    pub side: String,
    pub price: String,
    pub fee: String,
    pub vol: String,
}

#[derive(Debug, Deserialize)]
pub struct AddOrderResult {
    pub txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelResult {
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct WebSocketToken {
    pub token: String,
    pub expires: u64,
}

// -- WebSocket v2 --

/// A channel message: `{"channel", "type", "data": [...]}`.
#[derive(Debug, Deserialize)]
pub struct ChannelMessage<T> {
    pub channel: String,
    /// `"snapshot"` or `"update"`.
    #[serde(rename = "type")]
    pub tpe: String,
    pub data: Vec<T>,
}

impl<T> ChannelMessage<T> {
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.tpe == "snapshot"
    }
}

/// Reply to a `subscribe` request.
#[derive(Debug, Deserialize)]
pub struct MethodResponse {
    pub method: String,
    pub success: Option<bool>,
    pub error: Option<String>,
}

/// Book snapshot or delta for one symbol.
#[derive(Debug, Deserialize)]
pub struct BookData {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// A price level; a zero `qty` removes it.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct TradeData {
    pub symbol: String,
    pub side: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub trade_id: u64,
    /// RFC 3339.
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct TickerData {
    pub symbol: String,
    pub last: f64,
    pub volume: f64,
    pub vwap: f64,
    pub low: f64,
    pub high: f64,
    pub change: f64,
    pub change_pct: f64,
}

#[derive(Debug, Deserialize)]
pub struct CandleData {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// RFC 3339 start of the bar.
    pub interval_begin: String,
    /// Bar length in minutes.
    pub interval: u64,
}

/// Entry of the private `executions` channel.
///
/// Order snapshots carry every field; updates only what changed.
#[derive(Debug, Deserialize)]
pub struct ExecutionData {
    pub order_id: String,
    pub cl_ord_id: Option<String>,
    pub exec_type: String,
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub order_type: Option<String>,
    pub order_qty: Option<Decimal>,
    pub order_status: Option<String>,
    pub limit_price: Option<Decimal>,
    pub last_qty: Option<Decimal>,
    pub last_price: Option<Decimal>,
    pub cum_qty: Option<Decimal>,
    pub trade_id: Option<u64>,
    pub fees: Option<Vec<Fee>>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct Fee {
    pub asset: String,
    pub qty: Decimal,
}

/// Entry of the private `balances` channel.
#[derive(Debug, Deserialize)]
pub struct BalanceData {
    pub asset: String,
    pub balance: Decimal,
}
