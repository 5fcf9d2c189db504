//! Bitfinex v2 wire formats.
//!
//! The socket carries two shapes: JSON objects for events (`info`,
//! `subscribed`, `error`, `pong`) and JSON arrays for channel data,
//! `[CHANNEL_ID, payload]`, where the payload shape depends on the
//! channel. Rows are fixed-length arrays and decode into tuple structs.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::{ConfluenceError, Result};

/// Info code: the server is restarting; reconnect.
pub const INFO_RECONNECT: i64 = 20051;

/// Info code: maintenance started.
pub const INFO_MAINTENANCE_START: i64 = 20060;

/// Info code: maintenance ended; resubscribe.
pub const INFO_MAINTENANCE_END: i64 = 20061;

/// Control events, tagged by `event`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    Info {
        code: Option<i64>,
        msg: Option<String>,
        version: Option<u32>,
    },
    Subscribed {
        channel: String,
        #[serde(rename = "chanId")]
        chan_id: i64,
        symbol: Option<String>,
        key: Option<String>,
    },
    Error {
        code: Option<i64>,
        msg: Option<String>,
    },
    Pong {
        cid: Option<i64>,
    },
    #[serde(other)]
    Other,
}

/// Payload of a channel frame.
#[derive(Debug)]
pub enum ChannelData {
    /// `[ID, "hb"]`.
    Heartbeat,
    /// `[ID, [[...], [...]]]`: initial rows.
    Snapshot(Vec<Value>),
    /// `[ID, [...]]`: one row (or, for tickers, the whole state).
    Update(Value),
    /// `[ID, "te", [...]]`: a trade execution.
    TradeExecuted(Value),
    /// `tu` duplicates of `te`, checksums and other tagged rows.
    Ignored,
}

/// Splits a channel frame into its id and payload.
///
/// # Errors
///
/// Returns [`ConfluenceError::MalformedMessage`] if the array has no
/// numeric id or no payload.
pub fn channel_data(mut frame: Vec<Value>) -> Result<(i64, ChannelData)> {
    let malformed = || ConfluenceError::MalformedMessage(format!("channel frame of {} items", frame.len()));
    let id = frame.first().and_then(Value::as_i64).ok_or_else(malformed)?;
    if frame.len() < 2 {
        return Err(malformed());
    }

    let payload = frame.swap_remove(1);
    let data = match payload {
        Value::String(tag) if tag == "hb" => ChannelData::Heartbeat,
        Value::String(tag) if tag == "te" => match frame.into_iter().nth(1) {
            Some(row) => ChannelData::TradeExecuted(row),
            None => return Err(ConfluenceError::MalformedMessage("te without row".to_string())),
        },
        Value::String(_) => ChannelData::Ignored,
        Value::Array(rows) if rows.first().is_none_or(Value::is_array) => ChannelData::Snapshot(rows),
        row @ Value::Array(_) => ChannelData::Update(row),
        _ => ChannelData::Ignored,
    };
    Ok((id, data))
}

/// Decodes `rows` into `T`, one element at a time. Rows with the wrong
/// shape are logged and dropped.
pub fn rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match T::deserialize(&row) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(venue = "bitfinex", error = %e, payload = %row, "Dropping row");
                None
            }
        })
        .collect()
}

/// `[PRICE, COUNT, AMOUNT]`; count 0 removes the level, amount sign
/// picks the side.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BookEntry(pub f64, pub u64, pub f64);

/// `[ID, MTS, AMOUNT, PRICE]`; amount sign is the taker side.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TradeEntry(pub u64, pub i64, pub f64, pub f64);

/// `[MTS, OPEN, CLOSE, HIGH, LOW, VOLUME]`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CandleEntry(pub i64, pub f64, pub f64, pub f64, pub f64, pub f64);

/// WebSocket ticker: `[BID, BID_SIZE, ASK, ASK_SIZE, DAILY_CHANGE,
/// DAILY_CHANGE_RELATIVE, LAST_PRICE, VOLUME, HIGH, LOW]`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TickerEntry(
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
);

/// REST ticker: the WebSocket fields prefixed by the symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct RestTickerEntry(
    pub String,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
);

impl RestTickerEntry {
    #[must_use]
    pub fn ticker(&self) -> TickerEntry {
        TickerEntry(
            self.1, self.2, self.3, self.4, self.5, self.6, self.7, self.8, self.9, self.10,
        )
    }
}

/// `conf/pub:info:pair` entry: `[PAIR, [.., .., .., MIN_SIZE, MAX_SIZE, ..]]`.
#[derive(Debug, Deserialize)]
pub struct PairInfo(pub String, pub Vec<Value>);

impl PairInfo {
    /// Reads the decimal string at `index` of the info array.
    #[must_use]
    pub fn number(&self, index: usize) -> Option<f64> {
        match self.1.get(index)? {
            Value::String(raw) => raw.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

// -- Authenticated REST --

/// Reads the number at `index` of a variable-length row.
#[must_use]
pub fn f64_at(row: &[Value], index: usize) -> Option<f64> {
    row.get(index).and_then(Value::as_f64)
}

/// Reads the string at `index` of a variable-length row.
#[must_use]
pub fn str_at(row: &[Value], index: usize) -> Option<&str> {
    row.get(index).and_then(Value::as_str)
}

/// Wallet row indices: `[TYPE, CURRENCY, BALANCE, UNSETTLED, AVAILABLE, ..]`.
pub mod wallet {
    pub const TYPE: usize = 0;
    pub const CURRENCY: usize = 1;
    pub const BALANCE: usize = 2;
    pub const AVAILABLE: usize = 4;
}

/// Order row indices.
pub mod order {
    pub const ID: usize = 0;
    pub const CID: usize = 2;
    pub const SYMBOL: usize = 3;
    pub const MTS_CREATE: usize = 4;
    pub const AMOUNT: usize = 6;
    pub const AMOUNT_ORIG: usize = 7;
    pub const TYPE: usize = 8;
    pub const STATUS: usize = 13;
    pub const PRICE: usize = 16;
}

/// Own trade row indices.
pub mod own_trade {
    pub const ID: usize = 0;
    pub const SYMBOL: usize = 1;
    pub const MTS: usize = 2;
    pub const ORDER_ID: usize = 3;
    pub const EXEC_AMOUNT: usize = 4;
    pub const EXEC_PRICE: usize = 5;
    pub const FEE: usize = 9;
}

/// Write responses are notifications:
/// `[MTS, TYPE, MESSAGE_ID, null, DATA, CODE, STATUS, TEXT]`.
#[derive(Debug, Deserialize)]
pub struct Notification(
    pub i64,
    pub String,
    pub Option<Value>,
    pub Option<Value>,
    pub Value,
    pub Option<i64>,
    pub String,
    pub Option<String>,
);

impl Notification {
    /// Returns the data element of a successful notification.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::Venue`] with the text of a failed one.
    pub fn into_data(self) -> Result<Value> {
        if self.6 == "SUCCESS" {
            Ok(self.4)
        } else {
            Err(ConfluenceError::Venue(
                self.7.unwrap_or_else(|| format!("{} {}", self.1, self.6)),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> (i64, ChannelData) {
        channel_data(serde_json::from_str(raw).unwrap()).unwrap()
    }

    #[test]
    fn classifies_channel_payloads() {
        assert!(matches!(parse(r#"[17,"hb"]"#), (17, ChannelData::Heartbeat)));
        assert!(matches!(parse(r#"[17,[[1.0,1,2.0],[2.0,1,-1.0]]]"#), (17, ChannelData::Snapshot(rows)) if rows.len() == 2));
        assert!(matches!(parse(r#"[17,[1.0,0,1.0]]"#), (17, ChannelData::Update(_))));
        assert!(matches!(parse(r#"[9,"te",[5,1,0.1,100.0]]"#), (9, ChannelData::TradeExecuted(_))));
        assert!(matches!(parse(r#"[9,"tu",[5,1,0.1,100.0]]"#), (9, ChannelData::Ignored)));
        assert!(matches!(parse(r#"[9,[]]"#), (9, ChannelData::Snapshot(rows)) if rows.is_empty()));
    }

    #[test]
    fn events_are_tagged() {
        let event: Event = serde_json::from_str(
            r#"{"event":"info","code":20051,"msg":"Stopping. Please try to reconnect"}"#,
        )
        .unwrap();
        assert!(matches!(event, Event::Info { code: Some(INFO_RECONNECT), .. }));

        let event: Event = serde_json::from_str(
            r#"{"event":"subscribed","channel":"candles","chanId":343351,"key":"trade:1m:tBTCUSD"}"#,
        )
        .unwrap();
        assert!(matches!(event, Event::Subscribed { chan_id: 343_351, key: Some(_), .. }));

        let event: Event = serde_json::from_str(r#"{"event":"conf","status":"OK"}"#).unwrap();
        assert!(matches!(event, Event::Other));
    }

    #[test]
    fn failed_notification_carries_text() {
        let n: Notification = serde_json::from_str(
            r#"[1567590617,"on-req",null,null,[],null,"ERROR","Invalid order: not enough balance"]"#,
        )
        .unwrap();
        assert!(matches!(n.into_data(), Err(ConfluenceError::Venue(m)) if m.contains("balance")));
    }
}
