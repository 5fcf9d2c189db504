//! Normalized market-data model shared by every venue.
//!
//! Venue adapters decode their own wire formats and map them into the
//! types below; consumers only ever see these.

pub mod account;
pub mod book;
pub mod candle;
pub mod event;
pub mod quote;
pub mod symbol;
pub mod trade;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use account::{Access, Balance, OrderKind, OrderRequest, OrderStatus, UserInfo, UserOrder};
pub use book::{BookState, Order, OrderBook};
pub use candle::Candle;
pub use event::{
    DataType, EventReceiver, EventSender, Payload, ResultEvent, UserInfoEvent, UserOrdersEvent,
    UserTradesEvent,
};
pub use quote::Quote;
pub use symbol::{Symbol, SymbolParser};
pub use trade::{Trade, TradeFilter};

/// Order or trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the normalized wire name (`"buy"` or `"sell"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The market-data kinds a venue can stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Symbols,
    Book,
    Trades,
    Quotes,
    Candles,
}

impl DataKind {
    /// Returns a short label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Symbols => "symbols",
            DataKind::Book => "book",
            DataKind::Trades => "trades",
            DataKind::Quotes => "quotes",
            DataKind::Candles => "candles",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
