//! Order book levels, books, and a consumer-side book state.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::event::{DataType, Payload, ResultEvent};
use super::Side;

/// A single price level of a public book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
    /// Number of orders aggregated into this level, when the venue says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Set on update levels that delete the price (amount = 0).
    #[serde(default)]
    pub remove: bool,
}

impl Order {
    /// Builds a level; an amount of zero marks the level for removal.
    #[must_use]
    pub fn new(symbol: impl Into<String>, side: Side, price: f64, amount: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            amount,
            count: None,
            remove: amount == 0.0,
        }
    }

    #[must_use]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Marks this level as a deletion regardless of the amount shipped.
    #[must_use]
    pub fn removed(mut self) -> Self {
        self.amount = 0.0;
        self.remove = true;
        self
    }
}

/// Both sides of a book for one symbol.
///
/// Complete in snapshot events; deltas only in update events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub buy: Vec<Order>,
    pub sell: Vec<Order>,
}

impl OrderBook {
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            buy: Vec::new(),
            sell: Vec::new(),
        }
    }

    /// Appends a level to the side it belongs to.
    pub fn push(&mut self, order: Order) {
        match order.side {
            Side::Buy => self.buy.push(order),
            Side::Sell => self.sell.push(order),
        }
    }

    /// Sorts bids descending and asks ascending by price.
    pub fn sort(&mut self) {
        self.buy
            .sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal));
        self.sell
            .sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal));
    }
}

impl Payload for OrderBook {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn is_empty(&self) -> bool {
        self.buy.is_empty() && self.sell.is_empty()
    }
}

/// Local book maintained from `s`/`u` book events.
///
/// A snapshot replaces the state of its symbol, an update sets or deletes
/// individual levels. Error events leave the state untouched.
#[derive(Debug, Default)]
pub struct BookState {
    books: HashMap<String, Levels>,
}

#[derive(Debug, Default)]
struct Levels {
    buy: Vec<(f64, f64)>,
    sell: Vec<(f64, f64)>,
}

impl Levels {
    fn side_mut(&mut self, side: Side) -> &mut Vec<(f64, f64)> {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }

    fn apply(&mut self, order: &Order) {
        let side = self.side_mut(order.side);
        let existing = side.iter().position(|(price, _)| *price == order.price);
        match (existing, order.remove || order.amount == 0.0) {
            (Some(i), true) => {
                side.remove(i);
            }
            (Some(i), false) => side[i].1 = order.amount,
            (None, false) => side.push((order.price, order.amount)),
            (None, true) => {}
        }
    }
}

impl BookState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one book event.
    pub fn apply(&mut self, event: &ResultEvent<OrderBook>) {
        let Some(book) = &event.data else {
            return;
        };
        match event.data_type {
            DataType::Snapshot => {
                let mut levels = Levels::default();
                for order in book.buy.iter().chain(&book.sell) {
                    levels.apply(order);
                }
                self.books.insert(book.symbol.clone(), levels);
            }
            DataType::Update => {
                let levels = self.books.entry(book.symbol.clone()).or_default();
                for order in book.buy.iter().chain(&book.sell) {
                    levels.apply(order);
                }
            }
            DataType::Error => {}
        }
    }

    /// Returns the amount resting at `price`, if the level exists.
    #[must_use]
    pub fn level(&self, symbol: &str, side: Side, price: f64) -> Option<f64> {
        let levels = self.books.get(symbol)?;
        let side = match side {
            Side::Buy => &levels.buy,
            Side::Sell => &levels.sell,
        };
        side.iter()
            .find(|(p, _)| *p == price)
            .map(|(_, amount)| *amount)
    }

    /// Returns the number of levels held on one side of a symbol.
    #[must_use]
    pub fn depth(&self, symbol: &str, side: Side) -> usize {
        self.books.get(symbol).map_or(0, |levels| match side {
            Side::Buy => levels.buy.len(),
            Side::Sell => levels.sell.len(),
        })
    }
}
