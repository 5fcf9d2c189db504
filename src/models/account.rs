//! Private account models: balances, permissions, own orders.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Side;
use super::symbol::Symbol;

/// Holdings of one coin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub available: f64,
    pub in_orders: f64,
    pub total: f64,
}

impl Balance {
    /// Builds a balance from free and locked amounts.
    #[must_use]
    pub fn from_free_locked(available: f64, in_orders: f64) -> Self {
        Self {
            available,
            in_orders,
            total: available + in_orders,
        }
    }
}

/// What the configured API key is allowed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub read: bool,
    pub trade: bool,
    pub deposit: bool,
    pub withdraw: bool,
}

/// Account snapshot (or delta, on update events).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Balances keyed by canonical coin code.
    pub balances: HashMap<String, Balance>,
    pub access: Access,
    /// Number of coins listed in `balances`.
    pub coins: usize,
    /// Number of coins with a non-zero total.
    pub funded_coins: usize,
}

impl UserInfo {
    #[must_use]
    pub fn new(balances: HashMap<String, Balance>, access: Access) -> Self {
        let funded_coins = balances.values().filter(|b| b.total != 0.0).count();
        Self {
            coins: balances.len(),
            funded_coins,
            balances,
            access,
        }
    }
}

/// How an own order executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Limit,
    Market,
}

/// Lifecycle state of an own order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Returns `true` while the order can still fill.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

/// An order placed by the configured account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserOrder {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub price: f64,
    pub amount: f64,
    pub filled: f64,
    /// Creation time in milliseconds since epoch.
    pub created_at: i64,
}

/// Parameters for placing an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    /// Required for limit orders.
    pub price: Option<f64>,
    pub amount: f64,
    pub client_id: Option<String>,
}

impl OrderRequest {
    /// A limit order at `price`.
    #[must_use]
    pub fn limit(symbol: Symbol, side: Side, price: f64, amount: f64) -> Self {
        Self {
            symbol,
            side,
            kind: OrderKind::Limit,
            price: Some(price),
            amount,
            client_id: None,
        }
    }

    /// A market order.
    #[must_use]
    pub fn market(symbol: Symbol, side: Side, amount: f64) -> Self {
        Self {
            symbol,
            side,
            kind: OrderKind::Market,
            price: None,
            amount,
            client_id: None,
        }
    }

    /// Formats the price with the symbol's precision.
    #[must_use]
    pub fn price_str(&self) -> Option<String> {
        self.price
            .map(|p| format!("{:.*}", self.symbol.price_precision as usize, p))
    }

    /// Formats the amount with the symbol's precision.
    #[must_use]
    pub fn amount_str(&self) -> String {
        format!(
            "{:.*}",
            self.symbol.amount_precision as usize,
            self.amount
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_total_is_free_plus_locked() {
        let b = Balance::from_free_locked(0.0, 1.25);
        assert_eq!(b.total, 1.25);
        assert_eq!(b.in_orders, 1.25);
    }

    #[test]
    fn user_info_counts_funded_coins() {
        let mut balances = HashMap::new();
        balances.insert("BTC".to_string(), Balance::from_free_locked(1.0, 0.0));
        balances.insert("ETH".to_string(), Balance::default());
        let info = UserInfo::new(balances, Access::default());
        assert_eq!(info.coins, 2);
        assert_eq!(info.funded_coins, 1);
    }

    #[test]
    fn only_new_and_partial_orders_are_open() {
        assert!(OrderStatus::New.is_open());
        assert!(OrderStatus::PartiallyFilled.is_open());
        assert!(!OrderStatus::Filled.is_open());
        assert!(!OrderStatus::Canceled.is_open());
    }
}
