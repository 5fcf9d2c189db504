//! Bitfinex authenticated REST v2.
//!
//! There is no private push channel here; [`Trading`](crate::Trading)
//! primers poll these endpoints on the subscription interval.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::feeds::{ALIASES, Pairs, VENUE, by_wire_symbol, wire_symbol};
use super::wire::{Notification, f64_at, order, own_trade, str_at, wallet};
use crate::models::{
    Access, Balance, OrderKind, OrderRequest, OrderStatus, Side, Symbol, Trade, TradeFilter,
    UserInfo, UserOrder,
};
use crate::provider::SymbolSource;
use crate::stream::FrameContext;
use crate::trading::TradingApi;
use crate::transport::HttpHelper;
use crate::{ConfluenceError, Result};

/// Largest page `auth/r/trades/hist` returns.
const MAX_TRADES_PAGE: usize = 2500;

const DEFAULT_TRADES_PAGE: usize = 1000;

/// Authenticated endpoints plus the public helper for pair lookups.
#[derive(Debug, Clone)]
pub struct BitfinexTrading {
    pub(super) private: HttpHelper,
    pub(super) public: HttpHelper,
}

fn coin(code: &str) -> String {
    ALIASES
        .iter()
        .find(|(from, _)| *from == code)
        .map_or_else(|| code.to_string(), |(_, to)| (*to).to_string())
}

/// Bitfinex reports failures as `["error", CODE, "message"]` with a 500.
fn classify(error: ConfluenceError) -> ConfluenceError {
    match error {
        ConfluenceError::Status { body, .. }
            if body.contains("apikey") || body.contains("nonce") || body.contains("invalid signature") =>
        {
            ConfluenceError::Auth(body)
        }
        other => other,
    }
}

fn status(raw: &str) -> OrderStatus {
    if raw.starts_with("EXECUTED") {
        OrderStatus::Filled
    } else if raw.starts_with("PARTIALLY FILLED") {
        OrderStatus::PartiallyFilled
    } else if raw.starts_with("CANCELED") {
        OrderStatus::Canceled
    } else if raw.starts_with("ACTIVE") {
        OrderStatus::New
    } else {
        OrderStatus::Rejected
    }
}

fn missing(field: &'static str) -> ConfluenceError {
    ConfluenceError::mapping(field, "missing")
}

fn user_order(row: &[Value], ctx: &FrameContext) -> Result<Option<UserOrder>> {
    let wire = str_at(row, order::SYMBOL).ok_or_else(|| missing("symbol"))?;
    let Some(symbol) = by_wire_symbol(ctx, wire) else {
        return Ok(None);
    };
    let remaining = f64_at(row, order::AMOUNT).ok_or_else(|| missing("amount"))?;
    let original = f64_at(row, order::AMOUNT_ORIG).ok_or_else(|| missing("amount_orig"))?;
    let id = row
        .get(order::ID)
        .and_then(Value::as_i64)
        .ok_or_else(|| missing("id"))?;

    Ok(Some(UserOrder {
        id: id.to_string(),
        client_id: row.get(order::CID).and_then(Value::as_i64).map(|c| c.to_string()),
        symbol: symbol.name.clone(),
        side: if original > 0.0 { Side::Buy } else { Side::Sell },
        kind: if str_at(row, order::TYPE).is_some_and(|t| t.contains("MARKET")) {
            OrderKind::Market
        } else {
            OrderKind::Limit
        },
        status: status(str_at(row, order::STATUS).unwrap_or_default()),
        price: f64_at(row, order::PRICE).unwrap_or_default(),
        amount: original.abs(),
        filled: original.abs() - remaining.abs(),
        created_at: row.get(order::MTS_CREATE).and_then(Value::as_i64).unwrap_or_default(),
    }))
}

fn own_trade_row(row: &[Value], ctx: &FrameContext) -> Result<Option<Trade>> {
    let wire = str_at(row, own_trade::SYMBOL).ok_or_else(|| missing("symbol"))?;
    let Some(symbol) = by_wire_symbol(ctx, wire) else {
        return Ok(None);
    };
    let amount = f64_at(row, own_trade::EXEC_AMOUNT).ok_or_else(|| missing("exec_amount"))?;
    Ok(Some(Trade {
        id: row
            .get(own_trade::ID)
            .and_then(Value::as_i64)
            .ok_or_else(|| missing("id"))?
            .to_string(),
        order_id: row.get(own_trade::ORDER_ID).and_then(Value::as_i64).map(|id| id.to_string()),
        symbol: symbol.name.clone(),
        side: if amount > 0.0 { Side::Buy } else { Side::Sell },
        price: f64_at(row, own_trade::EXEC_PRICE).ok_or_else(|| missing("exec_price"))?,
        amount: amount.abs(),
        fee: f64_at(row, own_trade::FEE).map(f64::abs),
        timestamp: row
            .get(own_trade::MTS)
            .and_then(Value::as_i64)
            .ok_or_else(|| missing("mts"))?,
    }))
}

impl BitfinexTrading {
    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        self.private.private_json(path, &body).await.map_err(classify)
    }

    async fn lookup(&self, symbols: &[Symbol]) -> Result<FrameContext> {
        let symbols = if symbols.is_empty() {
            Pairs.symbols(&self.public).await?
        } else {
            symbols.to_vec()
        };
        Ok(FrameContext::new(symbols.into()))
    }

    async fn access(&self) -> Result<Access> {
        let scopes: Vec<(String, u8, u8)> = self.post("/v2/auth/r/permissions", json!({})).await?;
        let mut access = Access::default();
        for (scope, read, write) in scopes {
            access.read |= read == 1;
            match scope.as_str() {
                "orders" => access.trade = write == 1,
                "wallets" => access.deposit = write == 1,
                "withdraw" => access.withdraw = write == 1,
                _ => {}
            }
        }
        Ok(access)
    }
}

#[async_trait]
impl TradingApi for BitfinexTrading {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn info(&self) -> Result<UserInfo> {
        let wallets: Vec<Vec<Value>> = self.post("/v2/auth/r/wallets", json!({})).await?;
        let mut balances = HashMap::new();
        for row in &wallets {
            if str_at(row, wallet::TYPE) != Some("exchange") {
                continue;
            }
            let (Some(currency), Some(total)) = (str_at(row, wallet::CURRENCY), f64_at(row, wallet::BALANCE))
            else {
                continue;
            };
            let available = f64_at(row, wallet::AVAILABLE).unwrap_or(total);
            balances.insert(coin(currency), Balance::from_free_locked(available, total - available));
        }
        Ok(UserInfo::new(balances, self.access().await?))
    }

    async fn orders(&self, symbols: &[Symbol]) -> Result<Vec<UserOrder>> {
        let rows: Vec<Vec<Value>> = self.post("/v2/auth/r/orders", json!({})).await?;
        let ctx = self.lookup(symbols).await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(order) = user_order(row, &ctx)? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn trades(&self, filter: &TradeFilter) -> Result<(Vec<Trade>, Option<TradeFilter>)> {
        let limit = filter.limit.unwrap_or(DEFAULT_TRADES_PAGE).min(MAX_TRADES_PAGE);
        let path = match &filter.symbol {
            Some(symbol) => format!("/v2/auth/r/trades/{}/hist", wire_symbol(symbol)),
            None => "/v2/auth/r/trades/hist".to_string(),
        };
        let mut body = json!({ "limit": limit, "sort": 1 });
        if let Some(since) = filter.since {
            body["start"] = json!(since);
        }

        let rows: Vec<Vec<Value>> = self.post(&path, body).await?;
        let ctx = self.lookup(filter.symbol.as_slice()).await?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(trade) = own_trade_row(row, &ctx)? {
                trades.push(trade);
            }
        }

        let last_mts = rows
            .last()
            .and_then(|row| row.get(own_trade::MTS))
            .and_then(Value::as_i64);
        let next = match last_mts {
            Some(mts) if rows.len() >= limit => Some(TradeFilter {
                since: Some(mts + 1),
                ..filter.clone()
            }),
            _ => None,
        };
        Ok((trades, next))
    }

    async fn create(&self, request: &OrderRequest) -> Result<UserOrder> {
        let amount = match request.side {
            Side::Buy => request.amount_str(),
            Side::Sell => format!("-{}", request.amount_str()),
        };
        let mut body = json!({
            "type": match request.kind {
                OrderKind::Limit => "EXCHANGE LIMIT",
                OrderKind::Market => "EXCHANGE MARKET",
            },
            "symbol": wire_symbol(&request.symbol),
            "amount": amount,
        });
        if let Some(price) = request.price_str() {
            body["price"] = json!(price);
        }
        if let Some(cid) = request.client_id.as_deref().and_then(|c| c.parse::<i64>().ok()) {
            body["cid"] = json!(cid);
        }

        let notification: Notification = self.post("/v2/auth/w/order/submit", body).await?;
        let data = notification.into_data()?;
        let rows: Vec<Vec<Value>> = serde_json::from_value(data)?;
        let ctx = FrameContext::new(vec![request.symbol.clone()].into());
        let placed = rows
            .first()
            .map(|row| user_order(row, &ctx))
            .transpose()?
            .flatten()
            .ok_or_else(|| ConfluenceError::MalformedMessage("submit without order".to_string()))?;
        info!(venue = VENUE, id = placed.id, symbol = placed.symbol, "Order placed");
        Ok(placed)
    }

    async fn cancel(&self, order: &UserOrder) -> Result<()> {
        let id: i64 = order
            .id
            .parse()
            .map_err(|_| ConfluenceError::InvalidRequest(format!("order id {:?}", order.id)))?;
        let notification: Notification = self.post("/v2/auth/w/order/cancel", json!({ "id": id })).await?;
        notification.into_data().map(|_| ())
    }

    async fn cancel_all(&self, symbols: &[Symbol]) -> Result<()> {
        let body = if symbols.is_empty() {
            json!({ "all": 1 })
        } else {
            let ids: Vec<i64> = self
                .orders(symbols)
                .await?
                .iter()
                .filter_map(|o| o.id.parse().ok())
                .collect();
            if ids.is_empty() {
                return Ok(());
            }
            json!({ "id": ids })
        };
        let notification: Notification = self.post("/v2/auth/w/order/cancel/multi", body).await?;
        notification.into_data().map(|_| ())
    }
}

pub(super) fn api(private: HttpHelper, public: HttpHelper) -> Arc<dyn TradingApi> {
    Arc::new(BitfinexTrading { private, public })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::bitfinex::feeds::parser;

    fn ctx() -> FrameContext {
        let symbol = Symbol::new(parser().parse("BTCUSD").unwrap(), "BTCUSD");
        FrameContext::new(vec![symbol].into())
    }

    #[test]
    fn order_row_maps_fill_and_side() {
        let row: Vec<Value> = serde_json::from_str(
            r#"[1187,null,45,"tBTCUSD",1573482478000,1573482478000,-0.3,-1.0,"EXCHANGE LIMIT",
                null,null,null,0,"PARTIALLY FILLED @ 9000.0(-0.7)",null,null,9000.0,9000.0,0,0,
                null,null,null,0,0,null,null,null,"API>BFX",null,null,null]"#,
        )
        .unwrap();
        let order = user_order(&row, &ctx()).unwrap().unwrap();
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.amount, 1.0);
        assert!((order.filled - 0.7).abs() < 1e-9);
        assert_eq!(order.client_id.as_deref(), Some("45"));
    }

    #[test]
    fn own_trade_fee_is_positive() {
        let row: Vec<Value> = serde_json::from_str(
            r#"[402088407,"tBTCUSD",1574963975602,34938060782,0.25,9000.0,"EXCHANGE LIMIT",
                9000.0,-1,-0.45,"USD",null]"#,
        )
        .unwrap();
        let trade = own_trade_row(&row, &ctx()).unwrap().unwrap();
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.fee, Some(0.45));
        assert_eq!(trade.order_id.as_deref(), Some("34938060782"));
    }

    #[test]
    fn api_key_errors_are_auth() {
        let error = classify(ConfluenceError::Status {
            status: 500,
            body: r#"["error",10100,"apikey: invalid"]"#.to_string(),
        });
        assert!(matches!(error, ConfluenceError::Auth(_)));
        assert_eq!(status("EXECUTED @ 107.6(-0.2)"), OrderStatus::Filled);
        assert_eq!(status("CANCELED"), OrderStatus::Canceled);
    }
}
