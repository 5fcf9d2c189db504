//! Binance private API: signed REST account endpoints plus the
//! listen-key user data stream.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::feeds::{Pairs, VENUE, parser};
use super::wire::{
    Account, ExecutionReport, ListenKey, MyTrade, OrderResponse, PositionBalance, UserEvent,
};
use crate::mapping;
use crate::models::{
    Access, Balance, OrderKind, OrderRequest, OrderStatus, ResultEvent, Side, Symbol, Trade,
    TradeFilter, UserInfo, UserOrder,
};
use crate::provider::SymbolSource;
use crate::stream::FrameContext;
use crate::trading::{PrivateSocket, TradingApi, UserEvents, UserSinks};
use crate::transport::HttpHelper;
use crate::{ConfluenceError, Result};

/// Listen keys expire after 60 minutes without a keepalive.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

const API_KEY_HEADER: &str = "x-mbx-apikey";

const MAX_TRADES_PAGE: usize = 1000;

/// Error codes for a bad key, a bad signature or a missing permission.
const AUTH_CODES: [&str; 3] = ["-2014", "-2015", "-1022"];

fn classify(error: ConfluenceError) -> ConfluenceError {
    match error {
        ConfluenceError::Status { status, body }
            if status == 401 || AUTH_CODES.iter().any(|code| body.contains(code)) =>
        {
            ConfluenceError::Auth(body)
        }
        other => other,
    }
}

fn side(raw: &str) -> Side {
    if raw == "SELL" { Side::Sell } else { Side::Buy }
}

fn kind(raw: &str) -> OrderKind {
    if raw == "MARKET" { OrderKind::Market } else { OrderKind::Limit }
}

fn status(raw: &str) -> OrderStatus {
    match raw {
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "PENDING_CANCEL" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        _ => OrderStatus::New,
    }
}

/// Canonical name of a venue symbol, by lookup first and suffix second.
fn symbol_name(ctx: &FrameContext, original: &str) -> Option<String> {
    ctx.by_original(original)
        .map(|s| s.name.clone())
        .or_else(|| parser().parse(original).ok().map(|p| p.name))
}

fn balances<'a>(rows: impl Iterator<Item = (&'a str, &'a str, &'a str)>) -> Result<HashMap<String, Balance>> {
    let mut balances = HashMap::new();
    for (asset, free, locked) in rows {
        let balance = Balance::from_free_locked(
            mapping::number("free", free)?,
            mapping::number("locked", locked)?,
        );
        if balance.total > 0.0 {
            balances.insert(asset.to_string(), balance);
        }
    }
    Ok(balances)
}

fn rest_order(order: &OrderResponse, ctx: &FrameContext) -> Result<Option<UserOrder>> {
    let Some(symbol) = symbol_name(ctx, &order.symbol) else {
        debug!(venue = VENUE, symbol = order.symbol, "Order for unknown symbol");
        return Ok(None);
    };
    Ok(Some(UserOrder {
        id: order.order_id.to_string(),
        client_id: Some(order.client_order_id.clone()),
        symbol,
        side: side(&order.side),
        kind: kind(&order.order_type),
        status: status(&order.status),
        price: mapping::number("price", &order.price)?,
        amount: mapping::number("origQty", &order.orig_qty)?,
        filled: mapping::number("executedQty", &order.executed_qty)?,
        created_at: order.time.or(order.transact_time).unwrap_or_default(),
    }))
}

/// Signed endpoints of one Binance account.
#[derive(Debug, Clone)]
pub struct BinanceTrading {
    pub(super) http: HttpHelper,
    /// Base of the raw-stream endpoint; `/ws/<listenKey>` is appended.
    pub(super) ws_url: String,
}

impl BinanceTrading {
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.http
            .private(method, path, params)
            .await
            .map_err(classify)
    }

    async fn lookup(&self, symbols: &[Symbol]) -> Result<FrameContext> {
        let symbols = if symbols.is_empty() {
            Pairs.symbols(&self.http).await?
        } else {
            symbols.to_vec()
        };
        Ok(FrameContext::new(symbols.into()))
    }

    async fn open_orders(&self, symbols: &[Symbol]) -> Result<Vec<OrderResponse>> {
        if symbols.is_empty() {
            return self.signed(Method::GET, "/api/v3/openOrders", &[]).await;
        }
        let mut orders = Vec::new();
        for symbol in symbols {
            let page: Vec<OrderResponse> = self
                .signed(
                    Method::GET,
                    "/api/v3/openOrders",
                    &[("symbol", symbol.original_name.clone())],
                )
                .await?;
            orders.extend(page);
        }
        Ok(orders)
    }

    async fn listen_key(&self) -> Result<String> {
        let key: ListenKey = self
            .http
            .keyed(Method::POST, "/api/v3/userDataStream", &[], API_KEY_HEADER)
            .await
            .map_err(classify)?;
        Ok(key.listen_key)
    }

    async fn keepalive(&self, listen_key: &str) -> Result<()> {
        let _: Value = self
            .http
            .keyed(
                Method::PUT,
                "/api/v3/userDataStream",
                &[("listenKey", listen_key.to_string())],
                API_KEY_HEADER,
            )
            .await
            .map_err(classify)?;
        debug!(venue = VENUE, "Listen key extended");
        Ok(())
    }
}

#[async_trait]
impl TradingApi for BinanceTrading {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn info(&self) -> Result<UserInfo> {
        let account: Account = self.signed(Method::GET, "/api/v3/account", &[]).await?;
        let balances = balances(
            account
                .balances
                .iter()
                .map(|b| (b.asset.as_str(), b.free.as_str(), b.locked.as_str())),
        )?;
        Ok(UserInfo::new(
            balances,
            Access {
                read: true,
                trade: account.can_trade,
                deposit: account.can_deposit,
                withdraw: account.can_withdraw,
            },
        ))
    }

    async fn orders(&self, symbols: &[Symbol]) -> Result<Vec<UserOrder>> {
        let open = self.open_orders(symbols).await?;
        let ctx = self.lookup(symbols).await?;

        let mut orders = Vec::with_capacity(open.len());
        for order in &open {
            if let Some(order) = rest_order(order, &ctx)? {
                orders.push(order);
            }
        }
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn trades(&self, filter: &TradeFilter) -> Result<(Vec<Trade>, Option<TradeFilter>)> {
        let symbol = filter.symbol.as_ref().ok_or_else(|| {
            ConfluenceError::InvalidRequest("binance trade history needs a symbol".to_string())
        })?;
        let limit = filter.limit.unwrap_or(MAX_TRADES_PAGE).min(MAX_TRADES_PAGE);
        let mut params = vec![
            ("symbol", symbol.original_name.clone()),
            ("limit", limit.to_string()),
        ];
        if let Some(from_id) = &filter.from_id {
            params.push(("fromId", from_id.clone()));
        } else if let Some(since) = filter.since {
            params.push(("startTime", since.to_string()));
        }

        let rows: Vec<MyTrade> = self.signed(Method::GET, "/api/v3/myTrades", &params).await?;
        let trades = rows
            .iter()
            .map(|row| -> Result<Trade> {
                Ok(Trade {
                    id: row.id.to_string(),
                    order_id: Some(row.order_id.to_string()),
                    symbol: symbol.name.clone(),
                    side: if row.is_buyer { Side::Buy } else { Side::Sell },
                    price: mapping::number("price", &row.price)?,
                    amount: mapping::number("qty", &row.qty)?,
                    fee: Some(mapping::number("commission", &row.commission)?),
                    timestamp: row.time,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let next = match rows.last() {
            Some(last) if rows.len() == limit => Some(TradeFilter {
                from_id: Some((last.id + 1).to_string()),
                since: None,
                ..filter.clone()
            }),
            _ => None,
        };
        Ok((trades, next))
    }

    async fn create(&self, order: &OrderRequest) -> Result<UserOrder> {
        let mut params = vec![
            ("symbol", order.symbol.original_name.clone()),
            ("side", if order.side == Side::Sell { "SELL" } else { "BUY" }.to_string()),
            ("quantity", order.amount_str()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        match order.kind {
            OrderKind::Limit => {
                params.push(("type", "LIMIT".to_string()));
                params.push(("timeInForce", "GTC".to_string()));
                if let Some(price) = order.price_str() {
                    params.push(("price", price));
                }
            }
            OrderKind::Market => params.push(("type", "MARKET".to_string())),
        }
        if let Some(client_id) = &order.client_id {
            params.push(("newClientOrderId", client_id.clone()));
        }

        let placed: OrderResponse = self.signed(Method::POST, "/api/v3/order", &params).await?;
        info!(venue = VENUE, id = placed.order_id, symbol = order.symbol.name, "Order placed");

        Ok(UserOrder {
            id: placed.order_id.to_string(),
            client_id: Some(placed.client_order_id),
            symbol: order.symbol.name.clone(),
            side: order.side,
            kind: order.kind,
            status: status(&placed.status),
            price: order.price.unwrap_or_default(),
            amount: order.amount,
            filled: mapping::number("executedQty", &placed.executed_qty)?,
            created_at: placed.transact_time.unwrap_or_default(),
        })
    }

    async fn cancel(&self, order: &UserOrder) -> Result<()> {
        // Orders carry the canonical name; the venue wants the concatenation.
        let original = order.symbol.replace('-', "");
        let _: Value = self
            .signed(
                Method::DELETE,
                "/api/v3/order",
                &[("symbol", original), ("orderId", order.id.clone())],
            )
            .await?;
        Ok(())
    }

    async fn cancel_all(&self, symbols: &[Symbol]) -> Result<()> {
        let targets: BTreeSet<String> = if symbols.is_empty() {
            self.open_orders(&[])
                .await?
                .into_iter()
                .map(|o| o.symbol)
                .collect()
        } else {
            symbols.iter().map(|s| s.original_name.clone()).collect()
        };

        for symbol in targets {
            match self
                .signed::<Value>(Method::DELETE, "/api/v3/openOrders", &[("symbol", symbol.clone())])
                .await
            {
                Ok(_) => info!(venue = VENUE, symbol, "Orders canceled"),
                // -2011: nothing to cancel for this symbol.
                Err(ConfluenceError::Status { body, .. }) if body.contains("-2011") => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn stream(&self, sinks: UserSinks, cancel: CancellationToken) -> Result<()> {
        let ctx = self.lookup(&[]).await?;
        loop {
            let listen_key = self.listen_key().await?;
            let url = format!("{}/ws/{listen_key}", self.ws_url);
            let mut socket = PrivateSocket::open(&url, None, &cancel, &[]).await?;
            info!(venue = VENUE, "User data stream connected");

            let mut keepalive =
                tokio::time::interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
            keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let outcome = loop {
                tokio::select! {
                    () = cancel.cancelled() => break Ok(false),
                    _ = keepalive.tick() => {
                        if let Err(e) = self.keepalive(&listen_key).await {
                            break Err(e);
                        }
                    }
                    frame = socket.next() => {
                        let frame = match frame {
                            Ok(frame) => frame,
                            Err(e) => break Err(e),
                        };
                        match serde_json::from_slice::<UserEvent>(&frame) {
                            Ok(UserEvent::ListenKeyExpired) => break Ok(true),
                            Ok(event) => match user_events(event, &ctx) {
                                Ok(events) => events.send(&sinks).await,
                                Err(e) => warn!(venue = VENUE, error = %e, "Undecodable user event"),
                            },
                            Err(e) => warn!(venue = VENUE, error = %e, "Undecodable user event"),
                        }
                    }
                }
            };
            socket.close().await;

            match outcome {
                Ok(true) => info!(venue = VENUE, "Listen key expired, reconnecting"),
                Ok(false) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Maps one user-data event onto the three private streams.
fn user_events(event: UserEvent, ctx: &FrameContext) -> Result<UserEvents> {
    let mut events = UserEvents::default();
    match event {
        UserEvent::AccountPosition { balances: rows } => {
            events.info = Some(ResultEvent::update(UserInfo::new(
                position(&rows)?,
                Access { read: true, ..Access::default() },
            )));
        }
        UserEvent::Execution(report) => {
            let Some(symbol) = symbol_name(ctx, &report.symbol) else {
                return Ok(events);
            };
            if report.execution_type == "TRADE" {
                events.trades = Some(ResultEvent::update(vec![fill(&report, &symbol)?]));
            }
            events.orders = Some(ResultEvent::update(vec![execution_order(&report, symbol)?]));
        }
        UserEvent::ListenKeyExpired | UserEvent::Other => {}
    }
    Ok(events)
}

fn position(rows: &[PositionBalance]) -> Result<HashMap<String, Balance>> {
    let mut balances = HashMap::with_capacity(rows.len());
    for row in rows {
        balances.insert(
            row.asset.clone(),
            Balance::from_free_locked(
                mapping::number("f", &row.free)?,
                mapping::number("l", &row.locked)?,
            ),
        );
    }
    Ok(balances)
}

fn fill(report: &ExecutionReport, symbol: &str) -> Result<Trade> {
    Ok(Trade {
        id: report.trade_id.to_string(),
        order_id: Some(report.order_id.to_string()),
        symbol: symbol.to_string(),
        side: side(&report.side),
        price: mapping::number("L", &report.last_price)?,
        amount: mapping::number("l", &report.last_qty)?,
        fee: Some(mapping::number("n", &report.commission)?),
        timestamp: report.transaction_time,
    })
}

fn execution_order(report: &ExecutionReport, symbol: String) -> Result<UserOrder> {
    Ok(UserOrder {
        id: report.order_id.to_string(),
        client_id: Some(report.client_order_id.clone()),
        symbol,
        side: side(&report.side),
        kind: kind(&report.order_type),
        status: status(&report.status),
        price: mapping::number("p", &report.price)?,
        amount: mapping::number("q", &report.quantity)?,
        filled: mapping::number("z", &report.cumulative_qty)?,
        created_at: report.created_at,
    })
}

/// Wraps the trading API for sharing with the adapter.
pub(super) fn api(http: HttpHelper, ws_url: String) -> Arc<dyn TradingApi> {
    Arc::new(BinanceTrading { http, ws_url })
}
