//! Kraken private API: REST account endpoints plus the authenticated
//! WebSocket v2 `executions` and `balances` channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::feeds::{ALIASES, Pairs, VENUE, by_rest_key};
use super::wire::{
    AddOrderResult, BalanceData, BalanceEntry, CancelResult, ChannelMessage, ExecutionData,
    MethodResponse, OpenOrders, OrderInfo, RestResponse, TradesHistory, WebSocketToken,
    is_auth_error,
};
use crate::auth::timestamp_millis;
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

/// Tokens expire 15 minutes after issue; reconnect a little earlier.
const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(14 * 60);

/// Legacy four-letter asset codes used by the REST balance endpoints.
const LEGACY_ASSETS: &[&str] = &[
    "XXBT", "XETH", "XLTC", "XXRP", "XXLM", "XXMR", "XZEC", "XETC", "XMLN", "XREP", "XXDG",
    "ZUSD", "ZEUR", "ZGBP", "ZJPY", "ZCAD", "ZAUD", "ZCHF",
];

/// Converts a Kraken asset code to the canonical coin code.
fn coin(code: &str) -> String {
    let code = if LEGACY_ASSETS.contains(&code) { &code[1..] } else { code };
    ALIASES
        .iter()
        .find(|(from, _)| *from == code)
        .map_or_else(|| code.to_string(), |(_, to)| (*to).to_string())
}

fn side(raw: &str) -> Side {
    if raw == "sell" { Side::Sell } else { Side::Buy }
}

fn kind(raw: &str) -> OrderKind {
    if raw == "market" { OrderKind::Market } else { OrderKind::Limit }
}

fn rest_status(raw: &str, filled: f64) -> OrderStatus {
    match raw {
        "closed" => OrderStatus::Filled,
        "canceled" => OrderStatus::Canceled,
        "expired" => OrderStatus::Expired,
        _ if filled > 0.0 => OrderStatus::PartiallyFilled,
        _ => OrderStatus::New,
    }
}

fn ws_status(raw: &str) -> OrderStatus {
    match raw {
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" => OrderStatus::Canceled,
        "expired" => OrderStatus::Expired,
        _ => OrderStatus::New,
    }
}

/// Private endpoints of one Kraken account.
#[derive(Debug, Clone)]
pub struct KrakenTrading {
    pub(super) http: HttpHelper,
    pub(super) ws_auth_url: String,
}

impl KrakenTrading {
    async fn private<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let response: RestResponse<T> = self.http.private(Method::POST, path, params).await?;
        response.into_result()
    }

    /// Universe used to map pair names back to symbols.
    async fn lookup(&self, symbols: &[Symbol]) -> Result<FrameContext> {
        let symbols = if symbols.is_empty() {
            Pairs.symbols(&self.http).await?
        } else {
            symbols.to_vec()
        };
        Ok(FrameContext::new(symbols.into()))
    }

    fn rest_order(id: String, info: &OrderInfo, symbol: &Symbol) -> Result<UserOrder> {
        let amount = mapping::number("vol", &info.vol)?;
        let filled = mapping::number("vol_exec", &info.vol_exec)?;
        Ok(UserOrder {
            id,
            client_id: info.cl_ord_id.clone(),
            symbol: symbol.name.clone(),
            side: side(&info.descr.side),
            kind: kind(&info.descr.ordertype),
            status: rest_status(&info.status, filled),
            price: mapping::number("price", &info.descr.price).unwrap_or_default(),
            amount,
            filled,
            created_at: (info.opentm * 1000.0) as i64,
        })
    }

    async fn websocket_token(&self) -> Result<String> {
        let token: WebSocketToken = self.private("/0/private/GetWebSocketsToken", &[]).await?;
        debug!(venue = VENUE, expires = token.expires, "WebSocket token issued");
        Ok(token.token)
    }

    fn subscribe_frames(token: &str) -> Vec<Value> {
        vec![
            json!({
                "method": "subscribe",
                "params": {
                    "channel": "executions",
                    "token": token,
                    "snap_orders": true,
                    "snap_trades": false,
                },
            }),
            json!({
                "method": "subscribe",
                "params": { "channel": "balances", "token": token, "snapshot": true },
            }),
        ]
    }
}

#[async_trait]
impl TradingApi for KrakenTrading {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn info(&self) -> Result<UserInfo> {
        let entries: HashMap<String, BalanceEntry> = self.private("/0/private/BalanceEx", &[]).await?;
        let mut balances = HashMap::new();
        for (code, entry) in entries {
            // Staked and earn balances are not spot funds.
            if code.contains('.') {
                continue;
            }
            let total = mapping::number("balance", &entry.balance)?;
            let held = match entry.hold_trade.as_deref() {
                Some(raw) => mapping::number("hold_trade", raw)?,
                None => 0.0,
            };
            balances.insert(coin(&code), Balance::from_free_locked(total - held, held));
        }
        Ok(UserInfo::new(balances, Access { read: true, ..Access::default() }))
    }

    async fn orders(&self, symbols: &[Symbol]) -> Result<Vec<UserOrder>> {
        let open: OpenOrders = self.private("/0/private/OpenOrders", &[]).await?;
        let ctx = self.lookup(symbols).await?;

        let mut orders = Vec::with_capacity(open.open.len());
        for (id, info) in open.open {
            let Some(symbol) = by_rest_key(&ctx, &info.descr.pair) else {
                continue;
            };
            orders.push(Self::rest_order(id, &info, symbol)?);
        }
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn trades(&self, filter: &TradeFilter) -> Result<(Vec<Trade>, Option<TradeFilter>)> {
        let offset = filter.offset.unwrap_or(0);
        let mut params = vec![("ofs", offset.to_string())];
        if let Some(from_id) = &filter.from_id {
            params.push(("start", from_id.clone()));
        } else if let Some(since) = filter.since {
            params.push(("start", (since / 1000).to_string()));
        }

        let history: TradesHistory = self.private("/0/private/TradesHistory", &params).await?;
        let ctx = self.lookup(filter.symbol.as_slice()).await?;
        let page_len = history.trades.len();

        let mut trades = Vec::with_capacity(page_len);
        for (id, own) in history.trades {
            let Some(symbol) = by_rest_key(&ctx, &own.pair) else {
                continue;
            };
            trades.push(Trade {
                id,
                order_id: Some(own.ordertxid),
                symbol: symbol.name.clone(),
                side: side(&own.side),
                price: mapping::number("price", &own.price)?,
                amount: mapping::number("vol", &own.vol)?,
                fee: Some(mapping::number("fee", &own.fee)?),
                timestamp: (own.time * 1000.0) as i64,
            });
        }
        trades.sort_by_key(|t| t.timestamp);

        let next = (page_len > 0 && offset + page_len < history.count).then(|| TradeFilter {
            offset: Some(offset + page_len),
            ..filter.clone()
        });
        Ok((trades, next))
    }

    async fn create(&self, order: &OrderRequest) -> Result<UserOrder> {
        let mut params = vec![
            ("pair", order.symbol.original_name.clone()),
            ("type", order.side.as_str().to_string()),
            (
                "ordertype",
                match order.kind {
                    OrderKind::Limit => "limit",
                    OrderKind::Market => "market",
                }
                .to_string(),
            ),
            ("volume", order.amount_str()),
        ];
        if let Some(price) = order.price_str() {
            params.push(("price", price));
        }
        if let Some(client_id) = &order.client_id {
            params.push(("cl_ord_id", client_id.clone()));
        }

        let placed: AddOrderResult = self.private("/0/private/AddOrder", &params).await?;
        let id = placed
            .txid
            .into_iter()
            .next()
            .ok_or_else(|| ConfluenceError::MalformedMessage("AddOrder without txid".to_string()))?;
        info!(venue = VENUE, id, symbol = order.symbol.name, "Order placed");

        Ok(UserOrder {
            id,
            client_id: order.client_id.clone(),
            symbol: order.symbol.name.clone(),
            side: order.side,
            kind: order.kind,
            status: OrderStatus::New,
            price: order.price.unwrap_or_default(),
            amount: order.amount,
            filled: 0.0,
            created_at: timestamp_millis() as i64,
        })
    }

    async fn cancel(&self, order: &UserOrder) -> Result<()> {
        let result: CancelResult = self
            .private("/0/private/CancelOrder", &[("txid", order.id.clone())])
            .await?;
        if result.count == 0 {
            return Err(ConfluenceError::Venue(format!("order {} not canceled", order.id)));
        }
        Ok(())
    }

    async fn cancel_all(&self, symbols: &[Symbol]) -> Result<()> {
        if symbols.is_empty() {
            let result: CancelResult = self.private("/0/private/CancelAll", &[]).await?;
            info!(venue = VENUE, count = result.count, "Orders canceled");
            return Ok(());
        }
        for order in self.orders(symbols).await? {
            self.cancel(&order).await?;
        }
        Ok(())
    }

    async fn stream(&self, sinks: UserSinks, cancel: CancellationToken) -> Result<()> {
        let mut dispatcher = Dispatcher::default();
        loop {
            let token = self.websocket_token().await?;
            let mut socket = PrivateSocket::open(
                &self.ws_auth_url,
                Some(r#"{"method":"ping"}"#.to_string()),
                &cancel,
                &Self::subscribe_frames(&token),
            )
            .await?;
            info!(venue = VENUE, "Private stream connected");

            let refresh = tokio::time::sleep(TOKEN_REFRESH_INTERVAL);
            tokio::pin!(refresh);
            let outcome = loop {
                tokio::select! {
                    () = cancel.cancelled() => break Ok(false),
                    () = &mut refresh => break Ok(true),
                    frame = socket.next() => {
                        let frame = match frame {
                            Ok(frame) => frame,
                            Err(e) => break Err(e),
                        };
                        match dispatcher.decode(&frame) {
                            Ok(events) => events.send(&sinks).await,
                            Err(e @ ConfluenceError::Auth(_)) => break Err(e),
                            Err(e) => warn!(venue = VENUE, error = %e, "Undecodable private frame"),
                        }
                    }
                }
            };
            socket.close().await;

            match outcome {
                Ok(true) => info!(venue = VENUE, "Refreshing WebSocket token"),
                Ok(false) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decodes private frames, keeping the orders seen so partial
/// execution updates can be completed.
#[derive(Debug, Default)]
struct Dispatcher {
    orders: HashMap<String, UserOrder>,
}

impl Dispatcher {
    fn decode(&mut self, frame: &[u8]) -> Result<UserEvents> {
        let value: Value = serde_json::from_slice(frame)?;

        if value.get("method").is_some() {
            let response: MethodResponse = serde_json::from_value(value)?;
            if response.success == Some(false) {
                let error = response.error.unwrap_or_default();
                if is_auth_error(&error) || error.contains("token") {
                    return Err(ConfluenceError::Auth(error));
                }
                warn!(venue = VENUE, method = response.method, error, "Private request rejected");
            }
            return Ok(UserEvents::default());
        }

        match value.get("channel").and_then(Value::as_str) {
            Some("executions") => self.executions(serde_json::from_value(value)?),
            Some("balances") => Ok(Self::balances(serde_json::from_value(value)?)),
            _ => Ok(UserEvents::default()),
        }
    }

    fn executions(&mut self, message: ChannelMessage<ExecutionData>) -> Result<UserEvents> {
        let snapshot = message.is_snapshot();
        if snapshot {
            self.orders.clear();
        }

        let mut orders = Vec::new();
        let mut trades = Vec::new();
        for exec in message.data {
            if exec.exec_type == "trade" {
                if let Some(trade) = self.trade(&exec)? {
                    trades.push(trade);
                }
            }
            if let Some(order) = self.order(exec)? {
                orders.push(order);
            }
        }

        let mut events = UserEvents::default();
        if snapshot {
            events.orders = Some(ResultEvent::snapshot(orders));
        } else if !orders.is_empty() {
            events.orders = Some(ResultEvent::update(orders));
        }
        if !trades.is_empty() {
            events.trades = Some(ResultEvent::update(trades));
        }
        Ok(events)
    }

    fn trade(&self, exec: &ExecutionData) -> Result<Option<Trade>> {
        let known = self.orders.get(&exec.order_id);
        let symbol = exec
            .symbol
            .as_deref()
            .map(|s| s.replace('/', "-"))
            .or_else(|| known.map(|o| o.symbol.clone()));
        let side = exec.side.as_deref().map(side).or_else(|| known.map(|o| o.side));
        let (Some(symbol), Some(side), Some(price), Some(amount)) =
            (symbol, side, exec.last_price, exec.last_qty)
        else {
            debug!(venue = VENUE, order_id = exec.order_id, "Incomplete trade execution");
            return Ok(None);
        };

        let fee = match &exec.fees {
            Some(fees) => Some(
                fees.iter()
                    .map(|f| mapping::decimal("fee", f.qty))
                    .sum::<Result<f64>>()?,
            ),
            None => None,
        };
        Ok(Some(Trade {
            id: exec.trade_id.map(|id| id.to_string()).unwrap_or_default(),
            order_id: Some(exec.order_id.clone()),
            symbol,
            side,
            price: mapping::decimal("last_price", price)?,
            amount: mapping::decimal("last_qty", amount)?,
            fee,
            timestamp: mapping::rfc3339_millis("timestamp", &exec.timestamp)?,
        }))
    }

    fn order(&mut self, exec: ExecutionData) -> Result<Option<UserOrder>> {
        let order = match self.orders.remove(&exec.order_id) {
            Some(mut order) => {
                if let Some(status) = &exec.order_status {
                    order.status = ws_status(status);
                }
                if let Some(cum) = exec.cum_qty {
                    order.filled = mapping::decimal("cum_qty", cum)?;
                }
                order
            }
            None => {
                let (Some(symbol), Some(side), Some(qty)) = (&exec.symbol, &exec.side, exec.order_qty)
                else {
                    debug!(venue = VENUE, order_id = exec.order_id, "Update for unknown order");
                    return Ok(None);
                };
                UserOrder {
                    id: exec.order_id.clone(),
                    client_id: exec.cl_ord_id.clone(),
                    symbol: symbol.replace('/', "-"),
                    side: self::side(side),
                    kind: exec.order_type.as_deref().map_or(OrderKind::Limit, kind),
                    status: exec.order_status.as_deref().map_or(OrderStatus::New, ws_status),
                    price: exec
                        .limit_price
                        .map(|p| mapping::decimal("limit_price", p))
                        .transpose()?
                        .unwrap_or_default(),
                    amount: mapping::decimal("order_qty", qty)?,
                    filled: exec
                        .cum_qty
                        .map(|q| mapping::decimal("cum_qty", q))
                        .transpose()?
                        .unwrap_or_default(),
                    created_at: mapping::rfc3339_millis("timestamp", &exec.timestamp)?,
                }
            }
        };

        if order.status.is_open() {
            self.orders.insert(order.id.clone(), order.clone());
        }
        Ok(Some(order))
    }

    fn balances(message: ChannelMessage<BalanceData>) -> UserEvents {
        let balances: HashMap<String, Balance> = message
            .data
            .iter()
            .filter_map(|data| {
                let total = mapping::decimal("balance", data.balance).ok()?;
                Some((coin(&data.asset), Balance::from_free_locked(total, 0.0)))
            })
            .collect();
        let info = UserInfo::new(balances, Access { read: true, ..Access::default() });

        UserEvents {
            info: Some(if message.is_snapshot() {
                ResultEvent::snapshot(info)
            } else {
                ResultEvent::update(info)
            }),
            ..UserEvents::default()
        }
    }
}

/// Wraps the trading API for sharing with the adapter.
pub(super) fn api(http: HttpHelper, ws_auth_url: String) -> Arc<dyn TradingApi> {
    Arc::new(KrakenTrading { http, ws_auth_url })
}
