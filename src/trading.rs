//! Private account access: balances, own orders, own trades.
//!
//! [`TradingApi`] is the venue seam. [`Trading`] wraps it with the
//! streaming pieces shared by every venue: paged trade import and the
//! private subscription, which runs three polling primers (info, orders,
//! trades) next to the venue's push dispatcher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::models::{
    EventReceiver, EventSender, OrderRequest, ResultEvent, Symbol, Trade, TradeFilter, UserInfo,
    UserOrder,
};
use crate::transport::WsClient;
use crate::{ConfluenceError, Result};

/// Capacity of each private channel.
const USER_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the import channel.
const IMPORT_CHANNEL_CAPACITY: usize = 8;

/// One venue's private REST (and optionally WebSocket) API.
#[async_trait]
pub trait TradingApi: Send + Sync + 'static {
    fn venue(&self) -> &'static str;

    /// Balances and key permissions.
    async fn info(&self) -> Result<UserInfo>;

    /// Open orders, limited to `symbols` unless empty.
    async fn orders(&self, symbols: &[Symbol]) -> Result<Vec<UserOrder>>;

    /// One page of own trades plus the filter for the next page, if any.
    async fn trades(&self, filter: &TradeFilter) -> Result<(Vec<Trade>, Option<TradeFilter>)>;

    async fn create(&self, order: &OrderRequest) -> Result<UserOrder>;

    async fn cancel(&self, order: &UserOrder) -> Result<()>;

    /// Cancels every open order, limited to `symbols` unless empty.
    async fn cancel_all(&self, symbols: &[Symbol]) -> Result<()>;

    /// Pushes private updates into `sinks` until `cancel` fires.
    ///
    /// Venues without a private push channel keep the default, which
    /// leaves the primers as the only source.
    async fn stream(&self, sinks: UserSinks, cancel: CancellationToken) -> Result<()> {
        let _ = sinks;
        cancel.cancelled().await;
        Ok(())
    }
}

/// Sending halves of the three private channels.
#[derive(Debug, Clone)]
pub struct UserSinks {
    info: EventSender<UserInfo>,
    orders: EventSender<Vec<UserOrder>>,
    trades: EventSender<Vec<Trade>>,
}

impl UserSinks {
    #[must_use]
    pub fn new(
        info: EventSender<UserInfo>,
        orders: EventSender<Vec<UserOrder>>,
        trades: EventSender<Vec<Trade>>,
    ) -> Self {
        Self {
            info,
            orders,
            trades,
        }
    }

    pub async fn info(&self, event: ResultEvent<UserInfo>) {
        let _ = self.info.send(event).await;
    }

    pub async fn orders(&self, event: ResultEvent<Vec<UserOrder>>) {
        let _ = self.orders.send(event).await;
    }

    pub async fn trades(&self, event: ResultEvent<Vec<Trade>>) {
        let _ = self.trades.send(event).await;
    }

    /// Sends `error` on all three channels.
    pub async fn error(&self, error: Arc<ConfluenceError>) {
        self.info(ResultEvent::error(Arc::clone(&error))).await;
        self.orders(ResultEvent::error(Arc::clone(&error))).await;
        self.trades(ResultEvent::error(error)).await;
    }

    /// Returns `true` once every consumer is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.info.is_closed() && self.orders.is_closed() && self.trades.is_closed()
    }
}

/// Receiving halves returned by [`Trading::subscribe`].
#[derive(Debug)]
pub struct UserStreams {
    pub info: EventReceiver<UserInfo>,
    pub orders: EventReceiver<Vec<UserOrder>>,
    pub trades: EventReceiver<Vec<Trade>>,
}

/// Trading provider for one venue.
pub struct Trading {
    api: Arc<dyn TradingApi>,
    settings: Settings,
    symbols: Vec<Symbol>,
    parent: CancellationToken,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Trading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trading")
            .field("venue", &self.api.venue())
            .field("symbols", &self.symbols.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl Trading {
    #[must_use]
    pub fn new(api: Arc<dyn TradingApi>, settings: Settings, parent: &CancellationToken) -> Self {
        Self {
            api,
            settings,
            symbols: Vec::new(),
            parent: parent.clone(),
            token: parent.child_token(),
            tasks: Vec::new(),
        }
    }

    /// Sets the symbols used by `orders`, `cancel_all` and the primers.
    pub fn set_symbols(&mut self, symbols: Vec<Symbol>) -> &mut Self {
        self.symbols = symbols;
        self
    }

    /// # Errors
    ///
    /// Returns the venue or transport error.
    pub async fn info(&self) -> Result<UserInfo> {
        self.api.info().await
    }

    /// Open orders for `symbols`, or for the configured symbols if empty.
    ///
    /// # Errors
    ///
    /// Returns the venue or transport error.
    pub async fn orders(&self, symbols: &[Symbol]) -> Result<Vec<UserOrder>> {
        let symbols = if symbols.is_empty() { &self.symbols } else { symbols };
        self.api.orders(symbols).await
    }

    /// # Errors
    ///
    /// Returns the venue or transport error.
    pub async fn trades(&self, filter: &TradeFilter) -> Result<(Vec<Trade>, Option<TradeFilter>)> {
        self.api.trades(filter).await
    }

    /// # Errors
    ///
    /// Returns [`ConfluenceError::InvalidRequest`] for a limit order
    /// without a price, otherwise the venue or transport error.
    pub async fn create(&self, order: &OrderRequest) -> Result<UserOrder> {
        if order.kind == crate::models::OrderKind::Limit && order.price.is_none() {
            return Err(ConfluenceError::InvalidRequest(
                "limit order without price".to_string(),
            ));
        }
        self.api.create(order).await
    }

    /// # Errors
    ///
    /// Returns the venue or transport error.
    pub async fn cancel(&self, order: &UserOrder) -> Result<()> {
        self.api.cancel(order).await
    }

    /// # Errors
    ///
    /// Returns the venue or transport error.
    pub async fn cancel_all(&self) -> Result<()> {
        self.api.cancel_all(&self.symbols).await
    }

    /// Walks every page of own trades matching `filter`.
    ///
    /// Each page arrives as one `u` event; the channel closes after the
    /// last page or after an error event.
    pub fn import_trades(&self, filter: TradeFilter) -> EventReceiver<Vec<Trade>> {
        let (tx, rx) = mpsc::channel(IMPORT_CHANNEL_CAPACITY);
        let api = Arc::clone(&self.api);
        let token = self.token.child_token();

        tokio::spawn(async move {
            let mut next = Some(filter);
            let mut pages = 0usize;
            while let Some(filter) = next.take() {
                let page = tokio::select! {
                    () = token.cancelled() => return,
                    page = api.trades(&filter) => page,
                };
                let event = match page {
                    Ok((trades, following)) => {
                        next = following;
                        pages += 1;
                        ResultEvent::update(trades)
                    }
                    Err(e) => {
                        warn!(venue = api.venue(), error = %e, "Trade import failed");
                        ResultEvent::error(e)
                    }
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            info!(venue = api.venue(), pages, "Trade import finished");
        });

        rx
    }

    /// Starts the private streams.
    ///
    /// Every `interval` the primers publish fresh `s` snapshots of
    /// balances, open orders and the latest trades; the venue dispatcher
    /// pushes `u` events in between. An authentication failure on the
    /// dispatcher is published and stops it; other failures reconnect
    /// after the restart back-off.
    pub fn subscribe(&mut self, interval: Duration) -> UserStreams {
        let (info_tx, info) = mpsc::channel(USER_CHANNEL_CAPACITY);
        let (orders_tx, orders) = mpsc::channel(USER_CHANNEL_CAPACITY);
        let (trades_tx, trades) = mpsc::channel(USER_CHANNEL_CAPACITY);
        let sinks = UserSinks::new(info_tx, orders_tx, trades_tx);
        let interval = interval.max(Duration::from_millis(50));

        let api = Arc::clone(&self.api);
        let symbols = self.symbols.clone();
        self.tasks.push(tokio::spawn(prime(
            self.token.child_token(),
            interval,
            sinks.clone(),
            move |sinks| {
                let api = Arc::clone(&api);
                async move {
                    let event = api.info().await.map_or_else(ResultEvent::error, ResultEvent::snapshot);
                    sinks.info(event).await;
                }
            },
        )));

        let api = Arc::clone(&self.api);
        self.tasks.push(tokio::spawn(prime(
            self.token.child_token(),
            interval,
            sinks.clone(),
            move |sinks| {
                let api = Arc::clone(&api);
                let symbols = symbols.clone();
                async move {
                    let event = api
                        .orders(&symbols)
                        .await
                        .map_or_else(ResultEvent::error, ResultEvent::snapshot);
                    sinks.orders(event).await;
                }
            },
        )));

        let api = Arc::clone(&self.api);
        let filters: Vec<TradeFilter> = if self.symbols.is_empty() {
            vec![TradeFilter::default()]
        } else {
            self.symbols.iter().cloned().map(TradeFilter::for_symbol).collect()
        };
        self.tasks.push(tokio::spawn(prime(
            self.token.child_token(),
            interval,
            sinks.clone(),
            move |sinks| {
                let api = Arc::clone(&api);
                let filters = filters.clone();
                async move {
                    for filter in &filters {
                        let event = api
                            .trades(filter)
                            .await
                            .map_or_else(ResultEvent::error, |(trades, _)| ResultEvent::snapshot(trades));
                        sinks.trades(event).await;
                    }
                }
            },
        )));

        self.tasks.push(tokio::spawn(dispatch(
            Arc::clone(&self.api),
            sinks,
            self.settings.restart_backoff,
            self.token.child_token(),
        )));

        info!(venue = self.api.venue(), "Private streams started");
        UserStreams {
            info,
            orders,
            trades,
        }
    }

    /// Stops the private streams and waits for their tasks.
    pub async fn unsubscribe(&mut self) {
        self.token.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Private stream task failed");
            }
        }
        self.token = self.parent.child_token();
    }
}

impl Drop for Trading {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn prime<F, Fut>(token: CancellationToken, interval: Duration, sinks: UserSinks, poll: F)
where
    F: Fn(UserSinks) -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if sinks.is_closed() {
            return;
        }
        tokio::select! {
            () = token.cancelled() => return,
            () = poll(sinks.clone()) => {}
        }
    }
}

async fn dispatch(
    api: Arc<dyn TradingApi>,
    sinks: UserSinks,
    backoff: Duration,
    token: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            () = token.cancelled() => return,
            result = api.stream(sinks.clone(), token.clone()) => result,
        };

        match result {
            Ok(()) => return,
            Err(ConfluenceError::Auth(reason)) => {
                error!(venue = api.venue(), reason, "Private stream authentication failed");
                sinks.error(Arc::new(ConfluenceError::Auth(reason))).await;
                return;
            }
            Err(e) => {
                warn!(venue = api.venue(), error = %e, "Private stream failed, reconnecting");
                sinks.error(Arc::new(e)).await;
            }
        }

        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Events decoded from one private frame.
#[derive(Debug, Default)]
pub(crate) struct UserEvents {
    pub(crate) info: Option<ResultEvent<UserInfo>>,
    pub(crate) orders: Option<ResultEvent<Vec<UserOrder>>>,
    pub(crate) trades: Option<ResultEvent<Vec<Trade>>>,
}

impl UserEvents {
    pub(crate) async fn send(self, sinks: &UserSinks) {
        if let Some(event) = self.info {
            sinks.info(event).await;
        }
        if let Some(event) = self.orders {
            sinks.orders(event).await;
        }
        if let Some(event) = self.trades {
            sinks.trades(event).await;
        }
    }
}

/// A private WebSocket with its inbound channels.
pub(crate) struct PrivateSocket {
    ws: WsClient,
    data_rx: mpsc::Receiver<Vec<u8>>,
    err_rx: mpsc::Receiver<ConfluenceError>,
}

impl PrivateSocket {
    /// Dials `url`, starts listening and writes `frames`.
    pub(crate) async fn open(
        url: &str,
        ping: Option<String>,
        cancel: &CancellationToken,
        frames: &[serde_json::Value],
    ) -> Result<Self> {
        let mut ws = WsClient::new(url, cancel);
        if let Some(ping) = ping {
            ws.use_ping_message(ping);
        }
        let (data_tx, data_rx) = mpsc::channel(USER_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(USER_CHANNEL_CAPACITY);

        ws.connect().await?;
        ws.listen(data_tx, err_tx)?;
        for frame in frames {
            ws.write(frame).await?;
        }
        Ok(Self { ws, data_rx, err_rx })
    }

    /// Next inbound payload, or the first transport error.
    pub(crate) async fn next(&mut self) -> Result<Vec<u8>> {
        tokio::select! {
            frame = self.data_rx.recv() => frame.ok_or(ConfluenceError::ConnectionClosed),
            error = self.err_rx.recv() => Err(error.unwrap_or(ConfluenceError::ConnectionClosed)),
        }
    }

    pub(crate) async fn write(&self, frame: &serde_json::Value) -> Result<()> {
        self.ws.write(frame).await
    }

    pub(crate) async fn close(mut self) {
        self.ws.exit().await;
    }
}
