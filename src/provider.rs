//! Public providers: one per market-data kind.
//!
//! A [`MarketProvider`] wraps one venue [`Feed`]. `set_symbols` shards the
//! universe into stream groups of at most K symbols, `subscribe_all`
//! starts them all on one shared channel, `subscribe` runs an ad-hoc
//! group for a single symbol and `get` is a plain HTTP round-trip.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::models::{
    Candle, DataKind, EventReceiver, OrderBook, Payload, Quote, ResultEvent, Symbol, Trade,
};
use crate::stream::{Feed, FrameContext, StreamGroup, shard};
use crate::transport::HttpHelper;
use crate::{ConfluenceError, Result};

/// Order books.
pub type OrdersProvider = MarketProvider<OrderBook>;

/// Public trades, grouped per symbol.
pub type TradesProvider = MarketProvider<Vec<Trade>>;

/// Ticker quotes.
pub type QuotesProvider = MarketProvider<Quote>;

/// OHLCV candles, grouped per symbol.
pub type CandlesProvider = MarketProvider<Vec<Candle>>;

/// Provider for one market-data kind on one venue.
pub struct MarketProvider<T: Payload> {
    feed: Arc<dyn Feed<Item = T>>,
    http: HttpHelper,
    settings: Settings,
    token: CancellationToken,
    symbols: Vec<Symbol>,
    groups: Vec<StreamGroup<T>>,
    adhoc: Vec<StreamGroup<T>>,
}

impl<T: Payload> std::fmt::Debug for MarketProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketProvider")
            .field("venue", &self.feed.venue())
            .field("kind", &self.feed.kind())
            .field("symbols", &self.symbols.len())
            .field("groups", &self.group_sizes())
            .finish()
    }
}

impl<T: Payload> MarketProvider<T> {
    #[must_use]
    pub fn new(
        feed: Arc<dyn Feed<Item = T>>,
        http: HttpHelper,
        settings: Settings,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            feed,
            http,
            settings,
            token: parent.child_token(),
            symbols: Vec::new(),
            groups: Vec::new(),
            adhoc: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> DataKind {
        self.feed.kind()
    }

    /// Maximum number of symbols per group.
    #[must_use]
    pub fn shard_limit(&self) -> usize {
        self.feed.shard_limit()
    }

    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Sizes of the groups built by the last `set_symbols`.
    #[must_use]
    pub fn group_sizes(&self) -> Vec<usize> {
        self.groups.iter().map(|g| g.symbols().len()).collect()
    }

    #[must_use]
    pub fn groups(&self) -> &[StreamGroup<T>] {
        &self.groups
    }

    /// Fetches a snapshot for `symbol`, or for every configured symbol.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::InvalidRequest`] if no symbol is given
    /// and none were set, or the HTTP/decoding error.
    pub async fn get(&self, symbol: Option<&Symbol>) -> Result<Vec<T>> {
        let symbols = match symbol {
            Some(symbol) => vec![symbol.clone()],
            None => self.symbols.clone(),
        };
        if symbols.is_empty() {
            return Err(ConfluenceError::InvalidRequest(
                "no symbols set for snapshot".to_string(),
            ));
        }

        let mut items = Vec::new();
        for chunk in shard(&symbols, self.feed.shard_limit()) {
            let ctx = FrameContext::new(chunk.into());
            let snapshot = self.feed.snapshot(&self.http, &ctx).await?;
            items.extend(snapshot.into_iter().map(|(_, item)| item));
        }
        Ok(items)
    }

    /// Replaces the universe and shards it into idle groups.
    ///
    /// Groups from a previous universe are stopped.
    pub fn set_symbols(&mut self, symbols: Vec<Symbol>) -> &mut Self {
        let limit = self.feed.shard_limit();
        self.groups = shard(&symbols, limit)
            .into_iter()
            .map(|chunk| {
                StreamGroup::new(
                    Arc::clone(&self.feed),
                    self.http.clone(),
                    chunk,
                    self.settings.clone(),
                    &self.token,
                )
            })
            .collect();
        self.symbols = symbols;

        info!(
            venue = self.feed.venue(),
            kind = %self.feed.kind(),
            symbols = self.symbols.len(),
            groups = self.groups.len(),
            limit,
            "Symbols sharded"
        );
        self
    }

    /// Streams a single symbol through its own group.
    pub fn subscribe(&mut self, symbol: Symbol, period: Duration) -> EventReceiver<T> {
        let (tx, rx) = mpsc::channel(2);
        let mut group = StreamGroup::new(
            Arc::clone(&self.feed),
            self.http.clone(),
            vec![symbol],
            self.settings.clone(),
            &self.token,
        );
        group.start(tx, period, Duration::ZERO);
        self.adhoc.push(group);
        rx
    }

    /// Starts every group on one shared channel.
    ///
    /// Group starts are staggered by the configured delay. Calling it again
    /// replaces the running groups with fresh ones on the new channel; the
    /// previous receiver closes once the old groups have stopped.
    pub fn subscribe_all(&mut self, period: Duration) -> EventReceiver<T> {
        let (tx, rx) = mpsc::channel((2 * self.symbols.len()).max(1));
        if self.groups.is_empty() {
            warn!(venue = self.feed.venue(), kind = %self.feed.kind(), "subscribe_all without symbols");
        }
        if self.groups.iter().any(StreamGroup::is_started) {
            warn!(venue = self.feed.venue(), kind = %self.feed.kind(), "Groups already started, restarting on a new channel");
            let symbols = std::mem::take(&mut self.symbols);
            self.set_symbols(symbols);
        }

        let stagger = self.settings.start_stagger;
        for (i, group) in self.groups.iter_mut().enumerate() {
            let delay = stagger.saturating_mul(u32::try_from(i).unwrap_or(u32::MAX));
            group.start(tx.clone(), period, delay);
        }
        rx
    }

    /// Stops every group and closes their sockets.
    ///
    /// The universe is kept and re-sharded, so `subscribe_all` can be
    /// called again.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature leaves room for venues that must
    /// send explicit unsubscribe requests.
    pub async fn unsubscribe(&mut self) -> Result<()> {
        for group in self.groups.iter_mut().chain(self.adhoc.iter_mut()) {
            group.exit().await;
        }
        self.adhoc.clear();

        let symbols = std::mem::take(&mut self.symbols);
        self.set_symbols(symbols);
        Ok(())
    }
}

/// Venue metadata endpoint listing tradeable pairs.
#[async_trait]
pub trait SymbolSource: Send + Sync + 'static {
    fn venue(&self) -> &'static str;

    /// Fetches and parses the venue's pair list.
    async fn symbols(&self, http: &HttpHelper) -> Result<Vec<Symbol>>;
}

/// Provider of the tradeable universe.
pub struct SymbolsProvider {
    source: Arc<dyn SymbolSource>,
    http: HttpHelper,
    parent: CancellationToken,
    token: CancellationToken,
}

impl std::fmt::Debug for SymbolsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolsProvider")
            .field("venue", &self.source.venue())
            .finish()
    }
}

impl SymbolsProvider {
    #[must_use]
    pub fn new(source: Arc<dyn SymbolSource>, http: HttpHelper, parent: &CancellationToken) -> Self {
        Self {
            source,
            http,
            parent: parent.clone(),
            token: parent.child_token(),
        }
    }

    /// Fetches every symbol, or the one with canonical `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::Symbol`] if `name` is not listed, or the
    /// HTTP/decoding error.
    pub async fn get(&self, name: Option<&str>) -> Result<Vec<Symbol>> {
        let symbols = self.source.symbols(&self.http).await?;
        match name {
            None => Ok(symbols),
            Some(name) => symbols
                .into_iter()
                .find(|s| s.name == name)
                .map(|s| vec![s])
                .ok_or_else(|| ConfluenceError::Symbol(name.to_string())),
        }
    }

    /// Polls one symbol every `period`, emitting `s` events.
    pub fn subscribe(&self, name: &str, period: Duration) -> EventReceiver<Vec<Symbol>> {
        self.poll(Some(name.to_string()), period)
    }

    /// Polls the universe every `period`, emitting `s` events.
    pub fn subscribe_all(&self, period: Duration) -> EventReceiver<Vec<Symbol>> {
        self.poll(None, period)
    }

    /// Stops every polling task.
    pub fn unsubscribe(&mut self) {
        self.token.cancel();
        self.token = self.parent.child_token();
    }

    fn poll(&self, name: Option<String>, period: Duration) -> EventReceiver<Vec<Symbol>> {
        let (tx, rx) = mpsc::channel(2);
        let source = Arc::clone(&self.source);
        let http = self.http.clone();
        let token = self.token.child_token();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(50)));
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let event = match source.symbols(&http).await {
                    Ok(symbols) => {
                        let symbols: Vec<Symbol> = match &name {
                            Some(name) => symbols.into_iter().filter(|s| &s.name == name).collect(),
                            None => symbols,
                        };
                        ResultEvent::snapshot(symbols)
                    }
                    Err(e) => {
                        warn!(venue = source.venue(), error = %e, "Symbols fetch failed");
                        ResultEvent::error(e)
                    }
                };

                tokio::select! {
                    () = token.cancelled() => return,
                    sent = tx.send(event) => if sent.is_err() { return },
                }
            }
        });

        rx
    }
}
