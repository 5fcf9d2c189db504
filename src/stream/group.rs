//! Stream group supervisor.
//!
//! A [`StreamGroup`] serves up to K symbols of one data kind on one venue.
//! Each connection attempt is a *session* running under its own child
//! cancellation token:
//!
//! - the **snapshot ticker** fetches a full HTTP snapshot immediately and
//!   then once per period, publishing `s` events;
//! - the **listener** decodes WebSocket payloads and publishes `s`/`u`;
//! - the **error watcher** turns WebSocket failures into a restart.
//!
//! A restart closes the socket, joins every session task, publishes an
//! error event, backs off and opens a fresh session on the same output
//! channel. Updates for a symbol are held back until that symbol has had
//! a snapshot in the current session.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::feed::{Feed, Frame, FrameContext, Keyed};
use crate::config::Settings;
use crate::models::{DataKind, EventSender, Payload, ResultEvent, Symbol};
use crate::transport::{HttpHelper, WsClient};
use crate::{ConfluenceError, Result};

/// Lower bound for the snapshot cadence.
const MIN_SNAPSHOT_PERIOD: Duration = Duration::from_millis(50);

/// Worker serving one shard of symbols.
pub struct StreamGroup<T: Payload> {
    feed: Arc<dyn Feed<Item = T>>,
    http: HttpHelper,
    symbols: Arc<[Symbol]>,
    settings: Settings,
    token: CancellationToken,
    restarts: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Payload> std::fmt::Debug for StreamGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGroup")
            .field("venue", &self.feed.venue())
            .field("kind", &self.feed.kind())
            .field("symbols", &self.symbols.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl<T: Payload> StreamGroup<T> {
    /// Creates an idle group; it stops when `parent` is cancelled.
    #[must_use]
    pub fn new(
        feed: Arc<dyn Feed<Item = T>>,
        http: HttpHelper,
        symbols: Vec<Symbol>,
        settings: Settings,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            feed,
            http,
            symbols: symbols.into(),
            settings,
            token: parent.child_token(),
            restarts: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Number of restarts since the group was started.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Returns `true` once `start` has been called, even if the group has
    /// stopped since.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Starts the supervisor after `delay`, publishing into `out`.
    ///
    /// `period` is the HTTP snapshot cadence. Starting twice is a no-op.
    pub fn start(&mut self, out: EventSender<T>, period: Duration, delay: Duration) {
        if self.handle.is_some() {
            warn!(venue = self.feed.venue(), kind = %self.feed.kind(), "Stream group already started");
            return;
        }

        let supervisor = Supervisor {
            feed: Arc::clone(&self.feed),
            http: self.http.clone(),
            symbols: Arc::clone(&self.symbols),
            settings: self.settings.clone(),
            period: period.max(MIN_SNAPSHOT_PERIOD),
            token: self.token.clone(),
            restarts: Arc::clone(&self.restarts),
            out,
        };
        self.handle = Some(tokio::spawn(supervisor.run(delay)));
    }

    /// Cancels the group and waits until its socket is closed and every
    /// task has finished.
    pub async fn exit(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(venue = self.feed.venue(), error = %e, "Stream group task failed");
            }
        }
    }
}

impl<T: Payload> Drop for StreamGroup<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Supervisor<T: Payload> {
    feed: Arc<dyn Feed<Item = T>>,
    http: HttpHelper,
    symbols: Arc<[Symbol]>,
    settings: Settings,
    period: Duration,
    token: CancellationToken,
    restarts: Arc<AtomicU64>,
    out: EventSender<T>,
}

impl<T: Payload> Supervisor<T> {
    async fn run(self, delay: Duration) {
        let venue = self.feed.venue();
        let kind = self.feed.kind();

        if !delay.is_zero() && !self.sleep(delay).await {
            return;
        }
        info!(venue, %kind, symbols = self.symbols.len(), "Starting stream group");

        while let Some(error) = self.session().await {
            let restarts = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(venue, %kind, restarts, error = %error, "Restarting stream group");
            if !self.sleep(self.settings.restart_backoff).await {
                break;
            }
        }

        info!(venue, %kind, "Stream group stopped");
    }

    /// Sleeps unless cancelled first; returns `false` on cancellation.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.token.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    /// Runs one session; returns the error that ended it, `None` once the
    /// group is cancelled.
    async fn session(&self) -> Option<Arc<ConfluenceError>> {
        let session = self.token.child_token();
        let ctx = Arc::new(FrameContext::new(Arc::clone(&self.symbols)));
        let publisher = Arc::new(Publisher::new(
            self.out.clone(),
            self.token.clone(),
            session.clone(),
            self.feed.venue(),
            self.feed.kind(),
        ));
        let (restart_tx, mut restart_rx) = mpsc::channel::<ConfluenceError>(1);
        let mut tasks = JoinSet::new();

        tasks.spawn(snapshot_ticker(
            Arc::clone(&self.feed),
            self.http.clone(),
            Arc::clone(&ctx),
            Arc::clone(&publisher),
            self.period,
            self.settings.snapshot_retry_delay,
            session.clone(),
        ));

        let mut ws = None;
        if let Some(url) = self.feed.endpoint(&self.symbols) {
            let capacity = (2 * self.symbols.len()).max(1);
            let (data_tx, data_rx) = mpsc::channel(capacity);
            let (err_tx, err_rx) = mpsc::channel(capacity);

            tasks.spawn(listen(
                Arc::clone(&self.feed),
                Arc::clone(&ctx),
                Arc::clone(&publisher),
                data_rx,
                restart_tx.clone(),
                session.clone(),
            ));
            tasks.spawn(watch_errors(err_rx, restart_tx.clone(), session.clone()));

            let mut client = WsClient::new(url, &session);
            client.set_ping_interval(self.settings.ping_interval);
            if let Some(ping) = self.feed.ping_message() {
                client.use_ping_message(ping);
            }

            let dialed = tokio::select! {
                () = session.cancelled() => Ok(()),
                dialed = self.dial(&mut client, data_tx, err_tx) => dialed,
            };
            if let Err(e) = dialed {
                warn!(venue = self.feed.venue(), kind = %self.feed.kind(), error = %e, "Dial failed");
                let _ = restart_tx.try_send(e);
            }
            ws = Some(client);
        }

        let reason = tokio::select! {
            () = self.token.cancelled() => None,
            reason = restart_rx.recv() => reason.map(Arc::new),
        };

        session.cancel();
        if let Some(mut client) = ws {
            client.exit().await;
        }
        while tasks.join_next().await.is_some() {}

        // Published only after every session task is gone, so nothing from
        // the old session can follow it.
        if let Some(error) = &reason {
            self.publish_restart(Arc::clone(error)).await;
        }
        reason
    }

    async fn publish_restart(&self, error: Arc<ConfluenceError>) {
        tokio::select! {
            () = self.token.cancelled() => {}
            sent = self.out.send(ResultEvent::error(error)) => {
                if sent.is_err() {
                    info!(venue = self.feed.venue(), kind = %self.feed.kind(), "Consumer dropped, stopping group");
                    self.token.cancel();
                }
            }
        }
    }

    async fn dial(
        &self,
        client: &mut WsClient,
        data_tx: mpsc::Sender<Vec<u8>>,
        err_tx: mpsc::Sender<ConfluenceError>,
    ) -> Result<()> {
        client.connect().await?;
        client.listen(data_tx, err_tx)?;

        let frames = self.feed.subscribe_frames(&self.symbols);
        for frame in &frames {
            client.write(frame).await?;
        }
        info!(
            venue = self.feed.venue(),
            kind = %self.feed.kind(),
            frames = frames.len(),
            symbols = self.symbols.len(),
            "Subscribed"
        );
        Ok(())
    }
}

/// Output side of one session.
///
/// Remembers which symbols already had a snapshot so that updates never
/// reach the consumer ahead of one.
struct Publisher<T> {
    out: EventSender<T>,
    primed: Mutex<HashSet<String>>,
    group: CancellationToken,
    session: CancellationToken,
    venue: &'static str,
    kind: DataKind,
}

impl<T: Payload> Publisher<T> {
    fn new(
        out: EventSender<T>,
        group: CancellationToken,
        session: CancellationToken,
        venue: &'static str,
        kind: DataKind,
    ) -> Self {
        Self {
            out,
            primed: Mutex::new(HashSet::new()),
            group,
            session,
            venue,
            kind,
        }
    }

    /// Publishes every snapshot, empty ones included, and opens the gate
    /// for later updates of each symbol.
    async fn snapshot(&self, items: Vec<Keyed<T>>) {
        for (symbol, item) in items {
            self.primed.lock().insert(symbol);
            if !self.send(ResultEvent::snapshot(item)).await {
                return;
            }
        }
    }

    async fn update(&self, items: Vec<T>) {
        for item in items {
            if item.is_empty() {
                continue;
            }
            if !self.primed.lock().contains(item.symbol()) {
                debug!(venue = self.venue, kind = %self.kind, symbol = item.symbol(), "Update before snapshot dropped");
                continue;
            }
            if !self.send(ResultEvent::update(item)).await {
                return;
            }
        }
    }

    async fn error(&self, error: impl Into<Arc<ConfluenceError>>) {
        self.send(ResultEvent::error(error)).await;
    }

    /// Returns `false` if the session ended or the consumer is gone.
    async fn send(&self, event: ResultEvent<T>) -> bool {
        tokio::select! {
            () = self.session.cancelled() => false,
            sent = self.out.send(event) => {
                if sent.is_err() {
                    info!(venue = self.venue, kind = %self.kind, "Consumer dropped, stopping group");
                    self.group.cancel();
                    return false;
                }
                true
            }
        }
    }
}

async fn snapshot_ticker<T: Payload>(
    feed: Arc<dyn Feed<Item = T>>,
    http: HttpHelper,
    ctx: Arc<FrameContext>,
    publisher: Arc<Publisher<T>>,
    period: Duration,
    retry_delay: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            () = token.cancelled() => return,
            result = fetch_snapshot(feed.as_ref(), &http, &ctx, retry_delay) => result,
        };

        match result {
            Ok(items) => publisher.snapshot(items).await,
            Err(e) => {
                warn!(venue = feed.venue(), kind = %feed.kind(), error = %e, "Snapshot failed");
                publisher.error(e).await;
            }
        }
    }
}

/// One snapshot fetch with a single local retry on transport errors.
async fn fetch_snapshot<T: Payload>(
    feed: &dyn Feed<Item = T>,
    http: &HttpHelper,
    ctx: &FrameContext,
    retry_delay: Duration,
) -> Result<Vec<Keyed<T>>> {
    match feed.snapshot(http, ctx).await {
        Err(e) if e.is_transport() => {
            warn!(venue = feed.venue(), kind = %feed.kind(), error = %e, "Snapshot failed, retrying once");
            tokio::time::sleep(retry_delay).await;
            feed.snapshot(http, ctx).await
        }
        result => result,
    }
}

async fn listen<T: Payload>(
    feed: Arc<dyn Feed<Item = T>>,
    ctx: Arc<FrameContext>,
    publisher: Arc<Publisher<T>>,
    mut data_rx: mpsc::Receiver<Vec<u8>>,
    restart_tx: mpsc::Sender<ConfluenceError>,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = token.cancelled() => return,
            frame = data_rx.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };

        match feed.decode(&frame, &ctx) {
            Ok(Frame::Snapshot(items)) => publisher.snapshot(items).await,
            Ok(Frame::Update(items)) => publisher.update(items).await,
            Ok(Frame::Stopping(error)) => {
                warn!(venue = feed.venue(), kind = %feed.kind(), error = %error, "Venue requested reconnect");
                let _ = restart_tx.try_send(error);
            }
            Ok(Frame::Skip) => {}
            Err(e) => warn!(
                venue = feed.venue(),
                kind = %feed.kind(),
                error = %e,
                payload = %String::from_utf8_lossy(&frame),
                "Dropping undecodable frame"
            ),
        }
    }
}

async fn watch_errors(
    mut err_rx: mpsc::Receiver<ConfluenceError>,
    restart_tx: mpsc::Sender<ConfluenceError>,
    token: CancellationToken,
) {
    loop {
        let error = tokio::select! {
            () = token.cancelled() => return,
            error = err_rx.recv() => match error {
                Some(error) => error,
                None => return,
            },
        };
        let _ = restart_tx.try_send(error);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use super::*;
    use crate::models::{DataType, Order, OrderBook, Quote, Side, SymbolParser, Trade};
    use crate::stream::keyed;

    struct FakeFeed {
        endpoint: Option<String>,
        calls: AtomicUsize,
        fail_first: Option<fn() -> ConfluenceError>,
    }

    impl FakeFeed {
        fn http_only(fail_first: Option<fn() -> ConfluenceError>) -> Self {
            Self {
                endpoint: None,
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl Feed for FakeFeed {
        type Item = Quote;

        fn venue(&self) -> &'static str {
            "fake"
        }

        fn kind(&self) -> DataKind {
            DataKind::Quotes
        }

        fn shard_limit(&self) -> usize {
            2
        }

        fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
            self.endpoint.clone()
        }

        fn subscribe_frames(&self, _symbols: &[Symbol]) -> Vec<serde_json::Value> {
            Vec::new()
        }

        async fn snapshot(&self, _http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Quote>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                if let Some(fail) = self.fail_first {
                    return Err(fail());
                }
            }
            Ok(keyed(ctx.symbols().iter().map(|s| Quote {
                symbol: s.name.clone(),
                last: n as f64,
                ..Quote::default()
            })))
        }

        fn decode(&self, _frame: &[u8], _ctx: &FrameContext) -> Result<Frame<Quote>> {
            Ok(Frame::Skip)
        }
    }

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        let parser = SymbolParser::separator('_');
        names
            .iter()
            .map(|n| Symbol::new(parser.parse(n).unwrap(), *n))
            .collect()
    }

    fn fast_settings() -> Settings {
        Settings {
            restart_backoff: Duration::from_millis(50),
            snapshot_retry_delay: Duration::from_millis(10),
            ..Settings::default()
        }
    }

    fn group(feed: FakeFeed, names: &[&str]) -> StreamGroup<Quote> {
        StreamGroup::new(
            Arc::new(feed),
            HttpHelper::new("http://127.0.0.1:9", reqwest::Client::new()),
            symbols(names),
            fast_settings(),
            &CancellationToken::new(),
        )
    }

    async fn next(rx: &mut mpsc::Receiver<ResultEvent<Quote>>) -> ResultEvent<Quote> {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn http_only_group_publishes_snapshots_per_symbol() {
        let mut group = group(FakeFeed::http_only(None), &["ETH_BTC", "BTC_USDT"]);
        let (tx, mut rx) = mpsc::channel(8);
        group.start(tx, Duration::from_millis(50), Duration::ZERO);

        let first = next(&mut rx).await;
        let second = next(&mut rx).await;
        assert_eq!(first.data_type, DataType::Snapshot);
        assert_eq!(first.data.unwrap().symbol, "ETH-BTC");
        assert_eq!(second.data.unwrap().symbol, "BTC-USDT");

        let again = next(&mut rx).await;
        assert_eq!(again.data_type, DataType::Snapshot);
        assert_eq!(again.data.unwrap().last, 1.0);

        group.exit().await;
        assert!(!group.is_running());
    }

    #[tokio::test]
    async fn transport_failure_is_retried_before_surfacing() {
        let mut group = group(
            FakeFeed::http_only(Some(|| ConfluenceError::ConnectionClosed)),
            &["ETH_BTC"],
        );
        let (tx, mut rx) = mpsc::channel(8);
        group.start(tx, Duration::from_secs(60), Duration::ZERO);

        let event = next(&mut rx).await;
        assert!(!event.is_error());
        assert_eq!(event.data_type, DataType::Snapshot);
        group.exit().await;
    }

    #[tokio::test]
    async fn status_failure_publishes_error_and_keeps_ticking() {
        let mut group = group(
            FakeFeed::http_only(Some(|| ConfluenceError::Status {
                status: 502,
                body: "bad gateway".into(),
            })),
            &["ETH_BTC"],
        );
        let (tx, mut rx) = mpsc::channel(8);
        group.start(tx, Duration::from_millis(50), Duration::ZERO);

        let error = next(&mut rx).await;
        assert_eq!(error.data_type, DataType::Error);
        assert!(matches!(
            error.error.as_deref(),
            Some(ConfluenceError::Status { status: 502, .. })
        ));

        let recovered = next(&mut rx).await;
        assert_eq!(recovered.data_type, DataType::Snapshot);
        assert_eq!(group.restarts(), 0);
        group.exit().await;
    }

    #[tokio::test]
    async fn dial_failure_restarts_the_group() {
        let feed = FakeFeed {
            endpoint: Some("ws://127.0.0.1:1".to_string()),
            calls: AtomicUsize::new(0),
            fail_first: None,
        };
        let mut group = group(feed, &["ETH_BTC"]);
        let (tx, mut rx) = mpsc::channel(16);
        group.start(tx, Duration::from_secs(60), Duration::ZERO);

        let mut saw_error = false;
        for _ in 0..6 {
            if next(&mut rx).await.is_error() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);

        timeout(Duration::from_secs(5), async {
            while group.restarts() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        group.exit().await;
    }

    #[tokio::test]
    async fn dropped_consumer_stops_the_group() {
        let mut group = group(FakeFeed::http_only(None), &["ETH_BTC"]);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        group.start(tx, Duration::from_millis(50), Duration::ZERO);

        timeout(Duration::from_secs(5), async {
            while group.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn updates_wait_for_a_snapshot() {
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let publisher = Publisher::new(tx, token.clone(), token.child_token(), "fake", DataKind::Quotes);
        let quote = |last| Quote {
            symbol: "ETH-BTC".into(),
            last,
            ..Quote::default()
        };

        publisher.update(vec![quote(1.0)]).await;
        publisher.snapshot(keyed([quote(2.0)])).await;
        publisher.update(vec![quote(3.0)]).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.data_type, DataType::Snapshot);
        assert_eq!(first.data.unwrap().last, 2.0);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.data_type, DataType::Update);
        assert_eq!(second.data.unwrap().last, 3.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_book_snapshot_is_published_and_opens_updates() {
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let publisher = Publisher::new(tx, token.clone(), token.child_token(), "fake", DataKind::Book);

        publisher.snapshot(keyed([OrderBook::new("BTC-USD")])).await;
        let mut book = OrderBook::new("BTC-USD");
        book.push(Order::new("BTC-USD", Side::Buy, 100.0, 1.0));
        publisher.update(vec![book]).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.data_type, DataType::Snapshot);
        let empty = first.data.unwrap();
        assert_eq!(empty.symbol, "BTC-USD");
        assert!(empty.buy.is_empty() && empty.sell.is_empty());
        let second = rx.recv().await.unwrap();
        assert_eq!(second.data_type, DataType::Update);
        assert_eq!(second.data.unwrap().buy[0].price, 100.0);
    }

    #[tokio::test]
    async fn empty_trade_snapshot_keeps_its_symbol() {
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let publisher: Publisher<Vec<Trade>> =
            Publisher::new(tx, token.clone(), token.child_token(), "fake", DataKind::Trades);
        let trade = Trade {
            id: "7".into(),
            order_id: None,
            symbol: "ETH-BTC".into(),
            side: Side::Buy,
            price: 0.05,
            amount: 1.0,
            fee: None,
            timestamp: 1_700_000_000_000,
        };

        publisher.snapshot(vec![("ETH-BTC".to_string(), Vec::new())]).await;
        publisher.update(vec![vec![trade]]).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.data_type, DataType::Snapshot);
        assert!(first.data.unwrap().is_empty());
        let second = rx.recv().await.unwrap();
        assert_eq!(second.data_type, DataType::Update);
        assert_eq!(second.data.unwrap()[0].id, "7");
    }
}
