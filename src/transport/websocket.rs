//! Single-connection WebSocket client.
//!
//! A [`WsClient`] dials one URL, pumps every inbound payload into a data
//! channel, reports read and keep-alive failures on an error channel and
//! serializes writes behind a mutex. It never reconnects by itself; the
//! owning stream group decides when to tear it down and dial again.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::Message;

use super::tls;
use crate::{ConfluenceError, Result};

/// Default keep-alive cadence.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Write half of a venue WebSocket connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of a venue WebSocket connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One WebSocket connection with a read loop and an optional keep-alive.
pub struct WsClient {
    url: String,
    token: CancellationToken,
    writer: Arc<Mutex<Option<WsWriter>>>,
    reader: Option<WsReader>,
    tasks: JoinSet<()>,
    ping_message: Option<String>,
    keep_alive: bool,
    ping_interval: Duration,
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.url)
            .field("keep_alive", &self.keep_alive)
            .field("ping_interval", &self.ping_interval)
            .finish_non_exhaustive()
    }
}

impl WsClient {
    /// Creates a client whose tasks stop when `parent` is cancelled.
    #[must_use]
    pub fn new(url: impl Into<String>, parent: &CancellationToken) -> Self {
        Self {
            url: url.into(),
            token: parent.child_token(),
            writer: Arc::new(Mutex::new(None)),
            reader: None,
            tasks: JoinSet::new(),
            ping_message: None,
            keep_alive: true,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends `message` as a text frame on every keep-alive tick instead
    /// of a protocol-level ping.
    pub fn use_ping_message(&mut self, message: impl Into<String>) {
        self.ping_message = Some(message.into());
    }

    /// Enables or disables the keep-alive ticker (on by default).
    pub fn change_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    pub fn set_ping_interval(&mut self, interval: Duration) {
        self.ping_interval = interval;
    }

    /// Dials the URL and completes the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::WebSocket`] if the TCP, TLS or WebSocket
    /// handshake fails.
    pub async fn connect(&mut self) -> Result<()> {
        tls::install_crypto_provider();

        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "WebSocket handshake completed");

        let (write, read) = ws_stream.split();
        *self.writer.lock().await = Some(write);
        self.reader = Some(read);
        Ok(())
    }

    /// Starts the read loop and, if enabled, the keep-alive ticker.
    ///
    /// Every text or binary payload is pushed onto `data`. Read and ping
    /// failures go to `err` and the loops keep running; a close frame or
    /// the end of the stream pushes [`ConfluenceError::ConnectionClosed`]
    /// and stops reading.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::NotConnected`] if called before
    /// [`WsClient::connect`] or twice.
    pub fn listen(
        &mut self,
        data: mpsc::Sender<Vec<u8>>,
        err: mpsc::Sender<ConfluenceError>,
    ) -> Result<()> {
        let reader = self.reader.take().ok_or(ConfluenceError::NotConnected)?;

        self.tasks.spawn(read_loop(
            reader,
            data,
            err.clone(),
            self.token.clone(),
            self.url.clone(),
        ));

        if self.keep_alive {
            self.tasks.spawn(ping_loop(
                Arc::clone(&self.writer),
                self.ping_message.clone(),
                self.ping_interval,
                err,
                self.token.clone(),
            ));
        }

        Ok(())
    }

    /// Serializes `message` as JSON and sends it as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::NotConnected`] before `connect` or after
    /// `exit`, or the send error.
    pub async fn write<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let json = serde_json::to_string(message)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ConfluenceError::NotConnected)?;
        writer.send(Message::Text(json.into())).await?;
        debug!(url = %self.url, "Sent frame");
        Ok(())
    }

    /// Sends a close frame and tears the connection down.
    ///
    /// The connection is released even if the close frame cannot be
    /// written; the read and ping tasks are awaited before returning.
    pub async fn exit(&mut self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.send(Message::Close(None)).await {
                debug!(url = %self.url, error = %e, "Close frame not sent");
            }
        }

        self.token.cancel();
        self.reader = None;
        while self.tasks.join_next().await.is_some() {}
        debug!(url = %self.url, "WebSocket released");
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn read_loop(
    mut reader: WsReader,
    data: mpsc::Sender<Vec<u8>>,
    err: mpsc::Sender<ConfluenceError>,
    token: CancellationToken,
    url: String,
) {
    loop {
        let msg = tokio::select! {
            () = token.cancelled() => return,
            msg = reader.next() => msg,
        };

        let payload = match msg {
            Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
            Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(Message::Close(frame))) => {
                info!(url = %url, ?frame, "WebSocket closed by peer");
                push_error(&err, ConfluenceError::ConnectionClosed, &token).await;
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(url = %url, error = %e, "WebSocket read error");
                push_error(&err, e.into(), &token).await;
                continue;
            }
            None => {
                warn!(url = %url, "WebSocket stream ended");
                push_error(&err, ConfluenceError::ConnectionClosed, &token).await;
                return;
            }
        };

        tokio::select! {
            () = token.cancelled() => return,
            sent = data.send(payload) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn ping_loop(
    writer: Arc<Mutex<Option<WsWriter>>>,
    message: Option<String>,
    period: Duration,
    err: mpsc::Sender<ConfluenceError>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let frame = match &message {
            Some(text) => Message::Text(text.clone().into()),
            None => Message::Ping(Default::default()),
        };

        let result = match writer.lock().await.as_mut() {
            Some(w) => w.send(frame).await.map_err(ConfluenceError::from),
            None => Err(ConfluenceError::NotConnected),
        };

        match result {
            Ok(()) => debug!("Sent ping"),
            Err(e) => {
                warn!(error = %e, "Keep-alive ping failed");
                push_error(&err, e, &token).await;
            }
        }
    }
}

async fn push_error(
    err: &mpsc::Sender<ConfluenceError>,
    error: ConfluenceError,
    token: &CancellationToken,
) {
    tokio::select! {
        () = token.cancelled() => {}
        _ = err.send(error) => {}
    }
}
