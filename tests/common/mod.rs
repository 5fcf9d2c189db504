//! Shared test utilities: a scripted local WebSocket venue, fixtures and
//! event helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tungstenite::Message;

use confluence::ResultEvent;
use confluence::models::{Symbol, SymbolParser};

/// Replies for one connection, given its index and the subscribe frames
/// the client sent.
pub type Script = dyn Fn(usize, &[Value]) -> Vec<String> + Send + Sync;

/// A local WebSocket server playing a venue.
///
/// Each connection reads `subscribes` text frames, then writes whatever
/// the script returns for it and keeps the socket open until the client
/// leaves.
pub struct MockVenue {
    pub url: String,
    connections: Arc<AtomicUsize>,
}

impl MockVenue {
    pub async fn start(subscribes: usize, script: Arc<Script>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock venue");
        let url = format!("ws://{}", listener.local_addr().expect("no local addr"));
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let script = Arc::clone(&script);
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };

                    let mut frames = Vec::new();
                    while frames.len() < subscribes {
                        match ws.next().await {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                                    if value.get("event").and_then(Value::as_str) != Some("ping") {
                                        frames.push(value);
                                    }
                                }
                            }
                            Some(Ok(_)) => {}
                            _ => return,
                        }
                    }

                    for reply in script(index, &frames) {
                        if ws.send(Message::text(reply)).await.is_err() {
                            return;
                        }
                    }
                    while let Some(Ok(message)) = ws.next().await {
                        if message.is_close() {
                            break;
                        }
                    }
                });
            }
        });

        Self { url, connections }
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Installs a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Waits for the next event, failing the test after five seconds.
pub async fn next_event<T>(rx: &mut mpsc::Receiver<ResultEvent<T>>) -> ResultEvent<T> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skips events until one satisfies `pred`.
pub async fn next_matching<T>(
    rx: &mut mpsc::Receiver<ResultEvent<T>>,
    pred: impl Fn(&ResultEvent<T>) -> bool,
) -> ResultEvent<T> {
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Loads `tests/fixtures/<name>` as a string.
pub fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read {path}: {e}"))
}

/// Builds symbols with a venue parser; `original` is kept verbatim.
pub fn symbols(parser: &SymbolParser, originals: &[&str]) -> Vec<Symbol> {
    originals
        .iter()
        .map(|o| Symbol::new(parser.parse(o).expect("unparseable symbol"), *o))
        .collect()
}
