//! The venue seam of a stream group.
//!
//! A [`Feed`] knows one venue's wire format for one data kind: where to
//! dial, what to send to subscribe, how to fetch an HTTP snapshot and how
//! to turn an inbound frame into normalized items. It owns no runtime
//! state; everything per-session lives in the [`FrameContext`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::subscriptions::Subscriptions;
use crate::models::{DataKind, Payload, Symbol};
use crate::state::State;
use crate::transport::HttpHelper;
use crate::{ConfluenceError, Result};

/// Complete state for one symbol, keyed by its canonical name.
///
/// The key is carried next to the data so that an empty book or an empty
/// trade list still reaches the consumer.
pub type Keyed<T> = (String, T);

/// What one decoded frame means for the group.
#[derive(Debug)]
pub enum Frame<T> {
    /// Complete state for the contained symbols.
    Snapshot(Vec<Keyed<T>>),
    /// Deltas on top of the last snapshot.
    Update(Vec<T>),
    /// The venue asked clients to reconnect.
    Stopping(ConfluenceError),
    /// Control traffic, heartbeats, acks.
    Skip,
}

/// Per-session lookup tables and scratch state handed to a [`Feed`].
#[derive(Debug)]
pub struct FrameContext {
    symbols: Arc<[Symbol]>,
    by_original: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    subs: Subscriptions,
    state: State,
}

impl FrameContext {
    #[must_use]
    pub fn new(symbols: Arc<[Symbol]>) -> Self {
        let by_original = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.original_name.to_uppercase(), i))
            .collect();
        let by_name = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        Self {
            symbols,
            by_original,
            by_name,
            subs: Subscriptions::new(),
            state: State::new(),
        }
    }

    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Finds a symbol by its venue-original name, ignoring case.
    #[must_use]
    pub fn by_original(&self, original: &str) -> Option<&Symbol> {
        self.by_original
            .get(&original.to_uppercase())
            .map(|&i| &self.symbols[i])
    }

    /// Finds a symbol by its canonical `BASE-QUOTE` name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }

    #[must_use]
    pub fn subs(&self) -> &Subscriptions {
        &self.subs
    }

    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }
}

/// Keys single-symbol payloads such as books and quotes by their symbol.
pub fn keyed<T: Payload>(items: impl IntoIterator<Item = T>) -> Vec<Keyed<T>> {
    items
        .into_iter()
        .map(|item| (item.symbol().to_string(), item))
        .collect()
}

/// One venue's implementation of one market-data kind.
#[async_trait]
pub trait Feed: Send + Sync + 'static {
    type Item: Payload;

    /// Venue name used in logs.
    fn venue(&self) -> &'static str;

    fn kind(&self) -> DataKind;

    /// Maximum number of symbols per group.
    fn shard_limit(&self) -> usize;

    /// WebSocket URL for a group serving `symbols`; `None` for venues
    /// served over HTTP only.
    fn endpoint(&self, symbols: &[Symbol]) -> Option<String>;

    /// Application-level keep-alive payload, if the venue wants one.
    fn ping_message(&self) -> Option<String> {
        None
    }

    /// Frames written right after dialing.
    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<serde_json::Value>;

    /// Fetches a complete snapshot for every symbol of `ctx`.
    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Self::Item>>>;

    /// Decodes one inbound WebSocket payload.
    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<Self::Item>>;
}
