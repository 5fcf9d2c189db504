//! Channel-id bookkeeping for venues that multiplex one socket.

use std::collections::HashMap;

use parking_lot::RwLock;

/// What a numbered venue channel carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Canonical symbol name.
    pub symbol: String,
    /// Venue channel name (`book`, `trades`, ...).
    pub name: String,
}

/// Map of venue channel id to [`Channel`], filled from subscribe acks.
#[derive(Debug, Default)]
pub struct Subscriptions {
    channels: RwLock<HashMap<i64, Channel>>,
}

impl Subscriptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: i64, symbol: impl Into<String>, name: impl Into<String>) {
        self.channels.write().insert(
            id,
            Channel {
                symbol: symbol.into(),
                name: name.into(),
            },
        );
    }

    #[must_use]
    pub fn get(&self, id: i64) -> Option<Channel> {
        self.channels.read().get(&id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    pub fn clear(&self) {
        self.channels.write().clear();
    }
}
