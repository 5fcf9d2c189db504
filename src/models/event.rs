//! The delivery envelope shared by every stream.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::account::{UserInfo, UserOrder};
use super::trade::Trade;
use crate::ConfluenceError;

/// What a [`ResultEvent`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Complete state for a symbol; replaces consumer state.
    #[serde(rename = "s")]
    Snapshot,
    /// Delta to apply on top of the last snapshot.
    #[serde(rename = "u")]
    Update,
    /// No data; `error` is set.
    #[serde(rename = "error")]
    Error,
}

/// A normalized event: data of type `T`, or an error.
#[derive(Debug, Clone)]
pub struct ResultEvent<T> {
    pub data_type: DataType,
    pub data: Option<T>,
    pub error: Option<Arc<ConfluenceError>>,
}

impl<T> ResultEvent<T> {
    #[must_use]
    pub fn snapshot(data: T) -> Self {
        Self {
            data_type: DataType::Snapshot,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub fn update(data: T) -> Self {
        Self {
            data_type: DataType::Update,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub fn error(error: impl Into<Arc<ConfluenceError>>) -> Self {
        Self {
            data_type: DataType::Error,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Returns `true` for error events.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Sending half of a result channel.
pub type EventSender<T> = mpsc::Sender<ResultEvent<T>>;

/// Receiving half of a result channel handed to consumers.
pub type EventReceiver<T> = mpsc::Receiver<ResultEvent<T>>;

/// Account balances pushed on the private info channel.
pub type UserInfoEvent = ResultEvent<UserInfo>;

/// Own orders pushed on the private orders channel.
pub type UserOrdersEvent = ResultEvent<Vec<UserOrder>>;

/// Own fills pushed on the private trades channel.
pub type UserTradesEvent = ResultEvent<Vec<Trade>>;

/// Data that stream groups can route per symbol.
pub trait Payload: Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Canonical symbol this payload belongs to.
    fn symbol(&self) -> &str;

    /// Empty updates are never published.
    fn is_empty(&self) -> bool {
        false
    }
}

impl<T: Payload> Payload for Vec<T> {
    fn symbol(&self) -> &str {
        self.first().map_or("", Payload::symbol)
    }

    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}
