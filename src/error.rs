//! Crate-level error types.
//!
//! [`ConfluenceError`] unifies every error source (configuration, HTTP,
//! WebSocket, JSON, venue protocol) behind a single enum so callers can
//! match on the variant they care about while still using the `?`
//! operator for easy propagation.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ConfluenceError>;

/// Top-level error type returned by all public APIs and carried inside
/// error [`ResultEvent`](crate::models::ResultEvent)s.
#[derive(Debug, thiserror::Error)]
pub enum ConfluenceError {
    /// Options or environment variables are missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// No adapter is registered under the requested venue name.
    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// An HTTP request could not be sent or its body could not be read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The venue answered with a status code other than 200.
    #[error("unexpected http status {status}: {body}")]
    Status { status: u16, body: String },

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame or response did not have the expected shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A single field could not be converted into a number.
    #[error("cannot map field {field} from {value:?}")]
    Mapping { field: &'static str, value: String },

    /// A venue-original symbol name could not be parsed.
    #[error("cannot parse symbol {0:?}")]
    Symbol(String),

    /// The venue asked clients to reconnect (e.g. an info "stopping" code).
    #[error("venue stopping (code {code}): {message}")]
    VenueStopping { code: i64, message: String },

    /// The venue rejected a request with an application-level error.
    #[error("venue error: {0}")]
    Venue(String),

    /// Credentials were missing or refused.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A request could not be signed.
    #[error("signing error: {0}")]
    Signing(String),

    /// The caller asked for something the venue cannot express.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The WebSocket was closed by the peer or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// A write was attempted before `connect` or after `exit`.
    #[error("websocket is not connected")]
    NotConnected,
}

impl ConfluenceError {
    /// Returns `true` for network-level failures that are worth one
    /// local retry before being surfaced.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Http(e) => e.status().is_none() && !e.is_decode(),
            Self::WebSocket(_) | Self::ConnectionClosed => true,
            _ => false,
        }
    }

    /// Builds a [`ConfluenceError::Mapping`] for the given field.
    pub(crate) fn mapping(field: &'static str, value: impl Into<String>) -> Self {
        Self::Mapping {
            field,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_are_not_transport() {
        let err = ConfluenceError::Status {
            status: 502,
            body: "bad gateway".into(),
        };
        assert!(!err.is_transport());
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn closed_connection_is_transport() {
        assert!(ConfluenceError::ConnectionClosed.is_transport());
        assert!(!ConfluenceError::Auth("nope".into()).is_transport());
    }

    #[test]
    fn mapping_error_names_field() {
        let err = ConfluenceError::mapping("price", "n/a");
        assert_eq!(err.to_string(), "cannot map field price from \"n/a\"");
    }
}
