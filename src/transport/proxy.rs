//! Per-venue HTTP client factory.

use std::sync::OnceLock;
use std::time::Duration;

use super::tls;
use crate::Result;

/// Default timeout applied to every REST round-trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent on every REST request.
pub const USER_AGENT: &str = concat!("confluence/", env!("CARGO_PKG_VERSION"));

/// Hands out the HTTP client a venue should use.
///
/// Implementations can pool, rate-limit or rotate real proxies per venue.
pub trait ProxyProvider: Send + Sync {
    /// Returns a client bound to `venue`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    fn client(&self, venue: &str) -> Result<reqwest::Client>;
}

/// Pass-through provider returning the process-default client.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProxy;

impl ProxyProvider for NoProxy {
    fn client(&self, _venue: &str) -> Result<reqwest::Client> {
        default_client()
    }
}

/// Returns the shared process-default client, building it on first use.
///
/// # Errors
///
/// Returns [`ConfluenceError::Http`](crate::ConfluenceError::Http) if the
/// TLS backend cannot be initialized.
pub fn default_client() -> Result<reqwest::Client> {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }

    tls::install_crypto_provider();
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()?;

    Ok(CLIENT.get_or_init(|| client).clone())
}
