//! Exchange options, credentials and runtime tunables.
//!
//! Options are normally built in code; [`Options::from_env`] reads them
//! from environment variables instead:
//! - `CONFLUENCE_EXCHANGE`: venue name (required)
//! - `CONFLUENCE_API_KEY` / `CONFLUENCE_API_SECRET`: optional, but when
//!   one is set both must be present
//! - `CONFLUENCE_REST_URL` / `CONFLUENCE_WS_URL`: optional endpoint
//!   overrides

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::auth::SignFn;
use crate::transport::ProxyProvider;

/// Delay before a restarted group dials again.
const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Delay before the single retry of a failed HTTP snapshot.
const DEFAULT_SNAPSHOT_RETRY: Duration = Duration::from_secs(5);

/// Gap between consecutive group starts in `subscribe_all`.
const DEFAULT_START_STAGGER: Duration = Duration::from_millis(100);

/// Keep-alive ping cadence.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Candle discretization.
const DEFAULT_CANDLE_INTERVAL: Duration = Duration::from_secs(60);

/// Requested book depth per side.
const DEFAULT_BOOK_DEPTH: usize = 100;

/// API credentials for private endpoints.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: Zeroizing<String>,
    /// Replaces the venue's signing recipe when set.
    pub sign: Option<SignFn>,
}

impl Credentials {
    #[must_use]
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: Zeroizing::new(api_secret.into()),
            sign: None,
        }
    }

    /// Uses `sign` instead of the venue's own recipe.
    #[must_use]
    pub fn with_sign_fn(mut self, sign: SignFn) -> Self {
        self.sign = Some(sign);
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("sign", &self.sign.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Timing knobs for stream groups and private streams.
#[derive(Debug, Clone)]
pub struct Settings {
    pub restart_backoff: Duration,
    pub snapshot_retry_delay: Duration,
    pub start_stagger: Duration,
    pub ping_interval: Duration,
    pub candle_interval: Duration,
    pub book_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            restart_backoff: DEFAULT_RESTART_BACKOFF,
            snapshot_retry_delay: DEFAULT_SNAPSHOT_RETRY,
            start_stagger: DEFAULT_START_STAGGER,
            ping_interval: DEFAULT_PING_INTERVAL,
            candle_interval: DEFAULT_CANDLE_INTERVAL,
            book_depth: DEFAULT_BOOK_DEPTH,
        }
    }
}

/// Overrides for a venue's base URLs.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub rest: Option<String>,
    pub ws: Option<String>,
}

/// Everything needed to build an [`Exchange`](crate::Exchange).
#[derive(Clone, Default)]
pub struct Options {
    /// Venue name, e.g. `"binance"`.
    pub name: String,
    pub credentials: Option<Credentials>,
    /// Source of per-venue HTTP clients; the process default when `None`.
    pub proxy: Option<Arc<dyn ProxyProvider>>,
    pub settings: Settings,
    pub endpoints: Endpoints,
}

impl Options {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: Arc<dyn ProxyProvider>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, rest: Option<String>, ws: Option<String>) -> Self {
        self.endpoints = Endpoints { rest, ws };
        self
    }

    /// Loads options from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::Config`](crate::ConfluenceError::Config)
    /// if `CONFLUENCE_EXCHANGE` is missing or only one of the two
    /// credential variables is set.
    pub fn from_env() -> crate::Result<Self> {
        let name = non_empty_var("CONFLUENCE_EXCHANGE").ok_or_else(|| {
            crate::ConfluenceError::Config("CONFLUENCE_EXCHANGE is not set".to_string())
        })?;

        let api_key = non_empty_var("CONFLUENCE_API_KEY");
        let api_secret = non_empty_var("CONFLUENCE_API_SECRET");

        let credentials = match (api_key, api_secret) {
            (Some(key), Some(secret)) => Some(Credentials::new(key, secret)),
            (Some(_), None) => {
                return Err(crate::ConfluenceError::Config(
                    "CONFLUENCE_API_KEY is set but CONFLUENCE_API_SECRET is missing".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(crate::ConfluenceError::Config(
                    "CONFLUENCE_API_SECRET is set but CONFLUENCE_API_KEY is missing".to_string(),
                ));
            }
            (None, None) => None,
        };

        Ok(Self {
            name,
            credentials,
            proxy: None,
            settings: Settings::default(),
            endpoints: Endpoints {
                rest: non_empty_var("CONFLUENCE_REST_URL"),
                ws: non_empty_var("CONFLUENCE_WS_URL"),
            },
        })
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("name", &self.name)
            .field("credentials", &self.credentials)
            .field("proxy", &self.proxy.as_ref().map(|_| "custom"))
            .field("settings", &self.settings)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
