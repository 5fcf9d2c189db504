//! Unified market-data client for cryptocurrency venues.
//!
//! One [`Exchange`] per venue exposes the same providers everywhere:
//! symbols, order books, trades, quotes, candles and (where the venue has
//! a private API) trading. Consumers fetch the symbol universe, hand it to
//! a provider with `set_symbols`, then read [`ResultEvent`]s from the
//! channel returned by `subscribe_all`:
//!
//! ```no_run
//! # async fn run() -> confluence::Result<()> {
//! let mut exchange = confluence::new(&confluence::Options::new("kraken"))?;
//! let symbols = exchange.symbols.get(None).await?;
//! let mut books = exchange
//!     .orders
//!     .set_symbols(symbols)
//!     .subscribe_all(std::time::Duration::from_secs(30));
//! while let Some(event) = books.recv().await {
//!     println!("{:?} {:?}", event.data_type, event.data.map(|b| b.symbol));
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod exchange;
pub mod mapping;
pub mod models;
pub mod provider;
pub mod state;
pub mod stream;
pub mod trading;
pub mod transport;
pub mod venues;

pub use config::{Credentials, Endpoints, Options, Settings};
pub use error::{ConfluenceError, Result};
pub use exchange::{Exchange, new};
pub use models::{DataType, ResultEvent};
pub use provider::{
    CandlesProvider, MarketProvider, OrdersProvider, QuotesProvider, SymbolsProvider,
    TradesProvider,
};
pub use trading::{Trading, TradingApi, UserStreams};
pub use venues::Venue;
