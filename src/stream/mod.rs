//! Streaming connector runtime.
//!
//! - [`feed`] - the per-venue, per-kind decoding seam
//! - [`group`] - the stream group supervisor
//! - [`subscriptions`] - channel-id bookkeeping for multiplexed sockets

pub mod feed;
pub mod group;
pub mod subscriptions;

pub use feed::{Feed, Frame, FrameContext, Keyed, keyed};
pub use group::StreamGroup;
pub use subscriptions::{Channel, Subscriptions};

use crate::models::Symbol;

/// Splits `symbols` into consecutive shards of at most `limit` symbols.
///
/// A `limit` of zero is treated as one.
#[must_use]
pub fn shard(symbols: &[Symbol], limit: usize) -> Vec<Vec<Symbol>> {
    symbols
        .chunks(limit.max(1))
        .map(<[Symbol]>::to_vec)
        .collect()
}
