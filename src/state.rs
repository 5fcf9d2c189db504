//! Thin locked key-value store for transient per-group facts.
//!
//! Adapters use it to remember the last sequence id seen per symbol
//! (Binance `lastUpdateId`, last trade id) so that overlapping pull and
//! push paths do not emit the same delta twice.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Per-group key-value state shared by the pull and push paths.
#[derive(Debug, Default)]
pub struct State {
    values: RwLock<HashMap<String, u64>>,
}

impl State {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<u64> {
        self.values.read().get(key).copied()
    }

    pub fn set(&self, key: impl Into<String>, value: u64) {
        self.values.write().insert(key.into(), value);
    }

    /// Records `value` if it is newer than the stored one.
    ///
    /// Returns `false` (and leaves the state alone) when `value` is not
    /// strictly greater than what is stored, i.e. the caller should drop
    /// the item as already seen.
    pub fn advance(&self, key: &str, value: u64) -> bool {
        let mut values = self.values.write();
        match values.get_mut(key) {
            Some(last) if value <= *last => false,
            Some(last) => {
                *last = value;
                true
            }
            None => {
                values.insert(key.to_string(), value);
                true
            }
        }
    }

    /// Forgets everything; called when a group restarts.
    pub fn clear(&self) {
        self.values.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_drops_stale_ids() {
        let state = State::new();
        assert!(state.advance("BTC-USDT", 10));
        assert!(!state.advance("BTC-USDT", 10));
        assert!(!state.advance("BTC-USDT", 9));
        assert!(state.advance("BTC-USDT", 11));
        assert_eq!(state.get("BTC-USDT"), Some(11));
    }

    #[test]
    fn set_overrides_and_clear_forgets() {
        let state = State::new();
        state.set("k", 5);
        state.set("k", 3);
        assert_eq!(state.get("k"), Some(3));
        state.clear();
        assert_eq!(state.get("k"), None);
    }
}
