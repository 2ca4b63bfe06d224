//! Feed subscription bookkeeping.

use crate::error::WsResult;
use ordertrack_core::BoxFuture;
use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Symbols the feed should be subscribed to.
///
/// This is the source of truth replayed on every (re)connect; it survives
/// disconnects.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    symbols: RwLock<BTreeSet<String>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the symbol was not already present.
    pub fn insert(&self, symbol: &str) -> bool {
        self.symbols.write().insert(symbol.to_string())
    }

    /// Returns `true` if the symbol was present.
    pub fn remove(&self, symbol: &str) -> bool {
        self.symbols.write().remove(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }

    /// Sorted copy of the current set.
    pub fn snapshot(&self) -> Vec<String> {
        self.symbols.read().iter().cloned().collect()
    }
}

/// Per-symbol feed subscription control, as used by the queue worker.
pub trait SubscriptionControl: Send + Sync {
    /// Subscribe to `symbol`. Returns `false` if it was already subscribed.
    fn subscribe_symbol<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, WsResult<bool>>;

    /// Unsubscribe from `symbol`. Returns `false` if it was not subscribed.
    fn unsubscribe_symbol<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, WsResult<bool>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove_idempotent() {
        let set = SubscriptionSet::new();
        assert!(set.insert("ETHUSDT"));
        assert!(!set.insert("ETHUSDT"));
        assert_eq!(set.len(), 1);
        assert!(set.remove("ETHUSDT"));
        assert!(!set.remove("ETHUSDT"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_snapshot_sorted() {
        let set = SubscriptionSet::new();
        set.insert("SOLUSDT");
        set.insert("BTCUSDT");
        assert_eq!(set.snapshot(), vec!["BTCUSDT", "SOLUSDT"]);
    }
}
