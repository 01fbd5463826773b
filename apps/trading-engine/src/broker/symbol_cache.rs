//! TTL cache for broker symbol metadata.
//!
//! Point, digits, pip value and volume constraints change rarely, so
//! lookups are served from this cache for up to the TTL (10 minutes).
//! Spread is a live quantity and is never served from here; the spread
//! refresh loop re-reads the broker every cycle. Reconnects invalidate
//! the cache explicitly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::models::SymbolInfo;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct Entry {
    info: SymbolInfo,
    fetched_at: Instant,
}

/// Read-mostly cache keyed by symbol.
#[derive(Debug)]
pub struct SymbolCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl SymbolCache {
    /// Cache with the given entry lifetime.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh entry for a symbol, if present and within TTL.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<SymbolInfo> {
        let entries = self.entries.read();
        let entry = entries.get(symbol)?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.info.clone())
    }

    /// Store or refresh an entry.
    pub fn put(&self, info: SymbolInfo) {
        self.entries.write().insert(
            info.symbol.clone(),
            Entry {
                info,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop one symbol, or everything when `None`.
    pub fn invalidate(&self, symbol: Option<&str>) {
        let mut entries = self.entries.write();
        match symbol {
            Some(symbol) => {
                entries.remove(symbol);
            }
            None => entries.clear(),
        }
    }

    /// Number of cached entries (fresh or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for SymbolCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(symbol: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.to_string(),
            point: 0.00001,
            digits: 5,
            pip_value_per_lot: Some(10.0),
            spread_points: 7.0,
            min_volume: 0.01,
            step_volume: 0.01,
            max_volume: 100.0,
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = SymbolCache::default();
        cache.put(info("EURUSD"));
        assert!(cache.get("EURUSD").is_some());
        assert!(cache.get("GBPUSD").is_none());
    }

    #[test]
    fn test_expired_entry_misses() {
        let cache = SymbolCache::new(Duration::from_millis(0));
        cache.put(info("EURUSD"));
        assert!(cache.get("EURUSD").is_none());
        // The stale entry still occupies a slot until overwritten.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_single_and_all() {
        let cache = SymbolCache::default();
        cache.put(info("EURUSD"));
        cache.put(info("USDJPY"));

        cache.invalidate(Some("EURUSD"));
        assert!(cache.get("EURUSD").is_none());
        assert!(cache.get("USDJPY").is_some());

        cache.invalidate(None);
        assert!(cache.is_empty());
    }
}
