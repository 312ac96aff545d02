use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use super::quotes::Quote;

/// Most recent non-empty set of successful quotes from a batch fetch.
#[derive(Debug, Default)]
pub struct LastGoodCache {
    quotes: RwLock<Vec<Quote>>,
}

impl LastGoodCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Quote>> {
        self.quotes.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Quote>> {
        self.quotes.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Cached quotes, or `None` when nothing has succeeded yet.
    pub fn snapshot(&self) -> Option<Vec<Quote>> {
        let quotes = self.read();
        if quotes.is_empty() {
            None
        } else {
            Some(quotes.clone())
        }
    }

    /// Replace the cache. Empty sets are ignored so a failed batch never erases good data.
    pub fn store(&self, quotes: &[Quote]) -> bool {
        if quotes.is_empty() {
            return false;
        }
        *self.write() = quotes.to_vec();
        debug!("Cached {} quotes as last known good", quotes.len());
        true
    }
}
