//! Per-run cover cache
//!
//! Keyed by `isbn|title|author`. Negative results are cached too, and
//! concurrent lookups for the same key share one in-flight resolution.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

type Slot = Arc<OnceCell<Option<String>>>;

#[derive(Default)]
pub struct CoverCache {
    entries: Mutex<HashMap<String, Slot>>,
    hits: AtomicUsize,
}

impl CoverCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached result for `key`, running `resolve` only if no
    /// other caller has resolved (or is resolving) it yet
    pub async fn get_or_resolve<F, Fut>(&self, key: &str, resolve: F) -> Option<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        let slot = {
            let mut entries = self.entries.lock();
            entries.entry(key.to_string()).or_default().clone()
        };

        if let Some(cached) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key = %key, "Cover cache hit");
            return cached.clone();
        }

        slot.get_or_init(resolve).await.clone()
    }

    /// Completed entry for `key`, if any
    pub fn get(&self, key: &str) -> Option<Option<String>> {
        let entries = self.entries.lock();
        entries.get(key).and_then(|slot| slot.get().cloned())
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolves_once_per_key() {
        let cache = CoverCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = cache
                .get_or_resolve("isbn|Dune|Herbert", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Some("https://x/dune.jpg".to_string())
                })
                .await;
            assert_eq!(result.as_deref(), Some("https://x/dune.jpg"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_negative_results_are_cached() {
        let cache = CoverCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result = cache
                .get_or_resolve("|Unknown|", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    None
                })
                .await;
            assert!(result.is_none());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("|Unknown|"), Some(None));
        assert_eq!(cache.get("missing"), None);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_resolution() {
        let cache = Arc::new(CoverCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_resolve("key", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            Some("cover".to_string())
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("cover"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
