//! Time-bounded cache for state that is expensive to fetch
//!
//! Holds one value and the instant it was fetched behind a single lock.
//! `get_or_refresh` is the only read path: a stale or empty entry is
//! refreshed while the lock is held, so concurrent readers never trigger a
//! second fetch for the same expiry.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Cached value with timestamp
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
}

#[derive(Debug)]
pub struct TtlCache<T> {
    entry: Mutex<Option<CacheEntry<T>>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: Mutex::new(None),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value, calling `refresh` first if it is missing or
    /// older than the TTL. A failed refresh leaves the previous entry in
    /// place and returns the error.
    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut entry = self.entry.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.value.clone());
            }
            debug!("Cache entry expired after {:?}", cached.fetched_at.elapsed());
        }

        let value = refresh().await?;
        *entry = Some(CacheEntry {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    /// Drop the cached value; the next read refetches
    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }

    /// Age of the cached value, if any
    pub async fn age(&self) -> Option<Duration> {
        self.entry
            .lock()
            .await
            .as_ref()
            .map(|e| e.fetched_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn fetch(counter: &AtomicUsize) -> Result<usize, String> {
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    #[tokio::test(start_paused = true)]
    async fn serves_cached_value_until_expiry() {
        let cache = TtlCache::new(Duration::from_secs(30));
        assert_eq!(cache.ttl(), Duration::from_secs(30));
        let fetches = AtomicUsize::new(0);

        assert_eq!(cache.get_or_refresh(|| fetch(&fetches)).await, Ok(1));
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get_or_refresh(|| fetch(&fetches)).await, Ok(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get_or_refresh(|| fetch(&fetches)).await, Ok(2));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = TtlCache::new(Duration::from_secs(3600));
        let fetches = AtomicUsize::new(0);

        cache.get_or_refresh(|| fetch(&fetches)).await.unwrap();
        cache.invalidate().await;
        assert!(cache.age().await.is_none());
        assert_eq!(cache.get_or_refresh(|| fetch(&fetches)).await, Ok(2));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_nothing() {
        let cache: TtlCache<usize> = TtlCache::new(Duration::from_secs(1));
        let result = cache
            .get_or_refresh(|| async { Err::<usize, _>("offline".to_string()) })
            .await;
        assert_eq!(result, Err("offline".to_string()));
        assert!(cache.age().await.is_none());
    }
}
