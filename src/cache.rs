use std::{future::Future, hash::Hash, sync::Arc, time::Duration};

use moka::future::Cache;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Freshness and size bounds shared by the warehouse and search gates.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub(crate) struct CachePolicy {
    /// Seconds an entry is served before it is recomputed.
    pub(crate) ttl_secs: u64,
    /// Upper bound on the number of memoized entries.
    pub(crate) max_entries: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            max_entries: 1000,
        }
    }
}

/// Memoizes fallible async computations by key for a fixed time.
///
/// Failures are never stored: the next call for the same key computes again.
#[derive(Clone)]
pub(crate) struct MemoCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    inner: Cache<K, Arc<V>>,
}

impl<K, V> MemoCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(policy: CachePolicy) -> Self {
        let inner = Cache::builder()
            .max_capacity(policy.max_entries)
            .time_to_live(Duration::from_secs(policy.ttl_secs))
            .build();
        Self { inner }
    }

    #[cfg(test)]
    pub(crate) fn with_ttl(ttl: Duration, max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    /// Returns the fresh entry for `key`, or runs `compute` and stores its
    /// success. Concurrent callers for the same key share one computation.
    pub(crate) async fn get_or_compute<F>(&self, key: K, compute: F) -> Result<Arc<V>>
    where
        F: Future<Output = Result<V>>,
    {
        self.inner
            .try_get_with(key, async move { compute.await.map(Arc::new) })
            .await
            .map_err(|e: Arc<Error>| (*e).clone())
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    async fn counted(calls: &AtomicUsize, value: u32) -> Result<u32> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test]
    async fn hit_within_ttl_skips_compute() {
        let cache = MemoCache::<String, u32>::new(CachePolicy::default());
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute("k".to_string(), counted(&calls, 7))
            .await
            .unwrap();
        let second = cache
            .get_or_compute("k".to_string(), counted(&calls, 8))
            .await
            .unwrap();

        assert_eq!(*first, 7);
        assert_eq!(*second, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_recomputed() {
        let cache = MemoCache::<String, u32>::with_ttl(Duration::from_millis(50), 10);
        let calls = AtomicUsize::new(0);

        cache
            .get_or_compute("k".to_string(), counted(&calls, 1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let value = cache
            .get_or_compute("k".to_string(), counted(&calls, 2))
            .await
            .unwrap();

        assert_eq!(*value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_memoized() {
        let cache = MemoCache::<String, u32>::new(CachePolicy::default());

        let err = cache
            .get_or_compute("k".to_string(), async {
                Err(Error::QueryExecution("boom".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, Error::QueryExecution("boom".to_string()));

        let value = cache
            .get_or_compute("k".to_string(), async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(*value, 3);
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache = MemoCache::<u32, u32>::with_ttl(Duration::from_secs(60), 4);
        for key in 0..32 {
            cache.get_or_compute(key, async move { Ok(key) }).await.unwrap();
        }
        assert!(cache.len().await <= 4);
    }
}
