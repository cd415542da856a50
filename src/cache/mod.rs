//! CacheBytes: the two-tier, singleflight, stale-while-revalidate cache all
//! three services sit behind.
//!
//! State machine (see the design ledger for the full diagram):
//! `Empty -> Computing -> Fresh -> Stale -> Empty`, with `Computing -> Empty`
//! on a compute error with no stale body to fall back to. Grounded in the
//! two-tier Redis/file split this crate layers on top of
//! [`crate::config::CacheConfig`], and in spirit on the single-tier
//! `moka`-based `CoverageCache` (`coverage_cache.rs`) for the "get-or-compute,
//! record a hit/miss metric" shape — generalized here to a distributed lock
//! plus explicit fresh/stale bytes rather than an in-process TTL map.

pub mod backend;
pub mod file_backend;
pub mod redis_backend;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::errors::CoreError;
use backend::Backend;

/// How a `get_or_compute` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Fresh,
    Stale,
    Computed,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Fresh => "fresh",
            CacheOutcome::Stale => "stale",
            CacheOutcome::Computed => "computed",
        }
    }
}

pub struct CacheBytes {
    backend: Arc<dyn Backend>,
    config: CacheConfig,
    /// In-process singleflight: callers racing for the same key within this
    /// instance wait on a `Notify` instead of each hitting the backend's
    /// lock independently. This is the only shared mutable structure in the
    /// compute path besides the HTTP framework's own state.
    inflight: DashMap<String, Arc<Notify>>,
}

impl CacheBytes {
    pub fn new(backend: Arc<dyn Backend>, config: CacheConfig) -> Self {
        CacheBytes {
            backend,
            config,
            inflight: DashMap::new(),
        }
    }

    fn fresh_key(key_prefix: &str) -> String {
        format!("{key_prefix}:fresh")
    }
    fn stale_key(key_prefix: &str) -> String {
        format!("{key_prefix}:stale")
    }
    fn lock_key(key_prefix: &str) -> String {
        format!("{key_prefix}:lock")
    }
    fn cooldown_key(key_prefix: &str) -> String {
        format!("{key_prefix}:cooldown")
    }

    /// Runs the full `get_or_compute` protocol: fresh read, then a
    /// concurrent stale read and lock attempt, then compute/wait/fallback
    /// per the outcome of the lock attempt.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key_prefix: &str,
        compute: F,
    ) -> Result<(Vec<u8>, CacheOutcome), CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, CoreError>>,
    {
        if let Some(bytes) = self.backend_get(&Self::fresh_key(key_prefix)).await {
            return Ok((bytes, CacheOutcome::Fresh));
        }

        let stale_bytes = self.backend_get(&Self::stale_key(key_prefix)).await;

        let notify = self
            .inflight
            .entry(key_prefix.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        let token = Uuid::new_v4().to_string();
        let lock_key = Self::lock_key(key_prefix);

        let acquired = self
            .backend
            .try_lock(&lock_key, &token, self.config.lock_ttl())
            .await
            .map_err(|err| CoreError::UpstreamUnavailable(err.to_string()))?;

        let result = match acquired {
            Some(token) => {
                self.run_compute(key_prefix, &lock_key, &token, stale_bytes, compute)
                    .await
            }
            None => match stale_bytes {
                Some(bytes) => Ok((bytes, CacheOutcome::Stale)),
                None => self.wait_for_leader(key_prefix, &notify).await,
            },
        };

        self.inflight.remove_if(key_prefix, |_, v| Arc::ptr_eq(v, &notify));
        notify.notify_waiters();
        result
    }

    async fn backend_get(&self, key: &str) -> Option<Vec<u8>> {
        match self.backend.get(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, key, "cache backend read failed, treating as miss");
                None
            }
        }
    }

    async fn run_compute<F, Fut>(
        &self,
        key_prefix: &str,
        lock_key: &str,
        token: &str,
        stale_bytes: Option<Vec<u8>>,
        compute: F,
    ) -> Result<(Vec<u8>, CacheOutcome), CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, CoreError>>,
    {
        if self.in_cooldown(key_prefix).await {
            let _ = self.backend.unlock(lock_key, token).await;
            return self.fail_or_fall_back_to_stale(
                stale_bytes,
                CoreError::UpstreamUnavailable("upstream recently failed, in cooldown".to_string()),
            );
        }

        let outcome = compute().await;
        match outcome {
            Ok(bytes) => {
                // Both writes complete before the lock is released so a
                // reader observing `fresh` also sees a matching `stale`.
                let fresh_write = self
                    .backend
                    .set(&Self::fresh_key(key_prefix), &bytes, self.config.fresh_ttl())
                    .await;
                let stale_write = self
                    .backend
                    .set(&Self::stale_key(key_prefix), &bytes, self.config.stale_ttl())
                    .await;
                let _ = self.backend.unlock(lock_key, token).await;

                if let Err(err) = fresh_write {
                    tracing::warn!(error = %err, "cache fresh write failed");
                }
                if let Err(err) = stale_write {
                    tracing::warn!(error = %err, "cache stale write failed");
                }
                Ok((bytes, CacheOutcome::Computed))
            }
            Err(err) => {
                tracing::warn!(error = %err, key_prefix, "compute failed");
                self.set_cooldown(key_prefix).await;
                let _ = self.backend.unlock(lock_key, token).await;
                self.fail_or_fall_back_to_stale(stale_bytes, err)
            }
        }
    }

    /// On compute failure, a stale body read earlier in the same call still
    /// satisfies the request; only a bare failure with nothing to fall back
    /// to propagates to the caller.
    fn fail_or_fall_back_to_stale(
        &self,
        stale_bytes: Option<Vec<u8>>,
        err: CoreError,
    ) -> Result<(Vec<u8>, CacheOutcome), CoreError> {
        match stale_bytes {
            Some(bytes) => Ok((bytes, CacheOutcome::Stale)),
            None => Err(err),
        }
    }

    async fn wait_for_leader(
        &self,
        key_prefix: &str,
        notify: &Notify,
    ) -> Result<(Vec<u8>, CacheOutcome), CoreError> {
        let deadline = tokio::time::Instant::now() + self.config.wait_timeout();
        loop {
            if let Some(bytes) = self.backend_get(&Self::fresh_key(key_prefix)).await {
                return Ok((bytes, CacheOutcome::Fresh));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(CoreError::UpstreamUnavailable(
                    "timed out waiting for in-flight compute".to_string(),
                ));
            }

            let _ = tokio::time::timeout(remaining.min(Duration::from_millis(25)), notify.notified())
                .await;
        }
    }

    async fn in_cooldown(&self, key_prefix: &str) -> bool {
        self.backend_get(&Self::cooldown_key(key_prefix))
            .await
            .is_some()
    }

    async fn set_cooldown(&self, key_prefix: &str) {
        let (min, max) = self.config.cooldown_range();
        let secs = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        let _ = self
            .backend
            .set(&Self::cooldown_key(key_prefix), b"1", Duration::from_secs(secs))
            .await;
    }

    /// Invalidates all state for a key prefix (used by prewarm to force a
    /// recompute rather than answering from a stale body).
    pub async fn invalidate(&self, key_prefix: &str) -> anyhow::Result<()> {
        self.backend.delete(&Self::fresh_key(key_prefix)).await?;
        self.backend.delete(&Self::stale_key(key_prefix)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> CacheConfig {
        CacheConfig {
            fresh_ttl_secs: 60,
            stale_ttl_secs: 3600,
            lock_ttl_ms: 2_000,
            wait_timeout_ms: 200,
            cooldown_min_secs: 1,
            cooldown_max_secs: 1,
            cache_dir: None,
        }
    }

    #[tokio::test]
    async fn computes_once_and_returns_fresh_on_second_call() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(file_backend::FileBackend::new(dir.path()));
        let cache = CacheBytes::new(backend, test_config());
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        let (bytes, outcome) = cache
            .get_or_compute("vector:test:fp1", || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(b"payload".to_vec())
            })
            .await
            .unwrap();
        assert_eq!(bytes, b"payload");
        assert_eq!(outcome, CacheOutcome::Computed);

        let calls_clone = calls.clone();
        let (bytes, outcome) = cache
            .get_or_compute("vector:test:fp1", || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(b"should-not-run".to_vec())
            })
            .await
            .unwrap();
        assert_eq!(bytes, b"payload");
        assert_eq!(outcome, CacheOutcome::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compute_failure_sets_cooldown_and_suppresses_retry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(file_backend::FileBackend::new(dir.path()));
        let cache = CacheBytes::new(backend, test_config());

        let first = cache
            .get_or_compute("vector:test:fp2", || async move {
                Err(CoreError::UpstreamUnavailable("boom".to_string()))
            })
            .await;
        assert!(first.is_err());

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let second = cache
            .get_or_compute("vector:test:fp2", || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(b"ignored".to_vec())
            })
            .await;
        assert!(second.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn compute_failure_falls_back_to_stale_body_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(file_backend::FileBackend::new(dir.path()));
        let cache = CacheBytes::new(backend, test_config());

        cache
            .get_or_compute("vector:test:fp3", || async move { Ok(b"warm".to_vec()) })
            .await
            .unwrap();

        // Force the key back into a stale-only state by deleting fresh.
        cache.backend.delete(&CacheBytes::fresh_key("vector:test:fp3")).await.unwrap();

        let (bytes, outcome) = cache
            .get_or_compute("vector:test:fp3", || async move {
                Err(CoreError::UpstreamUnavailable("boom".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(bytes, b"warm");
        assert_eq!(outcome, CacheOutcome::Stale);
    }
}
