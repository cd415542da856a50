//! Integration coverage for `CacheBytes::get_or_compute` under real
//! concurrency: several tasks race for the same key against a tempdir-backed
//! file cache, and only one of them should ever run the compute closure.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use nimbus::cache::backend::Backend;
use nimbus::cache::file_backend::FileBackend;
use nimbus::cache::CacheBytes;
use nimbus::config::CacheConfig;
use nimbus::errors::CoreError;

fn config() -> CacheConfig {
    CacheConfig {
        fresh_ttl_secs: 60,
        stale_ttl_secs: 3600,
        lock_ttl_ms: 2_000,
        wait_timeout_ms: 500,
        cooldown_min_secs: 1,
        cooldown_max_secs: 1,
        cache_dir: None,
    }
}

#[tokio::test]
async fn concurrent_callers_share_a_single_compute() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn Backend> = Arc::new(FileBackend::new(dir.path()));
    let cache = Arc::new(CacheBytes::new(backend, config()));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let calls = calls.clone();
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_compute("vector:concurrency:fp", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(b"shared-payload".to_vec())
                })
                .await
        }));
    }

    let mut bodies = Vec::new();
    for task in tasks {
        let (bytes, _) = task.await.unwrap().unwrap();
        bodies.push(bytes);
    }

    assert!(bodies.iter().all(|b| b == b"shared-payload"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_entry_survives_a_failed_revalidation_after_fresh_expires() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn Backend> = Arc::new(FileBackend::new(dir.path()));
    let mut short_fresh = config();
    short_fresh.fresh_ttl_secs = 1;
    let cache = CacheBytes::new(backend, short_fresh);

    cache
        .get_or_compute("vector:concurrency:fp2", || async move {
            Ok(b"first-compute".to_vec())
        })
        .await
        .unwrap();

    // Let the fresh entry expire while the stale copy (1 hour TTL) survives.
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let (bytes, outcome) = cache
        .get_or_compute("vector:concurrency:fp2", || async move {
            Err(CoreError::UpstreamUnavailable("upstream down".to_string()))
        })
        .await
        .unwrap();

    assert_eq!(bytes, b"first-compute");
    assert_eq!(outcome.as_str(), "stale");
}
