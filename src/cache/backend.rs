//! The storage trait CacheBytes drives; swappable between Redis and the
//! process-local file fallback.

use async_trait::async_trait;

/// Key namespace component: `vector`, `streamlines`, `volume`.
pub type KeyFamily = &'static str;

/// A byte-oriented, TTL-aware key/value store plus a best-effort
/// compute-exclusion lock. Implementations never need to know what the
/// bytes mean.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: std::time::Duration) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Attempts to acquire an exclusive lock for `ttl`, analogous to
    /// `SET key token NX PX ttl`. Returns `Some(token)` on success, `None`
    /// if already held.
    async fn try_lock(&self, key: &str, token: &str, ttl: std::time::Duration) -> anyhow::Result<Option<String>>;

    /// Releases the lock iff the stored token still matches. A mismatch
    /// (lock already expired and re-acquired by someone else) is ignored.
    async fn unlock(&self, key: &str, token: &str) -> anyhow::Result<()>;
}
