//! Redis-backed implementation of [`Backend`], using `ConnectionManager` for
//! automatic reconnection (mirrors the pooled-connection treatment the
//! catalog's diesel r2d2 pool gets elsewhere in this crate).

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::backend::Backend;

pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(RedisBackend { manager })
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        // Transport failures degrade to a cache miss rather than propagating.
        match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(error = %err, key, "redis get failed, treating as miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn try_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> anyhow::Result<Option<String>> {
        let mut conn = self.manager.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(result.map(|_| token.to_string()))
    }

    async fn unlock(&self, key: &str, token: &str) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        // Compare-and-delete via a small Lua script so we never release a
        // lock acquired by someone else after ours expired.
        const SCRIPT: &str = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#;
        let result: redis::RedisResult<i64> = redis::Script::new(SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await;
        if let Err(err) = result {
            tracing::debug!(error = %err, key, "redis unlock failed, ignoring");
        }
        Ok(())
    }
}
