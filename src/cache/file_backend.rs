//! Process-local file cache, used when Redis is absent.
//!
//! Layout: `<cache_dir>/<endpoint>/<run_key>/<fp>.{fresh,stale}`. Writes go
//! to a `.tmp` sibling then atomically rename into place so readers never
//! observe a partial write; the `.tmp` file is unlinked on any failure.
//! Locking is per-process only (no flock): a single process instance is
//! assumed to own a given cache_dir, so an in-process mutex map upstream of
//! this backend is sufficient and a filesystem lock would add nothing.
//!
//! The TTL chosen at write time is stored as an 8-byte little-endian
//! millisecond count prefixed onto the file itself (not in an in-process
//! map) so a process restart doesn't strand already-written entries as
//! permanently "fresh" — `get` still ages entries off `mtime`, per the
//! mtime-based design, but the TTL it ages against survives the process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use super::backend::Backend;

const TTL_HEADER_LEN: usize = 8;

pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileBackend { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }

    async fn ensure_parent(path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c == ':' { '/' } else { c })
        .collect()
}

#[async_trait]
impl Backend for FileBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(key);

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let raw = fs::read(&path).await?;
        if raw.len() < TTL_HEADER_LEN {
            // Corrupt/foreign file; treat as absent rather than erroring.
            return Ok(None);
        }
        let ttl_millis = u64::from_le_bytes(raw[..TTL_HEADER_LEN].try_into().unwrap());
        let ttl = Duration::from_millis(ttl_millis);

        let age = metadata.modified()?.elapsed().unwrap_or(Duration::ZERO);
        if age > ttl {
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(raw[TTL_HEADER_LEN..].to_vec()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        let path = self.path_for(key);
        Self::ensure_parent(&path).await?;

        let mut payload = Vec::with_capacity(TTL_HEADER_LEN + value.len());
        payload.extend_from_slice(&(ttl.as_millis() as u64).to_le_bytes());
        payload.extend_from_slice(value);

        let tmp_path = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        let write_result = fs::write(&tmp_path, &payload).await;
        if write_result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
            write_result?;
        }
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn try_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        Self::ensure_parent(&path).await?;

        if let Ok(metadata) = fs::metadata(&path).await {
            let age = metadata
                .modified()?
                .elapsed()
                .unwrap_or(Duration::ZERO);
            if age <= ttl {
                return Ok(None);
            }
        }

        // Best-effort exclusive create; a genuine race is vanishingly
        // unlikely for a per-process fallback but we still avoid clobbering.
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut handle) => {
                use tokio::io::AsyncWriteExt;
                handle.write_all(token.as_bytes()).await?;
                Ok(Some(token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Stale lock file past ttl; replace it.
                fs::write(&path, token.as_bytes()).await?;
                Ok(Some(token.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(contents) if contents == token.as_bytes() => {
                let _ = fs::remove_file(&path).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend
            .set("vector/run1/abc.fresh", b"hello", Duration::from_secs(60))
            .await
            .unwrap();
        let read = backend.get("vector/run1/abc.fresh").await.unwrap();
        assert_eq!(read, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend
            .set("k.fresh", b"x", Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.get("k.fresh").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_survives_recreating_the_backend() {
        // Simulates a process restart: a fresh `FileBackend` instance over
        // the same directory must still honor the TTL chosen by the writer,
        // since nothing about that TTL lived in process memory.
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = FileBackend::new(dir.path());
            backend
                .set("k.fresh", b"x", Duration::from_millis(1))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let restarted = FileBackend::new(dir.path());
        assert_eq!(restarted.get("k.fresh").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lock_then_unlock_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let token = backend
            .try_lock("lock", "token-a", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(token, Some("token-a".to_string()));
        assert_eq!(
            backend
                .try_lock("lock", "token-b", Duration::from_secs(30))
                .await
                .unwrap(),
            None
        );
        backend.unlock("lock", "token-a").await.unwrap();
        assert_eq!(
            backend
                .try_lock("lock", "token-c", Duration::from_secs(30))
                .await
                .unwrap(),
            Some("token-c".to_string())
        );
    }
}
