//! Key-value store seam.
//!
//! All persistence in the board goes through [`KvStore`] so the repositories
//! can run against the redis backend in production and [`MemoryStore`] in
//! tests. Durability and replication are the backing store's problem, not
//! ours.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

pub type StoreResult<T> = core::result::Result<T, StoreErr>;

#[derive(Debug, Error)]
pub enum StoreErr {
    #[error(transparent)]
    RedisClientError(#[from] redis::RedisError),
}

#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> StoreResult<()>;

    /// Set with a TTL. Each write restarts the clock; reads never extend it.
    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> StoreResult<()>;

    /// Conditional set: writes only when the key is absent, returning whether
    /// the write happened.
    async fn set_nx(&self, key: &str, value: String) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;
}

/// In-process store for tests and local development.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get(key) {
            Some(entry) if entry.expired() => {
                inner.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Force a keyed entry past its TTL, as if the backing store had reaped
    /// it. Lets tests exercise expiry without sleeping out a real deadline.
    #[cfg(test)]
    pub fn expire_now(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.get_mut(key) {
            entry.expires_at = Some(Instant::now() - Duration::from_secs(1));
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.inner.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> StoreResult<()> {
        self.inner.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: String) -> StoreResult<bool> {
        if self.live(key).is_some() {
            return Ok(false);
        }

        self.set(key, value).await?;
        Ok(true)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.live(key).is_some())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_set_nx_first_writer_wins() {
        let store = MemoryStore::new();

        assert!(store.set_nx("k", "first".into()).await.unwrap());
        assert!(!store.set_nx("k", "second".into()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_absent() {
        let store = MemoryStore::new();
        store.set_ex("k", "v".into(), 3600).await.unwrap();
        assert!(store.exists("k").await.unwrap());

        store.expire_now("k");

        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_nx_after_expiry_writes() {
        let store = MemoryStore::new();
        store.set_ex("k", "old".into(), 3600).await.unwrap();
        store.expire_now("k");

        assert!(store.set_nx("k", "new".into()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("new".to_string()));
    }
}
