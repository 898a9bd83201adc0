use std::sync::LazyLock;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::db::store::{KvStore, StoreResult};
use crate::util::env::{EnvErr, Var};
use crate::var;

static REDIS_POOL: LazyLock<OnceCell<RedisPool>> = LazyLock::new(OnceCell::new);
pub async fn redis_pool() -> RedisResult<&'static RedisPool> {
    REDIS_POOL
        .get_or_try_init(|| async { RedisPool::new().await })
        .await
}

pub struct RedisPool {
    pub manager: ConnectionManager,
}

impl RedisPool {
    #[instrument]
    pub async fn new() -> RedisResult<Self> {
        let redis_url = var!(Var::RedisUrl).await?;
        tracing::debug!(redis_url, "connecting to redis server");

        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(Self { manager })
    }
}

/// Fixed key prefixes for every document the board persists. No external
/// party reads the store directly, so the serialized shapes behind these keys
/// are not a compatibility surface.
#[derive(Debug, Clone)]
pub enum BoardKey {
    /// The whole ordered play list, one document.
    Plays,
    /// Per-play slip image, independent lifecycle from the list.
    Slip(String),
    /// Claim record keyed by caller identity.
    ClaimUser(String),
    /// Claim marker keyed by normalized external-account name.
    ClaimAccount(String),
}

impl From<BoardKey> for String {
    fn from(value: BoardKey) -> Self {
        match value {
            BoardKey::Plays => String::from("props:plays"),
            BoardKey::Slip(play_id) => format!("props:slip:{}", play_id),
            BoardKey::ClaimUser(user_id) => format!("claim:user:{}", user_id),
            BoardKey::ClaimAccount(name) => format!("claim:account:{}", name),
        }
    }
}

/// [`KvStore`] backed by the shared connection manager.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: String) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let wrote: bool = conn.set_nx(key, value).await?;
        Ok(wrote)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let present: bool = conn.exists(key).await?;
        Ok(present)
    }
}

pub type RedisResult<T> = core::result::Result<T, RedisErr>;

#[derive(Debug, Error)]
pub enum RedisErr {
    #[error(transparent)]
    EnvErr(#[from] EnvErr),

    #[error(transparent)]
    RedisClientError(#[from] redis::RedisError),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_board_keys_use_fixed_prefixes() {
        assert_eq!(String::from(BoardKey::Plays), "props:plays");
        assert_eq!(
            String::from(BoardKey::Slip("play_1".into())),
            "props:slip:play_1"
        );
        assert_eq!(
            String::from(BoardKey::ClaimUser("user_1".into())),
            "claim:user:user_1"
        );
        assert_eq!(
            String::from(BoardKey::ClaimAccount("sharpbettor".into())),
            "claim:account:sharpbettor"
        );
    }
}
