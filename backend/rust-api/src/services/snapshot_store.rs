use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

use crate::metrics::track_store_operation;
use crate::utils::retry::RetryPolicy;

/// Opaque per-key persistence for learner snapshots. Values are JSON strings; the
/// store never looks inside them.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;

    async fn save(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}

pub struct RedisSnapshotStore {
    redis: ConnectionManager,
    ttl_seconds: u64,
    retry: RetryPolicy,
}

impl RedisSnapshotStore {
    pub async fn connect(uri: &str, ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(uri).context("Failed to create Redis client")?;

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        Ok(Self::new(redis, ttl_seconds))
    }

    pub fn new(redis: ConnectionManager, ttl_seconds: u64) -> Self {
        Self {
            redis,
            ttl_seconds: ttl_seconds.max(1),
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait::async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        track_store_operation(
            "load",
            self.retry.run("snapshot load", || {
                let mut conn = self.redis.clone();
                async move {
                    redis::cmd("GET")
                        .arg(key)
                        .query_async::<Option<String>>(&mut conn)
                        .await
                        .with_context(|| format!("Failed to load snapshot {}", key))
                }
            }),
        )
        .await
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        let ttl = self.ttl_seconds;
        track_store_operation(
            "save",
            self.retry.run("snapshot save", || {
                let mut conn = self.redis.clone();
                async move {
                    redis::cmd("SETEX")
                        .arg(key)
                        .arg(ttl)
                        .arg(value)
                        .query_async::<()>(&mut conn)
                        .await
                        .with_context(|| format!("Failed to save snapshot {}", key))
                }
            }),
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        track_store_operation(
            "delete",
            self.retry.run("snapshot delete", || {
                let mut conn = self.redis.clone();
                async move {
                    redis::cmd("DEL")
                        .arg(key)
                        .query_async::<()>(&mut conn)
                        .await
                        .with_context(|| format!("Failed to delete snapshot {}", key))
                }
            }),
        )
        .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Process-local store for development and tests. Expired entries are dropped on read.
pub struct InMemorySnapshotStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    ttl: Duration,
}

impl InMemorySnapshotStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_seconds.max(1)),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        track_store_operation("load", async {
            {
                let entries = self.entries.read().await;
                match entries.get(key) {
                    Some((value, expires_at)) if *expires_at > Instant::now() => {
                        return Ok(Some(value.clone()))
                    }
                    Some(_) => {}
                    None => return Ok(None),
                }
            }
            self.entries.write().await.remove(key);
            Ok(None)
        })
        .await
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        track_store_operation("save", async {
            let now = Instant::now();
            let mut entries = self.entries.write().await;
            // Keys of abandoned learners are never read again
            entries.retain(|_, (_, expires_at)| *expires_at > now);
            entries.insert(key.to_string(), (value.to_string(), now + self.ttl));
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        track_store_operation("delete", async {
            self.entries.write().await.remove(key);
            Ok(())
        })
        .await
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip_and_delete() {
        let store = InMemorySnapshotStore::new(60);
        assert_eq!(store.load("lesson:a:sequence").await.unwrap(), None);

        store.save("lesson:a:sequence", "{\"x\":1}").await.unwrap();
        assert_eq!(
            store.load("lesson:a:sequence").await.unwrap().as_deref(),
            Some("{\"x\":1}")
        );

        store.delete("lesson:a:sequence").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn in_memory_keys_are_isolated() {
        let store = InMemorySnapshotStore::new(60);
        store.save("lesson:a:profile", "a").await.unwrap();
        store.save("lesson:b:profile", "b").await.unwrap();
        assert_eq!(store.load("lesson:a:profile").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.load("lesson:b:profile").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn in_memory_entries_expire() {
        let store = InMemorySnapshotStore {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_millis(10),
        };
        store.save("k", "v").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.load("k").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn saving_sweeps_expired_entries() {
        let store = InMemorySnapshotStore {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_millis(5),
        };
        for i in 0..1000 {
            store
                .save(&format!("lesson:abandoned-{}:sequence", i), "{}")
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.save("lesson:active:sequence", "{}").await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.load("lesson:active:sequence").await.unwrap().as_deref(),
            Some("{}")
        );
    }
}
