use redis::AsyncCommands;
use redis::Client;
use redis::Script;
use std::fmt::Display;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AppError;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    CategoryTree,
    Publishers,
    Book(Uuid),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::CategoryTree => write!(f, "catalog:category_tree"),
            CacheKey::Publishers => write!(f, "catalog:publishers"),
            CacheKey::Book(uid) => write!(f, "book:{}", uid),
        }
    }
}

impl CacheKey {
    /// Counter bumped on every invalidation of this key
    pub fn generation_key(&self) -> String {
        format!("{}:gen", self)
    }
}

/// Stores the value only while the key's generation is still the one the
/// reader saw. KEYS: value key, generation key. ARGV: value, ttl, generation.
const FILL_IF_CURRENT: &str = r#"
local current = redis.call('GET', KEYS[2]) or '0'
if current == ARGV[3] then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
    return 1
end
return 0
"#;

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    pub value: Option<T>,
    /// Generation of the key at read time, passed back to [`Cache::fill`]
    pub generation: u64,
}

/// Opens a Redis client. No connection is made until the first command.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// A serialized value waiting to be written
struct PendingWrite {
    key: CacheKey,
    value: String,
    ttl: u64,
    /// When set, the write is dropped if the key was invalidated since
    generation: Option<u64>,
}

/// Redis-backed cache for catalog reads.
///
/// Reads go straight to Redis. Writes are queued to a background task so a
/// slow or unavailable Redis never delays a response.
#[derive(Clone)]
pub struct Cache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<PendingWrite>,
    default_ttl: u64,
}

/// Stops the background writer once queued writes are flushed
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl CacheWriterHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cache writer task panicked");
        }
    }
}

impl Cache {
    /// Spawns the writer task. `default_ttl` (seconds) applies to [`Cache::set`].
    pub fn new(redis_client: Client, default_ttl: u64) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(Self::run_writer(
            redis_client.clone(),
            write_rx,
            shutdown_rx,
        ));

        let cache = Self {
            redis_client,
            write_tx,
            default_ttl,
        };

        (cache, CacheWriterHandle { shutdown_tx, task })
    }

    async fn run_writer(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<PendingWrite>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer started");

        loop {
            tokio::select! {
                Some(write) = write_rx.recv() => {
                    if let Err(e) = Self::write(&client, write).await {
                        tracing::error!(error = %e, "Cache write failed");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        // senders live on in cloned caches, so drain without waiting
        let mut flushed = 0usize;
        while let Ok(write) = write_rx.try_recv() {
            if let Err(e) = Self::write(&client, write).await {
                tracing::error!(error = %e, "Cache write failed during shutdown");
            }
            flushed += 1;
        }
        tracing::info!(flushed, "Cache writer stopped");
    }

    async fn write(client: &Client, write: PendingWrite) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        match write.generation {
            None => {
                let _: () = conn.set_ex(write.key.to_string(), write.value, write.ttl).await?;
            }
            Some(generation) => {
                let stored: i32 = Script::new(FILL_IF_CURRENT)
                    .key(write.key.to_string())
                    .key(write.key.generation_key())
                    .arg(write.value)
                    .arg(write.ttl)
                    .arg(generation)
                    .invoke_async(&mut conn)
                    .await?;
                if stored == 0 {
                    tracing::debug!(key = %write.key, "Stale cache fill dropped");
                }
            }
        }
        Ok(())
    }

    /// Looks `key` up along with its current generation
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<CacheRead<T>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let (cached, generation): (Option<String>, Option<u64>) = redis::pipe()
            .atomic()
            .get(key.to_string())
            .get(key.generation_key())
            .query_async(&mut conn)
            .await?;

        let value = cached
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })
            })
            .transpose()?;

        Ok(CacheRead {
            value,
            generation: generation.unwrap_or(0),
        })
    }

    /// Queues `value` under `key` with the default TTL, unless `key` has been
    /// invalidated since the read that returned `generation`
    pub fn fill<T: serde::Serialize>(&self, key: &CacheKey, value: &T, generation: u64) {
        self.enqueue(key, value, self.default_ttl, Some(generation));
    }

    /// Queues `value` under `key` with the default TTL
    pub fn set<T: serde::Serialize>(&self, key: &CacheKey, value: &T) {
        self.set_in_background(key, value, self.default_ttl);
    }

    /// Queues `value` under `key` for `ttl` seconds. Returns before the write happens.
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        self.enqueue(key, value, ttl, None);
    }

    fn enqueue<T: serde::Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: u64,
        generation: Option<u64>,
    ) {
        let value = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, key = %key, "Cache serialization error");
                return;
            }
        };

        let write = PendingWrite {
            key: key.clone(),
            value,
            ttl,
            generation,
        };

        if self.write_tx.send(write).is_err() {
            tracing::warn!(key = %key, "Cache writer is gone, dropping write");
        }
    }

    /// Drops a cached value so the next read recomputes it. Bumps the key's
    /// generation in the same transaction so fills computed before this call
    /// are discarded.
    pub async fn invalidate(&self, key: &CacheKey) -> AppResult<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .incr(key.generation_key(), 1)
            .ignore()
            .del(key.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        tracing::debug!(key = %key, "Cache entry invalidated");
        Ok(())
    }
}

// TODO: run the Redis-backed tests against an embedded server instead of a local instance

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    #[test]
    fn test_cache_key_display_category_tree() {
        assert_eq!(format!("{}", CacheKey::CategoryTree), "catalog:category_tree");
    }

    #[test]
    fn test_cache_key_display_publishers() {
        assert_eq!(format!("{}", CacheKey::Publishers), "catalog:publishers");
    }

    #[test]
    fn test_cache_key_display_book() {
        let uid = Uuid::nil();
        assert_eq!(
            format!("{}", CacheKey::Book(uid)),
            "book:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_generation_key() {
        assert_eq!(
            CacheKey::Publishers.generation_key(),
            "catalog:publishers:gen"
        );
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_cache_miss() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, _handle) = Cache::new(client, 60);

        let key = CacheKey::Book(Uuid::new_v4());
        let read: CacheRead<Vec<String>> = cache.get_from_cache(&key).await.unwrap();

        assert_eq!(read.value, None);
        assert_eq!(read.generation, 0);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_fill_after_invalidate_is_dropped() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, handle) = Cache::new(client, 60);

        let key = CacheKey::Book(Uuid::new_v4());
        let read: CacheRead<Vec<String>> = cache.get_from_cache(&key).await.unwrap();

        // a writer commits and invalidates while the reader computes
        cache.invalidate(&key).await.unwrap();
        cache.fill(&key, &vec!["stale".to_string()], read.generation);
        handle.shutdown().await;

        let after: CacheRead<Vec<String>> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(after.value, None);
        assert_eq!(after.generation, read.generation + 1);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_fill_at_current_generation_is_stored() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, handle) = Cache::new(client, 60);

        let key = CacheKey::Book(Uuid::new_v4());
        cache.invalidate(&key).await.unwrap();
        let read: CacheRead<Vec<String>> = cache.get_from_cache(&key).await.unwrap();

        let value = vec!["fresh".to_string()];
        cache.fill(&key, &value, read.generation);
        handle.shutdown().await;

        let after: CacheRead<Vec<String>> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(after.value, Some(value));

        cache.invalidate(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_set_in_background_then_invalidate() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, _handle) = Cache::new(client, 60);

        let key = CacheKey::Book(Uuid::new_v4());
        let value = vec!["Dune".to_string(), "Emma".to_string()];

        cache.set(&key, &value);

        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let retrieved: CacheRead<Vec<String>> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(retrieved.value, Some(value));

        cache.invalidate(&key).await.unwrap();
        let retrieved: CacheRead<Vec<String>> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(retrieved.value, None);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_cache_writer_graceful_shutdown() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, handle) = Cache::new(client, 60);

        let key = CacheKey::Book(Uuid::new_v4());
        let value = vec!["shutdown_test".to_string()];

        cache.set_in_background(&key, &value, 60);

        handle.shutdown().await;

        let retrieved: CacheRead<Vec<String>> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(retrieved.value, Some(value));

        cache.invalidate(&key).await.unwrap();
    }
}
