//! Durable TTL cache for registry responses
//!
//! Entries live in a SQLite table, one row per key:
//!
//! ```text
//! cache_entries(key TEXT PRIMARY KEY, payload TEXT, inserted_at REAL, ttl_seconds REAL)
//! ```
//!
//! `inserted_at + ttl_seconds` is the only expiry rule. Expired rows are
//! dropped lazily when read, or in bulk by [`TtlCache::purge_expired`].
//!
//! Writes are serialized through one per-store lock and each write is its own
//! transaction, so a crash never leaves a half-written entry. Reads only wait
//! for in-progress writes, never for each other.
//!
//! [`TtlCache::get_or_compute`] adds single-flight loading: concurrent misses
//! on one key share a single computation.

use crate::common::singleflight::SingleFlight;
use crate::error::{RegistryError, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// File name used by [`TtlCache::open_in`].
pub const CACHE_FILE_NAME: &str = "registry-cache.db";

/// Path reported by a store opened with [`TtlCache::open_in_memory`].
pub const IN_MEMORY_PATH: &str = ":memory:";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY NOT NULL,
    payload TEXT NOT NULL,
    inserted_at REAL NOT NULL,
    ttl_seconds REAL NOT NULL
)";

/// Which entries an invalidation removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation<'a> {
    Key(&'a str),
    Prefix(&'a str),
}

/// `hits` and `misses` count lookups made through this handle since it was
/// opened; they are not persisted. `entry_count` reads the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Clone)]
pub struct TtlCache {
    pool: SqlitePool,
    path: PathBuf,
    write_lock: Arc<RwLock<()>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    flights: SingleFlight<String>,
}

fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl TtlCache {
    /// Open (or create) the cache database at `path`.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RegistryError::Cache(format!(
                    "Failed to create cache directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, path.to_path_buf()).await
    }

    /// A store that lives only as long as this process. Used when the cache
    /// file cannot be opened.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every in-memory connection is its own database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool, PathBuf::from(IN_MEMORY_PATH)).await
    }

    async fn with_pool(pool: SqlitePool, path: PathBuf) -> Result<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        debug!(path = %path.display(), "Cache store ready");

        Ok(Self {
            pool,
            path,
            write_lock: Arc::new(RwLock::new(())),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            flights: SingleFlight::new(),
        })
    }

    /// Open `registry-cache.db` inside `dir`.
    pub async fn open_in(dir: &Path) -> Result<Self> {
        Self::open(&dir.join(CACHE_FILE_NAME)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Typed lookup. Store and decode failures count as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = match self.lookup(key).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        };

        let decoded = payload.and_then(|payload| match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Cached payload could not be decoded, treating as miss");
                None
            }
        });

        if decoded.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache miss");
        }
        decoded
    }

    /// Raw payload lookup with lazy purge of an expired row. Does not touch
    /// hit/miss counters.
    pub async fn lookup(&self, key: &str) -> Result<Option<String>> {
        let row = {
            let _read = self.write_lock.read().await;
            sqlx::query_as::<_, (String, f64, f64)>(
                "SELECT payload, inserted_at, ttl_seconds FROM cache_entries WHERE key = ?1",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
        };

        let Some((payload, inserted_at, ttl_seconds)) = row else {
            return Ok(None);
        };

        if epoch_seconds() < inserted_at + ttl_seconds {
            return Ok(Some(payload));
        }

        // Only the expired version goes; a concurrent overwrite survives.
        let _write = self.write_lock.write().await;
        sqlx::query("DELETE FROM cache_entries WHERE key = ?1 AND inserted_at = ?2")
            .bind(key)
            .bind(inserted_at)
            .execute(&self.pool)
            .await?;
        debug!(key, "Purged expired cache entry");
        Ok(None)
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        self.set_raw(key, &payload, ttl).await
    }

    pub async fn set_raw(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let _write = self.write_lock.write().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO cache_entries (key, payload, inserted_at, ttl_seconds)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                inserted_at = excluded.inserted_at,
                ttl_seconds = excluded.ttl_seconds",
        )
        .bind(key)
        .bind(payload)
        .bind(epoch_seconds())
        .bind(ttl.as_secs_f64())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove one key or every key under a prefix. Returns the number of rows removed.
    pub async fn invalidate(&self, target: Invalidation<'_>) -> Result<u64> {
        let _write = self.write_lock.write().await;
        let result = match target {
            Invalidation::Key(key) => {
                sqlx::query("DELETE FROM cache_entries WHERE key = ?1")
                    .bind(key)
                    .execute(&self.pool)
                    .await?
            }
            Invalidation::Prefix(prefix) => {
                sqlx::query("DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1")
                    .bind(prefix)
                    .execute(&self.pool)
                    .await?
            }
        };
        debug!(?target, removed = result.rows_affected(), "Invalidated cache entries");
        Ok(result.rows_affected())
    }

    /// Drop every entry and reset the hit/miss counters.
    pub async fn clear(&self) -> Result<u64> {
        let _write = self.write_lock.write().await;
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        Ok(result.rows_affected())
    }

    /// Delete every expired row now instead of waiting for it to be read.
    pub async fn purge_expired(&self) -> Result<u64> {
        let _write = self.write_lock.write().await;
        let result = sqlx::query("DELETE FROM cache_entries WHERE inserted_at + ttl_seconds <= ?1")
            .bind(epoch_seconds())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let entry_count = {
            let _read = self.write_lock.read().await;
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cache_entries")
                .fetch_one(&self.pool)
                .await?
        };
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entry_count.max(0) as u64,
        })
    }

    /// Return the cached value for `key`, or run `compute` and cache its
    /// result for `ttl`.
    ///
    /// At most one computation per key runs at a time; concurrent callers
    /// wait for it and all observe the same value or error. The computation
    /// runs on its own task, so callers that give up do not cancel it.
    /// Failures are never cached.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let cache = self.clone();
        let owned_key = key.to_string();
        let payload = self
            .flights
            .run(key, move || {
                let computation = compute();
                async move {
                    // A run that finished between our miss and this one already stored it.
                    // A stored payload that no longer decodes is recomputed and overwritten.
                    if let Ok(Some(payload)) = cache.lookup(&owned_key).await {
                        match serde_json::from_str::<T>(&payload) {
                            Ok(_) => return Ok(payload),
                            Err(e) => warn!(
                                key = %owned_key,
                                error = %e,
                                "Discarding undecodable cache entry"
                            ),
                        }
                    }

                    let value = computation.await?;
                    let payload = serde_json::to_string(&value)?;
                    if let Err(e) = cache.set_raw(&owned_key, &payload, ttl).await {
                        warn!(key = %owned_key, error = %e, "Failed to cache computed value");
                    }
                    Ok(payload)
                }
            })
            .await?;

        Ok(serde_json::from_str(&payload)?)
    }
}
