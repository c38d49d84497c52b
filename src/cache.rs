//! Typed cache client (C1) — a thin async wrapper over Redis.
//!
//! Higher layers serialize their own values; this module only moves bytes.
//! `set` attaches the TTL atomically (`SET key val EX seconds`) so there is
//! never a visible window where a key exists without its expiry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{Error, Result};

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// In-process substitute for a Redis connection, keyed the same way as the
/// real backend. Only used by the `tests/` integration suite (§10.5) so the
/// exact algorithms in [`crate::breaker`], [`crate::enterprise::auth`], and
/// [`crate::worker`] run against something faster and more deterministic
/// than a live Redis, without those callers knowing the difference.
#[derive(Clone, Default)]
struct MemoryBackend {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryBackend {
    fn is_live(entry: &MemoryEntry) -> bool {
        entry.expires_at.map(|at| at > Instant::now()).unwrap_or(true)
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(entry) if Self::is_live(&entry) => Some(entry.value.clone()),
            Some(_) => None,
            None => None,
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> bool {
        if let Some(entry) = self.entries.get(key) {
            if Self::is_live(&entry) {
                return false;
            }
        }
        self.set(key, value, Some(ttl));
        true
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn scan(&self, pattern: &str) -> Vec<String> {
        let prefix = pattern.trim_end_matches('*');
        self.entries
            .iter()
            .filter(|kv| Self::is_live(kv.value()) && kv.key().starts_with(prefix))
            .map(|kv| kv.key().clone())
            .collect()
    }

    fn incr(&self, key: &str) -> i64 {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| MemoryEntry {
                value: b"0".to_vec(),
                expires_at: None,
            });
        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        entry.value = next.to_string().into_bytes();
        next
    }

    fn expire(&self, key: &str, ttl: Duration) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }
}

#[derive(Clone)]
enum Backend {
    Redis(ConnectionManager),
    Memory(MemoryBackend),
}

/// Async cache client (C1), cheaply cloneable. Backed by Redis in
/// production (the inner `ConnectionManager` multiplexes over one
/// connection and reconnects transparently); backed by an in-process map in
/// tests via [`CacheClient::in_memory`].
#[derive(Clone)]
pub struct CacheClient {
    backend: Backend,
}

impl CacheClient {
    /// Connects to `redis_url`, failing fast if the initial connection
    /// cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Internal(format!("invalid REDIS_URL: {e}")))?;
        let conn = client
            .get_tokio_connection_manager()
            .await
            .map_err(|e| Error::Unavailable(format!("cache: {e}")))?;
        Ok(Self {
            backend: Backend::Redis(conn),
        })
    }

    /// An in-process cache with no external dependency, for the `tests/`
    /// integration suite.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryBackend::default()),
        }
    }

    /// `get(k) -> value | absent`.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let value: Option<Vec<u8>> = conn.get(key).await?;
                Ok(value)
            }
            Backend::Memory(mem) => Ok(mem.get(key)),
        }
    }

    /// `set(k, v, ttl?)`. TTL attachment is atomic with the write.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                match ttl {
                    Some(ttl) => {
                        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
                    }
                    None => {
                        let _: () = conn.set(key, value).await?;
                    }
                }
                Ok(())
            }
            Backend::Memory(mem) => {
                mem.set(key, value, ttl);
                Ok(())
            }
        }
    }

    /// Set-if-absent with TTL. Returns `true` if this call won the write
    /// (the key did not previously exist) — the building block for every
    /// idempotency marker in the system.
    pub async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let result: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut conn)
                    .await?;
                Ok(result.is_some())
            }
            Backend::Memory(mem) => Ok(mem.set_if_absent(key, value, ttl)),
        }
    }

    /// `delete(k)`.
    pub async fn delete(&self, key: &str) -> Result<()> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let _: () = conn.del(key).await?;
                Ok(())
            }
            Backend::Memory(mem) => {
                mem.delete(key);
                Ok(())
            }
        }
    }

    /// `exists(k) -> bool`.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let exists: bool = conn.exists(key).await?;
                Ok(exists)
            }
            Backend::Memory(mem) => Ok(mem.exists(key)),
        }
    }

    /// `keys(glob) -> list`, implemented with cursor-based `SCAN` rather
    /// than the blocking `KEYS` command so invalidation sweeps never stall
    /// the cache server under load (see §9 "Cache-pattern scan").
    pub async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let mut cursor: u64 = 0;
                let mut found = Vec::new();
                loop {
                    let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(200)
                        .query_async(&mut conn)
                        .await?;
                    found.extend(batch);
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                Ok(found)
            }
            Backend::Memory(mem) => Ok(mem.scan(pattern)),
        }
    }

    /// Deletes every key matching `prefix:*`-style glob. Used by the
    /// template catalog writer to invalidate a `(code, language)` family.
    pub async fn delete_matching(&self, pattern: &str) -> Result<()> {
        let keys = self.scan(pattern).await?;
        if keys.is_empty() {
            return Ok(());
        }
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let _: () = conn.del(keys).await?;
                Ok(())
            }
            Backend::Memory(mem) => {
                for key in keys {
                    mem.delete(&key);
                }
                Ok(())
            }
        }
    }

    /// `incr(k) -> int`.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let value: i64 = conn.incr(key, 1).await?;
                Ok(value)
            }
            Backend::Memory(mem) => Ok(mem.incr(key)),
        }
    }

    /// Attaches a TTL to an already-existing key without touching its
    /// value. Used by the rate limiter to open a fixed window on a
    /// counter's first increment.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let _: () = conn.expire(key, ttl.as_secs().max(1) as i64).await?;
                Ok(())
            }
            Backend::Memory(mem) => {
                mem.expire(key, ttl);
                Ok(())
            }
        }
    }

    /// `ping() -> bool`. Never consults the circuit breaker — probing the
    /// cache itself must not recurse through C2.
    pub async fn ping(&self) -> Result<bool> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok(pong == "PONG")
            }
            Backend::Memory(_) => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_set_if_absent_is_exclusive() {
        let cache = CacheClient::in_memory();
        assert!(cache.set_if_absent("k", b"a", Duration::from_secs(60)).await.unwrap());
        assert!(!cache.set_if_absent("k", b"b", Duration::from_secs(60)).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn memory_backend_scan_matches_prefix_glob() {
        let cache = CacheClient::in_memory();
        cache.set("refresh_token:u1:j1", b"1", None).await.unwrap();
        cache.set("refresh_token:u1:j2", b"1", None).await.unwrap();
        cache.set("refresh_token:u2:j1", b"1", None).await.unwrap();
        let mut found = cache.scan("refresh_token:u1:*").await.unwrap();
        found.sort();
        assert_eq!(found, vec!["refresh_token:u1:j1", "refresh_token:u1:j2"]);
    }
}
