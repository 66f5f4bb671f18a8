//! Two-tier preference cache.
//!
//! [`TieredCache`] reads from an optional primary (distributed) tier and
//! falls back to a bounded in-process [`LocalTtlCache`] when the primary
//! errors. Writes go to both tiers. A key whose primary write failed is
//! served from the local tier until a later primary write for it succeeds
//! or its TTL runs out, so the writing process never reads back an older
//! primary value. While the primary is down, another process can serve a
//! value up to one TTL stale from its own local tier; that window is
//! accepted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

/// Errors from a cache tier.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// String key/value cache with per-entry TTL.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

struct LocalEntry {
    value: String,
    expires_at: Instant,
}

/// Bounded in-process cache.
///
/// When full, expired entries are dropped first, then the entry closest to
/// expiry.
pub struct LocalTtlCache {
    capacity: usize,
    entries: Mutex<HashMap<String, LocalEntry>>,
}

impl LocalTtlCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, LocalEntry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|e| CacheError::Unavailable(format!("local cache lock poisoned: {e}")))
    }
}

#[async_trait]
impl SharedCache for LocalTtlCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        if !entries.contains_key(key) && entries.len() >= self.capacity {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.capacity {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = soonest {
                    entries.remove(&k);
                }
            }
        }
        entries.insert(
            key.to_owned(),
            LocalEntry {
                value: value.to_owned(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Primary tier plus local fallback.
pub struct TieredCache {
    primary: Option<Arc<dyn SharedCache>>,
    local: LocalTtlCache,
    /// Keys the primary failed to write, with the time the local value lapses.
    diverged: Mutex<HashMap<String, Instant>>,
    /// How long a failed primary delete pins a key to the local tier.
    delete_window: Duration,
}

impl TieredCache {
    pub fn new(primary: Option<Arc<dyn SharedCache>>, local: LocalTtlCache) -> Self {
        Self {
            primary,
            local,
            diverged: Mutex::new(HashMap::new()),
            delete_window: DEFAULT_DELETE_WINDOW,
        }
    }

    /// Local tier only.
    pub fn local_only(capacity: usize) -> Self {
        Self::new(None, LocalTtlCache::new(capacity))
    }

    /// Pin window after a failed primary delete; use the entry TTL.
    pub fn with_delete_window(mut self, window: Duration) -> Self {
        self.delete_window = window;
        self
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    fn diverged(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Instant>>, CacheError> {
        self.diverged
            .lock()
            .map_err(|e| CacheError::Unavailable(format!("diverged-key lock poisoned: {e}")))
    }

    /// Whether `key` must be read from the local tier only.
    fn is_diverged(&self, key: &str) -> Result<bool, CacheError> {
        let mut diverged = self.diverged()?;
        match diverged.get(key) {
            Some(until) if *until > Instant::now() => Ok(true),
            Some(_) => {
                diverged.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn mark_diverged(&self, key: &str, window: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut diverged = self.diverged()?;
        diverged.retain(|_, until| *until > now);
        diverged.insert(key.to_owned(), now + window);
        Ok(())
    }

    fn clear_diverged(&self, key: &str) -> Result<(), CacheError> {
        self.diverged()?.remove(key);
        Ok(())
    }
}

const DEFAULT_DELETE_WINDOW: Duration = Duration::from_secs(300);

#[async_trait]
impl SharedCache for TieredCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(primary) = &self.primary
            && !self.is_diverged(key)?
        {
            match primary.get(key).await {
                Ok(value) => return Ok(value),
                Err(e) => warn!(key, error = %e, "primary cache read failed; using local tier"),
            }
        }
        self.local.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if let Some(primary) = &self.primary {
            match primary.set(key, value, ttl).await {
                Ok(()) => self.clear_diverged(key)?,
                Err(e) => {
                    warn!(key, error = %e, "primary cache write failed; pinning key to local tier");
                    self.mark_diverged(key, ttl)?;
                }
            }
        }
        self.local.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if let Some(primary) = &self.primary {
            match primary.delete(key).await {
                Ok(()) => self.clear_diverged(key)?,
                Err(e) => {
                    warn!(key, error = %e, "primary cache delete failed; pinning key to local tier");
                    self.mark_diverged(key, self.delete_window)?;
                }
            }
        }
        self.local.delete(key).await
    }
}
