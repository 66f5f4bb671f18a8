//! Cached preference lookup and partial update.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::PreferenceStore;

use super::cache::SharedCache;
use super::types::{NotificationPreference, PreferenceDefaults, PreferenceUpdate};
use super::PreferenceError;

/// Read-through, write-through preference access.
///
/// Reads consult the cache first and fill it on a miss. Upserts persist
/// synchronously and then refresh the cache entry, so the next read sees
/// the new value. Entries written by other processes may be served stale
/// for up to one TTL.
pub struct PreferenceResolver {
    store: Arc<dyn PreferenceStore>,
    cache: Arc<dyn SharedCache>,
    ttl: Duration,
    defaults: PreferenceDefaults,
    clock: Arc<dyn Clock>,
}

impl PreferenceResolver {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        cache: Arc<dyn SharedCache>,
        ttl: Duration,
        defaults: PreferenceDefaults,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache,
            ttl,
            defaults,
            clock,
        }
    }

    /// Stored preferences, or `None` if the user never saved any.
    pub async fn get_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, PreferenceError> {
        let key = cache_key(user_id);
        match self.cache.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str::<NotificationPreference>(&json) {
                Ok(pref) => return Ok(Some(pref)),
                Err(e) => warn!(user_id, error = %e, "discarding undecodable cache entry"),
            },
            Ok(None) => debug!(user_id, "preference cache miss"),
            Err(e) => warn!(user_id, error = %e, "preference cache unavailable"),
        }

        let stored = self.store.load_preferences(user_id)?;
        if let Some(pref) = &stored {
            self.refresh_cache(pref).await;
        }
        Ok(stored)
    }

    /// Stored preferences, creating and persisting defaults on first read.
    pub async fn get_or_create_preferences(
        &self,
        user_id: &str,
    ) -> Result<NotificationPreference, PreferenceError> {
        if let Some(pref) = self.get_preferences(user_id).await? {
            return Ok(pref);
        }
        let pref = NotificationPreference::with_defaults(user_id, &self.defaults, self.clock.now());
        self.store.save_preferences(&pref)?;
        self.refresh_cache(&pref).await;
        Ok(pref)
    }

    /// Merge `update` into the stored record (or the defaults), persist it,
    /// and refresh the cache.
    pub async fn upsert_preferences(
        &self,
        user_id: &str,
        update: &PreferenceUpdate,
    ) -> Result<NotificationPreference, PreferenceError> {
        update.validate()?;
        // Merge against the durable record, never a possibly stale cache entry.
        let mut pref = match self.store.load_preferences(user_id)? {
            Some(pref) => pref,
            None => NotificationPreference::with_defaults(user_id, &self.defaults, self.clock.now()),
        };
        pref.apply(update);
        pref.updated_at = self.clock.now();
        self.store.save_preferences(&pref)?;
        self.refresh_cache(&pref).await;
        Ok(pref)
    }

    async fn refresh_cache(&self, pref: &NotificationPreference) {
        let key = cache_key(&pref.user_id);
        let json = match serde_json::to_string(pref) {
            Ok(json) => json,
            Err(e) => {
                warn!(user_id = %pref.user_id, error = %e, "failed to encode preference for cache");
                return;
            }
        };
        if let Err(e) = self.cache.set(&key, &json, self.ttl).await {
            warn!(user_id = %pref.user_id, error = %e, "preference cache write failed; evicting");
            if let Err(e) = self.cache.delete(&key).await {
                warn!(user_id = %pref.user_id, error = %e, "preference cache evict failed");
            }
        }
    }
}

fn cache_key(user_id: &str) -> String {
    format!("notif_pref:{user_id}")
}
