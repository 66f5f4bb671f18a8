//! Per-user delivery preferences: storage model, two-tier cache, resolver.

pub mod cache;
#[cfg(feature = "redis")]
pub mod redis_cache;
pub mod resolver;
pub mod types;

pub use cache::{CacheError, LocalTtlCache, SharedCache, TieredCache};
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;
pub use resolver::PreferenceResolver;
pub use types::{
    NotificationPreference, PreferenceDefaults, PreferenceUpdate, QUIET_HOURS_FORMAT,
    parse_time_of_day,
};

/// Errors from preference lookup and update.
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("preference store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("invalid preference update: {0}")]
    Invalid(String),
}
