//! In-memory response cache with per-entry expiry.
//!
//! Entries are evicted lazily when read after their expiry, or in bulk by [`ExpiringCache::sweep`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

/// Default lifetime of a cached entry: three hours.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(10_800);

/// Source of the current time for expiry checks.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system wall clock.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// How long an inserted value stays in the cache.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lifetime {
    /// The cache's configured default lifetime
    #[default]
    Default,
    /// The entry never expires
    Never,
    /// The entry expires after the given duration
    For(Duration),
}

impl From<Duration> for Lifetime {
    fn from(duration: Duration) -> Self {
        Lifetime::For(duration)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expiry {
    Never,
    At(DateTime<Utc>),
}

impl Expiry {
    fn has_passed(self, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(at) => now > at,
        }
    }
}

#[derive(Clone, Debug)]
struct CachedEntry<V> {
    value: V,
    expires_at: Expiry,
}

/// Mapping from string key to value with an expiry per entry.
///
/// Safe to share between tasks; all operations take `&self`.
pub struct ExpiringCache<V> {
    entries: DashMap<String, CachedEntry<V>>,
    default_lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl<V> fmt::Debug for ExpiringCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("len", &self.entries.len())
            .field("default_lifetime", &self.default_lifetime)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> Default for ExpiringCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_LIFETIME)
    }
}

impl<V: Clone> ExpiringCache<V> {
    #[must_use]
    pub fn new(default_lifetime: Duration) -> Self {
        Self::with_clock(default_lifetime, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(default_lifetime: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            default_lifetime,
            clock,
        }
    }

    /// Inserts `value` under `key`, replacing any previous entry.
    pub fn insert<K: Into<String>>(&self, key: K, value: V, lifetime: Lifetime) {
        let expires_at = match lifetime {
            Lifetime::Never => Expiry::Never,
            Lifetime::Default => self.expiry_after(self.default_lifetime),
            Lifetime::For(duration) => self.expiry_after(duration),
        };

        self.entries
            .insert(key.into(), CachedEntry { value, expires_at });
    }

    /// Returns the value under `key` unless it is absent or expired. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();

        // `remove_if` keeps the check-and-evict atomic with respect to concurrent inserts.
        if self
            .entries
            .remove_if(key, |_, entry| entry.expires_at.has_passed(now))
            .is_some()
        {
            return None;
        }

        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Removes every expired entry and returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();

        self.entries
            .retain(|_, entry| !entry.expires_at.has_passed(now));

        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expiry_after(&self, duration: Duration) -> Expiry {
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        self.clock
            .now()
            .checked_add_signed(delta)
            .map_or(Expiry::Never, Expiry::At)
    }
}
