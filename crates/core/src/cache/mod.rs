//! # Cache Manager
//!
//! Key/value store with per-namespace TTL and hit-count eviction.
//!
//! - Expiry is lazy: `get` drops an entry once `now - created_at` exceeds its
//!   namespace TTL. Only `cleanup()` sweeps proactively.
//! - When a `set` pushes the map past `max_entries`, the bottom 20% of entries
//!   ordered by `(hit_count, created_at)` are evicted.
//! - Long-lived namespaces are written to disk on `cleanup()` / `shutdown()`
//!   and reloaded on startup if still fresh.

pub mod namespace;

pub use namespace::CacheNamespace;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::state::io::{load_or_default, write_json};

/// Fraction of entries removed when capacity is exceeded
const EVICTION_FRACTION: f64 = 0.2;

/// Version tag of the on-disk cache file
const PERSIST_VERSION: u32 = 1;

/// Source of "now" for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic expiry
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        *self.now.lock() += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A cached value and its bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T = Value> {
    pub data: T,
    pub created_at: DateTime<Utc>,
    pub hit_count: u64,
    pub content_digest: String,
    pub namespace: CacheNamespace,
    /// Rough token cost of recomputing this value
    #[serde(default)]
    pub estimated_tokens: u64,
}

impl CacheEntry {
    fn new(data: Value, namespace: CacheNamespace, now: DateTime<Utc>) -> Self {
        let bytes = data.to_string();
        Self {
            content_digest: blake3::hash(bytes.as_bytes()).to_hex().to_string(),
            estimated_tokens: (bytes.len() / 4) as u64,
            data,
            created_at: now,
            hit_count: 0,
            namespace,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(self.namespace.ttl()).unwrap_or(chrono::Duration::MAX);
        now - self.created_at > ttl
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    /// Approximate tokens not spent thanks to hits
    pub estimated_value_saved: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCache {
    version: u32,
    entries: HashMap<String, CacheEntry>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// In-memory cache shared by the pipeline and its collaborators
pub struct CacheManager {
    state: Mutex<CacheState>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    persist_path: Option<PathBuf>,
}

impl CacheManager {
    /// Memory-only cache with the given capacity
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            clock: Arc::new(SystemClock),
            max_entries,
            persist_path: None,
        }
    }

    /// Cache configured from `CacheConfig`, persisting under `runtime_dir`
    pub fn from_config(config: &CacheConfig, runtime_dir: &std::path::Path) -> Self {
        let cache = Self::new(config.max_entries);
        if config.persist {
            cache.with_persistence(runtime_dir.join("cache.json"))
        } else {
            cache
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enable disk persistence and reload fresh long-lived entries
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        let persisted: PersistedCache = load_or_default(&path).into_inner();
        let now = self.clock.now();

        {
            let mut state = self.state.lock();
            let mut restored = 0usize;
            for (key, entry) in persisted.entries {
                if entry.namespace.is_persistent() && !entry.is_expired(now) {
                    state.entries.insert(key, entry);
                    restored += 1;
                }
            }
            state.stats.size = state.entries.len();
            if restored > 0 {
                tracing::info!(restored, path = %path.display(), "Cache entries restored from disk");
            }
        }

        self.persist_path = Some(path);
        self
    }

    /// Store `value` under `key`, evicting if capacity is exceeded
    pub fn set(&self, key: &str, value: Value, namespace: CacheNamespace) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state
            .entries
            .insert(key.to_string(), CacheEntry::new(value, namespace, now));

        if state.entries.len() > self.max_entries {
            let evicted = Self::evict(&mut state);
            tracing::debug!(evicted, "Cache capacity exceeded, evicted entries");
        }
        state.stats.size = state.entries.len();
    }

    /// Look up `key`, treating expired entries as misses
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lookup(key, |data| Some(data.clone()))
    }

    /// Typed `set`
    pub fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        namespace: CacheNamespace,
    ) -> Result<()> {
        self.set(key, serde_json::to_value(value)?, namespace);
        Ok(())
    }

    /// Typed `get`; a value that no longer deserializes is dropped and
    /// counts as a miss
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key, |data| match T::deserialize(data) {
            Ok(typed) => Some(typed),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cached value has an unexpected shape, dropping it");
                None
            }
        })
    }

    /// Hit accounting around `decode`; entries it rejects are removed
    fn lookup<R>(&self, key: &str, decode: impl FnOnce(&Value) -> Option<R>) -> Option<R> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        let decoded = if expired {
            None
        } else {
            match state.entries.get_mut(key) {
                Some(entry) => decode(&entry.data).map(|value| {
                    entry.hit_count += 1;
                    (value, entry.estimated_tokens)
                }),
                None => None,
            }
        };

        match decoded {
            Some((value, saved)) => {
                state.stats.hits += 1;
                state.stats.estimated_value_saved += saved;
                Some(value)
            }
            None => {
                state.entries.remove(key);
                state.stats.misses += 1;
                state.stats.size = state.entries.len();
                None
            }
        }
    }

    /// Remove every entry whose key starts with `prefix`
    pub fn invalidate(&self, prefix: &str) -> usize {
        self.remove_where(|key, _| key.starts_with(prefix))
    }

    /// Remove every entry stored under `namespace`
    pub fn invalidate_namespace(&self, namespace: CacheNamespace) -> usize {
        self.remove_where(|_, entry| entry.namespace == namespace)
    }

    fn remove_where(&self, matches: impl Fn(&str, &CacheEntry) -> bool) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|key, entry| !matches(key, entry));
        state.stats.size = state.entries.len();
        before - state.entries.len()
    }

    /// Sweep expired entries, then persist long-lived namespaces
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let removed = {
            let mut state = self.state.lock();
            let before = state.entries.len();
            state.entries.retain(|_, entry| !entry.is_expired(now));
            state.stats.size = state.entries.len();
            before - state.entries.len()
        };

        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "Failed to persist cache");
        }

        tracing::debug!(removed, "Cache cleanup finished");
        removed
    }

    /// Persist long-lived namespaces before the process exits
    pub fn shutdown(&self) -> Result<()> {
        self.persist()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `cleanup()` every `interval` until `token` is cancelled
    pub fn spawn_cleanup(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.cleanup();
                    }
                }
            }
            if let Err(e) = self.shutdown() {
                tracing::warn!(error = %e, "Failed to persist cache on shutdown");
            }
        })
    }

    fn evict(state: &mut CacheState) -> usize {
        let count = (state.entries.len() as f64 * EVICTION_FRACTION).floor() as usize;
        if count == 0 {
            return 0;
        }

        let mut ranked: Vec<(u64, DateTime<Utc>, String)> = state
            .entries
            .iter()
            .map(|(key, entry)| (entry.hit_count, entry.created_at, key.clone()))
            .collect();
        ranked.sort();

        for (_, _, key) in ranked.into_iter().take(count) {
            state.entries.remove(&key);
        }
        state.stats.evictions += count as u64;
        count
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };

        let entries: HashMap<String, CacheEntry> = self
            .state
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.namespace.is_persistent())
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();

        write_json(
            path,
            &PersistedCache {
                version: PERSIST_VERSION,
                entries,
            },
        )
    }
}
