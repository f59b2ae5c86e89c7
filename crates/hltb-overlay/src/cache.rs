//! Completion-time cache with stale-while-revalidate reads.
//!
//! The whole cache is one JSON object keyed by app id, stored under
//! [`CACHE_KEY`] in a [`KvStore`]. Stale entries are still returned (flagged
//! `is_stale`) so the caller can show them while it refreshes. Size is bounded
//! by an opportunistic prune pass on a store's first write and then every
//! `prune_interval` writes.
//!
//! Every operation fails soft: unreadable or corrupt content reads as an
//! empty cache and a write that cannot be persisted is dropped, with a
//! warning in the log.

use std::cell::Cell;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use crate::storage::KvStore;
use crate::types::{CacheEntry, HltbRecord, OverlayResult, SubjectId};

/// Key the serialized map lives under.
pub const CACHE_KEY: &str = "hltb-millennium-cache";

/// Entries younger than this are served without a refresh.
pub const FRESH_WINDOW: Duration = Duration::from_secs(12 * 60 * 60);
/// Entries older than this are dropped by the next prune pass.
pub const MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);
/// Upper bound on entries kept after a prune pass.
pub const MAX_ENTRIES: usize = 500;
/// Writes between prune passes.
pub const PRUNE_INTERVAL: u32 = 50;

type CacheMap = BTreeMap<SubjectId, CacheEntry>;

/// Freshness and size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub fresh_window: Duration,
    pub max_age: Duration,
    pub max_entries: usize,
    pub prune_interval: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            fresh_window: FRESH_WINDOW,
            max_age: MAX_AGE,
            max_entries: MAX_ENTRIES,
            prune_interval: PRUNE_INTERVAL,
        }
    }
}

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<i64>,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Cell::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.set(now_ms);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + duration_ms(by));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.get()
    }
}

/// A cache hit together with its freshness.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    pub entry: CacheEntry,
    pub is_stale: bool,
}

/// Entry count and age of the oldest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct CacheStats {
    pub count: usize,
    pub oldest_timestamp: Option<i64>,
}

/// Cache of lookup outcomes keyed by app id.
pub struct CacheStore {
    store: Box<dyn KvStore>,
    policy: CachePolicy,
    clock: Rc<dyn Clock>,
    writes: Cell<u32>,
}

impl CacheStore {
    /// Cache over `store` with the default policy and the system clock.
    pub fn new(store: impl KvStore + 'static) -> Self {
        Self::with_policy(store, CachePolicy::default(), Rc::new(SystemClock))
    }

    pub fn with_policy(
        store: impl KvStore + 'static,
        policy: CachePolicy,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            store: Box::new(store),
            policy,
            clock,
            writes: Cell::new(0),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Current time according to the cache's clock.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Look up an entry, stale or not. Never mutates the cache.
    pub fn get(&self, id: SubjectId) -> Option<CachedEntry> {
        let map = self.read_soft();
        let entry = map.get(&id)?.clone();
        let age = self.clock.now_ms().saturating_sub(entry.timestamp);
        let is_stale = age > duration_ms(self.policy.fresh_window);
        Some(CachedEntry { entry, is_stale })
    }

    /// Record a lookup outcome. `None` records an authoritative not-found.
    ///
    /// The entry's timestamp never moves backwards, even if the clock does.
    pub fn set(&self, id: SubjectId, data: Option<HltbRecord>) {
        let mut map = match self.read() {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("Cache write for {id} dropped: {e}");
                return;
            }
        };

        let now = self.clock.now_ms();
        let timestamp = map.get(&id).map_or(now, |prev| prev.timestamp.max(now));
        map.insert(id, CacheEntry::new(data, timestamp));

        // Each store also prunes on its first write, since a short-lived
        // process may never reach the interval.
        let writes = self.writes.get().wrapping_add(1);
        self.writes.set(writes);
        let due = self.policy.prune_interval > 0 && writes % self.policy.prune_interval == 0;
        if writes == 1 || due {
            let removed = self.prune_map(&mut map, now);
            tracing::debug!("Pruned {removed} cache entries after {writes} writes");
        }

        if let Err(e) = self.write(&map) {
            tracing::warn!("Cache write for {id} dropped: {e}");
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        match self.store.remove(CACHE_KEY) {
            Ok(()) => tracing::info!("Cache cleared"),
            Err(e) => tracing::warn!("Cache clear failed: {e}"),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let map = self.read_soft();
        CacheStats {
            count: map.len(),
            oldest_timestamp: map.values().map(|e| e.timestamp).min(),
        }
    }

    /// Number of entries, stale ones included.
    pub fn len(&self) -> usize {
        self.read_soft().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes seen since this store was created.
    pub fn write_count(&self) -> u32 {
        self.writes.get()
    }

    /// Run a prune pass now. Returns the number of entries removed.
    pub fn prune(&self) -> usize {
        let mut map = match self.read() {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("Cache prune skipped: {e}");
                return 0;
            }
        };
        let removed = self.prune_map(&mut map, self.clock.now_ms());
        if removed > 0 {
            if let Err(e) = self.write(&map) {
                tracing::warn!("Cache prune not persisted: {e}");
                return 0;
            }
        }
        removed
    }

    fn prune_map(&self, map: &mut CacheMap, now: i64) -> usize {
        let before = map.len();
        let max_age = duration_ms(self.policy.max_age);
        map.retain(|_, entry| now.saturating_sub(entry.timestamp) <= max_age);

        if map.len() > self.policy.max_entries {
            let mut by_age: Vec<(SubjectId, i64)> =
                map.iter().map(|(id, e)| (*id, e.timestamp)).collect();
            by_age.sort_by_key(|(id, ts)| (Reverse(*ts), *id));
            for (id, _) in by_age.into_iter().skip(self.policy.max_entries) {
                map.remove(&id);
            }
        }
        before - map.len()
    }

    fn read(&self) -> OverlayResult<CacheMap> {
        match self.store.get(CACHE_KEY)? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(CacheMap::new()),
        }
    }

    fn read_soft(&self) -> CacheMap {
        self.read().unwrap_or_else(|e| {
            tracing::warn!("Cache read error: {e}");
            CacheMap::new()
        })
    }

    fn write(&self, map: &CacheMap) -> OverlayResult<()> {
        let raw = serde_json::to_string(map)?;
        self.store.set(CACHE_KEY, &raw)
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
