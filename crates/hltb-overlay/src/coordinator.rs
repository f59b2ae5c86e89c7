//! Cache-first resolution with background revalidation.

use std::rc::Rc;

use tokio::task::JoinHandle;

use crate::cache::CacheStore;
use crate::source::HltbSource;
use crate::types::{HltbRecord, OverlayResult, SubjectId};

/// Background refresh of a stale entry. Resolves to the fresh record, or
/// `None` when the game has no entry or the lookup failed.
pub type RefreshTask = JoinHandle<Option<HltbRecord>>;

/// Outcome of [`FetchCoordinator::resolve`].
#[derive(Debug)]
pub struct FetchResult {
    /// Record to display now. `None` for a known not-found.
    pub data: Option<HltbRecord>,
    pub from_cache: bool,
    /// Set only when `data` came from a stale entry.
    pub refresh: Option<RefreshTask>,
}

/// Resolves completion times through the cache, falling back to the
/// remote source.
///
/// Holds no per-request state: two concurrent resolves for the same id may
/// both reach the source.
pub struct FetchCoordinator<S: ?Sized> {
    cache: Rc<CacheStore>,
    source: Rc<S>,
}

impl<S: ?Sized> Clone for FetchCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            cache: Rc::clone(&self.cache),
            source: Rc::clone(&self.source),
        }
    }
}

impl<S: HltbSource + ?Sized + 'static> FetchCoordinator<S> {
    pub fn new(cache: Rc<CacheStore>, source: Rc<S>) -> Self {
        Self { cache, source }
    }

    pub fn cache(&self) -> &Rc<CacheStore> {
        &self.cache
    }

    pub fn source(&self) -> &Rc<S> {
        &self.source
    }

    /// Resolve completion times for `id`.
    ///
    /// * fresh hit: cached data, no lookup.
    /// * stale hit: cached data now, plus a refresh task that rewrites the
    ///   entry when the lookup succeeds.
    /// * miss: awaits the lookup and caches its outcome, including
    ///   not-found. A failed lookup is returned as an error and not cached.
    ///
    /// Must be called inside a [`tokio::task::LocalSet`] because the refresh
    /// is spawned as a local task.
    pub async fn resolve(&self, id: SubjectId) -> OverlayResult<FetchResult> {
        if let Some(hit) = self.cache.get(id) {
            let data = hit.entry.record().cloned();
            if !hit.is_stale {
                tracing::debug!("Cache hit for {id}");
                return Ok(FetchResult {
                    data,
                    from_cache: true,
                    refresh: None,
                });
            }

            tracing::debug!("Stale cache for {id}, refreshing in background");
            let cache = Rc::clone(&self.cache);
            let source = Rc::clone(&self.source);
            let refresh = tokio::task::spawn_local(async move {
                revalidate(&cache, source.as_ref(), id).await
            });
            return Ok(FetchResult {
                data,
                from_cache: true,
                refresh: Some(refresh),
            });
        }

        tracing::debug!("Cache miss for {id}, looking up");
        let data = self.source.lookup(id).await?;
        if data.is_none() {
            tracing::debug!("No HLTB entry for {id}");
        }
        self.cache.set(id, data.clone());
        Ok(FetchResult {
            data,
            from_cache: false,
            refresh: None,
        })
    }
}

async fn revalidate<S: HltbSource + ?Sized>(
    cache: &CacheStore,
    source: &S,
    id: SubjectId,
) -> Option<HltbRecord> {
    match source.lookup(id).await {
        Ok(data) => {
            cache.set(id, data.clone());
            data
        }
        Err(e) => {
            // Keep serving the old entry.
            tracing::warn!("Background refresh for {id} failed: {e}");
            None
        }
    }
}
