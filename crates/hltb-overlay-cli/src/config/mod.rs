//! Configuration loading and resolution.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;

use hltb_overlay::source::DEFAULT_TIMEOUT;
use hltb_overlay::{CachePolicy, CacheStore, FileStore, HltbClient, RetryPolicy, SystemClock};

/// Lookup backend used when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8787";

/// Resolve the cache directory.
///
/// Order: explicit flag, `HLTB_CACHE_DIR`, `./.hltb` if it exists, then
/// `~/.hltb-overlay`.
pub fn resolve_cache_dir(explicit: Option<&str>) -> PathBuf {
    resolve_cache_dir_from(explicit, |key| std::env::var(key).ok(), Path::new("."))
}

fn resolve_cache_dir_from(
    explicit: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
    cwd: &Path,
) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Some(env_path) = env("HLTB_CACHE_DIR").filter(|p| !p.is_empty()) {
        return PathBuf::from(env_path);
    }

    let local = cwd.join(".hltb");
    if local.is_dir() {
        return local;
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hltb-overlay")
}

/// Resolve the lookup backend URL: explicit flag, `HLTB_ENDPOINT`, default.
pub fn resolve_endpoint(explicit: Option<&str>) -> String {
    resolve_endpoint_from(explicit, |key| std::env::var(key).ok())
}

fn resolve_endpoint_from(explicit: Option<&str>, env: impl Fn(&str) -> Option<String>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| env("HLTB_ENDPOINT").filter(|e| !e.is_empty()))
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}

/// Everything the front end needs to build a cache, a client, and a
/// controller.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub cache_dir: PathBuf,
    pub endpoint: String,
    pub timeout: Duration,
    pub cache: CachePolicy,
    pub retry: RetryPolicy,
}

impl OverlayConfig {
    /// Resolve paths and apply environment overrides.
    pub fn load(cache_dir: Option<&str>, endpoint: Option<&str>) -> anyhow::Result<Self> {
        Self::load_from(
            cache_dir,
            endpoint,
            |key| std::env::var(key).ok(),
            Path::new("."),
        )
    }

    fn load_from(
        cache_dir: Option<&str>,
        endpoint: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
        cwd: &Path,
    ) -> anyhow::Result<Self> {
        let mut cache = CachePolicy::default();
        if let Some(raw) = env("HLTB_FRESH_HOURS") {
            let hours: f64 = raw
                .trim()
                .parse()
                .with_context(|| format!("HLTB_FRESH_HOURS is not a number: {raw:?}"))?;
            if !hours.is_finite() || hours < 0.0 {
                anyhow::bail!("HLTB_FRESH_HOURS must be a non-negative number, got {raw:?}");
            }
            cache.fresh_window = Duration::try_from_secs_f64(hours * 3600.0)
                .with_context(|| format!("HLTB_FRESH_HOURS is out of range: {raw:?}"))?;
        }

        Ok(Self {
            cache_dir: resolve_cache_dir_from(cache_dir, &env, cwd),
            endpoint: resolve_endpoint_from(endpoint, &env),
            timeout: DEFAULT_TIMEOUT,
            cache,
            retry: RetryPolicy::default(),
        })
    }

    /// Cache persisted as one JSON file under the cache directory.
    pub fn open_cache(&self) -> CacheStore {
        CacheStore::with_policy(
            FileStore::new(&self.cache_dir),
            self.cache,
            Rc::new(SystemClock),
        )
    }

    pub fn client(&self) -> anyhow::Result<HltbClient> {
        HltbClient::new(&self.endpoint, self.timeout)
            .with_context(|| format!("failed to build HTTP client for {}", self.endpoint))
    }
}
