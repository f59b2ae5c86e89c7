//! Debug helpers for finding new markers after a client update and for
//! inspecting the cache. Observational only, apart from `clear_cache`.

use scraper::Selector;
use serde::Serialize;

use crate::cache::CacheStore;
use crate::detector::{MarkerSources, Markers};
use crate::page::{ElementSummary, PageTree};
use crate::types::{ElementHandle, OverlayError, OverlayResult};

/// Ancestor levels reported for each image.
pub const ANCESTOR_LEVELS: usize = 5;

const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Cache statistics as shown to a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheReport {
    pub count: usize,
    pub oldest_timestamp: Option<i64>,
    /// Age of the oldest entry, rounded to whole days.
    pub oldest_age_days: Option<i64>,
}

impl CacheReport {
    /// `"N games cached"` or `"No cached data"`.
    pub fn summary(&self) -> String {
        match self.count {
            0 => "No cached data".to_string(),
            1 => "1 game cached".to_string(),
            n => format!("{n} games cached"),
        }
    }
}

/// An image and the chain of elements above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageReport {
    pub handle: ElementHandle,
    pub src: String,
    pub classes: Vec<String>,
    /// `tag.first-class` labels, nearest parent first.
    pub ancestors: Vec<String>,
}

/// An element and its direct children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementInspection {
    pub element: ElementSummary,
    pub children: Vec<ElementSummary>,
}

/// Cache and marker tools bundled for a diagnostics front end.
pub struct DebugTools<'a> {
    cache: &'a CacheStore,
    markers: &'a Markers,
}

impl<'a> DebugTools<'a> {
    pub fn new(cache: &'a CacheStore, markers: &'a Markers) -> Self {
        Self { cache, markers }
    }

    pub fn cache_stats(&self) -> CacheReport {
        let stats = self.cache.stats();
        let now = self.cache.now_ms();
        let oldest_age_days = stats
            .oldest_timestamp
            .map(|ts| (now.saturating_sub(ts).max(0) as f64 / MS_PER_DAY).round() as i64);
        let report = CacheReport {
            count: stats.count,
            oldest_timestamp: stats.oldest_timestamp,
            oldest_age_days,
        };
        tracing::info!("Cache entries: {}", report.count);
        if let Some(days) = report.oldest_age_days {
            tracing::info!("Oldest entry: {days} days old");
        }
        report
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Cache cleared. Navigate to a game to fetch fresh data.");
    }

    pub fn selectors(&self) -> &MarkerSources {
        self.markers.sources()
    }
}

/// Run an arbitrary selector over the page.
pub fn select<P: PageTree + ?Sized>(page: &P, selector: &str) -> OverlayResult<Vec<ElementSummary>> {
    let selector = parse(selector)?;
    Ok(page
        .select_all(&selector)
        .into_iter()
        .filter_map(|handle| page.describe(handle))
        .collect())
}

/// Every element carrying `class`.
pub fn find_by_class<P: PageTree + ?Sized>(
    page: &P,
    class: &str,
) -> OverlayResult<Vec<ElementSummary>> {
    let found = select(page, &format!(".{}", class.trim_start_matches('.')))?;
    tracing::info!("Found {} elements with class \"{class}\"", found.len());
    Ok(found)
}

/// Every image on the page.
pub fn find_images<P: PageTree + ?Sized>(page: &P) -> OverlayResult<Vec<ImageReport>> {
    images(page, "img")
}

/// Images whose `src` points into the app asset store, which is where the
/// header and hero images live.
pub fn find_asset_images<P: PageTree + ?Sized>(page: &P) -> OverlayResult<Vec<ImageReport>> {
    images(page, r#"img[src*="/assets/"]"#)
}

fn images<P: PageTree + ?Sized>(page: &P, selector: &str) -> OverlayResult<Vec<ImageReport>> {
    let selector = parse(selector)?;
    let reports = page
        .select_all(&selector)
        .into_iter()
        .map(|handle| ImageReport {
            handle,
            src: page.attribute(handle, "src").unwrap_or_default(),
            classes: page
                .describe(handle)
                .map(|summary| summary.classes)
                .unwrap_or_default(),
            ancestors: ancestors(page, handle),
        })
        .collect();
    Ok(reports)
}

fn ancestors<P: PageTree + ?Sized>(page: &P, handle: ElementHandle) -> Vec<String> {
    let mut labels = Vec::with_capacity(ANCESTOR_LEVELS);
    let mut cursor = page.parent(handle);
    while let Some(parent) = cursor {
        if labels.len() == ANCESTOR_LEVELS {
            break;
        }
        if let Some(summary) = page.describe(parent) {
            labels.push(summary.label());
        }
        cursor = page.parent(parent);
    }
    labels
}

/// First element matching `selector` with its children, or `None`.
pub fn inspect_element<P: PageTree + ?Sized>(
    page: &P,
    selector: &str,
) -> OverlayResult<Option<ElementInspection>> {
    let parsed = parse(selector)?;
    let Some(handle) = page.select_first(&parsed) else {
        tracing::info!("No element found for selector: {selector}");
        return Ok(None);
    };
    let Some(element) = page.describe(handle) else {
        return Ok(None);
    };
    let children = page
        .children(handle)
        .into_iter()
        .filter_map(|child| page.describe(child))
        .collect();
    Ok(Some(ElementInspection { element, children }))
}

/// Log the page structure around asset images, plus the matches of an
/// optional selector.
pub fn log_structure<P: PageTree + ?Sized>(page: &P, selector: Option<&str>) -> OverlayResult<()> {
    tracing::info!("=== DOM structure ===");
    tracing::info!("Document title: {}", page.title().unwrap_or_default());

    if let Some(selector) = selector {
        let found = select(page, selector)?;
        tracing::info!("Found {} elements matching \"{selector}\"", found.len());
        for (i, el) in found.iter().enumerate() {
            tracing::info!("  [{i}] {} {} {}", el.tag, el.classes.join(" "), el.id.as_deref().unwrap_or(""));
        }
    }

    let images = find_asset_images(page)?;
    tracing::info!("Found {} images with /assets/ in src", images.len());
    for (i, img) in images.iter().enumerate() {
        tracing::info!("  [{i}] src: {}", img.src);
        tracing::info!("       class: {}", img.classes.join(" "));
        for (level, label) in img.ancestors.iter().enumerate() {
            tracing::info!("       ancestor {}: {label}", level + 1);
        }
    }
    tracing::info!("=== end DOM structure ===");
    Ok(())
}

fn parse(selector: &str) -> OverlayResult<Selector> {
    Selector::parse(selector)
        .map_err(|e| OverlayError::InvalidMarker(format!("{selector}: {e:?}")))
}
