//! Command implementations shared by the CLI subcommands and the REPL.
//!
//! Each command returns its output as a string so both front ends (and the
//! tests) can decide where it goes.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;

use hltb_overlay::diagnostics::{self, CacheReport, ElementInspection, ImageReport};
use hltb_overlay::page::ElementSummary;
use hltb_overlay::{
    detect, CacheStore, DebugTools, FetchCoordinator, HltbSource, HostPage, HtmlPage,
    InjectionController, Markers, OverlayView, PageTree, SubjectId,
};

/// Human-readable cache statistics.
pub fn stats_text(report: &CacheReport) -> String {
    let mut out = report.summary();
    if let Some(days) = report.oldest_age_days {
        let _ = write!(out, "\nOldest entry: {days} days old");
    }
    out
}

pub fn run_stats(cache: &CacheStore, markers: &Markers, as_json: bool) -> anyhow::Result<String> {
    let report = DebugTools::new(cache, markers).cache_stats();
    if as_json {
        Ok(serde_json::to_string_pretty(&report)?)
    } else {
        Ok(stats_text(&report))
    }
}

pub fn run_clear(cache: &CacheStore, markers: &Markers) -> String {
    DebugTools::new(cache, markers).clear_cache();
    "Cache cleared".to_string()
}

/// Resolve one app id through the cache. A stale hit waits for its refresh
/// so the printed data is current.
///
/// Must run inside a [`tokio::task::LocalSet`].
pub async fn run_lookup<S: HltbSource + ?Sized + 'static>(
    coordinator: &FetchCoordinator<S>,
    id: SubjectId,
    as_json: bool,
) -> anyhow::Result<String> {
    let result = coordinator
        .resolve(id)
        .await
        .with_context(|| format!("lookup for app {id} failed"))?;

    let mut data = result.data;
    let mut refreshed = false;
    if let Some(refresh) = result.refresh {
        if let Some(fresh) = refresh.await.context("refresh task aborted")? {
            data = Some(fresh);
            refreshed = true;
        }
    }

    if as_json {
        return Ok(serde_json::to_string_pretty(&json!({
            "app_id": id,
            "from_cache": result.from_cache,
            "refreshed": refreshed,
            "data": data,
        }))?);
    }

    let view = match data {
        Some(record) => OverlayView::Populated(record),
        None => OverlayView::Empty {
            message: Some(format!("No HowLongToBeat entry for app {id}")),
        },
    };
    let origin = match (result.from_cache, refreshed) {
        (false, _) => "remote",
        (true, false) => "cache",
        (true, true) => "cache, refreshed",
    };
    Ok(format!("{} [{origin}]", view.to_text()))
}

/// Detect the game page in an HTML snapshot.
pub fn run_detect(markup: &str, markers: &Markers, as_json: bool) -> anyhow::Result<String> {
    let page = HtmlPage::parse(markup);
    let game = detect(&page, markers);
    let container = game.and_then(|g| page.describe(g.container));

    if as_json {
        return Ok(serde_json::to_string_pretty(&json!({
            "app_id": game.map(|g| g.subject_id),
            "container": container,
        }))?);
    }
    Ok(match (game, container) {
        (Some(game), Some(container)) => {
            format!("App {} (container {})", game.subject_id, container.label())
        }
        (Some(game), None) => format!("App {}", game.subject_id),
        (None, _) => "No game page detected".to_string(),
    })
}

/// What `inspect` should look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectTarget {
    /// Every image.
    Images,
    /// Images whose `src` contains `/assets/`.
    AssetImages,
    Class(String),
    Selector(String),
    /// First match of a selector with its children.
    Element(String),
}

pub fn run_inspect(markup: &str, target: &InspectTarget, as_json: bool) -> anyhow::Result<String> {
    let page = HtmlPage::parse(markup);
    match target {
        InspectTarget::Images => images_output(&diagnostics::find_images(&page)?, as_json),
        InspectTarget::AssetImages => {
            images_output(&diagnostics::find_asset_images(&page)?, as_json)
        }
        InspectTarget::Class(class) => {
            elements_output(&diagnostics::find_by_class(&page, class)?, as_json)
        }
        InspectTarget::Selector(selector) => {
            elements_output(&diagnostics::select(&page, selector)?, as_json)
        }
        InspectTarget::Element(selector) => {
            let found = diagnostics::inspect_element(&page, selector)?;
            inspection_output(found.as_ref(), selector, as_json)
        }
    }
}

fn images_output(images: &[ImageReport], as_json: bool) -> anyhow::Result<String> {
    if as_json {
        return Ok(serde_json::to_string_pretty(images)?);
    }
    let mut out = format!("Found {} images", images.len());
    for (i, img) in images.iter().enumerate() {
        let _ = write!(out, "\n[{i}] {}\n    class: {}", img.src, img.classes.join(" "));
        for (level, label) in img.ancestors.iter().enumerate() {
            let _ = write!(out, "\n    ancestor {}: {label}", level + 1);
        }
    }
    Ok(out)
}

fn elements_output(elements: &[ElementSummary], as_json: bool) -> anyhow::Result<String> {
    if as_json {
        return Ok(serde_json::to_string_pretty(elements)?);
    }
    let mut out = format!("Found {} elements", elements.len());
    for (i, el) in elements.iter().enumerate() {
        let _ = write!(out, "\n[{i}] {}", describe(el));
    }
    Ok(out)
}

fn inspection_output(
    found: Option<&ElementInspection>,
    selector: &str,
    as_json: bool,
) -> anyhow::Result<String> {
    if as_json {
        return Ok(serde_json::to_string_pretty(&found)?);
    }
    let Some(found) = found else {
        return Ok(format!("No element found for selector: {selector}"));
    };
    let mut out = format!(
        "Element: {}\nChildren: {}",
        describe(&found.element),
        found.children.len()
    );
    for (i, child) in found.children.iter().enumerate() {
        let _ = write!(out, "\n  [{i}] {}", child.label());
    }
    Ok(out)
}

fn describe(el: &ElementSummary) -> String {
    let mut text = el.tag.clone();
    if let Some(id) = &el.id {
        let _ = write!(text, "#{id}");
    }
    for class in &el.classes {
        let _ = write!(text, ".{class}");
    }
    text
}

/// Attach a controller to an HTML file and keep it attached while the file
/// changes, writing the overlay as text every time it changes.
///
/// Returns the number of overlay states written. Stops when `shutdown`
/// completes. Must run inside a [`tokio::task::LocalSet`].
pub async fn watch<S, W, F>(
    path: &Path,
    controller: &InjectionController<HtmlPage, S>,
    interval: Duration,
    out: &mut W,
    shutdown: F,
) -> anyhow::Result<usize>
where
    S: HltbSource + ?Sized + 'static,
    W: Write,
    F: Future<Output = ()>,
{
    let mut markup = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let page = Rc::new(RefCell::new(HtmlPage::parse(&markup)));

    let attaching = controller.clone();
    let attach_page = Rc::clone(&page);
    tokio::task::spawn_local(async move {
        if !attaching.attach(attach_page).await {
            tracing::info!("No game page yet, waiting for the file to change");
        }
    });

    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    let mut shown: Option<OverlayView> = None;
    let mut written = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        match tokio::fs::read_to_string(path).await {
            Ok(latest) if latest != markup => {
                tracing::debug!("{} changed, re-rendering", path.display());
                page.borrow_mut().replace_document(&latest);
                markup = latest;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Cannot read {}: {e}", path.display()),
        }

        let view = page.borrow().overlay().map(|mounted| mounted.view.clone());
        if view != shown {
            if let Some(view) = &view {
                writeln!(out, "{}", view.to_text())?;
                written += 1;
            }
            shown = view;
        }
    }

    controller.detach();
    Ok(written)
}
