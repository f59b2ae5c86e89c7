//! Host page tree: queries, overlay mounting, and change notifications.
//!
//! The controller never talks to a concrete DOM. It sees the host through
//! [`PageTree`] (read-only queries the detector needs) and [`HostPage`]
//! (the handful of mutations the overlay needs plus a [`ChangeFeed`] that
//! fires whenever the tree changes). [`HtmlPage`] implements both over a
//! parsed HTML snapshot, which is what the CLI and the tests drive.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;

use scraper::{ElementRef, Html, Selector};
use tokio::sync::broadcast;

use crate::display::{OverlayView, OVERLAY_ID};
use crate::types::ElementHandle;

/// Buffered notifications per subscriber before they coalesce.
const FEED_CAPACITY: usize = 64;

/// Broadcast source of "the page tree changed" notifications.
///
/// Notifications carry no payload. Cloning shares the same channel, so a
/// test can hold a clone and inject synthetic mutations.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<()>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    /// Announce a mutation to every watcher. Dropped when nobody listens.
    pub fn notify(&self) {
        let _ = self.tx.send(());
    }

    /// Start watching for mutations from this point on.
    pub fn subscribe(&self) -> ChangeWatcher {
        ChangeWatcher {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live watchers.
    pub fn watcher_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a [`ChangeFeed`].
#[derive(Debug)]
pub struct ChangeWatcher {
    rx: broadcast::Receiver<()>,
}

impl ChangeWatcher {
    /// Wait for the next mutation.
    ///
    /// Returns `false` once the feed is gone. A watcher that fell behind
    /// drains whatever is still buffered, so the backlog counts as a single
    /// change.
    pub async fn changed(&mut self) -> bool {
        match self.rx.recv().await {
            Ok(()) => true,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                let mut drained = 0usize;
                loop {
                    match self.rx.try_recv() {
                        Ok(()) => drained += 1,
                        Err(broadcast::error::TryRecvError::Lagged(more)) => {
                            drained = drained.saturating_add(more as usize);
                        }
                        Err(_) => break,
                    }
                }
                tracing::trace!(
                    "change watcher lagged by {skipped} notifications, drained {drained} more"
                );
                true
            }
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }
}

/// Short description of an element for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ElementSummary {
    pub handle: ElementHandle,
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub child_count: usize,
}

impl ElementSummary {
    /// `tag.first-class`, the form the inspection helpers print.
    pub fn label(&self) -> String {
        match self.classes.first() {
            Some(class) => format!("{}.{class}", self.tag),
            None => format!("{}.(no class)", self.tag),
        }
    }
}

/// Read-only queries over a host page.
pub trait PageTree {
    /// First element in document order matching `selector`.
    fn select_first(&self, selector: &Selector) -> Option<ElementHandle>;
    /// All elements matching `selector`, in document order.
    fn select_all(&self, selector: &Selector) -> Vec<ElementHandle>;
    /// Attribute value of an element.
    fn attribute(&self, element: ElementHandle, name: &str) -> Option<String>;
    /// Nearest inclusive ancestor matching `selector` (DOM `closest`).
    fn closest(&self, element: ElementHandle, selector: &Selector) -> Option<ElementHandle>;
    /// Parent element, if any.
    fn parent(&self, element: ElementHandle) -> Option<ElementHandle>;
    /// Child elements in order.
    fn children(&self, element: ElementHandle) -> Vec<ElementHandle>;
    /// Tag, id, classes, and child count of an element.
    fn describe(&self, element: ElementHandle) -> Option<ElementSummary>;
    /// Document title, if the page has one.
    fn title(&self) -> Option<String>;
}

/// The overlay element as mounted in the page.
#[derive(Debug, Clone, PartialEq)]
pub struct MountedOverlay {
    pub container: ElementHandle,
    pub view: OverlayView,
}

/// Mutation primitives and change subscription of a host page.
///
/// Every mutation must notify the page's [`ChangeFeed`], exactly as a
/// real DOM mutation observer would fire for the controller's own writes.
pub trait HostPage: PageTree {
    /// Feed that fires on every tree mutation.
    fn changes(&self) -> ChangeFeed;
    /// The overlay element (looked up by its stable id), if present.
    fn overlay(&self) -> Option<&MountedOverlay>;
    /// Remove the overlay element. Returns whether one was present.
    fn remove_overlay(&mut self) -> bool;
    /// Append the overlay element to `container`.
    fn mount_overlay(&mut self, container: ElementHandle, view: OverlayView);
    /// Swap the overlay's content in place. Returns `false` when there is
    /// no overlay to replace.
    fn replace_overlay(&mut self, view: OverlayView) -> bool;
    /// Give `container` relative positioning so the overlay can anchor to it.
    fn set_positioned(&mut self, container: ElementHandle);
    /// Whether a `<style>` element with this id exists.
    fn has_style(&self, id: &str) -> bool;
    /// Insert a `<style>` element.
    fn insert_style(&mut self, id: &str, css: &str);
    /// Remove a `<style>` element. Returns whether one was present.
    fn remove_style(&mut self, id: &str) -> bool;
}

/// A host page backed by a parsed HTML snapshot.
///
/// Host re-renders are modelled by [`HtmlPage::replace_document`]; the
/// overlay and injected styles live beside the snapshot so they survive a
/// re-render the way injected nodes survive in the real client.
pub struct HtmlPage {
    html: Html,
    overlay: Option<MountedOverlay>,
    styles: BTreeMap<String, String>,
    positioned: BTreeSet<ElementHandle>,
    feed: ChangeFeed,
    revision: u64,
}

impl HtmlPage {
    /// Parse a full document.
    pub fn parse(markup: &str) -> Self {
        Self {
            html: Html::parse_document(markup),
            overlay: None,
            styles: BTreeMap::new(),
            positioned: BTreeSet::new(),
            feed: ChangeFeed::new(),
            revision: 0,
        }
    }

    /// Host re-render: swap the document content and notify watchers.
    ///
    /// Element handles from the previous snapshot are not carried over.
    pub fn replace_document(&mut self, markup: &str) {
        self.html = Html::parse_document(markup);
        self.positioned.clear();
        self.bump();
    }

    /// Fire a mutation notification without changing anything, like an
    /// incidental host re-render of unrelated nodes.
    pub fn touch(&mut self) {
        self.bump();
    }

    /// Number of mutations seen so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether `container` was marked positioned for the overlay.
    pub fn is_positioned(&self, container: ElementHandle) -> bool {
        self.positioned.contains(&container)
    }

    /// Injected style ids.
    pub fn style_ids(&self) -> Vec<String> {
        self.styles.keys().cloned().collect()
    }

    fn bump(&mut self) {
        self.revision += 1;
        self.feed.notify();
    }

    fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> + '_ {
        self.html
            .root_element()
            .deref()
            .descendants()
            .filter_map(ElementRef::wrap)
    }

    fn element(&self, handle: ElementHandle) -> Option<ElementRef<'_>> {
        self.elements().nth(handle.0)
    }

    fn handle_of(&self, element: ElementRef<'_>) -> Option<ElementHandle> {
        let id = element.deref().id();
        self.elements()
            .position(|candidate| candidate.deref().id() == id)
            .map(ElementHandle)
    }
}

impl PageTree for HtmlPage {
    fn select_first(&self, selector: &Selector) -> Option<ElementHandle> {
        let found = self.html.select(selector).next()?;
        self.handle_of(found)
    }

    fn select_all(&self, selector: &Selector) -> Vec<ElementHandle> {
        self.html
            .select(selector)
            .filter_map(|el| self.handle_of(el))
            .collect()
    }

    fn attribute(&self, element: ElementHandle, name: &str) -> Option<String> {
        self.element(element)?
            .value()
            .attr(name)
            .map(|v| v.to_string())
    }

    fn closest(&self, element: ElementHandle, selector: &Selector) -> Option<ElementHandle> {
        let el = self.element(element)?;
        if selector.matches(&el) {
            return Some(element);
        }
        let ancestor = el
            .deref()
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|candidate| selector.matches(candidate))?;
        self.handle_of(ancestor)
    }

    fn parent(&self, element: ElementHandle) -> Option<ElementHandle> {
        let el = self.element(element)?;
        let parent = el.deref().parent().and_then(ElementRef::wrap)?;
        self.handle_of(parent)
    }

    fn children(&self, element: ElementHandle) -> Vec<ElementHandle> {
        let Some(el) = self.element(element) else {
            return Vec::new();
        };
        el.deref()
            .children()
            .filter_map(ElementRef::wrap)
            .filter_map(|child| self.handle_of(child))
            .collect()
    }

    fn describe(&self, element: ElementHandle) -> Option<ElementSummary> {
        let el = self.element(element)?;
        let value = el.value();
        Some(ElementSummary {
            handle: element,
            tag: value.name().to_string(),
            id: value.id().map(|id| id.to_string()),
            classes: value.classes().map(|c| c.to_string()).collect(),
            child_count: el.deref().children().filter_map(ElementRef::wrap).count(),
        })
    }

    fn title(&self) -> Option<String> {
        let selector = Selector::parse("title").ok()?;
        let title = self.html.select(&selector).next()?;
        Some(title.text().collect::<String>().trim().to_string())
    }
}

impl HostPage for HtmlPage {
    fn changes(&self) -> ChangeFeed {
        self.feed.clone()
    }

    fn overlay(&self) -> Option<&MountedOverlay> {
        self.overlay.as_ref()
    }

    fn remove_overlay(&mut self) -> bool {
        let removed = self.overlay.take().is_some();
        if removed {
            tracing::trace!("removed #{OVERLAY_ID}");
            self.bump();
        }
        removed
    }

    fn mount_overlay(&mut self, container: ElementHandle, view: OverlayView) {
        self.overlay = Some(MountedOverlay { container, view });
        self.bump();
    }

    fn replace_overlay(&mut self, view: OverlayView) -> bool {
        match self.overlay.as_mut() {
            Some(mounted) => {
                mounted.view = view;
                self.bump();
                true
            }
            None => false,
        }
    }

    fn set_positioned(&mut self, container: ElementHandle) {
        if self.positioned.insert(container) {
            self.bump();
        }
    }

    fn has_style(&self, id: &str) -> bool {
        self.styles.contains_key(id)
    }

    fn insert_style(&mut self, id: &str, css: &str) {
        self.styles.insert(id.to_string(), css.to_string());
        self.bump();
    }

    fn remove_style(&mut self, id: &str) -> bool {
        let removed = self.styles.remove(id).is_some();
        if removed {
            self.bump();
        }
        removed
    }
}
