//! The injection control loop.
//!
//! [`InjectionController`] watches a [`HostPage`] for mutations, re-runs
//! detection on every one, and keeps a single overlay in sync with whichever
//! game the page currently shows. Two ids drive it:
//!
//! * `current`: the game the overlay should reflect, set on every accepted
//!   injection.
//! * `processing`: the game whose resolution is in flight. The controller's
//!   own DOM writes fire the change feed too; this guard turns those echoes
//!   into no-ops.
//!
//! Everything runs on one thread inside a [`tokio::task::LocalSet`]. Session
//! state lives in a `RefCell` and is never borrowed across an `.await`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::coordinator::{FetchCoordinator, RefreshTask};
use crate::detector::{detect, Markers};
use crate::display::{OverlayView, STYLES, STYLE_ID};
use crate::page::{ChangeWatcher, HostPage};
use crate::source::HltbSource;
use crate::types::{HltbRecord, SubjectId};

/// Bounded detection retry used right after attaching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            delay: Duration::from_millis(250),
        }
    }
}

/// Where the controller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum InjectionState {
    /// Not attached, or attached with no game page found.
    Idle,
    /// Initial retry loop is running.
    Detecting,
    /// Loading placeholder mounted.
    Placeholder,
    /// Waiting on the fetch coordinator.
    Resolving,
    Rendered,
    /// Rendered from a stale entry while a refresh runs.
    RenderedStale,
    /// Resolution failed; the placeholder stays.
    ErrorPlaceholder,
}

/// Read-only copy of the session for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SessionSnapshot {
    pub attached: bool,
    pub current: Option<SubjectId>,
    pub processing: Option<SubjectId>,
    pub state: InjectionState,
}

struct Session<P> {
    page: Option<Rc<RefCell<P>>>,
    current: Option<SubjectId>,
    processing: Option<SubjectId>,
    watcher: Option<JoinHandle<()>>,
    state: InjectionState,
    /// Bumped on every detach so tasks from an old attachment can tell.
    epoch: u64,
}

impl<P> Session<P> {
    fn new() -> Self {
        Self {
            page: None,
            current: None,
            processing: None,
            watcher: None,
            state: InjectionState::Idle,
            epoch: 0,
        }
    }
}

struct Inner<P, S: ?Sized> {
    coordinator: FetchCoordinator<S>,
    markers: Markers,
    retry: RetryPolicy,
    session: RefCell<Session<P>>,
}

impl<P, S: ?Sized> Drop for Inner<P, S> {
    fn drop(&mut self) {
        if let Some(watcher) = self.session.get_mut().watcher.take() {
            watcher.abort();
        }
    }
}

/// Keeps the overlay on a host page in sync with the game it shows.
pub struct InjectionController<P, S: ?Sized> {
    inner: Rc<Inner<P, S>>,
}

impl<P, S: ?Sized> Clone for InjectionController<P, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P, S> InjectionController<P, S>
where
    P: HostPage + 'static,
    S: HltbSource + ?Sized + 'static,
{
    pub fn new(coordinator: FetchCoordinator<S>, markers: Markers, retry: RetryPolicy) -> Self {
        Self {
            inner: Rc::new(Inner {
                coordinator,
                markers,
                retry,
                session: RefCell::new(Session::new()),
            }),
        }
    }

    pub fn coordinator(&self) -> &FetchCoordinator<S> {
        &self.inner.coordinator
    }

    pub fn markers(&self) -> &Markers {
        &self.inner.markers
    }

    /// Attach to a page, replacing any previous attachment.
    ///
    /// Injects the style block, starts watching for mutations, then polls
    /// for a game page under the retry policy. Returns whether one was found
    /// before the retries ran out. Not finding one is not an error: the
    /// watcher keeps running and picks the game up when the host renders it.
    ///
    /// Must run inside a [`tokio::task::LocalSet`].
    pub async fn attach(&self, page: Rc<RefCell<P>>) -> bool {
        self.detach();

        let feed = {
            let mut host = page.borrow_mut();
            if !host.has_style(STYLE_ID) {
                host.insert_style(STYLE_ID, STYLES);
            }
            host.changes()
        };
        let watcher = feed.subscribe();

        let epoch = {
            let mut session = self.inner.session.borrow_mut();
            session.page = Some(Rc::clone(&page));
            session.state = InjectionState::Detecting;
            session.epoch
        };
        let handle = tokio::task::spawn_local(watch(Rc::downgrade(&self.inner), watcher, epoch));
        self.inner.session.borrow_mut().watcher = Some(handle);
        tracing::info!("Change watcher attached");

        let RetryPolicy { attempts, delay } = self.inner.retry;
        for attempt in 1..=attempts {
            if !self.inner.is_epoch(epoch) {
                return false;
            }
            let found = detect(&*page.borrow(), &self.inner.markers).is_some();
            if found {
                tracing::debug!("Game page found on attempt {attempt} of {attempts}");
                Inner::handle_change(&self.inner, epoch);
                return true;
            }
            tokio::time::sleep(delay).await;
        }

        tracing::debug!("No game page found after {attempts} attempts");
        let mut session = self.inner.session.borrow_mut();
        if session.epoch == epoch && session.state == InjectionState::Detecting {
            session.state = InjectionState::Idle;
        }
        false
    }

    /// Stop watching, remove the overlay and styles, and reset the session.
    ///
    /// In-flight resolutions finish on their own but no longer touch the
    /// page or the session.
    pub fn detach(&self) {
        let (page, watcher) = {
            let mut session = self.inner.session.borrow_mut();
            session.epoch += 1;
            session.current = None;
            session.processing = None;
            session.state = InjectionState::Idle;
            (session.page.take(), session.watcher.take())
        };

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        if let Some(page) = page {
            let mut host = page.borrow_mut();
            host.remove_overlay();
            host.remove_style(STYLE_ID);
            tracing::info!("Detached from page");
        }
    }

    pub fn session(&self) -> SessionSnapshot {
        let session = self.inner.session.borrow();
        SessionSnapshot {
            attached: session.page.is_some(),
            current: session.current,
            processing: session.processing,
            state: session.state,
        }
    }
}

async fn watch<P, S>(inner: Weak<Inner<P, S>>, mut watcher: ChangeWatcher, epoch: u64)
where
    P: HostPage + 'static,
    S: HltbSource + ?Sized + 'static,
{
    while watcher.changed().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        Inner::handle_change(&inner, epoch);
    }
    tracing::debug!("Change watcher stopped");
}

impl<P, S> Inner<P, S>
where
    P: HostPage + 'static,
    S: HltbSource + ?Sized + 'static,
{
    fn is_epoch(&self, epoch: u64) -> bool {
        self.session.borrow().epoch == epoch
    }

    fn is_current(&self, epoch: u64, id: SubjectId) -> bool {
        let session = self.session.borrow();
        session.epoch == epoch && session.current == Some(id)
    }

    fn set_state(&self, epoch: u64, state: InjectionState) {
        let mut session = self.session.borrow_mut();
        if session.epoch == epoch {
            session.state = state;
        }
    }

    /// One pass of the control loop: detect, apply the guards, and start an
    /// injection if the page shows a game the overlay does not reflect.
    fn handle_change(this: &Rc<Self>, epoch: u64) {
        let page = {
            let session = this.session.borrow();
            if session.epoch != epoch {
                return;
            }
            match &session.page {
                Some(page) => Rc::clone(page),
                None => return,
            }
        };

        let Some(game) = detect(&*page.borrow(), &this.markers) else {
            return;
        };
        let id = game.subject_id;

        {
            let mut session = this.session.borrow_mut();
            if session.processing == Some(id) {
                return;
            }
            if session.current == Some(id) && page.borrow().overlay().is_some() {
                return;
            }
            session.processing = Some(id);
            session.current = Some(id);
            session.state = InjectionState::Placeholder;
        }
        tracing::info!("Found game page for app {id}");

        {
            let mut host = page.borrow_mut();
            host.remove_overlay();
            host.set_positioned(game.container);
            host.mount_overlay(game.container, OverlayView::Loading);
        }

        tokio::task::spawn_local(Self::inject(Rc::clone(this), page, id, epoch));
    }

    async fn inject(self: Rc<Self>, page: Rc<RefCell<P>>, id: SubjectId, epoch: u64) {
        self.set_state(epoch, InjectionState::Resolving);
        let result = self.coordinator.resolve(id).await;

        if !self.is_epoch(epoch) {
            tracing::debug!("Resolution for {id} finished after detach, discarding");
            return;
        }

        match result {
            Ok(result) => {
                let current = self.session.borrow().current;
                match current {
                    Some(now) if now != id => {
                        tracing::debug!("Game changed during fetch, updating display for {now}");
                        let cached = self
                            .coordinator
                            .cache()
                            .get(now)
                            .and_then(|hit| hit.entry.record().cloned());
                        if render(&page, cached.as_ref()) {
                            self.set_state(epoch, InjectionState::Rendered);
                        }
                    }
                    _ => {
                        let rendered = render(&page, result.data.as_ref());
                        if rendered {
                            tracing::debug!("Display updated for app {id}");
                        }
                        let state = match (rendered, result.refresh.is_some()) {
                            (true, true) => InjectionState::RenderedStale,
                            (true, false) => InjectionState::Rendered,
                            (false, _) => InjectionState::Placeholder,
                        };
                        self.set_state(epoch, state);

                        if let Some(refresh) = result.refresh {
                            tokio::task::spawn_local(Self::follow_refresh(
                                Rc::clone(&self),
                                Rc::clone(&page),
                                refresh,
                                id,
                                epoch,
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Error fetching HLTB data for {id}: {e}");
                if self.is_current(epoch, id) {
                    self.set_state(epoch, InjectionState::ErrorPlaceholder);
                }
            }
        }

        let mut session = self.session.borrow_mut();
        if session.epoch == epoch && session.processing == Some(id) {
            session.processing = None;
        }
    }

    async fn follow_refresh(
        self: Rc<Self>,
        page: Rc<RefCell<P>>,
        refresh: RefreshTask,
        id: SubjectId,
        epoch: u64,
    ) {
        let fresh = match refresh.await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!("Refresh task for {id} did not complete: {e}");
                None
            }
        };
        let Some(fresh) = fresh else {
            return;
        };
        if !self.is_current(epoch, id) {
            tracing::debug!("Refreshed {id} but the page moved on");
            return;
        }
        if render(&page, Some(&fresh)) {
            tracing::debug!("Display refreshed for app {id}");
            self.set_state(epoch, InjectionState::Rendered);
        }
    }
}

/// Swap the mounted overlay for a populated view. Only records with at
/// least one positive duration are shown.
fn render<P: HostPage>(page: &Rc<RefCell<P>>, record: Option<&HltbRecord>) -> bool {
    match record {
        Some(record) if record.has_times() => page
            .borrow_mut()
            .replace_overlay(OverlayView::Populated(record.clone())),
        _ => false,
    }
}
