//! Shared fixtures: a scripted lookup source, a write-counting store, and
//! library page markup.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use hltb_overlay::{
    CachePolicy, CacheStore, FetchCoordinator, HltbRecord, HltbSource, HtmlPage,
    InjectionController, KvStore, ManualClock, Markers, MemoryStore, OverlayError,
    OverlayResult, RetryPolicy, SubjectId,
};

pub const HOUR: Duration = Duration::from_secs(3600);

/// Starting wall clock for the cache, 2023-11-14.
pub const EPOCH_MS: i64 = 1_700_000_000_000;

// ─────────────────────── lookup source ───────────────────────

#[derive(Debug, Clone)]
pub enum Reply {
    Found(HltbRecord),
    NotFound,
    Fail,
}

/// Lookup source answering from a script. Ids without a script answer
/// not-found. A gated id blocks each lookup until the gate is opened.
#[derive(Default)]
pub struct ScriptedSource {
    replies: RefCell<HashMap<SubjectId, Reply>>,
    gates: RefCell<HashMap<SubjectId, Rc<Notify>>>,
    calls: RefCell<Vec<SubjectId>>,
}

impl ScriptedSource {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn respond(&self, id: SubjectId, reply: Reply) {
        self.replies.borrow_mut().insert(id, reply);
    }

    /// Hold lookups for `id` until [`ScriptedSource::open`] is called.
    pub fn gate(&self, id: SubjectId) {
        self.gates.borrow_mut().insert(id, Rc::new(Notify::new()));
    }

    /// Release one pending (or the next) lookup for `id`.
    pub fn open(&self, id: SubjectId) {
        if let Some(gate) = self.gates.borrow().get(&id) {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<SubjectId> {
        self.calls.borrow().clone()
    }
}

#[async_trait(?Send)]
impl HltbSource for ScriptedSource {
    async fn lookup(&self, id: SubjectId) -> OverlayResult<Option<HltbRecord>> {
        self.calls.borrow_mut().push(id);
        let gate = self.gates.borrow().get(&id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let reply = self.replies.borrow().get(&id).cloned();
        match reply {
            Some(Reply::Found(record)) => Ok(Some(record)),
            Some(Reply::Fail) => Err(OverlayError::Backend("scripted failure".to_string())),
            Some(Reply::NotFound) | None => Ok(None),
        }
    }
}

// ─────────────────────── storage ───────────────────────

/// Memory store that counts writes.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    writes: Cell<usize>,
}

impl CountingStore {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

impl KvStore for CountingStore {
    fn get(&self, key: &str) -> OverlayResult<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> OverlayResult<()> {
        self.writes.set(self.writes.get() + 1);
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> OverlayResult<()> {
        self.inner.remove(key)
    }
}

// ─────────────────────── records and pages ───────────────────────

pub fn record(game_id: u64, main_hours: u64) -> HltbRecord {
    HltbRecord::new(
        game_id,
        format!("Game {game_id}"),
        main_hours * 3600,
        main_hours * 5400,
        main_hours * 7200,
        main_hours * 4000,
    )
}

/// Game page with the header logo inside the header container.
pub fn game_page(app: SubjectId) -> String {
    format!(
        r#"<html><head><title>Steam</title></head><body>
          <div class="library">
            <div class="NZMJ6g2iVnFsOOp-lDmIP">
              <div class="logo-wrap">
                <img class="_3NBxSLAZLbbbnul8KfDFjw _2dzwXkCVAuZGFC-qKgo8XB"
                     src="https://steamloopback.host/assets/{app}/logo.png?c=1">
              </div>
            </div>
          </div>
        </body></html>"#
    )
}

/// Game page without a logo, only the hero image.
pub fn hero_page(app: SubjectId) -> String {
    format!(
        r#"<html><body>
          <div class="NZMJ6g2iVnFsOOp-lDmIP">
            <img class="HNbe3eZf6H7dtJ042x1vM" src="/assets/{app}/library_hero.jpg">
          </div>
        </body></html>"#
    )
}

/// Library home: no game page.
pub fn library_home() -> String {
    r#"<html><body><div class="library-home"><img src="/assets/10/capsule.jpg"></div></body></html>"#
        .to_string()
}

pub fn page(markup: &str) -> Rc<RefCell<HtmlPage>> {
    Rc::new(RefCell::new(HtmlPage::parse(markup)))
}

// ─────────────────────── wiring ───────────────────────

pub struct Harness {
    pub controller: InjectionController<HtmlPage, ScriptedSource>,
    pub source: Rc<ScriptedSource>,
    pub cache: Rc<CacheStore>,
    pub clock: Rc<ManualClock>,
}

pub fn harness() -> Harness {
    let clock = Rc::new(ManualClock::new(EPOCH_MS));
    let cache = Rc::new(CacheStore::with_policy(
        MemoryStore::new(),
        CachePolicy::default(),
        clock.clone(),
    ));
    let source = ScriptedSource::new();
    let coordinator = FetchCoordinator::new(cache.clone(), source.clone());
    let controller = InjectionController::new(
        coordinator,
        Markers::library().unwrap(),
        RetryPolicy::default(),
    );
    Harness {
        controller,
        source,
        cache,
        clock,
    }
}

/// Let every ready local task run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
