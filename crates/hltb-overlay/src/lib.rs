//! HLTB overlay: HowLongToBeat completion times on Steam library game pages,
//! with a stale-while-revalidate cache and a re-entrancy-safe injection loop.

pub mod cache;
pub mod controller;
pub mod coordinator;
pub mod detector;
pub mod diagnostics;
pub mod display;
pub mod page;
pub mod source;
pub mod storage;
pub mod types;

pub use cache::{CachePolicy, CacheStats, CacheStore, CachedEntry, Clock, ManualClock, SystemClock, CACHE_KEY};
pub use controller::{InjectionController, InjectionState, RetryPolicy, SessionSnapshot};
pub use coordinator::{FetchCoordinator, FetchResult, RefreshTask};
pub use detector::{detect, Markers};
pub use diagnostics::DebugTools;
pub use display::{format_time, OverlayView};
pub use page::{ChangeFeed, ChangeWatcher, HostPage, HtmlPage, PageTree};
pub use source::{HltbClient, HltbSource};
pub use storage::{FileStore, KvStore, MemoryStore};
pub use types::*;
