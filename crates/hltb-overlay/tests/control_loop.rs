//! Injection control loop against an HTML page snapshot.
//!
//! Covers rendering, the re-entrancy guard, navigation races, background
//! refresh, failures, the initial retry loop, and detach.

mod common;

use std::time::Duration;

use tokio::task::LocalSet;

use hltb_overlay::display::STYLE_ID;
use hltb_overlay::{HostPage, InjectionState, OverlayView};

use common::*;

fn overlay_view(page: &std::cell::RefCell<hltb_overlay::HtmlPage>) -> Option<OverlayView> {
    page.borrow().overlay().map(|mounted| mounted.view.clone())
}

// ─────────────────────── render flow ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_placeholder_then_populated() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let rec = record(7231, 8);
            h.source.respond(620, Reply::Found(rec.clone()));
            let page = page(&game_page(620));

            assert!(h.controller.attach(page.clone()).await);
            assert_eq!(overlay_view(&page), Some(OverlayView::Loading));
            let session = h.controller.session();
            assert!(session.attached);
            assert_eq!(session.current, Some(620));
            assert_eq!(session.processing, Some(620));

            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(rec)));
            let session = h.controller.session();
            assert_eq!(session.state, InjectionState::Rendered);
            assert_eq!(session.processing, None);
            assert_eq!(h.source.calls(), vec![620]);
            assert!(h.cache.get(620).is_some());

            // The overlay is anchored to the positioned header container.
            let container = page.borrow().overlay().unwrap().container;
            assert!(page.borrow().is_positioned(container));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_hero_image_page_is_detected() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            h.source.respond(570, Reply::Found(record(570, 2)));
            let page = page(&hero_page(570));

            assert!(h.controller.attach(page.clone()).await);
            settle().await;
            assert!(overlay_view(&page).unwrap().is_populated());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_not_found_leaves_placeholder_and_is_cached() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            h.source.respond(99, Reply::NotFound);
            let page = page(&game_page(99));

            h.controller.attach(page.clone()).await;
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Loading));
            assert_eq!(h.controller.session().state, InjectionState::Placeholder);
            assert!(h.cache.get(99).unwrap().entry.not_found);

            // A later attachment is served from the negative entry.
            h.controller.attach(page.clone()).await;
            settle().await;
            assert_eq!(h.source.calls(), vec![99]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_record_without_times_is_not_rendered() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            h.source.respond(
                7,
                Reply::Found(hltb_overlay::HltbRecord::new(70, "Empty", 0, 0, 0, 0)),
            );
            let page = page(&game_page(7));

            h.controller.attach(page.clone()).await;
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Loading));
        })
        .await;
}

// ─────────────────────── re-entrancy ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_mutations_during_resolution_do_not_refetch() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            h.source.respond(620, Reply::Found(record(1, 8)));
            h.source.gate(620);
            let page = page(&game_page(620));

            h.controller.attach(page.clone()).await;
            for _ in 0..5 {
                page.borrow_mut().touch();
                settle().await;
            }
            assert_eq!(h.source.calls(), vec![620]);
            assert_eq!(h.controller.session().processing, Some(620));

            h.source.open(620);
            settle().await;
            assert!(overlay_view(&page).unwrap().is_populated());
            assert_eq!(h.controller.session().processing, None);

            // Echoes of the render itself and later unrelated mutations are
            // no-ops while the overlay shows the current game.
            page.borrow_mut().touch();
            page.borrow_mut().replace_document(&game_page(620));
            settle().await;
            assert_eq!(h.source.calls(), vec![620]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_page_without_game_is_ignored() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            h.source.respond(620, Reply::Found(record(1, 8)));
            let page = page(&game_page(620));
            h.controller.attach(page.clone()).await;
            settle().await;

            page.borrow_mut().replace_document(&library_home());
            settle().await;
            let session = h.controller.session();
            assert_eq!(session.current, Some(620));
            assert_eq!(session.state, InjectionState::Rendered);
            assert_eq!(h.source.calls(), vec![620]);
        })
        .await;
}

// ─────────────────────── navigation races ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_switch_mid_fetch_older_completes_first() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let (a, b) = (record(1, 10), record(2, 20));
            h.source.respond(100, Reply::Found(a));
            h.source.respond(200, Reply::Found(b.clone()));
            h.source.gate(100);
            h.source.gate(200);
            let page = page(&game_page(100));

            h.controller.attach(page.clone()).await;
            settle().await;
            page.borrow_mut().replace_document(&game_page(200));
            settle().await;
            assert_eq!(h.source.calls(), vec![100, 200]);
            assert_eq!(h.controller.session().current, Some(200));

            // A finishes first: the redirect finds nothing cached for B yet.
            h.source.open(100);
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Loading));
            assert_eq!(h.controller.session().processing, Some(200));

            h.source.open(200);
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(b)));
            assert!(h.cache.get(100).is_some());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_switch_mid_fetch_newer_completes_first() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let (a, b) = (record(1, 10), record(2, 20));
            h.source.respond(100, Reply::Found(a));
            h.source.respond(200, Reply::Found(b.clone()));
            h.source.gate(100);
            let page = page(&game_page(100));

            h.controller.attach(page.clone()).await;
            settle().await;
            page.borrow_mut().replace_document(&game_page(200));
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(b.clone())));

            // A's late completion redirects to B's cached data.
            h.source.open(100);
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(b)));
            assert_eq!(h.controller.session().current, Some(200));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_returning_to_fresh_game_uses_cache() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let (a, b) = (record(1, 10), record(2, 20));
            h.source.respond(100, Reply::Found(a.clone()));
            h.source.respond(200, Reply::Found(b.clone()));
            let page = page(&game_page(100));

            h.controller.attach(page.clone()).await;
            settle().await;
            page.borrow_mut().replace_document(&game_page(200));
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(b)));

            // Back to A within the fresh window: rendered from the cache.
            h.clock.advance(HOUR);
            page.borrow_mut().replace_document(&game_page(100));
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(a.clone())));
            let session = h.controller.session();
            assert_eq!(session.current, Some(100));
            assert_eq!(session.state, InjectionState::Rendered);

            // Further re-renders of A leave the overlay alone.
            page.borrow_mut().touch();
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(a)));
            assert_eq!(h.source.calls(), vec![100, 200]);
        })
        .await;
}

// ─────────────────────── stale-while-revalidate ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_stale_entry_renders_then_refreshes() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let (old, new) = (record(1, 8), record(1, 9));
            h.cache.set(620, Some(old.clone()));
            h.clock.advance(13 * HOUR);
            h.source.respond(620, Reply::Found(new.clone()));
            h.source.gate(620);
            let page = page(&game_page(620));

            h.controller.attach(page.clone()).await;
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(old)));
            assert_eq!(h.controller.session().state, InjectionState::RenderedStale);
            assert_eq!(h.controller.session().processing, None);

            h.source.open(620);
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(new)));
            assert_eq!(h.controller.session().state, InjectionState::Rendered);
            assert!(!h.cache.get(620).unwrap().is_stale);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_after_navigation_is_cached_not_rendered() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let (old_a, new_a, b) = (record(1, 8), record(1, 9), record(2, 20));
            h.cache.set(100, Some(old_a));
            h.clock.advance(13 * HOUR);
            h.source.respond(100, Reply::Found(new_a.clone()));
            h.source.respond(200, Reply::Found(b.clone()));
            h.source.gate(100);
            let page = page(&game_page(100));

            h.controller.attach(page.clone()).await;
            settle().await;
            page.borrow_mut().replace_document(&game_page(200));
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(b.clone())));

            h.source.open(100);
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Populated(b)));
            let hit = h.cache.get(100).unwrap();
            assert!(!hit.is_stale);
            assert_eq!(hit.entry.record(), Some(&new_a));
        })
        .await;
}

// ─────────────────────── failures ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_failure_keeps_placeholder_and_releases_guard() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            h.source.respond(5, Reply::Fail);
            let page = page(&game_page(5));

            h.controller.attach(page.clone()).await;
            settle().await;
            assert_eq!(overlay_view(&page), Some(OverlayView::Loading));
            let session = h.controller.session();
            assert_eq!(session.state, InjectionState::ErrorPlaceholder);
            assert_eq!(session.processing, None);
            assert!(h.cache.get(5).is_none());

            // With the guard released, navigating to another game works.
            h.source.respond(6, Reply::Found(record(6, 3)));
            page.borrow_mut().replace_document(&game_page(6));
            settle().await;
            assert!(overlay_view(&page).unwrap().is_populated());
        })
        .await;
}

// ─────────────────────── attach / detach ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_twenty_attempts() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            let page = page(&library_home());

            let start = tokio::time::Instant::now();
            assert!(!h.controller.attach(page.clone()).await);
            let waited = start.elapsed();
            assert!(waited >= Duration::from_millis(5000));
            assert!(waited < Duration::from_millis(5100));
            assert_eq!(h.controller.session().state, InjectionState::Idle);
            assert!(overlay_view(&page).is_none());
            assert!(h.source.calls().is_empty());

            // The watcher outlives the retry loop.
            h.source.respond(620, Reply::Found(record(1, 8)));
            page.borrow_mut().replace_document(&game_page(620));
            settle().await;
            assert!(overlay_view(&page).unwrap().is_populated());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_picks_up_late_render() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            h.source.respond(620, Reply::Found(record(1, 8)));
            let page = page(&library_home());

            let controller = h.controller.clone();
            let attached = tokio::task::spawn_local({
                let page = page.clone();
                async move { controller.attach(page).await }
            });
            tokio::time::sleep(Duration::from_millis(600)).await;
            assert_eq!(h.controller.session().state, InjectionState::Detecting);

            page.borrow_mut().replace_document(&game_page(620));
            assert!(attached.await.unwrap());
            settle().await;
            assert!(overlay_view(&page).unwrap().is_populated());
            assert_eq!(h.source.calls(), vec![620]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_styles_injected_once() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            h.source.respond(620, Reply::Found(record(1, 8)));
            let page = page(&game_page(620));

            h.controller.attach(page.clone()).await;
            h.controller.attach(page.clone()).await;
            settle().await;
            assert_eq!(page.borrow().style_ids(), vec![STYLE_ID.to_string()]);
            assert_eq!(page.borrow().changes().watcher_count(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_detach_cleans_up() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            h.source.respond(620, Reply::Found(record(1, 8)));
            let page = page(&game_page(620));

            h.controller.attach(page.clone()).await;
            settle().await;
            h.controller.detach();
            settle().await;

            assert!(overlay_view(&page).is_none());
            assert!(!page.borrow().has_style(STYLE_ID));
            let session = h.controller.session();
            assert!(!session.attached);
            assert_eq!(session.current, None);
            assert_eq!(session.state, InjectionState::Idle);
            assert_eq!(page.borrow().changes().watcher_count(), 0);

            page.borrow_mut().replace_document(&game_page(621));
            settle().await;
            assert_eq!(h.source.calls(), vec![620]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_resolution_finishing_after_detach_is_discarded() {
    LocalSet::new()
        .run_until(async {
            let h = harness();
            h.source.respond(620, Reply::Found(record(1, 8)));
            h.source.gate(620);
            let page = page(&game_page(620));

            h.controller.attach(page.clone()).await;
            settle().await;
            h.controller.detach();

            h.source.open(620);
            settle().await;
            assert!(overlay_view(&page).is_none());
            assert_eq!(h.controller.session().state, InjectionState::Idle);
            // The lookup outcome is still worth keeping.
            assert!(h.cache.get(620).is_some());
        })
        .await;
}
