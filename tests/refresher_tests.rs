//! Poll-cycle tests against the stub dashboard: status gating, patching,
//! scroll preservation, failure handling and the single-slot gate.

mod common;

use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use live_view_refresher::{LiveViewRefresher, PollOutcome, RefreshError, RefreshEvent, RefreshMode};
use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

async fn loaded(server: &StubServer) -> LiveViewRefresher {
    let r = LiveViewRefresher::builder(server.config()).build().unwrap();
    r.load().await.unwrap();
    r
}

fn page_with(last_id: u64, n: usize) -> String {
    let msgs = numbered(n);
    session_page(last_id, &as_refs(&msgs), HUMAN_LABEL)
}

// -- status gating -----------------------------------------------------------

#[tokio::test]
async fn test_same_latest_id_does_not_fetch_page() {
    let server = StubServer::start(StubState {
        page: page_with(10, 3),
        latest_id: 10,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;
    assert_eq!(server.hits("GET", PAGE_PATH), 1);

    let outcome = r.poll_once().await.unwrap();
    assert_eq!(outcome, PollOutcome::UpToDate { latest_id: 10 });
    assert_eq!(server.hits("GET", STATUS_PATH), 1);
    assert_eq!(server.hits("GET", PAGE_PATH), 1, "no page fetch for a no-op poll");
    assert_eq!(r.view().last_seen(), 10);
}

#[tokio::test]
async fn test_older_latest_id_does_not_fetch_page() {
    let server = StubServer::start(StubState {
        page: page_with(10, 3),
        latest_id: 7,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;
    assert_eq!(r.poll_once().await.unwrap(), PollOutcome::UpToDate { latest_id: 7 });
    assert_eq!(server.hits("GET", PAGE_PATH), 1);
    assert_eq!(r.view().last_seen(), 10);
}

#[tokio::test]
async fn test_newer_latest_id_patches_and_advances() {
    let server = StubServer::start(StubState {
        page: page_with(10, 2),
        latest_id: 10,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;

    server.update(|s| {
        s.latest_id = 11;
        s.page = page_with(11, 3);
    });
    let outcome = r.poll_once().await.unwrap();

    match outcome {
        PollOutcome::Patched {
            latest_id,
            new_messages,
        } => {
            assert_eq!(latest_id, 11);
            assert_eq!(new_messages.len(), 1);
            assert_eq!(new_messages[0].text, "message 3");
        }
        other => panic!("expected Patched, got {other:?}"),
    }
    assert_eq!(server.hits("GET", PAGE_PATH), 2);
    assert_eq!(r.view().last_seen(), 11);
    assert_eq!(r.view().message_count(), 3);
}

#[tokio::test]
async fn test_last_seen_tracks_max_patched_id() {
    let server = StubServer::start(StubState {
        page: page_with(0, 0),
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;

    for (latest, expected) in [(0, 0), (3, 3), (3, 3), (5, 5), (5, 5), (9, 9)] {
        server.update(|s| {
            s.latest_id = latest;
            s.page = page_with(latest, latest as usize);
        });
        r.poll_once().await.unwrap();
        assert_eq!(r.view().last_seen(), expected, "after snapshot {latest}");
    }
    // One initial load plus one fetch per strictly newer snapshot.
    assert_eq!(server.hits("GET", PAGE_PATH), 1 + 3);
}

#[tokio::test]
async fn test_no_session_id_skips_status_request() {
    let server = StubServer::start(StubState {
        page: "<html><body><p>no session here</p></body></html>".into(),
        latest_id: 99,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;
    assert_eq!(r.poll_once().await.unwrap(), PollOutcome::NoSession);
    assert_eq!(server.hits("GET", STATUS_PATH), 0);
}

// -- patching ----------------------------------------------------------------

#[tokio::test]
async fn test_missing_log_area_leaves_view_untouched() {
    let server = StubServer::start(StubState {
        page: page_with(10, 2),
        latest_id: 10,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;

    server.update(|s| {
        s.latest_id = 12;
        s.page = "<html><body>maintenance</body></html>".into();
    });
    assert_eq!(r.poll_once().await.unwrap(), PollOutcome::PageChanged);
    assert_eq!(r.view().last_seen(), 10);
    assert_eq!(r.view().message_count(), 2);
}

// -- scroll preservation -----------------------------------------------------

#[tokio::test]
async fn test_new_message_pins_to_bottom() {
    let server = StubServer::start(StubState {
        page: page_with(10, 10),
        latest_id: 10,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;
    // 10 rows * 50px = 500px of content in a 100px pane; read from the top.
    r.with_view_mut(|v| v.scroll_to(0.0));

    server.update(|s| {
        s.latest_id = 11;
        s.page = page_with(11, 11);
    });
    r.poll_once().await.unwrap();

    let view = r.view();
    let vp = view.viewport().unwrap();
    assert_eq!(vp.scroll_height(), 550.0);
    assert_eq!(vp.scroll_top(), vp.max_scroll_top());
    assert_eq!(vp.scroll_top(), 450.0);
}

#[tokio::test]
async fn test_history_reader_keeps_position() {
    let server = StubServer::start(StubState {
        page: page_with(10, 10),
        latest_id: 10,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;
    r.with_view_mut(|v| v.scroll_to(150.0));

    // Same messages, newer id (e.g. an edited row): count unchanged.
    server.update(|s| {
        s.latest_id = 11;
        s.page = page_with(11, 10);
    });
    r.poll_once().await.unwrap();

    assert_eq!(r.view().viewport().unwrap().scroll_top(), 150.0);
}

#[tokio::test]
async fn test_reader_at_bottom_stays_pinned() {
    let server = StubServer::start(StubState {
        page: page_with(10, 10),
        latest_id: 10,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;
    // 395 + 100 >= 500 - 10: within the threshold counts as bottom.
    r.with_view_mut(|v| v.scroll_to(395.0));

    server.update(|s| {
        s.latest_id = 11;
        s.page = page_with(11, 10);
    });
    r.poll_once().await.unwrap();

    let view = r.view();
    let vp = view.viewport().unwrap();
    assert_eq!(vp.scroll_top(), vp.max_scroll_top());
}

// -- failures ----------------------------------------------------------------

#[tokio::test]
async fn test_status_error_is_reported_and_loop_continues() {
    let server = StubServer::start(StubState {
        page: page_with(10, 1),
        latest_id: 11,
        status_code: 500,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;

    let err = r.poll_once().await.unwrap_err();
    assert!(matches!(err, RefreshError::Http { status: 500, .. }), "got {err:?}");
    assert!(!r.poll_in_flight(), "gate must be released after a failure");

    assert_eq!(r.run_cycle().await, None);
    assert_eq!(r.consecutive_failures(), 1);

    server.update(|s| {
        s.status_code = 200;
        s.page = page_with(11, 2);
    });
    assert!(matches!(r.run_cycle().await, Some(PollOutcome::Patched { .. })));
    assert_eq!(r.consecutive_failures(), 0);
}

/// Records the level of every warn-or-worse event the crate emits.
#[derive(Clone, Default)]
struct FailureLevels(Arc<Mutex<Vec<Level>>>);

impl FailureLevels {
    fn take(&self) -> Vec<Level> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl<S: tracing::Subscriber> Layer<S> for FailureLevels {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with("live_view_refresher") && *meta.level() <= Level::WARN {
            self.0.lock().unwrap().push(*meta.level());
        }
    }
}

#[tokio::test]
async fn test_repeated_failures_escalate_to_error_and_reset() {
    let levels = FailureLevels::default();
    let subscriber = tracing_subscriber::registry().with(levels.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let server = StubServer::start(StubState {
        page: page_with(10, 1),
        latest_id: 11,
        status_code: 503,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;

    for expected in 1..=5 {
        assert_eq!(r.run_cycle().await, None);
        assert_eq!(r.consecutive_failures(), expected);
    }
    assert_eq!(
        levels.take(),
        vec![Level::WARN, Level::WARN, Level::WARN, Level::WARN, Level::ERROR]
    );

    assert_eq!(r.run_cycle().await, None);
    assert_eq!(r.consecutive_failures(), 6);
    assert_eq!(levels.take(), vec![Level::ERROR]);

    server.update(|s| {
        s.status_code = 200;
        s.page = page_with(11, 2);
    });
    assert!(matches!(r.run_cycle().await, Some(PollOutcome::Patched { .. })));
    assert_eq!(r.consecutive_failures(), 0);

    server.update(|s| {
        s.status_code = 503;
        s.latest_id = 12;
    });
    assert_eq!(r.run_cycle().await, None);
    assert_eq!(r.consecutive_failures(), 1);
    assert_eq!(levels.take(), vec![Level::WARN]);
}

#[tokio::test]
async fn test_unreachable_server_is_connect_error() {
    let r = LiveViewRefresher::builder(live_view_refresher::RefresherConfig {
        base_url: "http://127.0.0.1:9".into(),
        request_timeout_ms: 500,
        connect_timeout_ms: 500,
        ..Default::default()
    })
    .build()
    .unwrap();
    let err = r.load().await.unwrap_err();
    assert!(matches!(err, RefreshError::Connect { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_page_fetch_error_keeps_last_seen() {
    let server = StubServer::start(StubState {
        page: page_with(10, 1),
        latest_id: 10,
        ..Default::default()
    })
    .await;
    let r = loaded(&server).await;
    server.update(|s| {
        s.latest_id = 11;
        s.page_status = 500;
    });
    assert!(r.poll_once().await.is_err());
    assert_eq!(r.view().last_seen(), 10);
}

// -- single-slot gate --------------------------------------------------------

#[tokio::test]
async fn test_overlapping_tick_is_skipped() {
    let server = StubServer::start(StubState {
        page: page_with(10, 1),
        latest_id: 11,
        status_delay: Duration::from_millis(300),
        ..Default::default()
    })
    .await;
    let r = Rc::new(loaded(&server).await);
    server.update(|s| s.page = page_with(11, 2));

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let slow = {
                let r = Rc::clone(&r);
                tokio::task::spawn_local(async move { r.poll_once().await })
            };
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(r.poll_in_flight());
            assert_eq!(r.poll_once().await.unwrap(), PollOutcome::Busy);

            let first = slow.await.unwrap().unwrap();
            assert!(matches!(first, PollOutcome::Patched { latest_id: 11, .. }));
        })
        .await;

    assert_eq!(server.hits("GET", STATUS_PATH), 1);
    assert_eq!(r.view().last_seen(), 11);
}

// -- run loop ----------------------------------------------------------------

#[tokio::test]
async fn test_run_loop_emits_patch_events() {
    let server = StubServer::start(StubState {
        page: page_with(1, 1),
        latest_id: 1,
        ..Default::default()
    })
    .await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let r = Rc::new(
        LiveViewRefresher::builder(server.config())
            .events(tx)
            .build()
            .unwrap(),
    );
    r.load().await.unwrap();
    assert!(matches!(rx.recv().await, Some(RefreshEvent::Reloaded { .. })));

    server.update(|s| {
        s.latest_id = 2;
        s.page = page_with(2, 2);
    });

    let local = tokio::task::LocalSet::new();
    let event = local
        .run_until(async {
            let runner = tokio::task::spawn_local(Rc::clone(&r).run());
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
            runner.abort();
            event
        })
        .await
        .expect("patch event within timeout")
        .expect("channel open");

    match event {
        RefreshEvent::Patched {
            latest_id,
            new_messages,
        } => {
            assert_eq!(latest_id, 2);
            assert_eq!(new_messages[0].text, "message 2");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

fn sessions_page(active: u32) -> String {
    format!(
        r#"<html><body><h1>Sessions</h1><div class="monitor-section"><p>{active} active</p></div></body></html>"#
    )
}

#[tokio::test]
async fn test_section_mode_replaces_monitor_section() {
    let server = StubServer::start(StubState {
        page: sessions_page(3),
        ..Default::default()
    })
    .await;
    let r = LiveViewRefresher::builder(server.config())
        .mode(RefreshMode::Section)
        .build()
        .unwrap();
    r.load().await.unwrap();

    server.update(|s| {
        s.page = sessions_page(4);
    });
    assert_eq!(r.run_cycle().await, Some(PollOutcome::SectionReplaced));
    assert_eq!(server.hits("GET", STATUS_PATH), 0);

    let sel = live_view_refresher::dom::Selector::parse(".monitor-section").unwrap();
    let text = r.view().document().select_first(&sel).unwrap().text();
    assert_eq!(text, "4 active");
}
