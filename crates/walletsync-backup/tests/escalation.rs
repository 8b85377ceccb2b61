//! Escalation monitor timing on virtual time.
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use walletsync_backup::monitor::WARNING_TITLE;
use walletsync_backup::*;

struct MonitorFixture {
    tracker: watch::Sender<CategoryMap<CategorySyncState>>,
    sink: RecordingWarningSink,
    events: mpsc::Receiver<BackupEvent>,
    cancel: CancellationToken,
}

fn spawn_monitor(enabled: bool, initial: CategoryTracker) -> MonitorFixture {
    let config = test_config().escalation_enabled(enabled);
    let (tracker_tx, tracker_rx) = watch::channel(initial.states().clone());
    let sink = RecordingWarningSink::default();
    let (event_tx, events) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let monitor = EscalationMonitor::new(
        MonitorSettings::from(&config),
        tracker_rx,
        Arc::new(sink.clone()),
        event_tx,
        Clock::starting_at(START_MS),
    );
    tokio::spawn(monitor.run(cancel.clone()));

    MonitorFixture {
        tracker: tracker_tx,
        sink,
        events,
        cancel,
    }
}

fn stale_settings() -> CategoryTracker {
    let mut tracker = CategoryTracker::new();
    tracker.mark_required(BackupCategory::Settings, START_MS - 31 * 60_000);
    tracker
}

/// One category held stale: a warning on every 10-minute tick; once it
/// is synced, nothing more.
#[tokio::test(start_paused = true)]
async fn warning_repeats_until_resolved() {
    init_tracing();
    let mut f = spawn_monitor(true, stale_settings());

    sleep(Duration::from_secs(61)).await; // first poll at 1 min
    assert_eq!(f.sink.warning_count(), 1);

    sleep(10 * MINUTE).await; // 11 min
    assert_eq!(f.sink.warning_count(), 2);
    sleep(10 * MINUTE).await; // 21 min
    assert_eq!(f.sink.warning_count(), 3);

    let mut synced = stale_settings();
    synced.mark_synced(BackupCategory::Settings, START_MS + 21 * 60_000);
    f.tracker.send_replace(synced.states().clone());

    sleep(120 * MINUTE).await;
    assert_eq!(f.sink.warning_count(), 3);

    let (title, message) = &f.sink.warnings()[0];
    assert_eq!(title, WARNING_TITLE);
    assert!(message.contains("settings"), "{message}");

    let mut raised = 0;
    let mut cleared = 0;
    while let Ok(event) = f.events.try_recv() {
        match event {
            BackupEvent::WarningRaised { stale } => {
                assert_eq!(stale, vec![BackupCategory::Settings]);
                raised += 1;
            }
            BackupEvent::WarningCleared => cleared += 1,
            _ => {}
        }
    }
    assert_eq!((raised, cleared), (3, 1));
    f.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn first_warning_waits_for_threshold() {
    let mut tracker = CategoryTracker::new();
    tracker.mark_required(BackupCategory::Widgets, START_MS);
    let f = spawn_monitor(true, tracker);

    // Exactly 30 minutes is not stale yet.
    sleep(Duration::from_secs(30 * 60 + 30)).await;
    assert_eq!(f.sink.warning_count(), 0);

    sleep(MINUTE).await; // poll at 31 min
    assert_eq!(f.sink.warning_count(), 1);
    f.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_never_surfaced() {
    let mut tracker = CategoryTracker::new();
    tracker.mark_required(BackupCategory::Metadata, START_MS);
    let f = spawn_monitor(true, tracker.clone());

    sleep(29 * MINUTE).await;
    tracker.mark_synced(BackupCategory::Metadata, START_MS + 29 * 60_000);
    f.tracker.send_replace(tracker.states().clone());

    sleep(180 * MINUTE).await;
    assert_eq!(f.sink.warning_count(), 0);
    f.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn repeat_checks_staleness_before_warning() {
    let f = spawn_monitor(true, stale_settings());
    sleep(Duration::from_secs(61)).await;
    assert_eq!(f.sink.warning_count(), 1);

    // Resolved just before the repeat tick, between two polls.
    sleep(Duration::from_secs(9 * 60 + 58)).await;
    let mut synced = stale_settings();
    synced.mark_synced(BackupCategory::Settings, START_MS + 11 * 60_000);
    f.tracker.send_replace(synced.states().clone());

    sleep(30 * MINUTE).await;
    assert_eq!(f.sink.warning_count(), 1);
    f.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn suppressed_for_end_to_end_runs() {
    let f = spawn_monitor(false, stale_settings());
    sleep(180 * MINUTE).await;
    assert_eq!(f.sink.warning_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn multiple_stale_categories_share_one_warning() {
    let mut tracker = stale_settings();
    tracker.mark_required(BackupCategory::Blocktank, START_MS - 40 * 60_000);
    let f = spawn_monitor(true, tracker);

    sleep(Duration::from_secs(61)).await;
    assert_eq!(f.sink.warning_count(), 1);
    let (_, message) = &f.sink.warnings()[0];
    assert!(message.contains("settings") && message.contains("blocktank"));
    f.cancel.cancel();
}
