//! Debounced writes through the runtime, on virtual time.
mod common;

use std::time::Duration;

use common::*;
use tokio::time::{sleep, Instant};
use walletsync_backup::*;

const SETTINGS: BackupCategory = BackupCategory::Settings;

#[tokio::test(start_paused = true)]
async fn burst_of_mutations_writes_last_snapshot_once() {
    init_tracing();
    let h = spawn_runtime(test_config());

    for i in 1..=5 {
        h.mutate(SETTINGS, &format!("payload-{i}")).await;
        sleep(Duration::from_secs(1)).await;
    }
    sleep(Duration::from_secs(6)).await;

    assert_eq!(h.written(SETTINGS), vec![b"payload-5".to_vec()]);
    assert_eq!(h.phase(SETTINGS).await, SyncPhase::Synced);
}

/// Mutate, wait less than the quiet period, mutate again, wait past it:
/// exactly one put carrying the second payload, and the category is synced.
#[tokio::test(start_paused = true)]
async fn settings_end_to_end() {
    let mut h = spawn_runtime(test_config());

    h.mutate(SETTINGS, "payload-1").await;
    sleep(Duration::from_secs(3)).await;
    h.mutate(SETTINGS, "payload-2").await;
    sleep(Duration::from_secs(6)).await;

    assert_eq!(h.written(SETTINGS), vec![b"payload-2".to_vec()]);
    let state = h.handle.tracker().borrow()[SETTINGS];
    assert!(state.synced);
    assert_eq!(state.sync_required_since, None);
    assert!(state.last_sync_completed_at.is_some());

    let synced = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, BackupEvent::Synced { complete: true, .. }))
        .count();
    assert_eq!(synced, 1);

    // Persisted under the wallet identity.
    let saved = h.persistence.load(WALLET).unwrap().unwrap();
    assert!(saved[SETTINGS].synced);
}

#[tokio::test(start_paused = true)]
async fn snapshot_is_read_when_the_timer_fires() {
    let h = spawn_runtime(test_config());

    h.mutate(SETTINGS, "scheduled").await;
    sleep(Duration::from_secs(4)).await;
    // Changed without a new notification: still picked up.
    h.snapshots.set(SETTINGS, b"changed-later".to_vec());
    sleep(Duration::from_secs(2)).await;

    assert_eq!(h.written(SETTINGS), vec![b"changed-later".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn categories_debounce_independently() {
    let h = spawn_runtime(test_config());

    h.mutate(BackupCategory::Widgets, "w").await;
    sleep(Duration::from_secs(3)).await;
    h.mutate(BackupCategory::Metadata, "m").await;

    // Widgets fires at 5s even though metadata was touched at 3s.
    sleep(Duration::from_millis(2_500)).await;
    assert_eq!(h.written(BackupCategory::Widgets), vec![b"w".to_vec()]);
    assert!(h.written(BackupCategory::Metadata).is_empty());
    assert_eq!(h.phase(BackupCategory::Metadata).await, SyncPhase::Required);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(h.written(BackupCategory::Metadata), vec![b"m".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn staleness_clock_starts_at_first_mutation() {
    let h = spawn_runtime(test_config());

    h.mutate(SETTINGS, "a").await;
    sleep(Duration::from_secs(2)).await;
    h.mutate(SETTINGS, "b").await;
    sleep(Duration::from_secs(2)).await;
    h.mutate(SETTINGS, "c").await;

    let state = h.handle.tracker().borrow()[SETTINGS];
    assert_eq!(state.sync_required_since, Some(START_MS));
    assert!(!state.synced);
}

#[tokio::test(start_paused = true)]
async fn channel_state_bypasses_debounce() {
    let mut h = spawn_runtime(test_config());
    let start = Instant::now();

    h.node_tx.send(b"channel-monitor-1".to_vec()).unwrap();
    wait_for_event(&mut h.events, |e| {
        matches!(
            e,
            BackupEvent::Synced {
                category: BackupCategory::LdkChannelState,
                ..
            }
        )
    })
    .await;

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(
        h.written(BackupCategory::LdkChannelState),
        vec![b"channel-monitor-1".to_vec()]
    );
}

#[tokio::test(start_paused = true)]
async fn every_node_snapshot_is_written() {
    let h = spawn_runtime(test_config());

    for i in 0..3 {
        h.node_tx.send(vec![i]).unwrap();
    }
    sleep(Duration::from_millis(10)).await;

    assert_eq!(
        h.written(BackupCategory::LdkChannelState),
        vec![vec![0], vec![1], vec![2]]
    );
    assert_eq!(h.phase(BackupCategory::LdkChannelState).await, SyncPhase::Synced);
}

#[tokio::test(start_paused = true)]
async fn sync_now_skips_the_quiet_period() {
    let h = spawn_runtime(test_config());

    h.mutate(SETTINGS, "urgent").await;
    h.handle.sync_now(SETTINGS).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.written(SETTINGS), vec![b"urgent".to_vec()]);

    // The pending timer was cancelled: no second write.
    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.written(SETTINGS).len(), 1);
    assert_eq!(h.phase(SETTINGS).await, SyncPhase::Synced);
}

#[tokio::test(start_paused = true)]
async fn history_lists_what_was_written() {
    let h = spawn_runtime(test_config());

    h.mutate(BackupCategory::Blocktank, "orders-1").await;
    sleep(Duration::from_secs(6)).await;
    h.mutate(BackupCategory::Blocktank, "orders-2").await;
    sleep(Duration::from_secs(6)).await;

    let listed = h.handle.list_backups(BackupCategory::Blocktank).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].timestamp > listed[1].timestamp);

    let (_, latest) = h
        .handle
        .fetch_latest(BackupCategory::Blocktank)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest, b"orders-2");
    let oldest = h
        .handle
        .fetch_backup(listed[1].timestamp, BackupCategory::Blocktank)
        .await
        .unwrap();
    assert_eq!(oldest, b"orders-1");
}

#[tokio::test(start_paused = true)]
async fn restored_required_category_is_resumed() {
    let mut restored = CategoryTracker::new();
    restored.mark_required(BackupCategory::Widgets, START_MS - 60_000);
    let h = spawn_runtime_with(test_config(), restored);
    h.snapshots.set(BackupCategory::Widgets, b"restored".to_vec());

    sleep(Duration::from_secs(6)).await;
    assert_eq!(h.written(BackupCategory::Widgets), vec![b"restored".to_vec()]);
    assert_eq!(h.phase(BackupCategory::Widgets).await, SyncPhase::Synced);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_timers() {
    let h = spawn_runtime(test_config());

    h.mutate(SETTINGS, "never-written").await;
    h.handle.shutdown().await;
    sleep(Duration::from_secs(30)).await;

    assert!(h.written(SETTINGS).is_empty());
    assert!(h.handle.is_closed());
    assert!(matches!(
        h.handle.notify_mutation(SETTINGS).await,
        Err(BackupError::ShutDown)
    ));
    // The tracker keeps what it had when teardown started.
    assert!(!h.handle.tracker().borrow()[SETTINGS].synced);
}
