/// Outage scenario: the relay goes away while a category is dirty. The
/// failed write must leave the category required, the transport must run a
/// single reconnect loop, and the next mutation after recovery must sync.
use std::time::{Duration, Instant};

use walletsync_backup::{BackupCategory, BackupEvent, SyncPhase};

use crate::scenario_common::{timed_step_async, wait_for, ScenarioResult, SimTimings, SimWallet};

pub async fn run() -> anyhow::Result<ScenarioResult> {
    let mut result = ScenarioResult::new("outage");
    let start = Instant::now();
    let timings = SimTimings::default();
    let mut wallet = SimWallet::start(timings).await?;

    let step = timed_step_async("relay connects", || async { wallet.wait_connected(Duration::from_secs(5)).await.map(|()| String::new()) }).await;
    result.add(step);

    let loops_before = wallet.session.transport().loops_started();

    // ── Write during outage ─────────────────────────────────────
    let step = timed_step_async("write fails while relay is down", || async {
        wallet.relay_down();
        wallet.snapshots.set(BackupCategory::Blocktank, b"orders-1".to_vec());
        wallet
            .handle
            .notify_mutation(BackupCategory::Blocktank)
            .await
            .map_err(|e| e.to_string())?;
        let failed = wait_for(&mut wallet.events, Duration::from_secs(5), |e| {
            matches!(e, BackupEvent::WriteFailed { .. })
        })
        .await?;
        let status = wallet.handle.status().await.map_err(|e| e.to_string())?;
        if status[BackupCategory::Blocktank].phase != SyncPhase::Required {
            return Err(format!(
                "phase {:?} after failure",
                status[BackupCategory::Blocktank].phase
            ));
        }
        match failed {
            BackupEvent::WriteFailed { reason, .. } => Ok(reason),
            _ => Ok(String::new()),
        }
    })
    .await;
    result.add(step);

    // ── Reconnect loop ──────────────────────────────────────────
    let step = timed_step_async("single reconnect loop while offline", || async {
        tokio::time::sleep(timings.reconnect_delay * 5).await;
        let transport = wallet.session.transport();
        let loops = transport.loops_started() - loops_before;
        if loops != 1 {
            return Err(format!("{loops} reconnect loops started"));
        }
        Ok(format!("{} connect attempts so far", transport.connect_attempts()))
    })
    .await;
    result.add(step);

    // ── Recovery ────────────────────────────────────────────────
    let step = timed_step_async("next mutation after recovery syncs", || async {
        wallet.relay_up();
        wallet.wait_connected(Duration::from_secs(5)).await?;
        wallet.snapshots.set(BackupCategory::Blocktank, b"orders-2".to_vec());
        wallet
            .handle
            .notify_mutation(BackupCategory::Blocktank)
            .await
            .map_err(|e| e.to_string())?;
        wait_for(&mut wallet.events, Duration::from_secs(5), |e| {
            matches!(
                e,
                BackupEvent::Synced {
                    category: BackupCategory::Blocktank,
                    complete: true,
                    ..
                }
            )
        })
        .await?;
        let state = wallet.handle.tracker().borrow()[BackupCategory::Blocktank];
        if !state.synced || state.sync_required_since.is_some() {
            return Err(format!("tracker still dirty: {state:?}"));
        }
        Ok(String::new())
    })
    .await;
    result.add(step);

    wallet.session.shutdown().await;
    result.finalize(start);
    Ok(result)
}
