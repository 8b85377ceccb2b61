/// Coalescing scenario: a burst of mutations inside one quiet period must
/// produce a single write carrying the state at fire time, and categories
/// must not share timers.
use std::time::{Duration, Instant};

use walletsync_backup::{BackupCategory, BackupEvent};

use crate::scenario_common::{
    drain_for, timed_step_async, wait_for, ScenarioResult, SimTimings, SimWallet,
};

pub async fn run() -> anyhow::Result<ScenarioResult> {
    let mut result = ScenarioResult::new("coalesce");
    let start = Instant::now();
    let timings = SimTimings::default();
    let mut wallet = SimWallet::start(timings).await?;

    let step = timed_step_async("relay connects", || async { wallet.wait_connected(Duration::from_secs(5)).await.map(|()| String::new()) }).await;
    result.add(step);

    // ── Burst on one category ───────────────────────────────────
    let step = timed_step_async("burst of 20 settings mutations", || async {
        for i in 0..20u32 {
            wallet
                .snapshots
                .set(BackupCategory::Settings, format!("settings-v{i}").into_bytes());
            wallet
                .handle
                .notify_mutation(BackupCategory::Settings)
                .await
                .map_err(|e| e.to_string())?;
            tokio::time::sleep(timings.debounce / 10).await;
        }
        let synced = wait_for(&mut wallet.events, Duration::from_secs(5), |e| {
            matches!(e, BackupEvent::Synced { category: BackupCategory::Settings, .. })
        })
        .await?;
        let extra = drain_for(&mut wallet.events, timings.debounce * 3).await;
        let extra_writes = extra
            .iter()
            .filter(|e| matches!(e, BackupEvent::WriteDispatched { .. }))
            .count();
        if extra_writes > 0 {
            return Err(format!("{extra_writes} extra writes after the burst"));
        }
        let (_, payload) = wallet
            .handle
            .fetch_latest(BackupCategory::Settings)
            .await
            .map_err(|e| e.to_string())?
            .ok_or("no settings backup stored")?;
        if payload != b"settings-v19" {
            return Err(format!(
                "stored {:?}, expected the last snapshot",
                String::from_utf8_lossy(&payload)
            ));
        }
        let seq = match synced {
            BackupEvent::Synced { seq, .. } => seq,
            _ => 0,
        };
        Ok(format!("20 mutations -> 1 write (seq {seq})"))
    })
    .await;
    result.add(step);

    // ── Interleaved categories ──────────────────────────────────
    let step = timed_step_async("independent category timers", || async {
        wallet.snapshots.set(BackupCategory::Widgets, b"widgets".to_vec());
        wallet.snapshots.set(BackupCategory::Metadata, b"metadata".to_vec());
        for category in [BackupCategory::Widgets, BackupCategory::Metadata] {
            wallet
                .handle
                .notify_mutation(category)
                .await
                .map_err(|e| e.to_string())?;
        }
        let events = drain_for(&mut wallet.events, timings.debounce * 4).await;
        let synced: Vec<BackupCategory> = events
            .iter()
            .filter_map(|e| match e {
                BackupEvent::Synced { category, .. } => Some(*category),
                _ => None,
            })
            .collect();
        if synced.len() != 2
            || !synced.contains(&BackupCategory::Widgets)
            || !synced.contains(&BackupCategory::Metadata)
        {
            return Err(format!("synced {synced:?}"));
        }
        Ok("one write each".into())
    })
    .await;
    result.add(step);

    wallet.session.shutdown().await;
    result.finalize(start);
    Ok(result)
}
