/// Randomized soak: mutation bursts across every category while the relay
/// flaps, then a settle phase that must leave every category synced.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot};
use walletsync_backup::{BackupCategory, BackupEvent, SyncPhase};

use crate::events::{
    emit, now_iso, EventBackup, EventCategorySummary, EventSimulationSummary, EventStarted,
};
use crate::scenario_common::{SimTimings, SimWallet};

pub struct SimulateConfig {
    pub mutations: u32,
    pub flaps: u32,
    pub timings: SimTimings,
    pub settle: Duration,
    pub seed: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: HashMap<BackupCategory, u64>,
    synced: u64,
    failed: u64,
    stale: u64,
}

pub async fn run(config: SimulateConfig) -> anyhow::Result<bool> {
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut wallet = SimWallet::start(config.timings).await?;

    emit(&EventStarted::new("simulate", wallet.session.namespace(), "memory://relay"));
    eprintln!("seed: {}", config.seed);

    wallet
        .wait_connected(Duration::from_secs(10))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    // ── Event collector ─────────────────────────────────────────
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let (_, detached) = mpsc::channel(1);
    let mut events = std::mem::replace(&mut wallet.events, detached);
    let collector = tokio::spawn(async move {
        let mut counters = Counters::default();
        loop {
            let event = tokio::select! {
                _ = &mut stop_rx => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match &event {
                BackupEvent::WriteDispatched { category, .. } => {
                    *counters.dispatched.entry(*category).or_default() += 1;
                }
                BackupEvent::Synced { .. } => counters.synced += 1,
                BackupEvent::WriteFailed { .. } => counters.failed += 1,
                BackupEvent::StaleCompletionIgnored { .. } => counters.stale += 1,
                _ => {}
            }
            emit(&EventBackup::from_event(&event, start.elapsed().as_secs_f64()));
        }
        counters
    });

    // ── Flapping relay ──────────────────────────────────────────
    let connector = wallet.connector.clone();
    let flaps = config.flaps;
    let mut flap_rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let debounce = config.timings.debounce;
    let flapper = tokio::spawn(async move {
        for _ in 0..flaps {
            let up_ms = flap_rng.random_range(100..1_000);
            tokio::time::sleep(Duration::from_millis(up_ms)).await;
            connector.set_online(false);
            connector.drop_connections();
            let down = debounce.mul_f64(flap_rng.random_range(0.5..3.0));
            tokio::time::sleep(down).await;
            connector.set_online(true);
        }
    });

    // ── Mutations ───────────────────────────────────────────────
    let mut mutations: HashMap<BackupCategory, u64> = HashMap::new();
    for i in 0..config.mutations {
        let category = BackupCategory::ALL[rng.random_range(0..BackupCategory::COUNT)];
        let blob = format!("{category}-{i}").into_bytes();
        if category.is_debounced() {
            wallet.snapshots.set(category, blob);
            wallet.handle.notify_mutation(category).await?;
        } else {
            wallet.node.emit(blob);
        }
        *mutations.entry(category).or_default() += 1;
        let pause = debounce.mul_f64(rng.random_range(0.0..0.4));
        tokio::time::sleep(pause).await;
    }

    flapper.await?;

    // ── Settle ──────────────────────────────────────────────────
    wallet.relay_up();
    wallet
        .wait_connected(Duration::from_secs(10))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    let status = wallet.handle.status().await?;
    for (category, s) in status.iter() {
        if s.phase == SyncPhase::Required && !s.debounce_pending {
            tracing::info!(%category, "re-triggering category left dirty by an outage");
            wallet.handle.sync_now(category).await?;
        }
    }
    tokio::time::sleep(config.settle).await;

    let status = wallet.handle.status().await?;
    let _ = stop_tx.send(());
    let counters = collector.await?;

    let mut all_synced = true;
    for (category, s) in status.iter() {
        let mutated = mutations.get(&category).copied().unwrap_or(0);
        let writes = counters.dispatched.get(&category).copied().unwrap_or(0);
        all_synced &= s.state.synced;
        emit(&EventCategorySummary {
            event: "category_summary",
            category: category.to_string(),
            mutations: mutated,
            writes,
            coalescing_ratio: if writes == 0 { 0.0 } else { mutated as f64 / writes as f64 },
            synced: s.state.synced,
            last_seq: s.last_seq,
        });
    }

    let transport = wallet.session.transport();
    emit(&EventSimulationSummary {
        event: "summary",
        mutations: u64::from(config.mutations),
        writes_dispatched: counters.dispatched.values().sum(),
        writes_synced: counters.synced,
        writes_failed: counters.failed,
        stale_completions: counters.stale,
        flaps: config.flaps,
        connect_attempts: transport.connect_attempts(),
        reconnect_loops: transport.loops_started(),
        all_synced,
        elapsed_s: start.elapsed().as_secs_f64(),
        timestamp: now_iso(),
    });

    wallet.session.shutdown().await;
    Ok(all_synced)
}
