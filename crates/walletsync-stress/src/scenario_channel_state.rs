/// Channel-state scenario: snapshots from the Lightning node skip the quiet
/// period. Every one is written as it arrives.
use std::time::{Duration, Instant};

use walletsync_backup::{BackupCategory, BackupEvent};

use crate::scenario_common::{
    drain_for, timed_step_async, ScenarioResult, SimTimings, SimWallet,
};

pub async fn run() -> anyhow::Result<ScenarioResult> {
    let mut result = ScenarioResult::new("channel-state");
    let start = Instant::now();
    // A long quiet period makes any accidental debouncing obvious.
    let timings = SimTimings {
        debounce: Duration::from_secs(30),
        ..SimTimings::default()
    };
    let mut wallet = SimWallet::start(timings).await?;

    let step = timed_step_async("relay connects", || async { wallet.wait_connected(Duration::from_secs(5)).await.map(|()| String::new()) }).await;
    result.add(step);

    let step = timed_step_async("5 node snapshots written immediately", || async {
        for i in 0..5u8 {
            let subscribers = wallet.node.emit(vec![i; 64]);
            if subscribers == 0 {
                return Err("engine not subscribed to the node".into());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let events = drain_for(&mut wallet.events, Duration::from_secs(1)).await;
        let synced = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    BackupEvent::Synced {
                        category: BackupCategory::LdkChannelState,
                        ..
                    }
                )
            })
            .count();
        if synced != 5 {
            return Err(format!("{synced} of 5 snapshots synced within 1s"));
        }
        Ok(String::new())
    })
    .await;
    result.add(step);

    wallet.session.shutdown().await;
    result.finalize(start);
    Ok(result)
}
