//! The backup runtime event loop.
//!
//! A single task that owns the orchestrator state and multiplexes over
//! application commands, debounce fires, write outcomes, node snapshots,
//! store handle changes and the optional retry timer.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::category::BackupCategory;
use crate::config::{BackupConfig, RetryPolicy};
use crate::scheduler::DebounceScheduler;
use crate::types::{tick_optional, BackupBlob, Clock};

use super::effect::BackupEffect;
use super::executor::{execute_effects, RuntimeIo};
use super::state::OrchestratorState;
use super::{BackupCommand, StoreSlot};

#[allow(clippy::too_many_arguments)]
pub(super) async fn runtime_loop(
    mut state: OrchestratorState,
    mut io: RuntimeIo,
    config: Arc<BackupConfig>,
    clock: Clock,
    mut cmd_rx: mpsc::Receiver<BackupCommand>,
    mut store_rx: StoreSlot,
    mut node_rx: mpsc::UnboundedReceiver<BackupBlob>,
    cancel: CancellationToken,
) {
    let Some(mut results_rx) = io.take_results() else {
        return;
    };
    let mut scheduler = DebounceScheduler::new(config.debounce, io.tasks().clone());
    let mut last_node_snapshot: Option<BackupBlob> = None;
    let mut store_open = true;
    io.store = store_rx.borrow_and_update().clone();

    let mut retry = match config.retry_policy {
        RetryPolicy::Interval(period) => {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(interval)
        }
        RetryPolicy::OnNextTrigger => None,
    };

    // Categories left required by the previous session get a fresh
    // debounce cycle. Channel state waits for the node's next snapshot.
    let resumed: Vec<BackupCategory> = state
        .tracker()
        .required()
        .filter(|c| c.is_debounced())
        .collect();
    for category in resumed {
        tracing::info!(%category, "resuming unsynced category");
        let effects = vec![BackupEffect::ArmDebounce(category)];
        execute_effects(effects, &state, &mut scheduler, &io);
    }

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                teardown(&mut state, &mut scheduler);
                break;
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::debug!("all backup handles dropped");
                    teardown(&mut state, &mut scheduler);
                    break;
                };
                match cmd {
                    BackupCommand::NotifyMutation { category } => {
                        let now = clock.now_ms();
                        let effects = state.handle_mutation(category, now);
                        execute_effects(effects, &state, &mut scheduler, &io);
                        if !category.is_debounced() {
                            if let Some(blob) = current_snapshot(&io, &last_node_snapshot, category) {
                                let effects = state.begin_write(category, blob, now);
                                execute_effects(effects, &state, &mut scheduler, &io);
                            }
                        }
                    }
                    BackupCommand::SyncNow { category } => {
                        scheduler.cancel(category);
                        if let Some(blob) = current_snapshot(&io, &last_node_snapshot, category) {
                            let effects = state.begin_write(category, blob, clock.now_ms());
                            execute_effects(effects, &state, &mut scheduler, &io);
                        }
                    }
                    BackupCommand::Status { reply } => {
                        let _ = reply.send(state.status(|c| scheduler.is_pending(c)));
                    }
                    BackupCommand::Shutdown { done } => {
                        teardown(&mut state, &mut scheduler);
                        cancel.cancel();
                        let _ = done.send(());
                        break;
                    }
                }
            }

            Some(result) = results_rx.recv() => {
                let effects = state.handle_write_result(
                    result.category,
                    result.seq,
                    result.outcome,
                    clock.now_ms(),
                );
                execute_effects(effects, &state, &mut scheduler, &io);
            }

            Some(blob) = node_rx.recv() => {
                last_node_snapshot = Some(blob.clone());
                let effects = state.handle_node_snapshot(blob, clock.now_ms());
                execute_effects(effects, &state, &mut scheduler, &io);
            }

            (category, blob) = scheduler.next_fire() => {
                let effects = state.begin_write(category, blob, clock.now_ms());
                execute_effects(effects, &state, &mut scheduler, &io);
            }

            changed = store_rx.changed(), if store_open => {
                if changed.is_err() {
                    store_open = false;
                    io.store = None;
                } else {
                    io.store = store_rx.borrow_and_update().clone();
                }
                tracing::debug!(connected = io.store.is_some(), "store handle replaced");
            }

            _ = tick_optional(&mut retry) => {
                let now = clock.now_ms();
                for category in state.retry_candidates(|c| scheduler.is_pending(c)) {
                    let Some(blob) = current_snapshot(&io, &last_node_snapshot, category) else {
                        continue;
                    };
                    tracing::debug!(%category, "retrying unsynced category");
                    let effects = state.begin_write(category, blob, now);
                    execute_effects(effects, &state, &mut scheduler, &io);
                }
            }
        }
    }

    tracing::debug!("backup runtime stopped");
}

/// Latest local blob for `category`.
///
/// Channel state only ever comes from the node: until the node has emitted
/// a snapshot this session there is nothing to write, and the category
/// waits rather than storing an empty backup.
fn current_snapshot(
    io: &RuntimeIo,
    last_node_snapshot: &Option<BackupBlob>,
    category: BackupCategory,
) -> Option<BackupBlob> {
    match (category, last_node_snapshot) {
        (BackupCategory::LdkChannelState, Some(blob)) => Some(blob.clone()),
        (BackupCategory::LdkChannelState, None) => {
            tracing::debug!(%category, "no node snapshot yet, waiting for the node");
            None
        }
        _ => Some(io.snapshot(category)),
    }
}

fn teardown(state: &mut OrchestratorState, scheduler: &mut DebounceScheduler) {
    state.cancel();
    scheduler.cancel_all();
}
