//! Failure escalation monitor.
//!
//! Polls tracker snapshots on a fixed interval. While any category is
//! stale, a user-visible warning is raised immediately and then repeated
//! on its own interval; the repeat stops as soon as nothing is stale.
//! Transient failures never reach the user: a category has to stay
//! unsynced past the staleness threshold first.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::category::{BackupCategory, CategoryMap};
use crate::config::BackupConfig;
use crate::external::WarningSink;
use crate::runtime::BackupEvent;
use crate::tracker::{stale_categories, CategorySyncState};
use crate::types::{tick_optional, Clock};

pub const WARNING_TITLE: &str = "Backup failed";

/// Monitor timings, taken from [`BackupConfig`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub enabled: bool,
    pub check_interval: Duration,
    pub stale_after: Duration,
    pub warning_interval: Duration,
}

impl From<&BackupConfig> for MonitorSettings {
    fn from(config: &BackupConfig) -> Self {
        Self {
            enabled: config.escalation_enabled,
            check_interval: config.check_interval,
            stale_after: config.stale_after,
            warning_interval: config.warning_interval,
        }
    }
}

pub struct EscalationMonitor {
    settings: MonitorSettings,
    tracker: watch::Receiver<CategoryMap<CategorySyncState>>,
    sink: Arc<dyn WarningSink>,
    events: mpsc::Sender<BackupEvent>,
    clock: Clock,
}

impl EscalationMonitor {
    pub fn new(
        settings: MonitorSettings,
        tracker: watch::Receiver<CategoryMap<CategorySyncState>>,
        sink: Arc<dyn WarningSink>,
        events: mpsc::Sender<BackupEvent>,
        clock: Clock,
    ) -> Self {
        Self {
            settings,
            tracker,
            sink,
            events,
            clock,
        }
    }

    fn stale_now(&self) -> Vec<BackupCategory> {
        let threshold = self.settings.stale_after.as_millis() as u64;
        stale_categories(&self.tracker.borrow(), self.clock.now_ms(), threshold)
    }

    fn raise(&self, stale: &[BackupCategory]) {
        let names: Vec<&str> = stale.iter().map(|c| c.as_str()).collect();
        let minutes = self.settings.stale_after.as_secs() / 60;
        let message = format!(
            "Wallet data has not been backed up for over {minutes} minutes ({}). \
             Check your connection; backups resume automatically once it is restored.",
            names.join(", ")
        );
        tracing::warn!(stale = ?names, "backup stale, warning user");
        self.sink.show_warning(WARNING_TITLE, &message);
        let _ = self.events.try_send(BackupEvent::WarningRaised {
            stale: stale.to_vec(),
        });
    }

    fn clear(&self) {
        tracing::info!("backups caught up, warning cleared");
        let _ = self.events.try_send(BackupEvent::WarningCleared);
    }

    /// Run until `cancel` fires. Returns at once when escalation is
    /// disabled.
    pub async fn run(self, cancel: CancellationToken) {
        if !self.settings.enabled {
            tracing::info!("backup escalation disabled");
            return;
        }

        let mut poll = tokio::time::interval(self.settings.check_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        let mut repeat: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,

                _ = poll.tick() => {
                    let stale = self.stale_now();
                    match (stale.is_empty(), repeat.is_some()) {
                        (false, false) => {
                            self.raise(&stale);
                            repeat = Some(self.repeat_interval());
                        }
                        (true, true) => {
                            repeat = None;
                            self.clear();
                        }
                        _ => {}
                    }
                }

                _ = tick_optional(&mut repeat) => {
                    let stale = self.stale_now();
                    if stale.is_empty() {
                        repeat = None;
                        self.clear();
                    } else {
                        self.raise(&stale);
                    }
                }
            }
        }
    }

    fn repeat_interval(&self) -> Interval {
        let period = self.settings.warning_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }
}
