//! Per-category debounce timers.
//!
//! `schedule` (re)arms the timer of one category; when a timer runs out
//! without being re-armed, the category's producer is called and the
//! resulting blob is handed back through [`DebounceScheduler::next_fire`].
//! Categories never share a timer.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::category::{BackupCategory, CategoryMap};
use crate::types::BackupBlob;

/// Produces the snapshot to write. Evaluated at fire time.
pub type Producer = Arc<dyn Fn() -> BackupBlob + Send + Sync>;

struct Armed {
    generation: u64,
    timer: JoinHandle<()>,
    producer: Producer,
}

struct Fired {
    category: BackupCategory,
    generation: u64,
}

pub struct DebounceScheduler {
    quiet_period: Duration,
    slots: CategoryMap<Option<Armed>>,
    next_generation: u64,
    tasks: TaskTracker,
    fired_tx: mpsc::UnboundedSender<Fired>,
    fired_rx: mpsc::UnboundedReceiver<Fired>,
}

impl DebounceScheduler {
    /// Timers are spawned on `tasks`, so waiting on the tracker also
    /// covers any timer still armed.
    pub fn new(quiet_period: Duration, tasks: TaskTracker) -> Self {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        Self {
            quiet_period,
            slots: CategoryMap::from_fn(|_| None),
            next_generation: 0,
            tasks,
            fired_tx,
            fired_rx,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Cancel any pending timer for `category` and arm a fresh one.
    pub fn schedule(&mut self, category: BackupCategory, producer: Producer) {
        self.cancel(category);
        self.next_generation += 1;
        let generation = self.next_generation;
        let quiet_period = self.quiet_period;
        let fired_tx = self.fired_tx.clone();
        let timer = self.tasks.spawn(async move {
            tokio::time::sleep(quiet_period).await;
            let _ = fired_tx.send(Fired {
                category,
                generation,
            });
        });
        self.slots[category] = Some(Armed {
            generation,
            timer,
            producer,
        });
    }

    /// Disarm `category`. Returns whether a timer was pending.
    pub fn cancel(&mut self, category: BackupCategory) -> bool {
        match self.slots[category].take() {
            Some(armed) => {
                armed.timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for category in BackupCategory::ALL {
            self.cancel(category);
        }
    }

    pub fn is_pending(&self, category: BackupCategory) -> bool {
        self.slots[category].is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.slots.values().filter(|s| s.is_some()).count()
    }

    /// Wait for the next timer to run out and return its category with the
    /// producer's current snapshot.
    ///
    /// Cancel-safe. Pends forever while nothing is armed.
    pub async fn next_fire(&mut self) -> (BackupCategory, BackupBlob) {
        loop {
            // The scheduler holds a sender, so the channel never closes.
            let Some(fired) = self.fired_rx.recv().await else {
                std::future::pending::<()>().await;
                continue;
            };
            let current = self.slots[fired.category]
                .as_ref()
                .map(|armed| armed.generation);
            // A timer aborted just after it sent is stale: its slot has
            // since been re-armed or cleared.
            if current != Some(fired.generation) {
                continue;
            }
            if let Some(armed) = self.slots[fired.category].take() {
                return (fired.category, (armed.producer)());
            }
        }
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    const QUIET: Duration = Duration::from_secs(5);

    fn fixed(blob: &'static [u8]) -> Producer {
        Arc::new(move || blob.to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_coalesces_into_one_fire() {
        let mut scheduler = DebounceScheduler::new(QUIET, TaskTracker::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let producer: Producer = {
            let calls = calls.clone();
            Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                b"latest".to_vec()
            })
        };

        for _ in 0..10 {
            scheduler.schedule(BackupCategory::Settings, producer.clone());
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let (category, blob) = scheduler.next_fire().await;
        assert_eq!(category, BackupCategory::Settings);
        assert_eq!(blob, b"latest");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending(BackupCategory::Settings));

        // Nothing else fires.
        let more = tokio::time::timeout(Duration::from_secs(60), scheduler.next_fire()).await;
        assert!(more.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn producer_runs_at_fire_time() {
        let mut scheduler = DebounceScheduler::new(QUIET, TaskTracker::new());
        let state = Arc::new(Mutex::new(b"first".to_vec()));
        let producer: Producer = {
            let state = state.clone();
            Arc::new(move || state.lock().unwrap().clone())
        };
        scheduler.schedule(BackupCategory::Widgets, producer);

        tokio::time::sleep(Duration::from_secs(4)).await;
        *state.lock().unwrap() = b"second".to_vec();

        let (_, blob) = scheduler.next_fire().await;
        assert_eq!(blob, b"second");
    }

    #[tokio::test(start_paused = true)]
    async fn categories_do_not_interact() {
        let mut scheduler = DebounceScheduler::new(QUIET, TaskTracker::new());
        let start = tokio::time::Instant::now();
        scheduler.schedule(BackupCategory::Settings, fixed(b"s"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        scheduler.schedule(BackupCategory::Metadata, fixed(b"m"));
        assert_eq!(scheduler.pending_count(), 2);

        let (first, _) = scheduler.next_fire().await;
        assert_eq!(first, BackupCategory::Settings);
        assert!(start.elapsed() >= QUIET && start.elapsed() < Duration::from_secs(6));

        let (second, _) = scheduler.next_fire().await;
        assert_eq!(second, BackupCategory::Metadata);
        assert!(start.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let mut scheduler = DebounceScheduler::new(QUIET, TaskTracker::new());
        scheduler.schedule(BackupCategory::Blocktank, fixed(b"b"));
        assert!(scheduler.cancel(BackupCategory::Blocktank));
        assert!(!scheduler.cancel(BackupCategory::Blocktank));

        let fired = tokio::time::timeout(Duration::from_secs(30), scheduler.next_fire()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn armed_timers_are_tracked_until_cancelled() {
        let tasks = TaskTracker::new();
        let mut scheduler = DebounceScheduler::new(QUIET, tasks.clone());
        scheduler.schedule(BackupCategory::Settings, fixed(b"s"));
        scheduler.schedule(BackupCategory::Metadata, fixed(b"m"));
        assert_eq!(tasks.len(), 2);

        scheduler.cancel_all();
        tasks.close();
        let drained = tokio::time::timeout(Duration::from_secs(1), tasks.wait()).await;
        assert!(drained.is_ok(), "aborted timers still tracked");
    }
}
