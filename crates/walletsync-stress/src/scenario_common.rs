/// Common types and helpers for in-process scenarios.
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use walletsync_backup::{
    BackupConfig, BackupEvent, BackupHandle, BackupSession, LocalNodeStream, MemoryPersistence,
    MemoryStore, SessionDeps, SharedSnapshots, StaticIdentity, TracingWarningSink, WalletIdentity,
    WalletNetwork,
};
use walletsync_transport::{MemoryConnector, TransportConfig};

use crate::relay_sim;

/// Result of a scenario step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: String,
    pub ok: bool,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of a full scenario run.
#[derive(Debug, Serialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub steps: Vec<StepResult>,
    pub total_ms: f64,
    pub passed: usize,
    pub failed: usize,
}

impl ScenarioResult {
    pub fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.into(),
            steps: Vec::new(),
            total_ms: 0.0,
            passed: 0,
            failed: 0,
        }
    }

    pub fn add(&mut self, step: StepResult) {
        if step.ok {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.steps.push(step);
    }

    pub fn finalize(&mut self, start: Instant) {
        self.total_ms = start.elapsed().as_secs_f64() * 1000.0;
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn print_summary(&self) {
        let icon = if self.success() { "PASS" } else { "FAIL" };
        eprintln!("\n[{icon}] Scenario: {} ({:.1}ms)", self.scenario, self.total_ms);
        eprintln!("  {} passed, {} failed", self.passed, self.failed);
        for step in &self.steps {
            let mark = if step.ok { " ok" } else { "FAIL" };
            eprint!("  [{mark}] {} ({:.1}ms)", step.step, step.elapsed_ms);
            if let Some(detail) = &step.detail {
                eprint!(": {detail}");
            }
            eprintln!();
        }
    }
}

/// Run a timed async step.
pub async fn timed_step_async<F, Fut>(name: &str, f: F) -> StepResult
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<String, String>>,
{
    let start = Instant::now();
    let outcome = f().await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    match outcome {
        Ok(detail) => StepResult {
            step: name.into(),
            ok: true,
            elapsed_ms,
            detail: if detail.is_empty() { None } else { Some(detail) },
        },
        Err(detail) => StepResult {
            step: name.into(),
            ok: false,
            elapsed_ms,
            detail: Some(detail),
        },
    }
}

/// Wait for the first event matching `pred`, dropping the others.
pub async fn wait_for<F>(
    rx: &mut mpsc::Receiver<BackupEvent>,
    timeout: Duration,
    mut pred: F,
) -> Result<BackupEvent, String>
where
    F: FnMut(&BackupEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return Ok(event);
            }
        }
        Err("event channel closed".to_string())
    })
    .await
    .map_err(|_| "timeout".to_string())?
}

/// Collect every event that arrives within `window`.
pub async fn drain_for(rx: &mut mpsc::Receiver<BackupEvent>, window: Duration) -> Vec<BackupEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        events.push(event);
    }
    events
}

// ── Simulated wallet ────────────────────────────────────────────

/// Timings short enough for a scenario to finish in seconds.
#[derive(Debug, Clone, Copy)]
pub struct SimTimings {
    pub debounce: Duration,
    pub reconnect_delay: Duration,
}

impl Default for SimTimings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(100),
        }
    }
}

/// A wallet backup session wired to an in-process relay.
pub struct SimWallet {
    pub session: BackupSession,
    pub handle: BackupHandle,
    pub events: mpsc::Receiver<BackupEvent>,
    pub connector: MemoryConnector,
    pub store: MemoryStore,
    pub snapshots: SharedSnapshots,
    pub node: LocalNodeStream,
}

impl SimWallet {
    pub async fn start(timings: SimTimings) -> anyhow::Result<Self> {
        let (connector, accepted) = MemoryConnector::new();
        let store = MemoryStore::new();
        relay_sim::spawn(accepted, store.clone());

        let snapshots = SharedSnapshots::new();
        let node = LocalNodeStream::new();
        let deps = SessionDeps {
            identity: Arc::new(StaticIdentity(WalletIdentity::from_seed([7; 32]))),
            snapshots: Arc::new(snapshots.clone()),
            node_stream: Arc::new(node.clone()),
            warnings: Arc::new(TracingWarningSink),
            persistence: Arc::new(MemoryPersistence::new()),
        };
        let config = BackupConfig::default()
            .network(WalletNetwork::Regtest)
            .debounce(timings.debounce)
            .escalation_enabled(false);
        let transport_config = TransportConfig::new()
            .endpoint("memory://relay")
            .reconnect_delay(timings.reconnect_delay);

        let mut session =
            BackupSession::start(connector.clone(), transport_config, config, deps).await?;
        let events = session
            .take_events()
            .ok_or_else(|| anyhow::anyhow!("event stream already taken"))?;
        let handle = session.handle();

        Ok(Self {
            session,
            handle,
            events,
            connector,
            store,
            snapshots,
            node,
        })
    }

    /// Block until the relay store is bound.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), String> {
        let mut state = self.session.transport().state();
        tokio::time::timeout(timeout, state.wait_for(|s| s.is_connected()))
            .await
            .map_err(|_| "relay never connected".to_string())?
            .map(|_| ())
            .map_err(|_| "transport dropped".to_string())?;
        // The store slot is bound by a separate task after the open event.
        let deadline = tokio::time::Instant::now() + timeout;
        while self.handle.store().is_none() {
            if tokio::time::Instant::now() >= deadline {
                return Err("store never bound".into());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    /// Take the relay offline and drop the live socket.
    pub fn relay_down(&self) {
        self.connector.set_online(false);
        self.connector.drop_connections();
    }

    pub fn relay_up(&self) {
        self.connector.set_online(true);
    }
}
