use crate::output;
use serde::Serialize;
use std::io::Write;
use walletsync_backup::BackupEvent;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
/// If --output-dir was provided, also writes to the JSONL file.
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();

        output::write_jsonl_line(&json);
    }
}

pub fn now_iso() -> String {
    chrono::Local::now().to_rfc3339()
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub mode: String,
    pub namespace: String,
    pub endpoint: String,
    pub timestamp: String,
}

impl EventStarted {
    pub fn new(mode: &str, namespace: &str, endpoint: &str) -> Self {
        Self {
            event: "started",
            mode: mode.to_string(),
            namespace: namespace.to_string(),
            endpoint: endpoint.to_string(),
            timestamp: now_iso(),
        }
    }
}

// ── Engine events ───────────────────────────────────────────────

/// Flattened [`BackupEvent`] for JSONL.
#[derive(Serialize)]
pub struct EventBackup {
    pub event: &'static str,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_s: f64,
}

impl EventBackup {
    pub fn from_event(event: &BackupEvent, elapsed_s: f64) -> Self {
        let (kind, category, seq, detail) = match event {
            BackupEvent::WriteDispatched { category, seq } => {
                ("write_dispatched", Some(category.to_string()), Some(*seq), None)
            }
            BackupEvent::Synced {
                category,
                seq,
                complete,
            } => (
                "synced",
                Some(category.to_string()),
                Some(*seq),
                (!complete).then(|| "partial".to_string()),
            ),
            BackupEvent::WriteFailed {
                category,
                seq,
                reason,
            } => (
                "write_failed",
                Some(category.to_string()),
                Some(*seq),
                Some(reason.clone()),
            ),
            BackupEvent::StaleCompletionIgnored {
                category,
                seq,
                latest,
            } => (
                "stale_completion",
                Some(category.to_string()),
                Some(*seq),
                Some(format!("latest={latest}")),
            ),
            BackupEvent::WarningRaised { stale } => {
                let names: Vec<&str> = stale.iter().map(|c| c.as_str()).collect();
                ("warning_raised", None, None, Some(names.join(",")))
            }
            BackupEvent::WarningCleared => ("warning_cleared", None, None, None),
            BackupEvent::TransportStateChanged(state) => {
                ("transport", None, None, Some(state.to_string()))
            }
        };
        Self {
            event: "backup",
            kind,
            category,
            seq,
            detail,
            elapsed_s,
        }
    }
}

// ── Simulation summary ──────────────────────────────────────────

#[derive(Serialize)]
pub struct EventCategorySummary {
    pub event: &'static str,
    pub category: String,
    pub mutations: u64,
    pub writes: u64,
    pub coalescing_ratio: f64,
    pub synced: bool,
    pub last_seq: u64,
}

#[derive(Serialize)]
pub struct EventSimulationSummary {
    pub event: &'static str,
    pub mutations: u64,
    pub writes_dispatched: u64,
    pub writes_synced: u64,
    pub writes_failed: u64,
    pub stale_completions: u64,
    pub flaps: u32,
    pub connect_attempts: u64,
    pub reconnect_loops: u64,
    pub all_synced: bool,
    pub elapsed_s: f64,
    pub timestamp: String,
}
