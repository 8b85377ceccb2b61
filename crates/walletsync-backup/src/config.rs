use std::time::Duration;

use crate::types::WalletNetwork;

/// Quiet period before a mutated category is written.
pub const DEBOUNCE_QUIET_PERIOD: Duration = Duration::from_secs(5);

/// How often the escalation monitor evaluates staleness.
pub const BACKUP_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// A category unsynced for longer than this is stale.
pub const FAILED_BACKUP_CHECK_TIME: Duration = Duration::from_secs(30 * 60);

/// Repeat interval of the user-visible warning while anything is stale.
pub const FAILED_BACKUP_NOTIFICATION_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Per-request timeout for the replicated store.
pub const STORE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What happens to a category whose write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Stay `Required` until the next local mutation or external trigger.
    OnNextTrigger,
    /// Additionally re-dispatch idle `Required` categories on this period.
    Interval(Duration),
}

/// Configuration for the backup runtime.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Network segment of every backup key.
    pub network: WalletNetwork,
    /// Debounce quiet period.
    pub debounce: Duration,
    /// Escalation monitor poll interval.
    pub check_interval: Duration,
    /// Staleness threshold.
    pub stale_after: Duration,
    /// Warning repeat interval.
    pub warning_interval: Duration,
    /// Raise staleness warnings at all. Off for end-to-end test runs.
    pub escalation_enabled: bool,
    /// Failed-write retry behavior.
    pub retry_policy: RetryPolicy,
    /// Replicated store request timeout.
    pub request_timeout: Duration,
    /// Event channel capacity.
    pub event_buffer: usize,
}

impl Default for BackupConfig {
    /// Defaults, with escalation disabled when `WALLETSYNC_E2E` is set.
    fn default() -> Self {
        let e2e = std::env::var_os("WALLETSYNC_E2E").is_some();
        Self {
            network: WalletNetwork::Bitcoin,
            debounce: DEBOUNCE_QUIET_PERIOD,
            check_interval: BACKUP_CHECK_INTERVAL,
            stale_after: FAILED_BACKUP_CHECK_TIME,
            warning_interval: FAILED_BACKUP_NOTIFICATION_INTERVAL,
            escalation_enabled: !e2e,
            retry_policy: RetryPolicy::OnNextTrigger,
            request_timeout: STORE_REQUEST_TIMEOUT,
            event_buffer: 256,
        }
    }
}

impl BackupConfig {
    pub fn network(mut self, network: WalletNetwork) -> Self {
        self.network = network;
        self
    }

    pub fn debounce(mut self, quiet_period: Duration) -> Self {
        self.debounce = quiet_period;
        self
    }

    pub fn escalation_enabled(mut self, enabled: bool) -> Self {
        self.escalation_enabled = enabled;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Staleness threshold in milliseconds.
    pub fn stale_after_ms(&self) -> u64 {
        self.stale_after.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timings() {
        let config = BackupConfig::default();
        assert_eq!(config.debounce, Duration::from_secs(5));
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.stale_after_ms(), 30 * 60 * 1000);
        assert_eq!(config.warning_interval, Duration::from_secs(600));
        assert_eq!(config.retry_policy, RetryPolicy::OnNextTrigger);
    }

    #[test]
    fn builder_chain() {
        let config = BackupConfig::default()
            .network(WalletNetwork::Regtest)
            .escalation_enabled(false)
            .retry_policy(RetryPolicy::Interval(Duration::from_secs(120)));
        assert_eq!(config.network, WalletNetwork::Regtest);
        assert!(!config.escalation_enabled);
        assert_eq!(
            config.retry_policy,
            RetryPolicy::Interval(Duration::from_secs(120))
        );
    }
}
