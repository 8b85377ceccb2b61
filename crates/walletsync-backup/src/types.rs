use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Serialized snapshot of one category at one point in time. Opaque.
pub type BackupBlob = Vec<u8>;

/// Unix time in milliseconds.
pub type Timestamp = u64;

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Wall-clock anchored to the tokio timer.
///
/// Reads the system clock once, then advances with `tokio::time::Instant`,
/// so timestamps stay consistent with the runtime's timers (including
/// paused time in tests).
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_ms: Timestamp,
    anchor: tokio::time::Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::starting_at(now_ms())
    }

    /// A clock whose current reading is `ms`.
    pub fn starting_at(ms: Timestamp) -> Self {
        Self {
            anchor_ms: ms,
            anchor: tokio::time::Instant::now(),
        }
    }

    pub fn now_ms(&self) -> Timestamp {
        self.anchor_ms + self.anchor.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Next tick of an optional interval. Pends forever when there is none.
pub(crate) async fn tick_optional(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Bitcoin network the wallet runs on. Part of every backup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletNetwork {
    Bitcoin,
    Testnet,
    Regtest,
}

impl WalletNetwork {
    pub fn as_str(self) -> &'static str {
        match self {
            WalletNetwork::Bitcoin => "bitcoin",
            WalletNetwork::Testnet => "testnet",
            WalletNetwork::Regtest => "regtest",
        }
    }
}

impl std::fmt::Display for WalletNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WalletNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bitcoin" | "mainnet" => Ok(WalletNetwork::Bitcoin),
            "testnet" => Ok(WalletNetwork::Testnet),
            "regtest" => Ok(WalletNetwork::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clock_follows_tokio_time() {
        let clock = Clock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        tokio::time::advance(std::time::Duration::from_secs(90)).await;
        assert_eq!(clock.now_ms(), 91_000);
    }

    #[test]
    fn network_parse() {
        assert_eq!("mainnet".parse::<WalletNetwork>(), Ok(WalletNetwork::Bitcoin));
        assert_eq!("regtest".parse::<WalletNetwork>(), Ok(WalletNetwork::Regtest));
        assert!("signet".parse::<WalletNetwork>().is_err());
    }

    #[test]
    fn network_serde_lowercase() {
        let json = serde_json::to_string(&WalletNetwork::Testnet).unwrap();
        assert_eq!(json, "\"testnet\"");
    }

    #[tokio::test(start_paused = true)]
    async fn optional_interval_ticks_only_when_present() {
        let period = std::time::Duration::from_secs(10);
        let mut none = None;
        let idle = tokio::time::timeout(period * 3, tick_optional(&mut none)).await;
        assert!(idle.is_err());

        let start = tokio::time::Instant::now();
        let mut some = Some(tokio::time::interval_at(start + period, period));
        tick_optional(&mut some).await;
        assert_eq!(start.elapsed(), period);
    }
}
