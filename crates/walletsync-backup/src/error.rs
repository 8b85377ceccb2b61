/// Errors of the backup engine.
///
/// Per-write failures never escape the runtime: they become tracker state
/// and [`BackupEvent::WriteFailed`](crate::BackupEvent::WriteFailed).
/// What callers see is identity failures at session start, shutdown, and
/// errors from explicit store queries (history listing, fetch).
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("transport error: {0}")]
    Transport(#[from] walletsync_transport::TransportError),

    #[error("relay is not connected")]
    NotConnected,

    #[error("store rejected {op} on {key}: {reason}")]
    StoreRejected {
        op: &'static str,
        key: String,
        reason: String,
    },

    #[error("store request timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("backup not found: {key}")]
    NotFound { key: String },

    #[error("identity unavailable: {0}")]
    Identity(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("backup runtime shut down")]
    ShutDown,
}

impl From<rmp_serde::encode::Error> for BackupError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BackupError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BackupError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BackupError::Deserialization(e.to_string())
    }
}

impl From<rusqlite::Error> for BackupError {
    fn from(e: rusqlite::Error) -> Self {
        BackupError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(e: serde_json::Error) -> Self {
        BackupError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_store_rejected() {
        let err = BackupError::StoreRejected {
            op: "put",
            key: "backups/bitcoin/settings/1".into(),
            reason: "quota".into(),
        };
        assert_eq!(
            err.to_string(),
            "store rejected put on backups/bitcoin/settings/1: quota"
        );
    }

    #[test]
    fn test_display_timeout() {
        let err = BackupError::Timeout { millis: 30_000 };
        assert_eq!(err.to_string(), "store request timed out after 30000ms");
    }

    #[test]
    fn test_display_identity() {
        let err = BackupError::Identity("keychain locked".into());
        assert_eq!(err.to_string(), "identity unavailable: keychain locked");
    }

    #[test]
    fn test_transport_conversion() {
        let err: BackupError =
            walletsync_transport::TransportError::SocketClosed { socket_id: 7 }.into();
        assert_eq!(err.to_string(), "transport error: socket 7 is closed");
    }
}
