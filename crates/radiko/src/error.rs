use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};

/// Which constraint a requested time window violated.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum WindowViolation {
    #[error("malformed timestamp '{0}', expected YYYYMMDDHHMM")]
    Malformed(String),
    #[error("invalid station id '{0}'")]
    InvalidStation(String),
    #[error("start {start} is not before end {end}")]
    Misordered {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },
    #[error("start {start} precedes the retention horizon {horizon}")]
    BeforeRetentionHorizon {
        start: DateTime<FixedOffset>,
        horizon: DateTime<FixedOffset>,
    },
    #[error("window of {duration_secs}s exceeds the maximum of {max_secs}s")]
    ExceedsMaxDuration { duration_secs: i64, max_secs: i64 },
    #[error("end {end} is later than the latest recordable time {latest}")]
    TooCloseToNow {
        end: DateTime<FixedOffset>,
        latest: DateTime<FixedOffset>,
    },
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum RecordError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),
    #[error("Invalid challenge: offset {offset} + length {length} outside secret of {secret_len} chars")]
    InvalidChallenge {
        offset: usize,
        length: usize,
        secret_len: usize,
    },
    #[error("Invalid window: {0}")]
    InvalidWindow(#[from] WindowViolation),
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<Arc<reqwest::Error>>,
    },
    #[error("Playlist unavailable: {0}")]
    PlaylistUnavailable(String),
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("Segment {sequence} unavailable: {reason}")]
    SegmentUnavailable { sequence: u64, reason: String },
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Recording timed out after {elapsed:?} ({segments_written} segments written)")]
    RecordingTimedOut {
        elapsed: Duration,
        segments_written: u64,
    },
    #[error("Sink error: {0}")]
    SinkError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RecordError {
    pub fn network(message: impl Into<String>) -> Self {
        RecordError::NetworkError {
            message: message.into(),
            source: None,
        }
    }

    /// Only transport-level failures are worth another attempt; everything
    /// else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecordError::NetworkError { .. })
    }
}

// Manual implementation because of the Arc wrapping.
impl From<reqwest::Error> for RecordError {
    fn from(err: reqwest::Error) -> Self {
        RecordError::NetworkError {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}
