use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeDelta};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionMethod {
    Aes128,
    SampleAes,
    Other(String),
}

/// Decryption parameters attached to a segment by `EXT-X-KEY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub method: EncryptionMethod,
    /// Absolute key URI
    pub uri: String,
    /// Explicit IV; the media sequence number is used when absent.
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub sequence_number: u64,
    /// Absolute segment URI
    pub uri: String,
    /// Seconds
    pub duration: f64,
    pub key: Option<KeyInfo>,
    /// Broadcast time of the first sample, when known.
    pub starts_at: Option<DateTime<FixedOffset>>,
}

impl Segment {
    pub fn encryption_key_uri(&self) -> Option<&str> {
        self.key.as_ref().map(|k| k.uri.as_str())
    }

    pub fn duration_std(&self) -> Duration {
        Duration::from_secs_f64(self.duration.max(0.0))
    }

    pub fn duration_delta(&self) -> TimeDelta {
        TimeDelta::milliseconds((self.duration * 1000.0).round() as i64)
    }

    pub fn ends_at(&self) -> Option<DateTime<FixedOffset>> {
        self.starts_at.map(|start| start + self.duration_delta())
    }
}

/// One parsed media playlist response.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub media_sequence: u64,
    pub target_duration: Duration,
    /// `EXT-X-ENDLIST` was present.
    pub end_list: bool,
    pub segments: Vec<Segment>,
}
