use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    RecordingStarted {
        station: String,
        /// Length of the requested window.
        expected: Duration,
    },
    SegmentWritten {
        sequence: u64,
        bytes: u64,
        segments_written: u64,
        bytes_written: u64,
        /// Broadcast time covered so far.
        covered: Duration,
    },
    RecordingFinished {
        segments_written: u64,
        bytes_written: u64,
        covered: Duration,
        complete: bool,
        output: Option<PathBuf>,
    },
}

/// A callback function for progress updates.
pub type OnProgress = Arc<dyn Fn(ProgressEvent) + Send + Sync>;
