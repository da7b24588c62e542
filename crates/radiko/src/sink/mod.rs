//! Destinations for the decrypted, ordered media stream.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::RecordError;

pub mod ffmpeg;
pub mod file;

pub use ffmpeg::FfmpegSink;
pub use file::FileSink;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub segments_written: u64,
    pub bytes_written: u64,
    pub output: Option<PathBuf>,
}

/// Consumer of segment payloads in sequence order.
#[async_trait]
pub trait MediaSink: Send {
    /// Writes one segment's bytes completely before returning.
    async fn write_segment(&mut self, data: &[u8]) -> Result<(), RecordError>;

    /// Reports an irrecoverable failure of the sink (for example an encoder
    /// process that exited) before more data is pushed into it.
    async fn health_check(&mut self) -> Result<(), RecordError> {
        Ok(())
    }

    /// Flushes and closes the output. Called once, also after failures, so
    /// that an already written prefix stays usable.
    async fn finalize(&mut self) -> Result<SinkReport, RecordError>;
}
