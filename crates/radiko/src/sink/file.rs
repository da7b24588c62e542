use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::sink::{MediaSink, SinkReport};
use crate::RecordError;

/// Writes the raw decrypted stream (ADTS AAC) straight to disk.
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    segments_written: u64,
    bytes_written: u64,
}

impl FileSink {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await.map_err(|e| {
            RecordError::SinkError(format!("cannot create {}: {e}", path.display()))
        })?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            segments_written: 0,
            bytes_written: 0,
        })
    }
}

#[async_trait]
impl MediaSink for FileSink {
    async fn write_segment(&mut self, data: &[u8]) -> Result<(), RecordError> {
        self.writer.write_all(data).await.map_err(|e| {
            RecordError::SinkError(format!("write to {} failed: {e}", self.path.display()))
        })?;
        self.segments_written += 1;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<SinkReport, RecordError> {
        self.writer.flush().await.map_err(|e| {
            RecordError::SinkError(format!("flush of {} failed: {e}", self.path.display()))
        })?;
        self.writer.get_ref().sync_all().await.map_err(|e| {
            RecordError::SinkError(format!("sync of {} failed: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), bytes = self.bytes_written, "Raw output finalized");
        Ok(SinkReport {
            segments_written: self.segments_written,
            bytes_written: self.bytes_written,
            output: Some(self.path.clone()),
        })
    }
}
