use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthSession, AuthToken};
use crate::client::{UpstreamClient, create_client};
use crate::config::RecorderConfig;
use crate::credentials::Credentials;
use crate::fetch::{SegmentFetcher, SegmentSource};
use crate::pipeline::{OnProgress, RecordingPipeline, RecordingResult};
use crate::playlist::{HttpManifestSource, PlaylistWalker};
use crate::sink::{FfmpegSink, FileSink, MediaSink};
use crate::window::{TimeWindow, WindowResolver};
use crate::RecordError;

/// Records one time-shift window per call. Every call runs its own
/// handshake; tokens are never reused across recordings.
pub struct Recorder {
    config: Arc<RecorderConfig>,
    http_client: Client,
    on_progress: Option<OnProgress>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Result<Self, RecordError> {
        let http_client = create_client(&config.base)?;
        Ok(Self {
            config: Arc::new(config),
            http_client,
            on_progress: None,
        })
    }

    pub fn with_progress(mut self, on_progress: OnProgress) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Records `[start, end)` of `station` into `output`, with credentials
    /// from the environment. Times are `YYYYMMDDHHMM` in service time.
    pub async fn record(
        &self,
        station: &str,
        start: &str,
        end: &str,
        output: impl AsRef<Path>,
    ) -> Result<RecordingResult, RecordError> {
        self.record_with_cancel(station, start, end, output, CancellationToken::new())
            .await
    }

    /// Like [`Recorder::record`]; cancelling `cancel` stops the recording
    /// and returns the partial result.
    pub async fn record_with_cancel(
        &self,
        station: &str,
        start: &str,
        end: &str,
        output: impl AsRef<Path>,
        cancel: CancellationToken,
    ) -> Result<RecordingResult, RecordError> {
        let credentials = Credentials::from_env()?;
        let window = self.resolve_window(station, start, end)?;

        let session = AuthSession::new(self.http_client.clone(), self.config.clone());
        let Some(token) = session.handshake_or_cancel(&credentials, &cancel).await? else {
            return Ok(RecordingResult::not_started(&window));
        };

        let result = self
            .record_to_path(&token, &window, output.as_ref(), cancel)
            .await;
        session.end(&token).await;
        result
    }

    /// Records into a caller-provided sink. The sink is finalized even when
    /// the recording is cancelled during authentication.
    pub async fn record_into(
        &self,
        credentials: &Credentials,
        station: &str,
        start: &str,
        end: &str,
        sink: &mut dyn MediaSink,
        cancel: CancellationToken,
    ) -> Result<RecordingResult, RecordError> {
        let window = self.resolve_window(station, start, end)?;

        let session = AuthSession::new(self.http_client.clone(), self.config.clone());
        let Some(token) = session.handshake_or_cancel(credentials, &cancel).await? else {
            if let Err(e) = sink.finalize().await {
                warn!(error = %e, "Finalizing sink after a cancelled handshake failed");
            }
            return Ok(RecordingResult::not_started(&window));
        };

        let result = match self.prepare(&token, &window) {
            Ok(job) => self.run(job, &window, sink, cancel).await,
            Err(e) => Err(e),
        };
        session.end(&token).await;
        result
    }

    /// Validates the request against the current service time.
    pub fn resolve_window(
        &self,
        station: &str,
        start: &str,
        end: &str,
    ) -> Result<TimeWindow, RecordError> {
        let resolver = WindowResolver::new(self.config.window_config.clone());
        let now = Utc::now().with_timezone(&self.config.window_config.utc_offset);
        resolver.resolve_str(station, start, end, now)
    }

    async fn open_sink(&self, output: &Path) -> Result<Box<dyn MediaSink>, RecordError> {
        let sink_config = &self.config.sink_config;
        if sink_config.raw_output {
            debug!(output = %output.display(), "Writing raw stream");
            Ok(Box::new(FileSink::create(output).await?))
        } else {
            Ok(Box::new(FfmpegSink::spawn(sink_config.clone(), output)?))
        }
    }

    /// Everything fallible is set up before the output is opened, so a
    /// setup failure never leaves a half-started encoder behind.
    async fn record_to_path(
        &self,
        token: &AuthToken,
        window: &TimeWindow,
        output: &Path,
        cancel: CancellationToken,
    ) -> Result<RecordingResult, RecordError> {
        let job = self.prepare(token, window)?;
        if cancel.is_cancelled() {
            info!("Recording cancelled before the output was opened");
            return Ok(RecordingResult::not_started(window));
        }
        let mut sink = self.open_sink(output).await?;
        self.run(job, window, sink.as_mut(), cancel).await
    }

    fn prepare(&self, token: &AuthToken, window: &TimeWindow) -> Result<RecordingJob, RecordError> {
        let upstream = UpstreamClient::new(self.http_client.clone(), token);

        let source = HttpManifestSource::new(upstream.clone(), self.config.clone(), window)?;
        let walker = PlaylistWalker::new(
            Box::new(source),
            window.clone(),
            self.config.playlist_config.clone(),
        );
        let fetcher: Arc<dyn SegmentSource> = Arc::new(SegmentFetcher::new(
            upstream,
            self.config.fetcher_config.clone(),
        ));

        let mut pipeline = RecordingPipeline::new(
            self.config.pipeline_config.clone(),
            self.config.fetcher_config.download_concurrency,
        );
        if let Some(on_progress) = &self.on_progress {
            pipeline = pipeline.with_progress(on_progress.clone());
        }

        Ok(RecordingJob {
            walker,
            fetcher,
            pipeline,
        })
    }

    async fn run(
        &self,
        job: RecordingJob,
        window: &TimeWindow,
        sink: &mut dyn MediaSink,
        cancel: CancellationToken,
    ) -> Result<RecordingResult, RecordError> {
        let result = job
            .pipeline
            .stream(window, job.walker, job.fetcher, sink, cancel)
            .await?;
        info!(
            station = %result.station,
            segments = result.segments_written,
            duration = ?result.duration,
            complete = result.complete,
            "Recording done"
        );
        Ok(result)
    }
}

struct RecordingJob {
    walker: PlaylistWalker,
    fetcher: Arc<dyn SegmentSource>,
    pipeline: RecordingPipeline,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WindowViolation;

    #[test]
    fn windows_are_checked_against_service_time() {
        let recorder = Recorder::new(RecorderConfig::default()).unwrap();
        let err = recorder
            .resolve_window("LFR", "202001010000", "202001010100")
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidWindow(WindowViolation::BeforeRetentionHorizon { .. })
        ));

        let err = recorder.resolve_window("LFR", "2020", "2021").unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidWindow(WindowViolation::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn output_is_not_opened_when_cancelled_during_setup() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("show.aac");
        let recorder = Recorder::new(RecorderConfig::builder().raw_output(true).build()).unwrap();

        let resolver = WindowResolver::default();
        let now = resolver.parse_timestamp("202610162300").unwrap();
        let window = resolver
            .resolve_str("LFR", "202610161000", "202610161030", now)
            .unwrap();
        let token = AuthToken::new("token-abc", vec!["JP13".to_string()]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = recorder
            .record_to_path(&token, &window, &output, cancel)
            .await
            .unwrap();
        assert_eq!(result, RecordingResult::not_started(&window));
        assert!(!output.exists());
    }
}
