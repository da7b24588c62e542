use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::fetch::SegmentSource;
use crate::pipeline::progress::{OnProgress, ProgressEvent};
use crate::pipeline::reorder::ReorderBuffer;
use crate::playlist::{PlaylistWalker, Segment};
use crate::sink::MediaSink;
use crate::window::TimeWindow;
use crate::RecordError;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub station: String,
    pub window: TimeWindow,
    pub segments_written: u64,
    pub bytes_written: u64,
    /// Broadcast time covered by the written segments, clipped to the window.
    pub duration: Duration,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    /// The written segments reach the end of the window.
    pub complete: bool,
    pub output: Option<PathBuf>,
}

impl RecordingResult {
    /// Result of a recording cancelled before anything was streamed.
    pub fn not_started(window: &TimeWindow) -> Self {
        Self {
            station: window.station().to_string(),
            window: window.clone(),
            segments_written: 0,
            bytes_written: 0,
            duration: Duration::ZERO,
            first_sequence: None,
            last_sequence: None,
            complete: false,
            output: None,
        }
    }
}

enum Outcome {
    Completed,
    Cancelled,
    TimedOut,
    Failed(RecordError),
}

#[derive(Default)]
struct Written {
    segments: u64,
    bytes: u64,
    covered: Duration,
    first: Option<u64>,
    last: Option<u64>,
}

pub struct RecordingPipeline {
    config: PipelineConfig,
    concurrency: usize,
    on_progress: Option<OnProgress>,
}

impl RecordingPipeline {
    pub fn new(config: PipelineConfig, concurrency: usize) -> Self {
        Self {
            config,
            concurrency: concurrency.max(1),
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, on_progress: OnProgress) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.on_progress {
            callback(event);
        }
    }

    /// Streams every segment the walker yields into `sink` in sequence order,
    /// downloading up to `concurrency` segments ahead. The sink is finalized
    /// on every exit path. Cancellation yields a partial result; a deadline
    /// overrun yields [`RecordError::RecordingTimedOut`].
    pub async fn stream(
        &self,
        window: &TimeWindow,
        walker: PlaylistWalker,
        fetcher: Arc<dyn SegmentSource>,
        sink: &mut dyn MediaSink,
        cancel: CancellationToken,
    ) -> Result<RecordingResult, RecordError> {
        let started = Instant::now();
        let budget = self.config.deadline_for(window.duration_std());
        let deadline = started + budget;
        info!(
            station = window.station(),
            start = %window.start(),
            end = %window.end(),
            ?budget,
            "Recording started"
        );
        self.emit(ProgressEvent::RecordingStarted {
            station: window.station().to_string(),
            expected: window.duration_std(),
        });

        let walk_cancel = cancel.child_token();
        let (segment_tx, mut segment_rx) = mpsc::channel(self.concurrency + 5);
        let walker_task = tokio::spawn(walker.run(segment_tx, walk_cancel.clone()));

        let mut in_flight = FuturesUnordered::new();
        let mut reorder: ReorderBuffer<(Segment, Bytes)> = ReorderBuffer::new();
        let mut receiving = true;
        let mut written = Written::default();

        let outcome = loop {
            if !receiving && in_flight.is_empty() {
                break Outcome::Completed;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Recording cancelled");
                    break Outcome::Cancelled;
                }

                _ = tokio::time::sleep_until(deadline) => {
                    warn!(?budget, "Recording deadline exceeded");
                    break Outcome::TimedOut;
                }

                Some((segment, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    let segment: Segment = segment;
                    match result {
                        Ok(data) => {
                            reorder.complete(segment.sequence_number, (segment, data));
                            if let Err(e) = self.write_ready(window, &mut reorder, sink, &mut written).await {
                                break Outcome::Failed(e);
                            }
                        }
                        Err(e) => {
                            warn!(sequence = segment.sequence_number, error = %e, "Segment failed");
                            break Outcome::Failed(e);
                        }
                    }
                }

                // Downloads that finished ahead of a stalled predecessor still
                // count against the depth until they are written.
                received = segment_rx.recv(), if receiving && reorder.pending() < self.concurrency => {
                    match received {
                        Some(segment) => {
                            if reorder.dispatch(segment.sequence_number) {
                                debug!(sequence = segment.sequence_number, "Dispatching segment");
                                in_flight.push(fetch_one(fetcher.clone(), segment));
                            }
                        }
                        None => {
                            debug!("Segment channel closed, draining in-flight downloads");
                            receiving = false;
                        }
                    }
                }
            }
        };

        // Stop the walk and abandon outstanding downloads.
        walk_cancel.cancel();
        drop(in_flight);
        drop(segment_rx);

        let walk = walker_task.await;
        let outcome = match (outcome, walk) {
            (Outcome::Completed, Ok(Ok(summary))) => {
                debug!(?summary, "Walker finished");
                Outcome::Completed
            }
            (Outcome::Completed, Ok(Err(e))) => Outcome::Failed(e),
            (Outcome::Completed, Err(e)) => {
                Outcome::Failed(RecordError::InternalError(format!("playlist task failed: {e}")))
            }
            (other, _) => other,
        };

        let finalized = sink.finalize().await;
        let output = match (&outcome, finalized) {
            (_, Ok(report)) => report.output,
            (Outcome::Completed, Err(e)) => return Err(e),
            (_, Err(e)) => {
                warn!(error = %e, "Finalizing sink after an aborted recording failed");
                None
            }
        };

        let complete = matches!(outcome, Outcome::Completed)
            && written.last.is_some()
            && written.covered >= window.duration_std();
        self.emit(ProgressEvent::RecordingFinished {
            segments_written: written.segments,
            bytes_written: written.bytes,
            covered: written.covered,
            complete,
            output: output.clone(),
        });

        let result = RecordingResult {
            station: window.station().to_string(),
            window: window.clone(),
            segments_written: written.segments,
            bytes_written: written.bytes,
            duration: written.covered,
            first_sequence: written.first,
            last_sequence: written.last,
            complete,
            output,
        };

        match outcome {
            Outcome::Completed => {
                if !complete {
                    warn!(
                        covered = ?result.duration,
                        expected = ?window.duration_std(),
                        "Upstream ended before the window was covered"
                    );
                }
                info!(
                    segments = result.segments_written,
                    bytes = result.bytes_written,
                    elapsed = ?started.elapsed(),
                    "Recording finished"
                );
                Ok(result)
            }
            Outcome::Cancelled => Ok(result),
            Outcome::TimedOut => Err(RecordError::RecordingTimedOut {
                elapsed: started.elapsed(),
                segments_written: written.segments,
            }),
            Outcome::Failed(e) => Err(e),
        }
    }

    async fn write_ready(
        &self,
        window: &TimeWindow,
        reorder: &mut ReorderBuffer<(Segment, Bytes)>,
        sink: &mut dyn MediaSink,
        written: &mut Written,
    ) -> Result<(), RecordError> {
        while let Some((sequence, (segment, data))) = reorder.pop_ready() {
            sink.health_check().await?;
            sink.write_segment(&data).await?;

            written.segments += 1;
            written.bytes += data.len() as u64;
            written.covered += covered_by(window, &segment);
            written.first.get_or_insert(sequence);
            written.last = Some(sequence);

            self.emit(ProgressEvent::SegmentWritten {
                sequence,
                bytes: data.len() as u64,
                segments_written: written.segments,
                bytes_written: written.bytes,
                covered: written.covered,
            });
        }
        Ok(())
    }
}

async fn fetch_one(
    fetcher: Arc<dyn SegmentSource>,
    segment: Segment,
) -> (Segment, Result<Bytes, RecordError>) {
    let result = fetcher.fetch(&segment).await;
    (segment, result)
}

/// Part of the segment inside the window; the whole segment when untimed.
fn covered_by(window: &TimeWindow, segment: &Segment) -> Duration {
    let (Some(start), Some(end)) = (segment.starts_at, segment.ends_at()) else {
        return segment.duration_std();
    };
    let start = start.max(window.start());
    let end = end.min(window.end());
    (end - start).to_std().unwrap_or_default()
}
