use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PlaylistConfig;
use crate::playlist::segment::{Manifest, Segment};
use crate::playlist::source::ManifestSource;
use crate::window::TimeWindow;
use crate::RecordError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerState {
    /// No manifest fetched yet; the request is anchored at the window start.
    Positioning,
    Streaming,
    /// The window end was reached or the upstream ended the playlist.
    Draining,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub segments_emitted: u64,
    pub manifest_fetches: u64,
    /// Jumps in the sequence between two emitted segments.
    pub sequence_gaps: u64,
    /// The walk ended because the window end was covered, not because the
    /// upstream stopped listing segments.
    pub reached_end: bool,
}

struct PlaylistCursor {
    last_consumed: Option<u64>,
    /// Estimated start of the next unconsumed segment, for manifests
    /// without `EXT-X-PROGRAM-DATE-TIME`.
    next_start: DateTime<FixedOffset>,
}

pub struct PlaylistWalker {
    source: Box<dyn ManifestSource>,
    window: TimeWindow,
    config: PlaylistConfig,
    state: WalkerState,
    cursor: PlaylistCursor,
    summary: WalkSummary,
}

impl PlaylistWalker {
    pub fn new(source: Box<dyn ManifestSource>, window: TimeWindow, config: PlaylistConfig) -> Self {
        let cursor = PlaylistCursor {
            last_consumed: None,
            next_start: window.start(),
        };
        Self {
            source,
            window,
            config,
            state: WalkerState::Positioning,
            cursor,
            summary: WalkSummary::default(),
        }
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    pub fn summary(&self) -> &WalkSummary {
        &self.summary
    }

    /// Returns the next run of unseen in-window segments in ascending
    /// sequence order, waiting and re-fetching while the upstream has
    /// nothing new. `None` once the walk is done.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Segment>>, RecordError> {
        loop {
            match self.state {
                WalkerState::Done => return Ok(None),
                WalkerState::Draining => {
                    debug!(station = self.window.station(), "Playlist walk finished");
                    self.state = WalkerState::Done;
                    return Ok(None);
                }
                WalkerState::Positioning | WalkerState::Streaming => {}
            }

            let manifest = self.fetch_with_retry().await?;
            if self.state == WalkerState::Positioning {
                debug!(
                    media_sequence = manifest.media_sequence,
                    segments = manifest.segments.len(),
                    "Positioned on time-shift playlist"
                );
                self.state = WalkerState::Streaming;
            }

            let (batch, end_reached) = self.select(&manifest);
            if end_reached {
                self.summary.reached_end = true;
            }
            if end_reached || manifest.end_list {
                self.state = WalkerState::Draining;
            }

            if !batch.is_empty() {
                self.summary.segments_emitted += batch.len() as u64;
                return Ok(Some(batch));
            }
            if self.state == WalkerState::Draining {
                continue;
            }

            let delay = self.refresh_delay(&manifest);
            debug!(?delay, "No new segments yet, waiting for playlist to extend");
            tokio::time::sleep(delay).await;
        }
    }

    /// Drives the walk to completion, pushing segments into `tx`. Stops
    /// early without error when cancelled or when the receiver is gone.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<Segment>,
        cancel: CancellationToken,
    ) -> Result<WalkSummary, RecordError> {
        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Playlist walk cancelled");
                    break;
                }
                batch = self.next_batch() => batch?,
            };
            let Some(batch) = batch else {
                break;
            };
            for segment in batch {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(self.summary),
                    sent = tx.send(segment) => {
                        if sent.is_err() {
                            debug!("Segment receiver dropped, stopping playlist walk");
                            return Ok(self.summary);
                        }
                    }
                }
            }
        }
        info!(
            station = self.window.station(),
            segments = self.summary.segments_emitted,
            fetches = self.summary.manifest_fetches,
            "Playlist walk complete"
        );
        Ok(self.summary)
    }

    async fn fetch_with_retry(&mut self) -> Result<Manifest, RecordError> {
        let policy = self.config.retry;
        let mut attempt = 0;
        loop {
            self.summary.manifest_fetches += 1;
            match self.source.fetch_manifest().await {
                Ok(manifest) => return Ok(manifest),
                Err(e) if e.is_retryable() => {
                    if attempt >= policy.max_retries {
                        return Err(RecordError::PlaylistUnavailable(format!(
                            "giving up after {} attempts: {e}",
                            attempt + 1
                        )));
                    }
                    attempt += 1;
                    let delay = policy.delay_for(attempt);
                    warn!(attempt, error = %e, ?delay, "Playlist fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Picks the unseen segments overlapping the window and advances the
    /// cursor past them. The flag reports that the window end is covered.
    fn select(&mut self, manifest: &Manifest) -> (Vec<Segment>, bool) {
        let mut batch = Vec::new();
        let mut end_reached = false;

        for segment in &manifest.segments {
            let sequence = segment.sequence_number;
            if self.cursor.last_consumed.is_some_and(|last| sequence <= last) {
                continue;
            }

            let start = segment.starts_at.unwrap_or(self.cursor.next_start);
            let end = start + segment.duration_delta();
            if start >= self.window.end() {
                end_reached = true;
                break;
            }
            if !self.window.overlaps(start, end) {
                continue;
            }

            if let Some(last) = self.cursor.last_consumed {
                if sequence > last + 1 {
                    warn!(from = last, to = sequence, "Sequence gap in playlist");
                    self.summary.sequence_gaps += 1;
                }
            }
            self.cursor.last_consumed = Some(sequence);
            self.cursor.next_start = end;

            let mut segment = segment.clone();
            segment.starts_at = Some(start);
            batch.push(segment);

            if end >= self.window.end() {
                end_reached = true;
                break;
            }
        }

        (batch, end_reached)
    }

    fn refresh_delay(&self, manifest: &Manifest) -> Duration {
        let segment_bound = manifest
            .segments
            .last()
            .map(Segment::duration_std)
            .filter(|d| !d.is_zero())
            .unwrap_or(manifest.target_duration);
        let delay = if segment_bound.is_zero() {
            self.config.refresh_interval
        } else {
            self.config.refresh_interval.min(segment_bound)
        };
        delay.max(self.config.min_refresh_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::window::WindowResolver;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedSource {
        responses: VecDeque<Result<Manifest, RecordError>>,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ManifestSource for ScriptedSource {
        async fn fetch_manifest(&mut self) -> Result<Manifest, RecordError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .pop_front()
                .unwrap_or_else(|| Err(RecordError::ProtocolError("script exhausted".into())))
        }
    }

    fn window(start: &str, end: &str) -> TimeWindow {
        let resolver = WindowResolver::default();
        let now = resolver.parse_timestamp("202610162300").unwrap();
        resolver.resolve_str("LFR", start, end, now).unwrap()
    }

    fn seg(sequence_number: u64, starts_at: Option<&str>) -> Segment {
        Segment {
            sequence_number,
            uri: format!("https://media.example/{sequence_number}.aac"),
            duration: 60.0,
            key: None,
            starts_at: starts_at.map(|t| DateTime::parse_from_rfc3339(t).unwrap()),
        }
    }

    fn manifest(range: std::ops::RangeInclusive<u64>, end_list: bool) -> Manifest {
        Manifest {
            media_sequence: *range.start(),
            target_duration: Duration::from_secs(60),
            end_list,
            segments: range.map(|n| seg(n, None)).collect(),
        }
    }

    fn fast_config() -> PlaylistConfig {
        PlaylistConfig {
            refresh_interval: Duration::from_millis(5),
            min_refresh_interval: Duration::from_millis(1),
            retry: RetryPolicy::new(2, Duration::from_millis(1)),
            ..Default::default()
        }
    }

    fn walker(responses: Vec<Result<Manifest, RecordError>>, window: TimeWindow) -> (PlaylistWalker, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let source = ScriptedSource {
            responses: responses.into(),
            calls: calls.clone(),
        };
        (PlaylistWalker::new(Box::new(source), window, fast_config()), calls)
    }

    async fn drain(mut walker: PlaylistWalker) -> Result<Vec<u64>, RecordError> {
        let mut seen = Vec::new();
        while let Some(batch) = walker.next_batch().await? {
            seen.extend(batch.iter().map(|s| s.sequence_number));
        }
        assert_eq!(walker.state(), WalkerState::Done);
        Ok(seen)
    }

    #[tokio::test]
    async fn overlapping_fetches_emit_each_segment_once() {
        let (walker, calls) = walker(
            vec![
                Ok(manifest(1..=4, false)),
                Ok(manifest(3..=7, false)),
                Ok(manifest(6..=10, true)),
            ],
            window("202610161000", "202610161200"),
        );
        let seen = drain(walker).await.unwrap();
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn filters_by_program_date_time() {
        let segments = vec![
            seg(1, Some("2026-10-16T09:58:00+09:00")),
            seg(2, Some("2026-10-16T09:59:00+09:00")),
            seg(3, Some("2026-10-16T10:00:00+09:00")),
            seg(4, Some("2026-10-16T10:01:00+09:00")),
            seg(5, Some("2026-10-16T10:02:00+09:00")),
            seg(6, Some("2026-10-16T10:03:00+09:00")),
            seg(7, Some("2026-10-16T10:04:00+09:00")),
        ];
        let (mut walker, calls) = walker(
            vec![Ok(Manifest {
                media_sequence: 1,
                target_duration: Duration::from_secs(60),
                end_list: false,
                segments,
            })],
            window("202610161000", "202610161003"),
        );

        let batch = walker.next_batch().await.unwrap().unwrap();
        let seen: Vec<u64> = batch.iter().map(|s| s.sequence_number).collect();
        assert_eq!(seen, vec![3, 4, 5]);
        assert_eq!(walker.state(), WalkerState::Draining);
        assert!(walker.next_batch().await.unwrap().is_none());
        assert!(walker.summary().reached_end);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn untimed_segments_are_placed_from_window_start() {
        // 60 s segments from 10:00; a 3 minute window takes exactly three.
        let (walker, _) = walker(
            vec![Ok(manifest(20..=30, false))],
            window("202610161000", "202610161003"),
        );
        assert_eq!(drain(walker).await.unwrap(), vec![20, 21, 22]);
    }

    #[tokio::test]
    async fn empty_manifest_is_refetched() {
        let empty = Manifest {
            media_sequence: 1,
            target_duration: Duration::from_secs(60),
            end_list: false,
            segments: vec![],
        };
        let (walker, calls) = walker(
            vec![Ok(empty), Ok(manifest(1..=3, true))],
            window("202610161000", "202610161100"),
        );
        assert_eq!(drain(walker).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (walker, calls) = walker(
            vec![
                Err(RecordError::network("reset")),
                Err(RecordError::network("reset")),
                Ok(manifest(1..=2, true)),
            ],
            window("202610161000", "202610161100"),
        );
        assert_eq!(drain(walker).await.unwrap(), vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_become_playlist_unavailable() {
        let (mut walker, calls) = walker(
            (0..5).map(|_| Err(RecordError::network("reset"))).collect(),
            window("202610161000", "202610161100"),
        );
        let err = walker.next_batch().await.unwrap_err();
        assert!(matches!(err, RecordError::PlaylistUnavailable(_)));
        // One attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn protocol_errors_are_not_retried() {
        let (mut walker, calls) = walker(
            vec![
                Err(RecordError::ProtocolError("garbage".into())),
                Ok(manifest(1..=2, true)),
            ],
            window("202610161000", "202610161100"),
        );
        assert!(matches!(
            walker.next_batch().await,
            Err(RecordError::ProtocolError(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_forwards_segments_in_order() {
        let (walker, _) = walker(
            vec![Ok(manifest(1..=4, false)), Ok(manifest(3..=6, true))],
            window("202610161000", "202610161200"),
        );
        let (tx, mut rx) = mpsc::channel(2);
        let handle = tokio::spawn(walker.run(tx, CancellationToken::new()));

        let mut seen = Vec::new();
        while let Some(segment) = rx.recv().await {
            seen.push(segment.sequence_number);
        }
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(summary.segments_emitted, 6);
        assert_eq!(summary.sequence_gaps, 0);
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        // Never-ending playlist: every fetch returns nothing new.
        let responses = (0..10_000)
            .map(|_| Ok(manifest(1..=1, false)))
            .collect();
        let (walker, _) = walker(responses, window("202610161000", "202610161200"));
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(walker.run(tx, cancel.clone()));

        assert_eq!(rx.recv().await.unwrap().sequence_number, 1);
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.segments_emitted, 1);
    }
}
