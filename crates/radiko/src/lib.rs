//! # radiko-engine
//!
//! Records time-shift ("catch-up") programs from radiko into a local
//! audio file.
//!
//! ## Features
//!
//! - Member login and the auth1/auth2 partial-key handshake
//! - Window validation against the archive's retention and alignment rules
//! - Playlist walking with duplicate suppression across refreshes
//! - Concurrent segment download with AES-128 decryption and in-order output
//! - ffmpeg remuxing or raw output, with progress callbacks and cancellation

pub mod auth;
pub mod builder;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod playlist;
pub mod proxy;
pub mod recorder;
pub mod retry;
pub mod sink;
pub mod window;

pub use auth::{AuthSession, AuthToken, KeyDeriver, PartialAuth};
pub use builder::RecorderConfigBuilder;
pub use client::{UpstreamClient, create_client};
pub use config::{DownloaderConfig, RecorderConfig};
pub use credentials::Credentials;
pub use error::{RecordError, WindowViolation};
pub use fetch::{DecryptionKeyCache, SegmentFetcher, SegmentSource};
pub use pipeline::{OnProgress, ProgressEvent, RecordingPipeline, RecordingResult};
pub use playlist::{ManifestSource, PlaylistWalker, Segment};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use recorder::Recorder;
pub use retry::RetryPolicy;
pub use sink::{FfmpegSink, FileSink, MediaSink, SinkReport};
pub use window::{TimeWindow, WindowResolver};

// Re-export for callers driving cancellation.
pub use tokio_util::sync::CancellationToken;
