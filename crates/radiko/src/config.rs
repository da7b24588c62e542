use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, TimeDelta, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use url::Url;

use crate::proxy::ProxyConfig;
use crate::retry::RetryPolicy;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Secret shipped with the upstream's HTML5 player; partial keys are cut from it.
pub const DEFAULT_AUTH_KEY: &str = "bcd151073c03b352e1ef2fd66c32209da9ca0afa";

pub const DEFAULT_BASE_URL: &str = "https://radiko.jp";

/// Japan Standard Time, the zone every upstream timestamp is expressed in.
const SERVICE_UTC_OFFSET_SECS: i32 = 9 * 3600;

/// HTTP client options
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for a single HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Idle timeout for pooled connections
    pub read_timeout: Duration,

    pub follow_redirects: bool,

    pub user_agent: String,

    /// Extra headers sent with every request
    pub headers: HeaderMap,

    /// Explicit proxy, takes precedence over `use_system_proxy`
    pub proxy: Option<ProxyConfig>,

    pub use_system_proxy: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true,
        }
    }
}

impl DownloaderConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("ja,en-US;q=0.7,en;q=0.3"),
        );
        default_headers
    }
}

// --- Authentication ---
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Root of the upstream API; every endpoint path is joined onto it.
    pub base_url: Url,
    pub app_id: String,
    pub app_version: String,
    pub device: String,
    pub user: String,
    /// Embedded secret the partial key is derived from.
    pub auth_key: String,
    pub request_timeout: Duration,
    /// Applied to transport failures of the handshake as a whole.
    pub retry: RetryPolicy,
    /// Reject member sessions that are not entitled to out-of-area playback.
    pub require_areafree: bool,
    pub logout_on_finish: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            app_id: "pc_html5".to_owned(),
            app_version: "0.0.1".to_owned(),
            device: "pc".to_owned(),
            user: "dummy_user".to_owned(),
            auth_key: DEFAULT_AUTH_KEY.to_owned(),
            request_timeout: Duration::from_secs(15),
            retry: RetryPolicy::new(3, Duration::from_secs(1)),
            require_areafree: true,
            logout_on_finish: true,
        }
    }
}

// --- Window validation ---
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub utc_offset: FixedOffset,
    /// How far back the time-shift archive reaches.
    pub retention: TimeDelta,
    pub max_duration: TimeDelta,
    /// Minimum distance between the window end and "now".
    pub safety_margin: TimeDelta,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            utc_offset: FixedOffset::east_opt(SERVICE_UTC_OFFSET_SECS)
                .unwrap_or_else(|| Utc.fix()),
            retention: TimeDelta::days(7),
            max_duration: TimeDelta::hours(24),
            safety_margin: TimeDelta::minutes(1),
        }
    }
}

// --- Playlist ---
#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    pub fetch_timeout: Duration,
    /// Upper bound for the wait between manifest refreshes when no new
    /// segments were returned; the segment duration bounds it as well.
    pub refresh_interval: Duration,
    pub min_refresh_interval: Duration,
    /// Value of the `l` query parameter.
    pub chunk_length_secs: u32,
    pub retry: RetryPolicy,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(15),
            refresh_interval: Duration::from_secs(5),
            min_refresh_interval: Duration::from_millis(200),
            chunk_length_secs: 15,
            retry: RetryPolicy::new(5, Duration::from_secs(1)),
        }
    }
}

// --- Fetcher ---
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Max concurrent segment downloads
    pub download_concurrency: usize,
    pub segment_download_timeout: Duration,
    pub segment_retry: RetryPolicy,
    pub key_download_timeout: Duration,
    pub key_retry: RetryPolicy,
    /// Distinct key URIs kept at once.
    pub max_cached_keys: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 3,
            segment_download_timeout: Duration::from_secs(10),
            segment_retry: RetryPolicy::new(3, Duration::from_millis(500)),
            key_download_timeout: Duration::from_secs(5),
            key_retry: RetryPolicy::new(3, Duration::from_millis(200)),
            max_cached_keys: 8,
        }
    }
}

// --- Pipeline ---
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub deadline_multiplier: f64,
    pub deadline_grace: Duration,
    /// Replaces the derived deadline entirely when set.
    pub deadline_override: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_multiplier: 3.0,
            deadline_grace: Duration::from_secs(120),
            deadline_override: None,
        }
    }
}

impl PipelineConfig {
    pub fn deadline_for(&self, window: Duration) -> Duration {
        self.deadline_override
            .unwrap_or_else(|| window.mul_f64(self.deadline_multiplier) + self.deadline_grace)
    }
}

// --- Sink ---
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub ffmpeg_path: PathBuf,
    pub ffmpeg_loglevel: String,
    pub finalize_timeout: Duration,
    /// Lines of encoder stderr kept for error reports.
    pub stderr_tail_lines: usize,
    /// Write the decrypted ADTS stream as-is instead of remuxing it.
    pub raw_output: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffmpeg_loglevel: "error".to_owned(),
            finalize_timeout: Duration::from_secs(30),
            stderr_tail_lines: 20,
            raw_output: false,
        }
    }
}

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct RecorderConfig {
    pub base: DownloaderConfig,
    pub auth_config: AuthConfig,
    pub window_config: WindowConfig,
    pub playlist_config: PlaylistConfig,
    pub fetcher_config: FetcherConfig,
    pub pipeline_config: PipelineConfig,
    pub sink_config: SinkConfig,
}

impl RecorderConfig {
    pub fn builder() -> crate::builder::RecorderConfigBuilder {
        crate::builder::RecorderConfigBuilder::new()
    }
}
