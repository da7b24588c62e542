//! # Builder for RecorderConfig
//!
//! Fluent API over [`RecorderConfig`] so callers only spell out what they change.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use radiko_engine::RecorderConfig;
//!
//! let config = RecorderConfig::builder()
//!     .with_timeout(Duration::from_secs(60))
//!     .download_concurrency(4)
//!     .segment_retry_count(5)
//!     .build();
//! assert_eq!(config.fetcher_config.download_concurrency, 4);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use tracing::warn;
use url::Url;

use crate::config::RecorderConfig;
use crate::proxy::ProxyConfig;

#[derive(Debug, Clone, Default)]
pub struct RecorderConfigBuilder {
    config: RecorderConfig,
}

impl RecorderConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall timeout for a single HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.base.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.base.connect_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.base.user_agent = user_agent.into();
        self
    }

    /// Add a header sent with every request; invalid names or values are skipped
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.config.base.headers.insert(name, value);
            }
            _ => warn!(name, "Ignoring invalid header"),
        }
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.base.proxy = Some(proxy);
        self.config.base.use_system_proxy = false;
        self
    }

    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        self.config.base.use_system_proxy = use_system_proxy;
        self
    }

    /// Point every upstream endpoint at another host (mirrors, test servers)
    pub fn base_url(mut self, url: Url) -> Self {
        self.config.auth_config.base_url = url;
        self
    }

    pub fn auth_key(mut self, key: impl Into<String>) -> Self {
        self.config.auth_config.auth_key = key.into();
        self
    }

    pub fn require_areafree(mut self, required: bool) -> Self {
        self.config.auth_config.require_areafree = required;
        self
    }

    pub fn logout_on_finish(mut self, logout: bool) -> Self {
        self.config.auth_config.logout_on_finish = logout;
        self
    }

    pub fn download_concurrency(mut self, concurrency: usize) -> Self {
        self.config.fetcher_config.download_concurrency = concurrency.max(1);
        self
    }

    pub fn segment_retry_count(mut self, count: u32) -> Self {
        self.config.fetcher_config.segment_retry.max_retries = count;
        self
    }

    pub fn segment_retry_delay(mut self, delay: Duration) -> Self {
        self.config.fetcher_config.segment_retry.base_delay = delay;
        self
    }

    pub fn playlist_retry_count(mut self, count: u32) -> Self {
        self.config.playlist_config.retry.max_retries = count;
        self
    }

    pub fn playlist_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.playlist_config.refresh_interval = interval;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.pipeline_config.deadline_override = Some(deadline);
        self
    }

    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sink_config.ffmpeg_path = path.into();
        self
    }

    pub fn raw_output(mut self, raw: bool) -> Self {
        self.config.sink_config.raw_output = raw;
        self
    }

    pub fn build(self) -> RecorderConfig {
        self.config
    }
}
