use std::sync::Arc;

use reqwest::{Client, IntoUrl, RequestBuilder};
use tracing::{debug, info};

use crate::auth::AuthToken;
use crate::config::DownloaderConfig;
use crate::RecordError;

pub const AUTH_TOKEN_HEADER: &str = "X-Radiko-AuthToken";

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, RecordError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.read_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        client_builder = client_builder.proxy(proxy_config.to_reqwest()?);
        info!(proxy = %proxy_config, "Using explicitly configured proxy");
    } else if config.use_system_proxy {
        debug!("Using system proxy settings");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled");
    }

    client_builder
        .build()
        .map_err(|e| RecordError::ConfigError(format!("Failed to build HTTP client: {e}")))
}

/// HTTP client bound to one playback authorization. Every request built
/// through it carries the token header.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    token: Arc<str>,
}

impl UpstreamClient {
    pub fn new(http: Client, token: &AuthToken) -> Self {
        Self {
            http,
            token: Arc::from(token.value()),
        }
    }

    pub fn get(&self, url: impl IntoUrl) -> RequestBuilder {
        self.http.get(url).header(AUTH_TOKEN_HEADER, &*self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyConfig, ProxyType};

    #[test]
    fn explicit_proxy_is_applied() {
        let config = DownloaderConfig {
            proxy: Some(
                ProxyConfig::parse("127.0.0.1:1080", ProxyType::Socks5)
                    .unwrap()
                    .with_auth("listener", "hunter2"),
            ),
            ..Default::default()
        };
        assert!(create_client(&config).is_ok());
    }
}
