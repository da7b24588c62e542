use std::time::Duration;

use bytes::Bytes;
use moka::future::Cache;
use tracing::debug;

use crate::client::UpstreamClient;
use crate::config::FetcherConfig;
use crate::retry::RetryPolicy;
use crate::RecordError;

const AES_128_KEY_LEN: usize = 16;

/// Key URI -> key bytes, filled on first use. Concurrent lookups of a URI
/// that is not cached yet share a single upstream request.
pub struct DecryptionKeyCache {
    client: UpstreamClient,
    cache: Cache<String, Bytes>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl DecryptionKeyCache {
    pub fn new(client: UpstreamClient, config: &FetcherConfig) -> Self {
        Self {
            client,
            cache: Cache::builder()
                .max_capacity(config.max_cached_keys.max(1))
                .build(),
            timeout: config.key_download_timeout,
            retry: config.key_retry,
        }
    }

    pub async fn get(&self, uri: &str) -> Result<Bytes, RecordError> {
        self.cache
            .try_get_with(uri.to_owned(), self.fetch(uri))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn fetch(&self, uri: &str) -> Result<Bytes, RecordError> {
        let this = self;
        let key = this
            .retry
            .run("key fetch", || async move { this.fetch_once(uri).await })
            .await
            .map_err(|e| match e {
                RecordError::DecryptionFailed(_) => e,
                other => RecordError::DecryptionFailed(format!("key {uri}: {other}")),
            })?;

        if key.len() != AES_128_KEY_LEN {
            return Err(RecordError::DecryptionFailed(format!(
                "key from {uri} has {} bytes, expected {AES_128_KEY_LEN}",
                key.len()
            )));
        }
        debug!(%uri, "Fetched decryption key");
        Ok(key)
    }

    async fn fetch_once(&self, uri: &str) -> Result<Bytes, RecordError> {
        let response = self.client.get(uri).timeout(self.timeout).send().await?;
        let status = response.status();
        if status.is_client_error() {
            return Err(RecordError::DecryptionFailed(format!(
                "client error {status} fetching key from {uri}"
            )));
        }
        if !status.is_success() {
            return Err(RecordError::network(format!(
                "HTTP {status} fetching key from {uri}"
            )));
        }
        Ok(response.bytes().await?)
    }
}
