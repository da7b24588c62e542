use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::client::UpstreamClient;
use crate::config::FetcherConfig;
use crate::fetch::decrypt::decrypt_segment;
use crate::fetch::key_cache::DecryptionKeyCache;
use crate::playlist::Segment;
use crate::RecordError;

/// Produces the plaintext media bytes of one segment.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn fetch(&self, segment: &Segment) -> Result<Bytes, RecordError>;
}

pub struct SegmentFetcher {
    client: UpstreamClient,
    config: FetcherConfig,
    keys: DecryptionKeyCache,
}

impl SegmentFetcher {
    pub fn new(client: UpstreamClient, config: FetcherConfig) -> Self {
        let keys = DecryptionKeyCache::new(client.clone(), &config);
        Self {
            client,
            config,
            keys,
        }
    }

    /// Downloads the raw segment body, retrying transport failures and 5xx.
    async fn download(&self, segment: &Segment) -> Result<Bytes, RecordError> {
        let this = self;
        let sequence = segment.sequence_number;
        this.config
            .segment_retry
            .run("segment download", || async move { this.download_once(segment).await })
            .await
            .map_err(|e| match e {
                RecordError::NetworkError { message, .. } => RecordError::SegmentUnavailable {
                    sequence,
                    reason: format!("retries exhausted: {message}"),
                },
                other => other,
            })
    }

    async fn download_once(&self, segment: &Segment) -> Result<Bytes, RecordError> {
        let response = self
            .client
            .get(segment.uri.as_str())
            .timeout(self.config.segment_download_timeout)
            .send()
            .await?;
        let status = response.status();
        if status.is_client_error() {
            return Err(RecordError::SegmentUnavailable {
                sequence: segment.sequence_number,
                reason: format!("client error {status} for {}", segment.uri),
            });
        }
        if !status.is_success() {
            return Err(RecordError::network(format!(
                "HTTP {status} for segment {}",
                segment.uri
            )));
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl SegmentSource for SegmentFetcher {
    async fn fetch(&self, segment: &Segment) -> Result<Bytes, RecordError> {
        let body = self.download(segment).await?;
        trace!(
            sequence = segment.sequence_number,
            bytes = body.len(),
            "Downloaded segment"
        );

        let Some(key_info) = &segment.key else {
            return Ok(body);
        };
        let key = self.keys.get(&key_info.uri).await?;
        let plain = decrypt_segment(&body, key_info, &key, segment.sequence_number)?;
        debug!(
            sequence = segment.sequence_number,
            bytes = plain.len(),
            "Decrypted segment"
        );
        Ok(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthToken;
    use crate::fetch::decrypt::sequence_iv;
    use crate::fetch::decrypt::tests::encrypt;
    use crate::playlist::{EncryptionMethod, KeyInfo};
    use crate::retry::RetryPolicy;
    use futures::future::join_all;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: [u8; 16] = *b"0123456789abcdef";

    fn fetcher() -> SegmentFetcher {
        let client = UpstreamClient::new(reqwest::Client::new(), &AuthToken::new("tok", vec![]));
        let config = FetcherConfig {
            segment_retry: RetryPolicy::new(2, Duration::from_millis(1)),
            key_retry: RetryPolicy::new(2, Duration::from_millis(1)),
            ..Default::default()
        };
        SegmentFetcher::new(client, config)
    }

    fn segment(server: &MockServer, sequence_number: u64, encrypted: bool) -> Segment {
        Segment {
            sequence_number,
            uri: format!("{}/seg/{sequence_number}.aac", server.uri()),
            duration: 5.0,
            key: encrypted.then(|| KeyInfo {
                method: EncryptionMethod::Aes128,
                uri: format!("{}/key", server.uri()),
                iv: None,
            }),
            starts_at: None,
        }
    }

    #[tokio::test]
    async fn parallel_fetches_resolve_the_key_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(KEY)
                    .set_delay(Duration::from_millis(30)),
            )
            .expect(1)
            .mount(&server)
            .await;
        for n in 1..=8u64 {
            Mock::given(method("GET"))
                .and(path(format!("/seg/{n}.aac")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(encrypt(
                    format!("segment {n}").as_bytes(),
                    &KEY,
                    &sequence_iv(n),
                )))
                .mount(&server)
                .await;
        }

        let fetcher = fetcher();
        let segments: Vec<Segment> = (1..=8).map(|n| segment(&server, n, true)).collect();
        let results = join_all(segments.iter().map(|s| fetcher.fetch(s))).await;
        for (n, plain) in (1..=8).zip(results) {
            assert_eq!(plain.unwrap(), Bytes::from(format!("segment {n}")));
        }
    }

    #[tokio::test]
    async fn unencrypted_segments_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg/1.aac"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"raw".to_vec()))
            .mount(&server)
            .await;
        let body = fetcher().fetch(&segment(&server, 1, false)).await.unwrap();
        assert_eq!(&body[..], b"raw");
    }

    #[tokio::test]
    async fn server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg/5.aac"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/seg/5.aac"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"five".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        let body = fetcher().fetch(&segment(&server, 5, false)).await.unwrap();
        assert_eq!(&body[..], b"five");
    }

    #[tokio::test]
    async fn missing_segment_is_unavailable_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg/9.aac"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        let err = fetcher().fetch(&segment(&server, 9, false)).await.unwrap_err();
        assert!(matches!(err, RecordError::SegmentUnavailable { sequence: 9, .. }));
    }

    #[tokio::test]
    async fn exhausted_retries_are_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;
        let err = fetcher().fetch(&segment(&server, 2, false)).await.unwrap_err();
        assert!(matches!(err, RecordError::SegmentUnavailable { sequence: 2, .. }));
    }

    #[tokio::test]
    async fn corrupt_ciphertext_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(KEY))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/seg/3.aac"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 21]))
            .mount(&server)
            .await;
        let err = fetcher().fetch(&segment(&server, 3, true)).await.unwrap_err();
        assert!(matches!(err, RecordError::DecryptionFailed(_)));
    }
}
