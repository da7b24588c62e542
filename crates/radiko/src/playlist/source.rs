// Manifest source: fetches and parses the time-shift playlist for one window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeDelta};
use m3u8_rs::{KeyMethod, MediaPlaylist, parse_playlist_res};
use tracing::{debug, trace};
use url::Url;

use crate::client::UpstreamClient;
use crate::config::RecorderConfig;
use crate::playlist::segment::{EncryptionMethod, KeyInfo, Manifest, Segment};
use crate::window::TimeWindow;
use crate::RecordError;

const PLAYLIST_PATH: &str = "v2/api/ts/playlist.m3u8";

#[async_trait]
pub trait ManifestSource: Send {
    /// Fetches the current media playlist. Transport failures surface as
    /// [`RecordError::NetworkError`] so the caller can retry them.
    async fn fetch_manifest(&mut self) -> Result<Manifest, RecordError>;
}

/// Random listener session id sent as `lsid`.
pub fn generate_lsid() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Entry URL of the time-shift playlist anchored at the window start.
pub fn playlist_url(
    base_url: &Url,
    window: &TimeWindow,
    chunk_length_secs: u32,
    lsid: &str,
) -> Result<Url, RecordError> {
    let mut url = base_url
        .join(PLAYLIST_PATH)
        .map_err(|e| RecordError::ConfigError(format!("Invalid playlist endpoint: {e}")))?;
    let start = window.upstream_start();
    let end = window.upstream_end();
    url.query_pairs_mut()
        .append_pair("station_id", window.station())
        .append_pair("start_at", &start)
        .append_pair("ft", &start)
        .append_pair("end_at", &end)
        .append_pair("to", &end)
        .append_pair("seek", &start)
        .append_pair("l", &chunk_length_secs.to_string())
        .append_pair("lsid", lsid)
        .append_pair("type", "c");
    Ok(url)
}

pub struct HttpManifestSource {
    client: UpstreamClient,
    config: Arc<RecorderConfig>,
    entry_url: Url,
    /// Media playlist chosen from the master playlist, polled from then on.
    media_url: Option<Url>,
}

impl HttpManifestSource {
    pub fn new(
        client: UpstreamClient,
        config: Arc<RecorderConfig>,
        window: &TimeWindow,
    ) -> Result<Self, RecordError> {
        let entry_url = playlist_url(
            &config.auth_config.base_url,
            window,
            config.playlist_config.chunk_length_secs,
            &generate_lsid(),
        )?;
        debug!(url = %entry_url, "Time-shift playlist entry");
        Ok(Self {
            client,
            config,
            entry_url,
            media_url: None,
        })
    }

    async fn fetch_bytes(&self, url: &Url) -> Result<bytes::Bytes, RecordError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.playlist_config.fetch_timeout)
            .send()
            .await?;
        let status = response.status();
        if status.is_client_error() {
            return Err(RecordError::PlaylistUnavailable(format!(
                "{url} returned HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(RecordError::network(format!("{url} returned HTTP {status}")));
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch_manifest(&mut self) -> Result<Manifest, RecordError> {
        // At most one hop: master playlist -> media playlist.
        for _ in 0..2 {
            let url = self.media_url.clone().unwrap_or_else(|| self.entry_url.clone());
            let body = self.fetch_bytes(&url).await?;
            match parse_playlist_res(&body) {
                Ok(m3u8_rs::Playlist::MediaPlaylist(playlist)) => {
                    return parse_media_playlist(&playlist, &url);
                }
                Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => {
                    if self.media_url.is_some() {
                        return Err(RecordError::ProtocolError(format!(
                            "expected a media playlist at {url}, got a master playlist"
                        )));
                    }
                    let variant = master
                        .variants
                        .iter()
                        .find(|v| !v.is_i_frame)
                        .ok_or_else(|| {
                            RecordError::ProtocolError("master playlist has no variants".into())
                        })?;
                    let media_url = url.join(&variant.uri).map_err(|e| {
                        RecordError::ProtocolError(format!(
                            "bad variant URI {}: {e}",
                            variant.uri
                        ))
                    })?;
                    debug!(url = %media_url, "Selected media playlist");
                    self.media_url = Some(media_url);
                }
                Err(e) => {
                    return Err(RecordError::ProtocolError(format!(
                        "failed to parse playlist from {url}: {e}"
                    )));
                }
            }
        }
        Err(RecordError::ProtocolError(
            "media playlist could not be resolved".into(),
        ))
    }
}

/// Converts a parsed media playlist into ordered [`Segment`] records with
/// absolute URIs, the key in effect for each segment and its start time.
pub fn parse_media_playlist(playlist: &MediaPlaylist, base: &Url) -> Result<Manifest, RecordError> {
    let mut segments = Vec::with_capacity(playlist.segments.len());
    let mut current_key: Option<KeyInfo> = None;
    let mut next_start: Option<DateTime<FixedOffset>> = None;

    for (idx, media_segment) in playlist.segments.iter().enumerate() {
        let sequence_number = playlist.media_sequence + idx as u64;

        if let Some(key) = &media_segment.key {
            current_key = parse_key(key, base)?;
        }

        let duration = f64::from(media_segment.duration);
        if !duration.is_finite() || duration < 0.0 {
            return Err(RecordError::ProtocolError(format!(
                "segment {sequence_number} has invalid duration {duration}"
            )));
        }

        let uri = base
            .join(&media_segment.uri)
            .map_err(|e| {
                RecordError::ProtocolError(format!(
                    "bad segment URI {}: {e}",
                    media_segment.uri
                ))
            })?
            .to_string();

        let starts_at = media_segment.program_date_time.or(next_start);
        next_start =
            starts_at.map(|t| t + TimeDelta::milliseconds((duration * 1000.0).round() as i64));

        trace!(sequence_number, %uri, "Parsed segment");
        segments.push(Segment {
            sequence_number,
            uri,
            duration,
            key: current_key.clone(),
            starts_at,
        });
    }

    Ok(Manifest {
        media_sequence: playlist.media_sequence,
        target_duration: Duration::from_secs(playlist.target_duration),
        end_list: playlist.end_list,
        segments,
    })
}

fn parse_key(key: &m3u8_rs::Key, base: &Url) -> Result<Option<KeyInfo>, RecordError> {
    let method = match &key.method {
        KeyMethod::None => return Ok(None),
        KeyMethod::AES128 => EncryptionMethod::Aes128,
        KeyMethod::SampleAES => EncryptionMethod::SampleAes,
        KeyMethod::Other(other) => EncryptionMethod::Other(other.clone()),
    };
    let uri = key
        .uri
        .as_deref()
        .ok_or_else(|| RecordError::ProtocolError("EXT-X-KEY without URI".into()))?;
    let uri = base
        .join(uri)
        .map_err(|e| RecordError::ProtocolError(format!("bad key URI {uri}: {e}")))?
        .to_string();
    let iv = key.iv.as_deref().map(parse_iv).transpose()?;
    Ok(Some(KeyInfo { method, uri, iv }))
}

fn parse_iv(iv_hex: &str) -> Result<[u8; 16], RecordError> {
    let digits = iv_hex
        .strip_prefix("0x")
        .or_else(|| iv_hex.strip_prefix("0X"))
        .unwrap_or(iv_hex);
    let mut iv = [0u8; 16];
    hex::decode_to_slice(digits, &mut iv)
        .map_err(|e| RecordError::ProtocolError(format!("bad IV '{iv_hex}': {e}")))?;
    Ok(iv)
}
