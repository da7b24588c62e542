use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::key::KeyDeriver;
use crate::config::RecorderConfig;
use crate::credentials::Credentials;
use crate::RecordError;

const LOGIN_PATH: &str = "v4/api/member/login";
const LOGOUT_PATH: &str = "v4/api/member/logout";
const AUTH1_PATH: &str = "v2/api/auth1";
const AUTH2_PATH: &str = "v2/api/auth2";

const HEADER_APP: &str = "X-Radiko-App";
const HEADER_APP_VERSION: &str = "X-Radiko-App-Version";
const HEADER_DEVICE: &str = "X-Radiko-Device";
const HEADER_USER: &str = "X-Radiko-User";
const HEADER_AUTH_TOKEN: &str = "X-Radiko-AuthToken";
const HEADER_KEY_OFFSET: &str = "X-Radiko-KeyOffset";
const HEADER_KEY_LENGTH: &str = "X-Radiko-KeyLength";
const HEADER_PARTIAL_KEY: &str = "X-Radiko-Partialkey";

/// State between the two handshake round trips.
#[derive(Debug, Clone)]
pub struct PartialAuth {
    member_session: String,
    token: String,
    key_offset: usize,
    key_length: usize,
}

impl PartialAuth {
    pub fn key_offset(&self) -> usize {
        self.key_offset
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }
}

/// Playback authorization for one recording session. Never persisted.
#[derive(Debug, Clone)]
pub struct AuthToken {
    value: String,
    issued_at: DateTime<Utc>,
    allowed_qualities: Vec<String>,
    member_session: Option<String>,
}

impl AuthToken {
    pub fn new(value: impl Into<String>, allowed_qualities: Vec<String>) -> Self {
        Self {
            value: value.into(),
            issued_at: Utc::now(),
            allowed_qualities,
            member_session: None,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Entries granted by the upstream, in the order it returned them.
    pub fn allowed_qualities(&self) -> &[String] {
        &self.allowed_qualities
    }

    /// Area the token is valid for (first granted entry).
    pub fn area(&self) -> Option<&str> {
        self.allowed_qualities.first().map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    radiko_session: Option<String>,
    #[serde(default)]
    areafree: Option<serde_json::Value>,
}

impl LoginResponse {
    fn is_areafree(&self) -> bool {
        match &self.areafree {
            Some(serde_json::Value::String(s)) => s == "1",
            Some(serde_json::Value::Number(n)) => n.as_u64() == Some(1),
            Some(serde_json::Value::Bool(b)) => *b,
            _ => false,
        }
    }
}

pub struct AuthSession {
    http_client: Client,
    config: Arc<RecorderConfig>,
    deriver: KeyDeriver,
    /// Member session opened by `begin` and not yet handed to a token.
    pending: Mutex<Option<String>>,
}

impl AuthSession {
    pub fn new(http_client: Client, config: Arc<RecorderConfig>) -> Self {
        let deriver = KeyDeriver::new(config.auth_config.auth_key.as_str());
        Self {
            http_client,
            config,
            deriver,
            pending: Mutex::new(None),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RecordError> {
        self.config
            .auth_config
            .base_url
            .join(path)
            .map_err(|e| RecordError::ConfigError(format!("Invalid endpoint {path}: {e}")))
    }

    /// Login plus the first round trip; yields the challenge.
    pub async fn begin(&self, credentials: &Credentials) -> Result<PartialAuth, RecordError> {
        let member_session = self.login(credentials).await?;
        *self.pending.lock() = Some(member_session.clone());
        match self.auth1().await {
            Ok((token, key_offset, key_length)) => {
                debug!(key_offset, key_length, "auth1 challenge received");
                Ok(PartialAuth {
                    member_session,
                    token,
                    key_offset,
                    key_length,
                })
            }
            Err(e) => {
                self.logout(&member_session).await;
                Err(e)
            }
        }
    }

    /// Answers the challenge and yields the playback token.
    pub async fn complete(&self, partial: PartialAuth) -> Result<AuthToken, RecordError> {
        let result = self.auth2(&partial).await;
        match &result {
            Ok(_) => self.release_pending(&partial.member_session),
            Err(_) => self.logout(&partial.member_session).await,
        }
        result
    }

    /// `begin` + `complete`, retrying the whole exchange on transport failures.
    pub async fn handshake(&self, credentials: &Credentials) -> Result<AuthToken, RecordError> {
        let token = self
            .config
            .auth_config
            .retry
            .run("auth handshake", || async move {
                let partial = self.begin(credentials).await?;
                self.complete(partial).await
            })
            .await?;
        info!(area = ?token.area(), "Playback authorization granted");
        Ok(token)
    }

    /// Like [`AuthSession::handshake`], but gives up as soon as `cancel`
    /// fires and yields `None`. A member session opened before the
    /// cancellation is logged out.
    pub async fn handshake_or_cancel(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<Option<AuthToken>, RecordError> {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Authentication cancelled");
                self.abandon().await;
                Ok(None)
            }

            result = self.handshake(credentials) => result.map(Some),
        }
    }

    /// Logs out a member session left behind by an interrupted handshake.
    pub async fn abandon(&self) {
        let pending = self.pending.lock().take();
        if let Some(session) = pending {
            self.logout(&session).await;
        }
    }

    fn release_pending(&self, session: &str) {
        let mut pending = self.pending.lock();
        if pending.as_deref() == Some(session) {
            *pending = None;
        }
    }

    /// Best-effort logout; the token simply expires otherwise.
    pub async fn end(&self, token: &AuthToken) {
        if !self.config.auth_config.logout_on_finish {
            return;
        }
        if let Some(session) = &token.member_session {
            self.logout(session).await;
        }
    }

    async fn login(&self, credentials: &Credentials) -> Result<String, RecordError> {
        let response = self
            .http_client
            .post(self.endpoint(LOGIN_PATH)?)
            .timeout(self.config.auth_config.request_timeout)
            .form(&[("mail", credentials.identity()), ("pass", credentials.secret())])
            .send()
            .await?;
        let response = check_status(response, "login")?;
        let login: LoginResponse = response.json().await.map_err(|e| {
            RecordError::AuthRejected(format!("login returned malformed body: {e}"))
        })?;

        let session = login
            .radiko_session
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RecordError::AuthRejected("login returned no session".to_string()))?;

        if self.config.auth_config.require_areafree && !login.is_areafree() {
            self.logout(&session).await;
            return Err(RecordError::AuthRejected(
                "member account is not entitled to area-free playback".to_string(),
            ));
        }
        debug!("Member login succeeded");
        Ok(session)
    }

    async fn auth1(&self) -> Result<(String, usize, usize), RecordError> {
        let auth = &self.config.auth_config;
        let response = self
            .http_client
            .get(self.endpoint(AUTH1_PATH)?)
            .timeout(auth.request_timeout)
            .header(HEADER_APP, &auth.app_id)
            .header(HEADER_APP_VERSION, &auth.app_version)
            .header(HEADER_DEVICE, &auth.device)
            .header(HEADER_USER, &auth.user)
            .send()
            .await?;
        let response = check_status(response, "auth1")?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| RecordError::AuthRejected(format!("auth1 response lacks {name}")))
        };
        let number = |name: &str| {
            header(name)?.parse::<usize>().map_err(|e| {
                RecordError::AuthRejected(format!("auth1 returned non-numeric {name}: {e}"))
            })
        };

        Ok((
            header(HEADER_AUTH_TOKEN)?.to_string(),
            number(HEADER_KEY_OFFSET)?,
            number(HEADER_KEY_LENGTH)?,
        ))
    }

    async fn auth2(&self, partial: &PartialAuth) -> Result<AuthToken, RecordError> {
        let auth = &self.config.auth_config;
        let partial_key = self
            .deriver
            .derive_encoded(partial.key_offset, partial.key_length)?;

        let response = self
            .http_client
            .get(self.endpoint(AUTH2_PATH)?)
            .query(&[("radiko_session", partial.member_session.as_str())])
            .timeout(auth.request_timeout)
            .header(HEADER_DEVICE, &auth.device)
            .header(HEADER_USER, &auth.user)
            .header(HEADER_AUTH_TOKEN, &partial.token)
            .header(HEADER_PARTIAL_KEY, partial_key)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            if status.is_server_error() {
                return Err(RecordError::network(format!("auth2 returned HTTP {status}")));
            }
            return Err(RecordError::AuthRejected(format!(
                "auth2 returned HTTP {status}"
            )));
        }

        let body = response.text().await?;
        let mut allowed_qualities: Vec<String> = Vec::new();
        for entry in body.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if !allowed_qualities.iter().any(|q| q == entry) {
                allowed_qualities.push(entry.to_string());
            }
        }

        Ok(AuthToken {
            value: partial.token.clone(),
            issued_at: Utc::now(),
            allowed_qualities,
            member_session: Some(partial.member_session.clone()),
        })
    }

    async fn logout(&self, session: &str) {
        self.release_pending(session);
        let url = match self.endpoint(LOGOUT_PATH) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Skipping logout");
                return;
            }
        };
        let result = self
            .http_client
            .post(url)
            .timeout(self.config.auth_config.request_timeout)
            .form(&[("radiko_session", session)])
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => debug!("Logged out"),
            Ok(response) => warn!(status = %response.status(), "Logout was not acknowledged"),
            Err(e) => warn!(error = %e, "Logout request failed"),
        }
    }
}

/// 5xx is transient, any other non-success is a rejection.
fn check_status(response: Response, step: &str) -> Result<Response, RecordError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.is_server_error() {
        Err(RecordError::network(format!("{step} returned HTTP {status}")))
    } else {
        Err(RecordError::AuthRejected(format!(
            "{step} returned HTTP {status}"
        )))
    }
}
