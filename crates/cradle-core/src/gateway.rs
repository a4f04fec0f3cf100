//! REST gateway
//!
//! Stateless HTTP calls to the identity toolkit (password verification),
//! the secure token service (id token refresh) and the cloud function that
//! serves incremental event syncs.

use std::collections::BTreeMap;
use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

/// Action name of the incremental sync call
pub const SYNC_ACTION: &str = "/family/trackz/sync2";

/// Header carrying the instance id token on sync calls
pub const INSTANCE_TOKEN_HEADER: &str = "Firebase-Instance-ID-Token";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfiguration(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid credentials")]
    AuthenticationFailed,

    #[error("Gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid gateway payload: {0}")]
    InvalidPayload(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Tokens issued by a password login
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordGrant {
    pub id_token: String,
    pub refresh_token: String,
    #[serde(rename = "expiresIn", deserialize_with = "seconds")]
    pub expires_in: i64,
    #[serde(default)]
    pub local_id: String,
    #[serde(default)]
    pub email: String,
}

/// Tokens issued by a refresh
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub id_token: String,
    pub refresh_token: String,
    #[serde(deserialize_with = "seconds")]
    pub expires_in: i64,
    #[serde(default)]
    pub user_id: String,
}

impl fmt::Debug for PasswordGrant {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PasswordGrant")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("local_id", &self.local_id)
            .field("email", &self.email)
            .finish()
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenGrant")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// One page of the incremental sync, events still unclassified
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResult {
    #[serde(default)]
    pub next_sync_key: String,
    #[serde(default)]
    pub trackz: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    result: StatsResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct StatsRequest<'a> {
    data: StatsRequestData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsRequestData<'a> {
    action: &'static str,
    family_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_sync_key: Option<&'a str>,
}

impl<'a> StatsRequest<'a> {
    /// An empty cursor requests a full sync
    fn new(family_key: &'a str, cursor: &'a str) -> Self {
        Self {
            data: StatsRequestData {
                action: SYNC_ACTION,
                family_key,
                prev_sync_key: Some(cursor).filter(|c| !c.is_empty()),
            },
        }
    }
}

/// Remote calls the login flow and sync engine depend on
#[allow(async_fn_in_trait)]
pub trait Gateway {
    /// Exchange email and password for tokens
    async fn verify_password(&self, email: &str, password: &str) -> GatewayResult<PasswordGrant>;

    /// Mint a new id token from a refresh token
    async fn refresh_token(&self, refresh_token: &str) -> GatewayResult<TokenGrant>;

    /// Fetch events changed since `cursor` (empty for a full sync)
    async fn fetch_stats(
        &self,
        id_token: &str,
        family_key: &str,
        cursor: &str,
    ) -> GatewayResult<StatsResult>;
}

/// [`Gateway`] over HTTPS
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    api_key: String,
    instance_token: String,
    identity_url: String,
    token_url: String,
    functions_url: String,
}

impl HttpGateway {
    pub fn from_config(config: &Config) -> GatewayResult<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            api_key: config.api_key.clone(),
            instance_token: config.instance_token.clone(),
            identity_url: normalize_endpoint(&config.identity_url)?,
            token_url: normalize_endpoint(&config.token_url)?,
            functions_url: normalize_endpoint(&config.functions_url)?,
        })
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> GatewayResult<reqwest::Response> {
        let response = self.client.post(url).json(body).send().await?;
        debug!("POST {} -> {}", redact_key(url), response.status());
        Ok(response)
    }
}

impl Gateway for HttpGateway {
    async fn verify_password(&self, email: &str, password: &str) -> GatewayResult<PasswordGrant> {
        let url = format!("{}/verifyPassword?key={}", self.identity_url, self.api_key);
        let response = self
            .post_json(
                &url,
                &VerifyPasswordRequest {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::AuthenticationFailed);
        }
        Ok(response.json::<PasswordGrant>().await?)
    }

    async fn refresh_token(&self, refresh_token: &str) -> GatewayResult<TokenGrant> {
        let url = format!("{}?key={}", self.token_url, self.api_key);
        let response = self
            .post_json(
                &url,
                &RefreshTokenRequest {
                    grant_type: "refresh_token",
                    refresh_token,
                },
            )
            .await?;

        let response = error_for_status(response).await?;
        Ok(response.json::<TokenGrant>().await?)
    }

    async fn fetch_stats(
        &self,
        id_token: &str,
        family_key: &str,
        cursor: &str,
    ) -> GatewayResult<StatsResult> {
        let response = self
            .client
            .post(&self.functions_url)
            .bearer_auth(id_token)
            .header(INSTANCE_TOKEN_HEADER, &self.instance_token)
            .json(&StatsRequest::new(family_key, cursor))
            .send()
            .await?;
        debug!("POST {} -> {}", self.functions_url, response.status());

        let response = error_for_status(response).await?;
        let payload = response.json::<StatsResponse>().await?;
        Ok(payload.result)
    }
}

async fn error_for_status(response: reqwest::Response) -> GatewayResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        status: status.as_u16(),
        body: parse_api_error(status, &body),
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorDetail {
    Message { message: String },
    Text(String),
}

/// Pull the message out of a `{"error": ...}` body, falling back to the raw text
fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        return match payload.error {
            ApiErrorDetail::Message { message } => message,
            ApiErrorDetail::Text(text) => text,
        };
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_endpoint(raw: &str) -> GatewayResult<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(GatewayError::InvalidConfiguration(
            "endpoint must not be empty".to_string(),
        ));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(GatewayError::InvalidConfiguration(format!(
            "endpoint '{}' must include http:// or https://",
            endpoint
        )))
    }
}

fn redact_key(url: &str) -> &str {
    url.split_once("?key=").map_or(url, |(base, _)| base)
}

/// Accept `"3600"` as well as `3600`
fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(i64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(secs) => Ok(secs),
        Seconds::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
