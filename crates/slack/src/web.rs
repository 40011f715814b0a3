use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::blocks::{MessageOption, PostMessage};

pub const DEFAULT_API_BASE_URL: &str = "https://slack.com/api/";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("slack api `{method}` request failed: {source}")]
    Http {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("slack api `{method}` returned status {status}")]
    Status { method: &'static str, status: u16 },
    #[error("slack api `{method}` returned error `{error}`")]
    Slack { method: &'static str, error: String },
    #[error("slack api `{method}` response could not be decoded: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// The account the bot token belongs to, as reported by `auth.test`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub bot_id: Option<String>,
}

#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn auth_test(&self) -> Result<Identity, ApiError>;
}

#[async_trait]
pub trait MessagePoster: Send + Sync {
    async fn post_message(&self, channel: &str, options: &[MessageOption]) -> Result<(), ApiError>;
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    url: String,
}

/// Minimal Slack Web API client covering what the bot needs.
#[derive(Clone, Debug)]
pub struct WebClient {
    http: Client,
    base_url: String,
    bot_token: SecretString,
    app_token: SecretString,
}

impl WebClient {
    pub fn new(bot_token: SecretString, app_token: SecretString) -> Self {
        Self::with_base_url(DEFAULT_API_BASE_URL, bot_token, app_token)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        bot_token: SecretString,
        app_token: SecretString,
    ) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { http: Client::new(), base_url, bot_token, app_token }
    }

    /// Asks Slack for a fresh Socket Mode WebSocket URL (`apps.connections.open`).
    pub async fn open_connection(&self) -> Result<String, ApiError> {
        let response: ConnectionsOpenResponse =
            self.call("apps.connections.open", &self.app_token, &json!({})).await?;
        Ok(response.url)
    }

    async fn call<B, T>(
        &self,
        method: &'static str,
        token: &SecretString,
        body: &B,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(method, "calling slack web api");
        let response = self
            .http
            .post(format!("{}{method}", self.base_url))
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Http { method, source })?;

        if !response.status().is_success() {
            return Err(ApiError::Status { method, status: response.status().as_u16() });
        }

        let payload: Value =
            response.json().await.map_err(|source| ApiError::Http { method, source })?;
        if payload.get("ok").and_then(Value::as_bool) != Some(true) {
            let error =
                payload.get("error").and_then(Value::as_str).unwrap_or("unknown_error").to_owned();
            return Err(ApiError::Slack { method, error });
        }

        serde_json::from_value(payload).map_err(|source| ApiError::Decode { method, source })
    }
}

#[async_trait]
impl IdentityLookup for WebClient {
    async fn auth_test(&self) -> Result<Identity, ApiError> {
        self.call("auth.test", &self.bot_token, &json!({})).await
    }
}

#[async_trait]
impl MessagePoster for WebClient {
    async fn post_message(&self, channel: &str, options: &[MessageOption]) -> Result<(), ApiError> {
        let body = PostMessage::render(channel, options);
        let _: Value = self.call("chat.postMessage", &self.bot_token, &body).await?;
        Ok(())
    }
}
