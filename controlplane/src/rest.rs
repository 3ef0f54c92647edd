//! Signed REST client for the control-plane HTTP surface (§6
//! "Control-plane HTTP surface").
//!
//! Every request carries `X-Api-Key`, `X-Timestamp`, and
//! `X-Signature = HMAC-SHA256(apiSecret, method || path || body || timestamp)`.
//! The server rejects a timestamp more than 300 s out of sync, so this client
//! always signs with the current wall clock at send time — it does not retry
//! a stale signature, that's the caller's (reconnect loop's) job.

use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::error::ControlPlaneError;

#[derive(Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// One-shot credential provisioning (`POST /agent/register`). Callable
    /// before an agent id exists, so it is unsigned apart from whatever the
    /// provisioning payload itself carries.
    pub async fn register(
        &self,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ControlPlaneError> {
        let url = self.base_url.join("/agent/register").map_err(|e| ControlPlaneError::Malformed(e.to_string()))?;
        let response = self.http.post(url).json(body).send().await?;
        read_json(response).await
    }

    pub async fn heartbeat(
        &self,
        agent_id: &str,
        api_key: &str,
        api_secret: &[u8],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ControlPlaneError> {
        self.signed(Method::POST, &format!("/agent/{agent_id}/heartbeat"), api_key, api_secret, Some(body))
            .await
    }

    pub async fn poll_pending(
        &self,
        agent_id: &str,
        api_key: &str,
        api_secret: &[u8],
    ) -> Result<serde_json::Value, ControlPlaneError> {
        self.signed(
            Method::GET,
            &format!("/agent/{agent_id}/commands/pending"),
            api_key,
            api_secret,
            None,
        )
        .await
    }

    pub async fn patch_command(
        &self,
        agent_id: &str,
        api_key: &str,
        api_secret: &[u8],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ControlPlaneError> {
        self.signed(Method::PATCH, &format!("/agent/{agent_id}/command"), api_key, api_secret, Some(body))
            .await
    }

    pub async fn post_trade(
        &self,
        agent_id: &str,
        api_key: &str,
        api_secret: &[u8],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ControlPlaneError> {
        self.signed(Method::POST, &format!("/agent/{agent_id}/trades"), api_key, api_secret, Some(body))
            .await
    }

    pub async fn post_alert(
        &self,
        agent_id: &str,
        api_key: &str,
        api_secret: &[u8],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ControlPlaneError> {
        self.signed(Method::POST, &format!("/agent/{agent_id}/alerts"), api_key, api_secret, Some(body))
            .await
    }

    pub async fn post_error(
        &self,
        agent_id: &str,
        api_key: &str,
        api_secret: &[u8],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ControlPlaneError> {
        self.signed(Method::POST, &format!("/agent/{agent_id}/errors"), api_key, api_secret, Some(body))
            .await
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        api_key: &str,
        api_secret: &[u8],
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, ControlPlaneError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ControlPlaneError::Malformed(e.to_string()))?;
        let body_str = match body {
            Some(b) => serde_json::to_string(b).map_err(|e| ControlPlaneError::Malformed(e.to_string()))?,
            None => String::new(),
        };
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign_request(method.as_str(), path, &body_str, timestamp, api_secret);

        let mut request = self
            .http
            .request(method, url)
            .header("X-Api-Key", api_key)
            .header("X-Timestamp", timestamp.to_string())
            .header("X-Signature", signature);
        if body.is_some() {
            request = request.header("Content-Type", "application/json").body(body_str);
        }

        let response = request.send().await?;
        read_json(response).await
    }
}

/// `HMAC-SHA256(apiSecret, method || path || body || timestamp)`, per §6.
fn sign_request(method: &str, path: &str, body: &str, timestamp: i64, api_secret: &[u8]) -> String {
    let mut message = String::with_capacity(method.len() + path.len() + body.len() + 20);
    message.push_str(method);
    message.push_str(path);
    message.push_str(body);
    message.push_str(&timestamp.to_string());
    agent_crypto::sign(message.as_bytes(), api_secret)
}

async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, ControlPlaneError> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::NO_CONTENT || body.is_empty() {
        if status.is_success() {
            return Ok(serde_json::Value::Null);
        }
        return Err(ControlPlaneError::Status { status: status.as_u16(), body });
    }

    if !status.is_success() {
        return Err(ControlPlaneError::Status { status: status.as_u16(), body });
    }

    serde_json::from_str(&body).map_err(|e| ControlPlaneError::Malformed(e.to_string()))
}
