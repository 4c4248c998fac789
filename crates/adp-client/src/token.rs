//! Short-lived WebSocket token acquisition and caching.
//!
//! Tokens are fetched through a signed REST call and cached for their
//! (locally assumed) lifetime. The refresh runs while holding the
//! write guard, so concurrent misses collapse into a single network
//! call; a slow refresh blocks other token readers for its duration.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{AdpError, Result};
use crate::signer::{self, Signer};

/// Fixed vendor token-issuance endpoint.
pub const TOKEN_ENDPOINT: &str = "https://lke.tencentcloudapi.com/";

const ACTION: &str = "GetWsToken";
/// API visitor mode.
const VISITOR_TYPE: u32 = 5;
/// Local assumption tracking the vendor's actual token TTL.
const TOKEN_TTL: Duration = Duration::from_secs(270);
/// Never hand out a token with less than this much lifetime left.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at.saturating_duration_since(Instant::now()) > EXPIRY_MARGIN
    }
}

/// Process-wide token cache backed by the vendor token endpoint.
pub struct TokenService {
    http: Client,
    signer: Signer,
    bot_app_key: String,
    endpoint: String,
    cached: RwLock<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(rename = "Response")]
    response: ResponseBody,
}

#[derive(Deserialize)]
struct ResponseBody {
    #[serde(rename = "Token")]
    token: Option<String>,
    #[serde(rename = "Error")]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message")]
    message: String,
}

impl TokenService {
    pub fn new(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        bot_app_key: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            signer: Signer::new(secret_id, secret_key),
            bot_app_key: bot_app_key.into(),
            endpoint: TOKEN_ENDPOINT.to_string(),
            cached: RwLock::new(None),
        }
    }

    /// Override the token endpoint. Production uses the fixed vendor
    /// URL; tests point this at a local mock server.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Get a token with more than the safety margin of lifetime left,
    /// fetching a fresh one if needed.
    pub async fn get_token(&self) -> Result<String> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref().filter(|entry| entry.is_fresh()) {
                debug!("using cached token");
                return Ok(entry.token.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Re-check: another caller may have refreshed while we waited
        // for the write guard.
        if let Some(entry) = cached.as_ref().filter(|entry| entry.is_fresh()) {
            return Ok(entry.token.clone());
        }

        let token = self.request_token().await?;
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + TOKEN_TTL,
        });
        Ok(token)
    }

    async fn request_token(&self) -> Result<String> {
        let body = serde_json::json!({
            "Type": VISITOR_TYPE,
            "BotAppKey": self.bot_app_key,
        });
        let body = serde_json::to_vec(&body)
            .map_err(|e| AdpError::Protocol(format!("token request body: {e}")))?;

        let timestamp = chrono::Utc::now().timestamp();
        let authorization = self.signer.authorization(ACTION, &body, timestamp);

        info!(action = ACTION, "requesting websocket token");
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(HTTP_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("Authorization", authorization)
            .header("X-TC-Action", ACTION)
            .header("X-TC-Version", signer::API_VERSION)
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("X-TC-Region", signer::REGION)
            .body(body)
            .send()
            .await
            .map_err(|e| AdpError::Network(format!("token request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AdpError::Network(format!("token response read failed: {e}")))?;

        if !status.is_success() {
            return Err(AdpError::Protocol(format!(
                "token endpoint returned {status}: {text}"
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| AdpError::Protocol(format!("unparsable token response: {e}")))?;

        if let Some(error) = parsed.response.error {
            return Err(AdpError::UpstreamAuth {
                code: error.code,
                message: error.message,
            });
        }

        let token = parsed
            .response
            .token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AdpError::Protocol("token response missing Token".to_string()))?;

        debug!(token_len = token.len(), "token acquired");
        Ok(token)
    }

    /// Force the cached token past its safety margin.
    #[cfg(test)]
    pub(crate) async fn force_expire(&self) {
        let mut cached = self.cached.write().await;
        if let Some(entry) = cached.as_mut() {
            entry.expires_at = Instant::now();
        }
    }
}
