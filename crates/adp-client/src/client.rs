//! Public chat entry point composing the session and the correlator.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use adp_core::{ChatChunk, Message};

use crate::error::{AdpError, Result};
use crate::pending::{ChunkSender, PendingRequests, ResultReceiver};
use crate::session::{self, Session};
use crate::token::{self, TokenService};

const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(120);
const SEND_EVENT: &str = "send";

/// Result of one completed chat call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResult {
    pub content: String,
    pub request_id: String,
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Vendor-side conversation id; generated when absent.
    pub session_id: Option<String>,
    /// Completion deadline; defaults to 120s.
    pub timeout: Option<Duration>,
}

/// Client for the vendor chat service. One instance per process,
/// shared across all concurrent chat calls.
pub struct AdpClient {
    session: Arc<Session>,
    pending: Arc<PendingRequests>,
}

impl AdpClient {
    pub fn new(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        bot_app_key: impl Into<String>,
    ) -> Self {
        Self::with_endpoints(
            secret_id,
            secret_key,
            bot_app_key,
            token::TOKEN_ENDPOINT,
            session::CHAT_ENDPOINT,
        )
    }

    /// Both endpoints are fixed vendor URLs in production; injectable
    /// for tests against local mock servers.
    pub fn with_endpoints(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        bot_app_key: impl Into<String>,
        token_endpoint: &str,
        chat_endpoint: &str,
    ) -> Self {
        let pending = Arc::new(PendingRequests::default());
        let tokens =
            TokenService::new(secret_id, secret_key, bot_app_key).with_endpoint(token_endpoint);
        let session = Arc::new(
            Session::new(tokens, Arc::clone(&pending)).with_endpoint(chat_endpoint),
        );
        Self { session, pending }
    }

    /// Send a chat request and wait for the complete answer.
    pub async fn chat(&self, messages: &[Message], options: ChatOptions) -> Result<ChatResult> {
        let wait = options.timeout.unwrap_or(DEFAULT_CHAT_TIMEOUT);
        let (request_id, result) = self.submit(messages, &options, None).await?;

        match timeout(wait, result).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdpError::Protocol("pending request dropped".to_string())),
            Err(_) => {
                debug!(%request_id, "chat timed out");
                self.pending.remove(&request_id);
                Err(AdpError::Timeout("chat completion"))
            }
        }
    }

    /// Send a chat request and stream the answer.
    ///
    /// The receiver yields content/thought chunks in vendor order and
    /// ends with exactly one terminal chunk (`Done` or `Error`).
    /// Dropping the receiver stops consumption but does not cancel the
    /// vendor-side request.
    pub async fn chat_stream(
        &self,
        messages: &[Message],
        options: ChatOptions,
    ) -> Result<UnboundedReceiver<ChatChunk>> {
        let wait = options.timeout.unwrap_or(DEFAULT_CHAT_TIMEOUT);
        let (tx, rx) = mpsc::unbounded_channel();
        let (request_id, result) = self.submit(messages, &options, Some(tx)).await?;

        // Bound the stream even if the consumer never looks at it.
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            if timeout(wait, result).await.is_err() {
                debug!(%request_id, "streaming chat timed out");
                pending.fail(&request_id, AdpError::Timeout("chat completion"));
            }
        });
        Ok(rx)
    }

    /// Close the vendor connection. Idempotent; safe with no
    /// connection established.
    pub async fn disconnect(&self) {
        self.session.disconnect().await;
    }

    /// Number of in-flight chat requests.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    async fn submit(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        chunks: Option<ChunkSender>,
    ) -> Result<(String, ResultReceiver)> {
        let content = outbound_text(messages)?;
        self.session.ensure_connected().await?;

        let request_id = Uuid::new_v4().to_string();
        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let streaming = chunks.is_some();
        let result = self.pending.register(&request_id, chunks);

        let payload = json!({
            "payload": {
                "session_id": session_id,
                "request_id": request_id,
                "content": content,
            }
        });
        info!(%request_id, %session_id, streaming, "sending chat request");

        if let Err(error) = self.session.send_event(SEND_EVENT, &payload).await {
            self.pending.remove(&request_id);
            return Err(error);
        }
        Ok((request_id, result))
    }
}

/// Outbound text: the last message's content, flattened to plain text.
fn outbound_text(messages: &[Message]) -> Result<String> {
    messages
        .last()
        .map(Message::text_content)
        .ok_or_else(|| AdpError::Protocol("messages must not be empty".to_string()))
}
