//! Persistent vendor connection: dial, handshake, heartbeat, read loop.
//!
//! At most one live connection at a time. Connection lifecycle and
//! socket writes share one mutex so handshake traffic never interleaves
//! with application frames. Reconnection is lazy: a dropped connection
//! is redialed on the next `ensure_connected`, never automatically.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{AdpError, Result};
use crate::frame::{self, Frame};
use crate::pending::PendingRequests;
use crate::token::TokenService;

/// Fixed vendor chat endpoint (engine.io v4 over websocket).
pub const CHAT_ENDPOINT: &str =
    "wss://wss.lke.cloud.tencent.com/v1/qbot/chat/conn/?EIO=4&transport=websocket";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Default)]
struct ConnState {
    sink: Option<WsSink>,
    authenticated: bool,
    /// Bumped on every dial and on intentional disconnect, so a stale
    /// read loop cannot clobber a successor connection's state.
    generation: u64,
}

/// Owns the persistent connection and its auth state machine.
pub struct Session {
    tokens: TokenService,
    pending: Arc<PendingRequests>,
    endpoint: String,
    state: Mutex<ConnState>,
}

impl Session {
    pub fn new(tokens: TokenService, pending: Arc<PendingRequests>) -> Self {
        Self {
            tokens,
            pending,
            endpoint: CHAT_ENDPOINT.to_string(),
            state: Mutex::new(ConnState::default()),
        }
    }

    /// Override the chat endpoint. Production uses the fixed vendor
    /// URL; tests point this at a local mock server.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Establish (or reuse) the authenticated connection. Idempotent:
    /// a live authenticated connection is returned to untouched.
    pub async fn ensure_connected(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.sink.is_some() && state.authenticated {
            debug!("reusing live connection");
            return Ok(());
        }

        // Discard any stale half-open connection before redialing.
        if let Some(mut sink) = state.sink.take() {
            let _ = sink.close().await;
        }
        state.authenticated = false;
        state.generation += 1;
        let generation = state.generation;

        let token = self.tokens.get_token().await?;

        info!(endpoint = %self.endpoint, "dialing chat endpoint");
        let (ws, _) = connect_async(&self.endpoint)
            .await
            .map_err(|e| AdpError::Network(format!("websocket dial failed: {e}")))?;
        let (mut sink, mut source) = ws.split();

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut sink, &mut source, &token))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                let _ = sink.close().await;
                return Err(error);
            }
            Err(_) => {
                let _ = sink.close().await;
                return Err(AdpError::Timeout("handshake"));
            }
        }

        state.sink = Some(sink);
        state.authenticated = true;
        info!("connection authenticated");

        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.read_loop(source, generation).await;
        });
        Ok(())
    }

    /// Send one application event frame. Requires a prior successful
    /// `ensure_connected`; a write failure drops the connection.
    pub async fn send_event(&self, name: &str, payload: &serde_json::Value) -> Result<()> {
        let raw = frame::encode_event(name, payload);
        let mut state = self.state.lock().await;
        if !state.authenticated {
            return Err(AdpError::NotConnected);
        }
        let Some(sink) = state.sink.as_mut() else {
            return Err(AdpError::NotConnected);
        };
        match sink.send(Message::Text(raw)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "event send failed, dropping connection");
                state.authenticated = false;
                if let Some(mut sink) = state.sink.take() {
                    let _ = sink.close().await;
                }
                Err(AdpError::Network(format!("event send failed: {e}")))
            }
        }
    }

    /// Close any live connection. Idempotent. In-flight requests are
    /// left to their own timeouts.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.authenticated = false;
        state.generation += 1;
        if let Some(mut sink) = state.sink.take() {
            let _ = sink.close().await;
            info!("connection closed");
        }
    }

    /// Steady-state read loop; one per live connection. Runs until the
    /// connection errors or closes.
    async fn read_loop(self: Arc<Self>, mut source: WsSource, generation: u64) {
        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                Some(Ok(Message::Close(_))) | None => {
                    info!("connection closed by peer");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "read error, dropping connection");
                    break;
                }
            }
        }
        self.mark_disconnected(generation).await;
    }

    async fn handle_frame(&self, text: &str) {
        match frame::decode(text) {
            Ok(Frame::Ping) => self.send_pong().await,
            Ok(Frame::Event { name, payload }) => match frame::decode_payload(payload) {
                Ok(payload) => self.pending.dispatch(&name, payload),
                Err(e) => {
                    warn!(error = %e, event = %name, "dropping event with undecodable payload");
                }
            },
            Ok(Frame::ConnectError(detail)) => {
                warn!(detail = %detail, "connect error on established connection");
            }
            Ok(Frame::Unrecognized) => {
                debug!(raw = %truncate(text, 80), "dropping unrecognized frame");
            }
            Ok(Frame::Open | Frame::ConnectAck) => {}
            Err(e) => warn!(error = %e, "dropping undecodable frame"),
        }
    }

    async fn send_pong(&self) {
        let mut state = self.state.lock().await;
        if let Some(sink) = state.sink.as_mut() {
            if let Err(e) = sink.send(Message::Text(frame::PONG.to_string())).await {
                warn!(error = %e, "pong write failed");
            }
        }
    }

    /// Read-loop teardown. Only the generation that owns the state may
    /// flip it; pending requests fail fast rather than riding out
    /// their timeouts.
    async fn mark_disconnected(&self, generation: u64) {
        {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return;
            }
            state.authenticated = false;
            if let Some(mut sink) = state.sink.take() {
                let _ = sink.close().await;
            }
        }
        self.pending
            .fail_all(&AdpError::Network("connection lost".to_string()));
    }
}

/// The open -> auth -> ack exchange. Bounded by the caller's timeout.
async fn handshake(sink: &mut WsSink, source: &mut WsSource, token: &str) -> Result<()> {
    loop {
        let message = match source.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(AdpError::Network(format!("handshake read failed: {e}"))),
            None => {
                return Err(AdpError::Network(
                    "connection closed during handshake".to_string(),
                ))
            }
        };
        let Message::Text(text) = message else {
            continue;
        };
        match frame::decode(&text) {
            Ok(Frame::Open) => {
                debug!("open packet received, sending auth frame");
                sink.send(Message::Text(frame::encode_auth(token)))
                    .await
                    .map_err(|e| AdpError::Network(format!("auth send failed: {e}")))?;
            }
            Ok(Frame::ConnectAck) => return Ok(()),
            Ok(Frame::ConnectError(detail)) => return Err(AdpError::HandshakeRejected(detail)),
            Ok(other) => debug!(frame = ?other, "ignoring frame during handshake"),
            Err(e) => warn!(error = %e, "dropping undecodable frame during handshake"),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}
