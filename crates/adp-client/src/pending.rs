//! Correlates inbound vendor events with outstanding chat calls.
//!
//! One entry per in-flight logical request, keyed by the
//! caller-generated request id. The session's read loop dispatches
//! every decoded event here; entries leave the map on exactly one
//! terminal delivery (result, error, or timeout cleanup).

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use adp_core::ChatChunk;

use crate::client::ChatResult;
use crate::error::AdpError;
use crate::frame::EventPayload;

pub type ChunkSender = mpsc::UnboundedSender<ChatChunk>;
type ResultSender = oneshot::Sender<Result<ChatResult, AdpError>>;
pub type ResultReceiver = oneshot::Receiver<Result<ChatResult, AdpError>>;

/// One in-flight logical chat call.
struct PendingRequest {
    /// Chunk sink; present only for streaming callers.
    chunks: Option<ChunkSender>,
    /// Single-slot terminal channel, written exactly once.
    result: Option<ResultSender>,
    /// Latest cumulative content from an authoritative reply.
    full_content: String,
    /// Last raw content snapshot used for delta computation.
    last_content: String,
}

impl PendingRequest {
    fn streaming(&self) -> bool {
        self.chunks.is_some()
    }
}

/// Registry of in-flight requests.
#[derive(Default)]
pub struct PendingRequests {
    inner: DashMap<String, PendingRequest>,
}

impl PendingRequests {
    /// Insert a new pending entry. `chunks` makes the entry streaming.
    /// The returned receiver resolves on terminal delivery.
    pub fn register(&self, request_id: &str, chunks: Option<ChunkSender>) -> ResultReceiver {
        let (tx, rx) = oneshot::channel();
        self.inner.insert(
            request_id.to_string(),
            PendingRequest {
                chunks,
                result: Some(tx),
                full_content: String::new(),
                last_content: String::new(),
            },
        );
        rx
    }

    /// Remove an entry without delivering anything (timeout cleanup on
    /// the caller's side).
    pub fn remove(&self, request_id: &str) -> bool {
        self.inner.remove(request_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Route one decoded event.
    pub fn dispatch(&self, name: &str, payload: EventPayload) {
        match name {
            "reply" => self.on_reply(payload),
            "thought" => self.on_thought(payload),
            "error" => warn!(payload = ?payload, "vendor reported an error event"),
            other => debug!(event = other, "ignoring unknown event"),
        }
    }

    /// Fail one entry: streaming consumers get an `Error` chunk, the
    /// waiter gets the error.
    pub fn fail(&self, request_id: &str, error: AdpError) {
        if let Some((_, mut entry)) = self.inner.remove(request_id) {
            if let Some(chunks) = &entry.chunks {
                let _ = chunks.send(ChatChunk::error(error.to_string()));
            }
            if let Some(result) = entry.result.take() {
                let _ = result.send(Err(error));
            }
        }
    }

    /// Fail every entry (connection loss fan-out).
    pub fn fail_all(&self, error: &AdpError) {
        let keys: Vec<String> = self.inner.iter().map(|entry| entry.key().clone()).collect();
        if !keys.is_empty() {
            warn!(count = keys.len(), error = %error, "failing all pending requests");
        }
        for key in keys {
            self.fail(&key, error.clone());
        }
    }

    /// Map an inbound request id to a pending key.
    ///
    /// The vendor sometimes echoes a different id than the one sent;
    /// guessing is only safe while a single request is outstanding.
    fn resolve_key(&self, request_id: &str) -> Option<String> {
        if self.inner.contains_key(request_id) {
            return Some(request_id.to_string());
        }
        if self.inner.len() == 1 {
            let key = self.inner.iter().next().map(|entry| entry.key().clone());
            if let Some(key) = &key {
                debug!(inbound = request_id, matched = %key, "falling back to sole pending request");
            }
            return key;
        }
        None
    }

    fn on_reply(&self, payload: EventPayload) {
        let Some(key) = self.resolve_key(&payload.request_id) else {
            warn!(
                request_id = %payload.request_id,
                pending = self.inner.len(),
                "dropping unroutable reply"
            );
            return;
        };

        // Echo of the caller's own input.
        if !payload.can_rating {
            debug!(request_id = %key, "skipping echo reply");
            return;
        }

        {
            let Some(mut entry) = self.inner.get_mut(&key) else {
                return;
            };
            if entry.streaming() && !payload.content.is_empty() && payload.content != entry.last_content
            {
                let delta = if !entry.full_content.is_empty()
                    && payload.content.starts_with(&entry.full_content)
                {
                    payload.content[entry.full_content.len()..].to_string()
                } else {
                    // Overlap miss: resend the whole snapshot rather
                    // than drop text.
                    payload.content.clone()
                };
                if !delta.is_empty() {
                    if let Some(chunks) = &entry.chunks {
                        let _ = chunks.send(ChatChunk::content(delta));
                    }
                }
                entry.last_content = payload.content.clone();
            }
            if !payload.content.is_empty() {
                entry.full_content = payload.content.clone();
            }
        }

        if payload.is_final {
            self.finish(&key);
        }
    }

    fn on_thought(&self, payload: EventPayload) {
        if payload.thought.is_empty() {
            return;
        }
        let Some(key) = self.resolve_key(&payload.request_id) else {
            return;
        };
        if let Some(entry) = self.inner.get(&key) {
            if let Some(chunks) = &entry.chunks {
                let _ = chunks.send(ChatChunk::thought(payload.thought));
            }
        }
    }

    /// Terminal delivery: exactly one result (or `Done` chunk) per
    /// request, then the entry is gone.
    fn finish(&self, key: &str) {
        let Some((request_id, mut entry)) = self.inner.remove(key) else {
            return;
        };
        debug!(request_id = %request_id, "request finished");
        if let Some(chunks) = &entry.chunks {
            let _ = chunks.send(ChatChunk::Done);
        }
        if let Some(result) = entry.result.take() {
            let _ = result.send(Ok(ChatResult {
                content: entry.full_content.clone(),
                request_id,
            }));
        }
    }
}
