//! OpenAI chat-completion wire types rendered by this gateway.

use serde::{Deserialize, Serialize};

use adp_core::Message;

pub const DEFAULT_MODEL: &str = "adp-default";
pub const MODEL_OWNER: &str = "tencent-adp";

/// Inbound `/v1/chat/completions` body. Fields this gateway does not
/// act on (temperature, max_tokens, ...) are accepted and ignored.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn model_or_default(&self) -> String {
        if self.model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            self.model.clone()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

/// Usage accounting is a non-goal; the block is shape-only.
#[derive(Debug, Serialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize, Default)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletion {
    pub fn new(id: &str, created: i64, model: &str, content: String) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion",
            created,
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant",
                    content,
                },
                finish_reason: "stop",
            }],
            usage: Usage::default(),
        }
    }
}

impl ChatCompletionChunk {
    fn new(id: &str, created: i64, model: &str, choice: ChunkChoice) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            choices: vec![choice],
        }
    }

    pub fn content(id: &str, created: i64, model: &str, text: String) -> Self {
        Self::new(
            id,
            created,
            model,
            ChunkChoice {
                index: 0,
                delta: Delta {
                    content: Some(text),
                },
                finish_reason: None,
            },
        )
    }

    pub fn finish(id: &str, created: i64, model: &str) -> Self {
        Self::new(
            id,
            created,
            model,
            ChunkChoice {
                index: 0,
                delta: Delta::default(),
                finish_reason: Some("stop"),
            },
        )
    }
}

/// OpenAI error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub code: &'static str,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, kind: &'static str, code: &'static str) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                kind,
                code,
            },
        }
    }
}
