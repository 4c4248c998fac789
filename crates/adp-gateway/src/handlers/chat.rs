use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use adp_client::{AdpError, ChatOptions};
use adp_core::ChatChunk;

use crate::openai::{ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ErrorResponse};
use crate::state::AppState;

/// `POST /v1/chat/completions`, streaming and non-streaming.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    if request.messages.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "messages is required and must be a non-empty array",
                "invalid_request_error",
                "invalid_messages",
            )),
        )
            .into_response();
    }

    let id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = Utc::now().timestamp();
    let model = request.model_or_default();

    if request.stream {
        stream_completion(state, request, id, created, model).await
    } else {
        completion(state, request, id, created, model).await
    }
}

async fn completion(
    state: AppState,
    request: ChatCompletionRequest,
    id: String,
    created: i64,
    model: String,
) -> Response {
    match state
        .client
        .chat(&request.messages, ChatOptions::default())
        .await
    {
        Ok(result) => {
            Json(ChatCompletion::new(&id, created, &model, result.content)).into_response()
        }
        Err(err) => error_response(&err).into_response(),
    }
}

async fn stream_completion(
    state: AppState,
    request: ChatCompletionRequest,
    id: String,
    created: i64,
    model: String,
) -> Response {
    let mut rx = match state
        .client
        .chat_stream(&request.messages, ChatOptions::default())
        .await
    {
        Ok(rx) => rx,
        Err(err) => return error_response(&err).into_response(),
    };

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            match chunk {
                ChatChunk::Content { text } => {
                    let chunk = ChatCompletionChunk::content(&id, created, &model, text);
                    match serde_json::to_string(&chunk) {
                        Ok(json) => yield Ok::<Event, Infallible>(Event::default().data(json)),
                        Err(err) => error!(%err, "failed to serialize chunk"),
                    }
                }
                // Reasoning text has no place in the OpenAI delta stream.
                ChatChunk::Thought { .. } => continue,
                ChatChunk::Done => {
                    let finish = ChatCompletionChunk::finish(&id, created, &model);
                    if let Ok(json) = serde_json::to_string(&finish) {
                        yield Ok(Event::default().data(json));
                    }
                    yield Ok(Event::default().data("[DONE]"));
                    break;
                }
                ChatChunk::Error { message } => {
                    error!(%message, "chat stream aborted");
                    yield Ok(Event::default().data("[DONE]"));
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn error_response(error: &AdpError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match error {
        AdpError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
        AdpError::UpstreamAuth { .. } | AdpError::HandshakeRejected(_) => {
            (StatusCode::BAD_GATEWAY, "upstream_auth_error")
        }
        AdpError::Network(_) | AdpError::NotConnected => {
            (StatusCode::BAD_GATEWAY, "upstream_unavailable")
        }
        AdpError::Protocol(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    (
        status,
        Json(ErrorResponse::new(error.to_string(), "api_error", code)),
    )
}
