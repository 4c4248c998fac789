//! End-to-end tests against an in-process mock vendor: a mockito token
//! endpoint plus a scripted WebSocket speaking the vendor framing.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use adp_client::{AdpClient, AdpError, ChatOptions};
use adp_core::{ChatChunk, Message as ChatMessage};

const TOKEN: &str = "tok-test";

async fn token_server() -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(format!(r#"{{"Response":{{"Token":"{TOKEN}"}}}}"#))
        .create_async()
        .await;
    server
}

/// Bind a one-shot vendor WebSocket and hand the accepted stream to
/// the script. Returns the ws:// url to dial.
async fn vendor_server<F, Fut>(script: F) -> String
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        script(ws).await;
    });
    format!("ws://{addr}")
}

/// Open packet, expect the auth frame carrying the token, ack it.
async fn run_handshake(ws: &mut WebSocketStream<TcpStream>) {
    ws.send(Message::Text(r#"0{"sid":"test"}"#.to_string()))
        .await
        .unwrap();
    let auth = next_text(ws).await;
    assert!(auth.starts_with("40{"), "expected auth frame, got {auth}");
    assert!(auth.contains(TOKEN), "auth frame missing token: {auth}");
    ws.send(Message::Text("40".to_string())).await.unwrap();
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match ws.next().await.expect("peer closed").unwrap() {
            Message::Text(text) => return text,
            _ => continue,
        }
    }
}

/// Pull the request id out of a `42["send",{...}]` frame.
fn request_id_of(raw: &str) -> String {
    let items: Vec<serde_json::Value> =
        serde_json::from_str(raw.strip_prefix("42").unwrap()).unwrap();
    assert_eq!(items[0], "send");
    items[1]["payload"]["request_id"]
        .as_str()
        .unwrap()
        .to_string()
}

fn reply_frame(request_id: &str, content: &str, can_rating: bool, is_final: bool) -> Message {
    Message::Text(format!(
        r#"42["reply",{{"payload":{{"request_id":"{request_id}","content":"{content}","can_rating":{can_rating},"is_final":{is_final}}}}}]"#
    ))
}

fn thought_frame(request_id: &str, thought: &str) -> Message {
    Message::Text(format!(
        r#"42["thought",{{"payload":{{"request_id":"{request_id}","thought":"{thought}"}}}}]"#
    ))
}

fn client(token_url: &str, ws_url: &str) -> AdpClient {
    AdpClient::with_endpoints("AKIDtest", "secret", "bot-key", token_url, ws_url)
}

#[tokio::test]
async fn test_non_streaming_roundtrip() {
    let token = token_server().await;
    let ws_url = vendor_server(|mut ws| async move {
        run_handshake(&mut ws).await;
        let request_id = request_id_of(&next_text(&mut ws).await);
        // Echo of the caller's own input must be ignored.
        ws.send(reply_frame(&request_id, "hi", false, false))
            .await
            .unwrap();
        ws.send(reply_frame(&request_id, "hi there", true, true))
            .await
            .unwrap();
    })
    .await;

    let client = client(&token.url(), &ws_url);
    let result = client
        .chat(&[ChatMessage::user("hi")], ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(result.content, "hi there");
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_streaming_roundtrip() {
    let token = token_server().await;
    let ws_url = vendor_server(|mut ws| async move {
        run_handshake(&mut ws).await;
        let request_id = request_id_of(&next_text(&mut ws).await);
        ws.send(thought_frame(&request_id, "thinking"))
            .await
            .unwrap();
        ws.send(reply_frame(&request_id, "Hello", true, false))
            .await
            .unwrap();
        ws.send(reply_frame(&request_id, "Hello, world", true, true))
            .await
            .unwrap();
    })
    .await;

    let client = client(&token.url(), &ws_url);
    let mut rx = client
        .chat_stream(&[ChatMessage::user("hi")], ChatOptions::default())
        .await
        .unwrap();

    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        let terminal = chunk.is_terminal();
        chunks.push(chunk);
        if terminal {
            break;
        }
    }
    assert_eq!(
        chunks,
        vec![
            ChatChunk::thought("thinking"),
            ChatChunk::content("Hello"),
            ChatChunk::content(", world"),
            ChatChunk::Done,
        ]
    );
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_handshake_rejected() {
    let token = token_server().await;
    let ws_url = vendor_server(|mut ws| async move {
        ws.send(Message::Text(r#"0{"sid":"test"}"#.to_string()))
            .await
            .unwrap();
        let _auth = next_text(&mut ws).await;
        ws.send(Message::Text("44invalid app key".to_string()))
            .await
            .unwrap();
    })
    .await;

    let client = client(&token.url(), &ws_url);
    let error = client
        .chat(&[ChatMessage::user("hi")], ChatOptions::default())
        .await
        .unwrap_err();
    match error {
        AdpError::HandshakeRejected(detail) => assert_eq!(detail, "invalid app key"),
        other => panic!("expected HandshakeRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_pong_and_connection_reuse() {
    let token = token_server().await;
    let ws_url = vendor_server(|mut ws| async move {
        run_handshake(&mut ws).await;

        // First request.
        let first = request_id_of(&next_text(&mut ws).await);
        ws.send(reply_frame(&first, "one", true, true)).await.unwrap();

        // Heartbeat: the pong and the next request may arrive in
        // either order.
        ws.send(Message::Text("2".to_string())).await.unwrap();
        let mut pong = None;
        let mut send_frame = None;
        while pong.is_none() || send_frame.is_none() {
            let text = next_text(&mut ws).await;
            if text == "3" {
                pong = Some(text);
            } else {
                send_frame = Some(text);
            }
        }

        // Second request rode the same connection: no new handshake.
        let second = request_id_of(&send_frame.unwrap());
        ws.send(reply_frame(&second, "two", true, true)).await.unwrap();
    })
    .await;

    let client = client(&token.url(), &ws_url);
    let first = client
        .chat(&[ChatMessage::user("a")], ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(first.content, "one");

    let second = client
        .chat(&[ChatMessage::user("b")], ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(second.content, "two");
}

#[tokio::test]
async fn test_chat_timeout_leaves_no_pending_entry() {
    let token = token_server().await;
    let ws_url = vendor_server(|mut ws| async move {
        run_handshake(&mut ws).await;
        let _request = next_text(&mut ws).await;
        // Never reply; keep the connection open past the deadline.
        tokio::time::sleep(Duration::from_secs(2)).await;
    })
    .await;

    let client = client(&token.url(), &ws_url);
    let error = client
        .chat(
            &[ChatMessage::user("hi")],
            ChatOptions {
                timeout: Some(Duration::from_millis(200)),
                ..ChatOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(error, AdpError::Timeout(_)), "got {error:?}");
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_connection_loss_fails_pending_fast() {
    let token = token_server().await;
    let ws_url = vendor_server(|mut ws| async move {
        run_handshake(&mut ws).await;
        let _request = next_text(&mut ws).await;
        // Drop the connection with the request still outstanding.
        let _ = ws.close(None).await;
    })
    .await;

    let client = client(&token.url(), &ws_url);
    // Default 120s deadline: only the fail-fast path can finish this
    // quickly.
    let error = tokio::time::timeout(
        Duration::from_secs(5),
        client.chat(&[ChatMessage::user("hi")], ChatOptions::default()),
    )
    .await
    .expect("connection loss must fail the call promptly")
    .unwrap_err();
    assert!(matches!(error, AdpError::Network(_)), "got {error:?}");
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let token = token_server().await;
    let ws_url = vendor_server(|mut ws| async move {
        run_handshake(&mut ws).await;
        let request_id = request_id_of(&next_text(&mut ws).await);
        ws.send(reply_frame(&request_id, "ok", true, true))
            .await
            .unwrap();
    })
    .await;

    let client = client(&token.url(), &ws_url);
    // Safe with no connection established.
    client.disconnect().await;

    let result = client
        .chat(&[ChatMessage::user("hi")], ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(result.content, "ok");

    client.disconnect().await;
    client.disconnect().await;
}
