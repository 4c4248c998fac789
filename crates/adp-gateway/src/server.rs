use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use adp_client::AdpClient;

use crate::handlers;
use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/models", get(handlers::models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until a shutdown signal arrives, then close the vendor
/// connection.
pub async fn run(state: AppState, addr: &str) -> std::io::Result<()> {
    let client = Arc::clone(&state.client);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal(client))
        .await
}

async fn shutdown_signal(client: Arc<AdpClient>) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received, closing vendor connection");
    client.disconnect().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_builds() {
        let state = AppState {
            client: Arc::new(AdpClient::new("id", "key", "bot")),
        };
        let _router = app(state);
    }
}
