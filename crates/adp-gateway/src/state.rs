use std::sync::Arc;

use adp_client::AdpClient;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<AdpClient>,
}
