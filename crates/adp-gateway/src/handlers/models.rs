use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::openai::{DEFAULT_MODEL, MODEL_OWNER};

#[derive(Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<Model>,
}

#[derive(Serialize)]
pub struct Model {
    pub id: &'static str,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}

/// Static model listing: the gateway fronts exactly one bot.
pub async fn models() -> Json<ModelList> {
    Json(ModelList {
        object: "list",
        data: vec![Model {
            id: DEFAULT_MODEL,
            object: "model",
            created: Utc::now().timestamp(),
            owned_by: MODEL_OWNER,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_models() {
        let response = models().await;
        assert_eq!(response.object, "list");
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].id, DEFAULT_MODEL);
    }
}
