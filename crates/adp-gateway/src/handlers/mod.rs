mod chat;
mod health;
mod models;

pub use chat::chat_completions;
pub use health::health;
pub use models::models;
