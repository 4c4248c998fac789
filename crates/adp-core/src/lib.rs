//! Shared chat data model for the ADP gateway.
//!
//! OpenAI-shaped messages on the outward side, stream chunks on the
//! inward side. No I/O lives here.

pub mod chunk;
pub mod message;

pub use chunk::ChatChunk;
pub use message::{ContentPart, ImageUrl, Message, MessageContent};
