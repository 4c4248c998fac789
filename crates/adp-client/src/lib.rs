//! Connection layer for the Tencent ADP chat service.
//!
//! One persistent Engine.IO/Socket.IO-style WebSocket connection,
//! authenticated with a short-lived token obtained through a signed
//! REST call, shared across all concurrent chat calls. [`AdpClient`]
//! is the public entry point; everything else backs it.

pub mod client;
pub mod error;
pub mod frame;
pub mod pending;
pub mod session;
pub mod signer;
pub mod token;

pub use client::{AdpClient, ChatOptions, ChatResult};
pub use error::{AdpError, Result};
