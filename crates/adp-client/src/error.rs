use thiserror::Error;

/// Unified error type for the ADP connection layer.
///
/// Nothing here is retried internally; every variant surfaces to the
/// caller that issued the operation.
#[derive(Error, Debug, Clone)]
pub enum AdpError {
    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("upstream auth error: {code} - {message}")]
    UpstreamAuth { code: String, message: String },

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("not connected")]
    NotConnected,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

pub type Result<T> = std::result::Result<T, AdpError>;
