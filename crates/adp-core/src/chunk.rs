/// One chunk of a streamed chat response.
///
/// Content and thought chunks arrive in vendor order; `Done` is always
/// the last chunk of a successful stream. `Error` terminates a stream
/// that cannot complete (timeout or connection loss).
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    /// Answer text delta
    Content { text: String },
    /// Model reasoning text (never part of the final answer)
    Thought { text: String },
    /// Stream finished
    Done,
    /// Stream aborted
    Error { message: String },
}

impl ChatChunk {
    /// Create a content chunk
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    /// Create a thought chunk
    pub fn thought(text: impl Into<String>) -> Self {
        Self::Thought { text: text.into() }
    }

    /// Create an error chunk
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Check if this chunk ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}
