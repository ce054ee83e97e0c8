use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the store client after its internal retry budget.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Connection-level failure: refused, reset, DNS.
    #[error("store transport error: {0}")]
    Transport(String),

    /// The store answered with an unexpected status.
    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The target index does not exist (404).
    #[error("index not found: {0}")]
    IndexMissing(String),

    /// The store rejected the request body as malformed (400).
    #[error("store rejected request: {0}")]
    BadRequest(String),

    /// The response body could not be decoded.
    #[error("failed to decode store response: {0}")]
    Decode(String),

    /// The request's cancellation token fired.
    #[error("store request cancelled")]
    Cancelled,

    /// The per-request deadline elapsed.
    #[error("store request timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Whether the client retries this failure internally. Only transport
    /// faults, timeouts, and server-side errors are transient; 4xx and
    /// decode failures surface directly.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
