use thiserror::Error;

use vaultize_store::StoreError;

/// Errors from the state and history persistence layer.
#[derive(Debug, Error)]
pub enum StateError {
    /// The underlying store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A persisted document could not be decoded.
    #[error("failed to decode persisted document: {0}")]
    Decode(String),
}
