//! Error types for the chaintable pipeline.

use thiserror::Error;

/// Errors that can occur while projecting a chain into the table store.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("table store error: {0}")]
    Store(String),

    #[error("corrupt table state: {0}")]
    Corrupt(String),

    #[error("batch failed: {0}")]
    BatchFailed(String),

    #[error("chain error: {0}")]
    Chain(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IndexError {
    /// Returns `true` if the error is a cancellation (clean shutdown).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for corrupt table state, which the chain-sync loop
    /// recovers from by deleting and recreating the table.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}
