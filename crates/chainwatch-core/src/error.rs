//! Error types for the scan pipeline.

use thiserror::Error;

/// Errors that can occur while scanning a chain.
///
/// The type is `Clone` so a single receipt fetch failure can be handed to
/// whichever task awaits that receipt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Receipt not found for transaction {0}")]
    ReceiptNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed checkpoint for '{network}': {reason}")]
    MalformedCheckpoint { network: String, reason: String },

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Receipt for transaction {0} was never requested")]
    NotRequested(String),

    #[error("Scan aborted: {reason}")]
    Aborted { reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ScanError {
    /// Shorthand for a handler failure.
    pub fn handler(handler: impl Into<String>, reason: impl ToString) -> Self {
        Self::Handler {
            handler: handler.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the error came from a transaction handler.
    pub fn is_handler(&self) -> bool {
        matches!(self, Self::Handler { .. })
    }
}
