//! Transport-level error types.

use chainwatch_core::ScanError;
use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to a JSON-RPC endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, non-2xx status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl From<TransportError> for ScanError {
    fn from(e: TransportError) -> Self {
        ScanError::Rpc(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_rpc_scan_error() {
        let err: ScanError = TransportError::Rpc(JsonRpcError {
            code: -32602,
            message: "invalid argument".into(),
            data: None,
        })
        .into();
        assert_eq!(err, ScanError::Rpc("RPC error -32602: invalid argument".into()));
    }

    #[test]
    fn timeout_keeps_duration_in_message() {
        let err: ScanError = TransportError::Timeout { ms: 100 }.into();
        assert_eq!(err, ScanError::Rpc("Request timed out after 100ms".into()));
    }
}
