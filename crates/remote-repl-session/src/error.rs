//! Session errors.

use remote_repl_core::ConfigError;
use thiserror::Error;

/// Error surfaced to `Repl` callers.
///
/// Transport failures never appear here directly; they drive reconnection.
#[derive(Debug, Error)]
pub enum ReplError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("No Tokio runtime available to drive the connection")]
    NoRuntime,
    #[error("No connector configured")]
    NoConnector,
    #[error("Server error {code} (id {id})")]
    Server { code: String, id: String },
    #[error("Instruction interrupted")]
    Interrupted,
    #[error("Connection lost and reconnect attempts exhausted")]
    Disconnected,
    #[error("Previous instruction still pending")]
    InstructionPending,
    #[error("Session closed")]
    Closed,
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
