//! Transport seam between the session engine and the wire.
//!
//! A `Connector` opens one duplex, text-frame connection to a machine's REPL
//! endpoint. The connection is handed out as two halves so the session can
//! read and write concurrently.

use async_trait::async_trait;
use thiserror::Error;

use crate::{ConfigError, MachineSelector};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Connection closed")]
    Closed,
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Receive failed: {0}")]
    Receive(String),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the connection. Errors are not interesting to callers.
    async fn close(&mut self);
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame; `None` once the peer closed the connection.
    ///
    /// Must be cancel safe: the session polls it inside `select!`.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}

/// An open connection, split into halves.
pub struct Transport {
    /// Outbound half.
    pub sink: Box<dyn FrameSink>,
    /// Inbound half.
    pub stream: Box<dyn FrameStream>,
}

impl Transport {
    /// Bundle two halves.
    #[must_use]
    pub fn new(sink: impl FrameSink + 'static, stream: impl FrameStream + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

/// Opens connections to a machine's REPL endpoint.
///
/// Credentials and the service address belong to the implementation; the
/// session only says which machine it wants.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection.
    async fn connect(&self, machine: &MachineSelector) -> Result<Transport, TransportError>;
}
