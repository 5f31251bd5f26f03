//! In-process transport for embedding a REPL server or scripting one in tests.
//!
//! `memory_transport()` returns a connector for the session side and a
//! listener for the server side. Every successful `connect` hands the
//! listener a [`ServerConnection`] wired to the new client transport.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use remote_repl_core::{
    Connector, FrameSink, FrameStream, MachineSelector, Transport, TransportError,
};
use tokio::{sync::mpsc, time::Instant};

use crate::protocol::{MessageFromServer, MessageToServer};

type Frame = Result<String, TransportError>;

/// Create a connected connector/listener pair.
#[must_use]
pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());

    let connector = MemoryConnector {
        incoming: incoming_tx,
        shared: Arc::clone(&shared),
    };
    let listener = MemoryListener {
        incoming: incoming_rx,
        shared,
    };
    (connector, listener)
}

#[derive(Default)]
struct Shared {
    refusals: AtomicUsize,
    attempts: Mutex<Vec<Instant>>,
}

/// Session side: opens in-memory connections.
#[derive(Clone)]
pub struct MemoryConnector {
    incoming: mpsc::UnboundedSender<ServerConnection>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, machine: &MachineSelector) -> Result<Transport, TransportError> {
        self.shared
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());

        let refused = self
            .shared
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();

        let server = ServerConnection {
            machine: machine.clone(),
            to_client: Some(server_tx),
            from_client: server_rx,
        };
        self.incoming
            .send(server)
            .map_err(|_| TransportError::Connect("listener dropped".to_string()))?;

        Ok(Transport::new(
            MemorySink {
                tx: Some(client_tx),
            },
            MemoryStream { rx: client_rx },
        ))
    }
}

/// Server side: accepts in-memory connections.
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<ServerConnection>,
    shared: Arc<Shared>,
}

impl MemoryListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.incoming.recv().await
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.shared.refusals.store(n, Ordering::SeqCst);
    }

    /// Instants of every connection attempt so far, refused ones included.
    #[must_use]
    pub fn attempts(&self) -> Vec<Instant> {
        self.shared
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Server end of one in-memory connection.
pub struct ServerConnection {
    /// Machine the client asked for.
    pub machine: MachineSelector,
    to_client: Option<mpsc::UnboundedSender<Frame>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerConnection {
    /// Next raw frame from the client; `None` once the client closed.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next client message, skipping frames that do not parse.
    pub async fn recv(&mut self) -> Option<MessageToServer> {
        while let Some(frame) = self.recv_frame().await {
            match serde_json::from_str(&frame) {
                Ok(msg) => return Some(msg),
                Err(e) => tracing::warn!("Invalid client frame: {e}"),
            }
        }
        None
    }

    /// Send a raw frame. Returns false if the client is gone.
    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(frame.into())).is_ok())
    }

    /// Send a message. Returns false if the client is gone.
    pub fn send(&self, msg: &MessageFromServer) -> bool {
        match serde_json::to_string(msg) {
            Ok(frame) => self.send_frame(frame),
            Err(e) => {
                tracing::error!("Failed to serialize message: {e}");
                false
            }
        }
    }

    /// Close the connection cleanly.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Fail the connection with a receive error, then close it.
    pub fn fail(&mut self, reason: &str) {
        if let Some(tx) = self.to_client.take() {
            let _ = tx.send(Err(TransportError::Receive(reason.to_string())));
        }
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}
