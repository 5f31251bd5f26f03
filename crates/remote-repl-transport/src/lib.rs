//! Wire protocol and transports for remote REPL sessions.
//!
//! Provides:
//! - Wire protocol (tagged JSON frames)
//! - WebSocket connector (feature: websocket)
//! - In-memory transport pair (feature: memory)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "memory")]
pub mod memory;

pub use protocol::{
    ExecOutcome, ExecResult, Instruction, MessageFromServer, MessageLevel, MessageToServer,
    StandardOutput, StandardOutputStream,
};
