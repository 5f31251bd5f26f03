//! Execution sessions over a reconnecting REPL connection.
//!
//! Provides:
//! - `Repl` - Submit code to a remote machine, one instruction at a time
//! - `ExecResultHandle` - Stream output and await the result of one instruction
//! - `ReconnectPolicy` - Exponential backoff for the background connection

mod backoff;
mod connection;
mod dispatcher;
mod error;
mod exec_result;
mod repl;

pub use backoff::ReconnectPolicy;
pub use error::ReplError;
pub use exec_result::ExecResultHandle;
pub use repl::{ExecOptions, Repl, ReplBuilder};

pub use remote_repl_core::{MachineName, ReplConfig};
pub use remote_repl_transport::{ExecResult, StandardOutput, StandardOutputStream};
