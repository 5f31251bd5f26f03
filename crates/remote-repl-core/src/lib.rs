//! Core abstractions for remote REPL sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `MachineName`, `RequestSeq`, `InstructionSeq` - Identity newtypes
//! - `ApiToken` - Bearer credential
//! - `ReplConfig` / `ConfigManager` - Connection settings and their sources
//! - `Connector` and the frame traits - Transport seam

pub mod config;
pub mod ids;
pub mod token;
pub mod traits;

pub use config::{ConfigError, ConfigFile, ConfigManager, ReplConfig};
pub use ids::{InstructionSeq, MachineName, MachineOutputSeq, MachineSelector, RequestSeq};
pub use token::{ApiToken, TokenError};
pub use traits::{Connector, FrameSink, FrameStream, Transport, TransportError};
