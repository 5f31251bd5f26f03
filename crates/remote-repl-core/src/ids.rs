//! Identity and sequence types shared by the wire protocol and the session.
//!
//! Sequence numbers are scoped: request ids to one `Repl`, instruction ids to
//! one machine, output sequence numbers to one instruction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a remote machine (the persistent execution context).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineName(pub String);

impl MachineName {
    /// Create a machine name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MachineName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for MachineName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<MachineName> for String {
    fn from(name: MachineName) -> Self {
        name.0
    }
}

impl fmt::Display for MachineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which machine a connection should attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineSelector {
    /// Ask the server to allocate a fresh machine.
    New,
    /// Attach to a known machine.
    Named(MachineName),
}

impl MachineSelector {
    /// Sentinel path segment requesting a new machine.
    pub const NEW_SEGMENT: &'static str = "new";

    /// Path segment used in the REPL endpoint URL.
    #[must_use]
    pub fn path_segment(&self) -> &str {
        match self {
            Self::New => Self::NEW_SEGMENT,
            Self::Named(name) => name.as_str(),
        }
    }
}

impl From<Option<MachineName>> for MachineSelector {
    fn from(name: Option<MachineName>) -> Self {
        name.map_or(Self::New, Self::Named)
    }
}

/// Client-generated id correlating a submission with its acknowledgment.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RequestSeq(pub u32);

impl RequestSeq {
    /// The id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl From<u32> for RequestSeq {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Server-assigned instruction id, increasing per machine.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InstructionSeq(pub i64);

impl From<i64> for InstructionSeq {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for InstructionSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sequence number of an output chunk, reset to zero for every instruction.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MachineOutputSeq(pub i64);

impl MachineOutputSeq {
    /// First sequence number of an instruction's output.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// The sequence number following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<i64> for MachineOutputSeq {
    fn from(seq: i64) -> Self {
        Self(seq)
    }
}
