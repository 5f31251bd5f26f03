//! Wire protocol for client-server communication.
//!
//! Every frame is one JSON object tagged by `type`. The instruction id is
//! called `seq` on `exec_received` and `instruction_id` everywhere else; both
//! carry the same [`InstructionSeq`].

use std::{collections::BTreeMap, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use remote_repl_core::{InstructionSeq, MachineName, MachineOutputSeq, RequestSeq};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Code to execute plus an optional server-side timeout hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Source text evaluated on the machine.
    pub code: String,
    /// Seconds the server may run the code before giving up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Instruction {
    /// Instruction without a timeout hint.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout_seconds: None,
        }
    }

    /// Set the timeout hint, rounded up to whole seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.timeout_seconds = Some(secs);
        self
    }
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageToServer {
    /// Execute an instruction.
    Exec {
        instruction: Instruction,
        request_id: RequestSeq,
    },
}

impl MessageToServer {
    /// Encode as a text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Info,
    Warn,
    Error,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageFromServer {
    /// Connection established for a machine.
    Connected { machine_name: MachineName },
    /// Submission accepted; `seq` is the assigned instruction id.
    ExecReceived {
        seq: InstructionSeq,
        request_id: RequestSeq,
    },
    /// One chunk of stdout/stderr.
    Output {
        chunk: StandardOutput,
        instruction_id: InstructionSeq,
    },
    /// Final result of an instruction.
    Result {
        instruction_id: InstructionSeq,
        result: ExecResult,
    },
    /// Protocol-level error.
    Error { code: String, id: String },
    /// Log / diagnostic message for the client.
    Message { message: String, level: MessageLevel },
}

impl MessageFromServer {
    /// Decode a text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a known message.
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Short name of the message type, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::ExecReceived { .. } => "exec_received",
            Self::Output { .. } => "output",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Message { .. } => "message",
        }
    }
}

/// Output stream a chunk was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardOutputStream {
    Stdout,
    Stderr,
}

/// One chunk of captured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardOutput {
    /// Stream the chunk was written to.
    pub stream: StandardOutputStream,
    /// Captured text.
    pub data: String,
    /// Position of the chunk within its instruction's output.
    pub seq: MachineOutputSeq,
}

impl StandardOutput {
    /// Stdout chunk.
    #[must_use]
    pub fn stdout(data: impl Into<String>, seq: i64) -> Self {
        Self {
            stream: StandardOutputStream::Stdout,
            data: data.into(),
            seq: MachineOutputSeq(seq),
        }
    }

    /// Stderr chunk.
    #[must_use]
    pub fn stderr(data: impl Into<String>, seq: i64) -> Self {
        Self {
            stream: StandardOutputStream::Stderr,
            data: data.into(),
            seq: MachineOutputSeq(seq),
        }
    }
}

/// Value or error of an instruction.
///
/// On the wire this is flattened into the result object: either an `error`
/// string, or a `value` (possibly `null`) with optional `data` artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecOutcome {
    Error {
        /// Error text, usually the formatted exception.
        error: String,
    },
    Value {
        /// Representation of the last expression, if it had one.
        #[serde(default)]
        value: Option<String>,
        /// Extra artifacts keyed by name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<BTreeMap<String, Value>>,
    },
}

/// Final result of an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Value or error produced by the code.
    #[serde(flatten)]
    pub outcome: ExecOutcome,
    /// Execution time reported by the server.
    pub runtime_ms: u64,
}

impl ExecResult {
    /// Successful result.
    #[must_use]
    pub const fn value(value: Option<String>, runtime_ms: u64) -> Self {
        Self {
            outcome: ExecOutcome::Value { value, data: None },
            runtime_ms,
        }
    }

    /// Failed result.
    #[must_use]
    pub fn error(error: impl Into<String>, runtime_ms: u64) -> Self {
        Self {
            outcome: ExecOutcome::Error {
                error: error.into(),
            },
            runtime_ms,
        }
    }

    /// The return value's representation, if any.
    #[must_use]
    pub fn returned(&self) -> Option<&str> {
        match &self.outcome {
            ExecOutcome::Value { value, .. } => value.as_deref(),
            ExecOutcome::Error { .. } => None,
        }
    }

    /// The execution error, if the code raised.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            ExecOutcome::Error { error } => Some(error),
            ExecOutcome::Value { .. } => None,
        }
    }

    /// Whether the code raised.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.outcome, ExecOutcome::Error { .. })
    }

    /// Auxiliary artifacts keyed by name.
    #[must_use]
    pub fn data(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.outcome {
            ExecOutcome::Value { data, .. } => data.as_ref(),
            ExecOutcome::Error { .. } => None,
        }
    }

    /// Decode a base64 string artifact (e.g. a rendered image).
    #[must_use]
    pub fn artifact_bytes(&self, key: &str) -> Option<Vec<u8>> {
        let encoded = self.data()?.get(key)?.as_str()?;
        BASE64.decode(encoded).ok()
    }
}
