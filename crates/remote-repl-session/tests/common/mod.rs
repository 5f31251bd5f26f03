//! Shared fixtures: a scripted machine that evaluates a tiny subset of Python.

#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use remote_repl_core::{InstructionSeq, MachineName, MachineOutputSeq, MachineSelector};
use remote_repl_session::{ExecResult, StandardOutput};
use remote_repl_transport::{
    MessageFromServer, MessageToServer,
    memory::{MemoryListener, ServerConnection},
};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

pub const ASSIGNED_MACHINE: &str = "machine-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Output chunks and result the fake machine produces for `code`.
pub fn evaluate(code: &str) -> (Vec<String>, ExecResult) {
    let code = code.trim();
    if code == "1 + 1" {
        return (Vec::new(), ExecResult::value(Some("2".into()), 1));
    }
    if code == "1 / 0" {
        return (
            Vec::new(),
            ExecResult::error("ZeroDivisionError: division by zero", 1),
        );
    }
    if let Some(n) = code
        .strip_prefix("for i in range(")
        .and_then(|rest| rest.strip_suffix("): print(i)"))
        .and_then(|n| n.parse::<usize>().ok())
    {
        let lines = (0..n).map(|i| format!("{i}\n")).collect();
        return (lines, ExecResult::value(None, 3));
    }
    (Vec::new(), ExecResult::value(None, 1))
}

/// Output sequence numbers of one instruction: 0, 1, 2, ...
pub fn output_seqs() -> impl Iterator<Item = MachineOutputSeq> {
    std::iter::successors(Some(MachineOutputSeq::zero()), |seq| Some(seq.next()))
}

/// Answer every instruction on `conn` until the client goes away.
pub async fn serve_connection(mut conn: ServerConnection, instructions: &AtomicI64) {
    let machine_name = match &conn.machine {
        MachineSelector::New => MachineName::new(ASSIGNED_MACHINE),
        MachineSelector::Named(name) => name.clone(),
    };
    conn.send(&MessageFromServer::Connected { machine_name });

    while let Some(MessageToServer::Exec {
        instruction,
        request_id,
    }) = conn.recv().await
    {
        let seq = InstructionSeq(instructions.fetch_add(1, Ordering::SeqCst) + 1);
        conn.send(&MessageFromServer::ExecReceived { seq, request_id });

        let (lines, result) = evaluate(&instruction.code);
        for (line, chunk_seq) in lines.into_iter().zip(output_seqs()) {
            conn.send(&MessageFromServer::Output {
                chunk: StandardOutput::stdout(line, chunk_seq.0),
                instruction_id: seq,
            });
        }
        conn.send(&MessageFromServer::Result {
            instruction_id: seq,
            result,
        });
    }
}

/// Fake machine accepting connections one after another.
pub struct FakeMachine {
    pub instructions: Arc<AtomicI64>,
    task: JoinHandle<()>,
}

impl FakeMachine {
    pub fn spawn(mut listener: MemoryListener) -> Self {
        let instructions = Arc::new(AtomicI64::new(0));
        let counter = Arc::clone(&instructions);
        let task = tokio::spawn(async move {
            while let Some(conn) = listener.accept().await {
                serve_connection(conn, &counter).await;
            }
        });
        Self { instructions, task }
    }
}

impl Drop for FakeMachine {
    fn drop(&mut self) {
        self.task.abort();
    }
}
