//! Per-submission result handle and the listener that feeds it.
//!
//! The listener lives on the connection task and walks
//! `PendingAck -> PendingResult -> Terminal`. The handle lives with the
//! caller. They share an unbounded output buffer and a one-shot outcome.
//! Finishing always closes the output buffer before resolving the outcome,
//! so every chunk that arrived before the result stays drainable.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use futures::Stream;
use remote_repl_core::{InstructionSeq, RequestSeq};
use remote_repl_transport::{ExecResult, StandardOutput};
use tokio::sync::{mpsc, oneshot};

use crate::ReplError;

type Outcome = Result<ExecResult, ReplError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    PendingAck,
    PendingResult(InstructionSeq),
    Terminal,
}

/// Connection-side state of one submission.
pub(crate) struct ExecListener {
    request_id: RequestSeq,
    phase: Phase,
    output: Option<mpsc::UnboundedSender<StandardOutput>>,
    outcome: Option<oneshot::Sender<Outcome>>,
    settled: Arc<AtomicBool>,
}

impl ExecListener {
    /// Create a listener and the caller's handle for a request.
    pub(crate) fn new(request_id: RequestSeq) -> (Self, ExecResultHandle) {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let settled = Arc::new(AtomicBool::new(false));

        let listener = Self {
            request_id,
            phase: Phase::PendingAck,
            output: Some(output_tx),
            outcome: Some(outcome_tx),
            settled: Arc::clone(&settled),
        };
        let handle = ExecResultHandle {
            request_id,
            output: output_rx,
            outcome: Some(outcome_rx),
            settled,
        };
        (listener, handle)
    }

    pub(crate) const fn request_id(&self) -> RequestSeq {
        self.request_id
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.phase == Phase::Terminal
    }

    /// Acknowledgment carrying the assigned instruction id.
    pub(crate) fn on_received(&mut self, request_id: RequestSeq, seq: InstructionSeq) -> bool {
        if request_id != self.request_id {
            tracing::warn!(
                expected = %self.request_id,
                %request_id,
                "Unexpected request id on exec_received"
            );
            return false;
        }
        if self.phase != Phase::PendingAck {
            tracing::warn!(%request_id, phase = ?self.phase, "Duplicate exec_received");
            return false;
        }
        tracing::debug!(%request_id, instruction = %seq, "Instruction accepted");
        self.phase = Phase::PendingResult(seq);
        true
    }

    /// One output chunk.
    pub(crate) fn on_output(&mut self, instruction_id: InstructionSeq, chunk: StandardOutput) -> bool {
        if !self.expects(instruction_id, "output") {
            return false;
        }
        if let Some(output) = &self.output {
            // The handle may be gone; the chunk is simply dropped then.
            let _ = output.send(chunk);
        }
        true
    }

    /// Final result.
    pub(crate) fn on_result(&mut self, instruction_id: InstructionSeq, result: ExecResult) -> bool {
        if !self.expects(instruction_id, "result") {
            return false;
        }
        self.finish(Ok(result));
        true
    }

    /// Protocol error addressed to this submission.
    pub(crate) fn on_error(&mut self, code: String, id: String) -> bool {
        if self.is_terminal() {
            tracing::warn!(%code, %id, "Protocol error after instruction finished");
            return false;
        }
        tracing::warn!(request_id = %self.request_id, %code, %id, "Instruction rejected");
        self.finish(Err(ReplError::Server { code, id }));
        true
    }

    /// Fail the submission without a server message.
    pub(crate) fn abort(&mut self, error: ReplError) {
        if !self.is_terminal() {
            self.finish(Err(error));
        }
    }

    fn expects(&self, instruction_id: InstructionSeq, kind: &str) -> bool {
        match self.phase {
            Phase::PendingResult(expected) if expected == instruction_id => true,
            phase => {
                tracing::warn!(
                    ?phase,
                    instruction = %instruction_id,
                    kind,
                    "Unexpected instruction id"
                );
                false
            }
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        self.phase = Phase::Terminal;
        // Close the buffer first: a waiting consumer drains what is left, then sees the end.
        self.output = None;
        self.settled.store(true, Ordering::Release);
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Caller-side handle to one submission.
///
/// Yields output chunks in arrival order (also as a [`Stream`]), then the
/// final result. Dropping the handle abandons the submission.
#[derive(Debug)]
pub struct ExecResultHandle {
    request_id: RequestSeq,
    output: mpsc::UnboundedReceiver<StandardOutput>,
    outcome: Option<oneshot::Receiver<Outcome>>,
    settled: Arc<AtomicBool>,
}

impl ExecResultHandle {
    /// Client request id of this submission.
    #[must_use]
    pub const fn request_id(&self) -> RequestSeq {
        self.request_id
    }

    /// Next output chunk; `None` once the result arrived and the buffer is drained.
    ///
    /// Returns immediately when chunks are buffered and keeps returning
    /// `None` after the end.
    pub async fn next_output(&mut self) -> Option<StandardOutput> {
        self.output.recv().await
    }

    /// Drain every remaining output chunk.
    pub async fn collect_output(&mut self) -> Vec<StandardOutput> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_output().await {
            chunks.push(chunk);
        }
        chunks
    }

    /// Wait for the final result.
    ///
    /// # Errors
    /// `Server` for a protocol error, `Interrupted` if the submission was
    /// abandoned, `Disconnected` if the session gave up reconnecting.
    pub async fn result(mut self) -> Result<ExecResult, ReplError> {
        let Some(outcome) = self.outcome.take() else {
            return Err(ReplError::Interrupted);
        };
        outcome.await.unwrap_or(Err(ReplError::Interrupted))
    }

    /// Drain the output, then wait for the result.
    ///
    /// # Errors
    /// Same as [`ExecResultHandle::result`].
    pub async fn finish(mut self) -> Result<(Vec<StandardOutput>, ExecResult), ReplError> {
        let output = self.collect_output().await;
        let result = self.result().await?;
        Ok((output, result))
    }

    pub(crate) fn settled_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.settled)
    }
}

impl Stream for ExecResultHandle {
    type Item = StandardOutput;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.output.poll_recv(cx)
    }
}

impl Drop for ExecResultHandle {
    fn drop(&mut self) {
        self.settled.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq, task};

    use super::*;

    fn acked(request_id: u32, seq: i64) -> (ExecListener, ExecResultHandle) {
        let (mut listener, handle) = ExecListener::new(RequestSeq(request_id));
        assert!(listener.on_received(RequestSeq(request_id), InstructionSeq(seq)));
        (listener, handle)
    }

    #[tokio::test]
    async fn test_buffered_chunks_return_immediately() {
        let (mut listener, mut handle) = acked(0, 7);
        for i in 0..3 {
            assert!(listener.on_output(InstructionSeq(7), StandardOutput::stdout(i.to_string(), i)));
        }

        let mut next = task::spawn(handle.next_output());
        assert_ready_eq!(next.poll(), Some(StandardOutput::stdout("0", 0)));
    }

    #[tokio::test]
    async fn test_waiting_consumer_is_woken_by_output() {
        let (mut listener, mut handle) = acked(0, 1);

        let mut next = task::spawn(handle.next_output());
        assert_pending!(next.poll());

        listener.on_output(InstructionSeq(1), StandardOutput::stderr("warn", 0));
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), Some(StandardOutput::stderr("warn", 0)));
    }

    #[tokio::test]
    async fn test_result_flushes_before_end_of_output() {
        let (mut listener, mut handle) = acked(0, 1);
        listener.on_output(InstructionSeq(1), StandardOutput::stdout("a", 0));

        {
            let mut next = task::spawn(handle.next_output());
            assert_ready_eq!(next.poll(), Some(StandardOutput::stdout("a", 0)));
        }
        let mut next = task::spawn(handle.next_output());
        assert_pending!(next.poll());

        listener.on_output(InstructionSeq(1), StandardOutput::stdout("b", 1));
        listener.on_result(InstructionSeq(1), ExecResult::value(None, 4));
        assert!(listener.is_terminal());

        // The woken consumer still sees the last chunk before the end.
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), Some(StandardOutput::stdout("b", 1)));
        drop(next);

        assert_eq!(handle.next_output().await, None);
        assert_eq!(handle.next_output().await, None);
        assert_eq!(handle.result().await.unwrap(), ExecResult::value(None, 4));
    }

    #[tokio::test]
    async fn test_suspended_consumer_sees_end_on_result() {
        let (mut listener, mut handle) = acked(0, 1);

        let mut next = task::spawn(handle.next_output());
        assert_pending!(next.poll());

        listener.on_result(InstructionSeq(1), ExecResult::value(Some("2".into()), 1));
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), None);
    }

    #[tokio::test]
    async fn test_mismatched_ids_are_ignored() {
        let (mut listener, handle) = ExecListener::new(RequestSeq(3));

        // Output before the acknowledgment has nowhere to go.
        assert!(!listener.on_output(InstructionSeq(1), StandardOutput::stdout("x", 0)));
        assert!(!listener.on_received(RequestSeq(2), InstructionSeq(1)));
        assert!(listener.on_received(RequestSeq(3), InstructionSeq(9)));
        assert!(!listener.on_received(RequestSeq(3), InstructionSeq(10)));

        assert!(!listener.on_output(InstructionSeq(8), StandardOutput::stdout("stale", 0)));
        assert!(!listener.on_result(InstructionSeq(8), ExecResult::value(None, 0)));
        assert!(!listener.is_terminal());

        assert!(listener.on_result(InstructionSeq(9), ExecResult::value(Some("ok".into()), 0)));
        let (output, result) = handle.finish().await.unwrap();
        assert!(output.is_empty());
        assert_eq!(result.returned(), Some("ok"));
    }

    #[tokio::test]
    async fn test_no_transitions_after_terminal() {
        let (mut listener, handle) = acked(0, 1);
        assert!(listener.on_result(InstructionSeq(1), ExecResult::value(None, 0)));

        assert!(!listener.on_result(InstructionSeq(1), ExecResult::error("late", 0)));
        assert!(!listener.on_output(InstructionSeq(1), StandardOutput::stdout("late", 5)));
        assert!(!listener.on_error("late".into(), "e".into()));
        listener.abort(ReplError::Disconnected);

        assert_eq!(handle.result().await.unwrap(), ExecResult::value(None, 0));
    }

    #[tokio::test]
    async fn test_protocol_error_rejects_result() {
        let (mut listener, handle) = ExecListener::new(RequestSeq(0));
        assert!(listener.on_error("MachineBusy".into(), "err-1".into()));
        assert!(listener.is_terminal());

        match handle.result().await {
            Err(ReplError::Server { code, id }) => {
                assert_eq!(code, "MachineBusy");
                assert_eq!(id, "err-1");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_listener_interrupts() {
        let (listener, handle) = acked(0, 1);
        drop(listener);
        assert!(matches!(handle.result().await, Err(ReplError::Interrupted)));
    }

    #[tokio::test]
    async fn test_handle_is_a_stream() {
        let (mut listener, handle) = acked(0, 2);
        for i in 0..5 {
            listener.on_output(InstructionSeq(2), StandardOutput::stdout(i.to_string(), i));
        }
        listener.on_result(InstructionSeq(2), ExecResult::value(None, 0));

        let seqs: Vec<i64> = handle.map(|chunk| chunk.seq.0).collect().await;
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_settled_flag_tracks_terminal_or_drop() {
        let (mut listener, handle) = acked(0, 1);
        let settled = handle.settled_flag();
        assert!(!settled.load(Ordering::Acquire));
        listener.on_result(InstructionSeq(1), ExecResult::value(None, 0));
        assert!(settled.load(Ordering::Acquire));

        let (_listener, handle) = acked(1, 2);
        let settled = handle.settled_flag();
        drop(handle);
        assert!(settled.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_result_future_pending_until_result() {
        let (mut listener, handle) = acked(0, 1);
        let mut result = task::spawn(handle.result());
        assert_pending!(result.poll());

        listener.on_output(InstructionSeq(1), StandardOutput::stdout("x", 0));
        assert_pending!(result.poll());

        listener.on_result(InstructionSeq(1), ExecResult::value(None, 0));
        assert!(result.is_woken());
        let outcome = assert_ready!(result.poll());
        assert!(outcome.is_ok());
    }
}
