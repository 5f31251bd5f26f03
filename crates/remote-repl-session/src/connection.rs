//! Connection task: owns the transport, reconnects with backoff, and feeds
//! inbound frames to the dispatcher.
//!
//! The task is the only owner of the transport, the known machine name and
//! the current submission. Callers talk to it through a command channel and
//! observe it through two watch channels.

use std::sync::Arc;

use remote_repl_core::{
    Connector, FrameSink, FrameStream, MachineName, MachineSelector, Transport,
};
use remote_repl_transport::MessageFromServer;
use tokio::sync::{mpsc, watch};

use crate::{ReconnectPolicy, ReplError, dispatcher::Dispatcher, exec_result::ExecListener};

/// Request from the session handle to the connection task.
pub(crate) enum Command {
    /// Install `listener` as the current submission and send `frame`.
    Exec {
        frame: String,
        listener: ExecListener,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Reconnect,
    Shutdown,
}

pub(crate) struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    machine: watch::Sender<Option<MachineName>>,
    connected: watch::Sender<bool>,
    commands: mpsc::UnboundedReceiver<Command>,
    dispatcher: Dispatcher,
    /// Newest submission frame not yet written to a transport.
    pending: Option<String>,
    /// Consecutive failed connection attempts.
    attempts: u32,
}

impl ConnectionManager {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        machine: watch::Sender<Option<MachineName>>,
        connected: watch::Sender<bool>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            connector,
            policy,
            machine,
            connected,
            commands,
            dispatcher: Dispatcher::default(),
            pending: None,
            attempts: 0,
        }
    }

    /// Run until the session handle is dropped or reconnecting gives up.
    pub(crate) async fn run(mut self) {
        while let Some(transport) = self.reconnect().await {
            if self.serve(transport).await == Flow::Shutdown {
                break;
            }
        }
        self.connected.send_replace(false);
        tracing::debug!("Connection task stopped");
    }

    async fn reconnect(&mut self) -> Option<Transport> {
        loop {
            if self.policy.exhausted(self.attempts) {
                self.give_up();
                return None;
            }

            let delay = self.policy.delay_for(self.attempts);
            if !delay.is_zero() {
                tracing::debug!(
                    attempt = self.attempts.saturating_add(1),
                    ?delay,
                    "Waiting before reconnect"
                );
            }
            self.hold_commands_during(tokio::time::sleep(delay)).await?;

            self.attempts = self.attempts.saturating_add(1);
            let selector = self.selector();
            tracing::debug!(attempt = self.attempts, machine = selector.path_segment(), "Connecting");

            let connector = Arc::clone(&self.connector);
            let connect = async move { connector.connect(&selector).await };
            match self.hold_commands_during(connect).await? {
                Ok(transport) => {
                    self.attempts = 0;
                    return Some(transport);
                }
                Err(e) => {
                    tracing::warn!(attempt = self.attempts, "Connection attempt failed: {e}");
                }
            }
        }
    }

    /// Drive `fut` while queueing any submissions that arrive meanwhile.
    ///
    /// Returns `None` if the session handle was dropped.
    async fn hold_commands_during<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Some(out),
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Exec { frame, listener }) => self.queue(frame, listener),
                    None => {
                        tracing::debug!("Session dropped while disconnected");
                        return None;
                    }
                },
            }
        }
    }

    fn queue(&mut self, frame: String, listener: ExecListener) {
        tracing::debug!(request_id = %listener.request_id(), "Queueing instruction until connected");
        if self.pending.replace(frame).is_some() {
            tracing::debug!("Dropping older unsent instruction");
        }
        self.dispatcher.install(listener);
    }

    fn give_up(&mut self) {
        tracing::warn!(attempts = self.attempts, "Reconnect attempts exhausted, giving up");
        self.pending = None;
        self.dispatcher.abort_current(ReplError::Disconnected);
        self.commands.close();
        while let Ok(Command::Exec { mut listener, .. }) = self.commands.try_recv() {
            listener.abort(ReplError::Disconnected);
        }
    }

    fn selector(&self) -> MachineSelector {
        MachineSelector::from(self.machine.borrow().clone())
    }

    async fn serve(&mut self, transport: Transport) -> Flow {
        let Transport {
            mut sink,
            mut stream,
        } = transport;

        self.connected.send_replace(true);
        tracing::info!("Connected");
        let flow = self.pump(sink.as_mut(), stream.as_mut()).await;
        self.connected.send_replace(false);

        if flow == Flow::Reconnect {
            tracing::info!("Disconnected, reconnecting");
        }
        flow
    }

    async fn pump(&mut self, sink: &mut dyn FrameSink, stream: &mut dyn FrameStream) -> Flow {
        if let Some(frame) = self.pending.take() {
            tracing::debug!("Flushing queued instruction");
            if !self.send(sink, frame).await {
                return Flow::Reconnect;
            }
        }

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Exec { frame, listener }) => {
                        self.dispatcher.install(listener);
                        if !self.send(sink, frame).await {
                            return Flow::Reconnect;
                        }
                    }
                    None => {
                        tracing::debug!("Session closed, closing connection");
                        sink.close().await;
                        return Flow::Shutdown;
                    }
                },
                frame = stream.next_frame() => match frame {
                    Some(Ok(frame)) => self.on_frame(&frame),
                    Some(Err(e)) => {
                        tracing::warn!("Connection error: {e}");
                        return Flow::Reconnect;
                    }
                    None => {
                        tracing::debug!("Connection closed by server");
                        return Flow::Reconnect;
                    }
                },
            }
        }
    }

    /// Write a frame; on failure keep it for the next connection.
    async fn send(&mut self, sink: &mut dyn FrameSink, frame: String) -> bool {
        match sink.send(frame.clone()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Send failed, will retry after reconnect: {e}");
                self.pending = Some(frame);
                false
            }
        }
    }

    fn on_frame(&mut self, frame: &str) {
        let msg = match MessageFromServer::from_frame(frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Ignoring invalid frame: {e}");
                return;
            }
        };
        tracing::trace!(kind = msg.kind(), "Received");

        match msg {
            MessageFromServer::Connected { machine_name } => self.on_connected(machine_name),
            msg => self.dispatcher.dispatch(msg),
        }
    }

    fn on_connected(&self, machine_name: MachineName) {
        self.machine.send_if_modified(|known| {
            if known.as_ref() == Some(&machine_name) {
                return false;
            }
            match known.as_ref() {
                Some(previous) => tracing::warn!(
                    %previous,
                    %machine_name,
                    "Server attached a different machine"
                ),
                None => tracing::info!(%machine_name, "Machine assigned"),
            }
            *known = Some(machine_name);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use remote_repl_core::{InstructionSeq, RequestSeq};
    use remote_repl_transport::{
        ExecResult, MessageToServer,
        memory::{MemoryListener, memory_transport},
    };

    use super::*;

    struct Harness {
        commands: mpsc::UnboundedSender<Command>,
        machine: watch::Receiver<Option<MachineName>>,
        connected: watch::Receiver<bool>,
        listener: MemoryListener,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn(policy: ReconnectPolicy, machine: Option<MachineName>) -> Harness {
        let (connector, listener) = memory_transport();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (machine_tx, machine_rx) = watch::channel(machine);
        let (connected_tx, connected_rx) = watch::channel(false);
        let manager = ConnectionManager::new(
            Arc::new(connector),
            policy,
            machine_tx,
            connected_tx,
            commands_rx,
        );
        Harness {
            commands: commands_tx,
            machine: machine_rx,
            connected: connected_rx,
            listener,
            task: tokio::spawn(manager.run()),
        }
    }

    fn exec(request_id: u32, code: &str) -> (Command, crate::ExecResultHandle) {
        let (listener, handle) = ExecListener::new(RequestSeq(request_id));
        let frame = MessageToServer::Exec {
            instruction: remote_repl_transport::Instruction::new(code),
            request_id: RequestSeq(request_id),
        }
        .to_frame()
        .unwrap();
        (Command::Exec { frame, listener }, handle)
    }

    #[tokio::test]
    async fn test_connected_message_sets_machine() {
        let mut h = spawn(ReconnectPolicy::default(), None);
        let server = h.listener.accept().await.unwrap();
        assert_eq!(server.machine, MachineSelector::New);

        server.send(&MessageFromServer::Connected {
            machine_name: MachineName::new("m1"),
        });
        h.machine.wait_for(Option::is_some).await.unwrap();
        assert_eq!(*h.machine.borrow(), Some(MachineName::new("m1")));
        assert!(*h.connected.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_submissions_keep_only_newest_frame() {
        let mut h = spawn(ReconnectPolicy::default(), Some(MachineName::new("m1")));
        h.listener.refuse_next(1_000);

        let (first, first_handle) = exec(0, "first");
        let (second, _second_handle) = exec(1, "second");
        assert!(h.commands.send(first).is_ok());
        assert!(h.commands.send(second).is_ok());
        assert!(matches!(first_handle.result().await, Err(ReplError::Interrupted)));

        h.listener.refuse_next(0);
        let mut server = h.listener.accept().await.unwrap();
        assert_eq!(server.machine, MachineSelector::Named(MachineName::new("m1")));
        match server.recv().await.unwrap() {
            MessageToServer::Exec { request_id, .. } => assert_eq!(request_id, RequestSeq(1)),
        }
    }

    #[tokio::test]
    async fn test_in_flight_result_survives_reconnect() {
        let mut h = spawn(ReconnectPolicy::default(), None);
        let mut server = h.listener.accept().await.unwrap();

        let (cmd, handle) = exec(0, "slow()");
        assert!(h.commands.send(cmd).is_ok());
        server.recv().await.unwrap();
        server.send(&MessageFromServer::ExecReceived {
            seq: InstructionSeq(4),
            request_id: RequestSeq(0),
        });
        server.close();

        let server = h.listener.accept().await.unwrap();
        server.send(&MessageFromServer::Result {
            instruction_id: InstructionSeq(4),
            result: ExecResult::value(Some("done".into()), 10),
        });
        assert_eq!(handle.result().await.unwrap().returned(), Some("done"));
    }

    #[tokio::test]
    async fn test_dropping_commands_stops_task() {
        let mut h = spawn(ReconnectPolicy::default(), None);
        let mut server = h.listener.accept().await.unwrap();
        drop(h.commands);
        h.task.await.unwrap();
        assert!(server.recv_frame().await.is_none());
        assert!(!*h.connected.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let h = spawn(
            ReconnectPolicy::with_base_delay(Duration::from_millis(5)).max_attempts(3),
            None,
        );
        h.listener.refuse_next(usize::MAX);

        let (cmd, handle) = exec(0, "1 + 1");
        assert!(h.commands.send(cmd).is_ok());
        h.task.await.unwrap();

        assert!(matches!(handle.result().await, Err(ReplError::Disconnected)));
        assert!(h.commands.is_closed());
        assert_eq!(h.listener.attempts().len(), 3);
    }
}
