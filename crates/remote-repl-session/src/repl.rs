//! Public execution session.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use remote_repl_core::{Connector, MachineName, ReplConfig, RequestSeq};
use remote_repl_transport::{Instruction, MessageToServer};
use tokio::{
    runtime::Handle,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::Instrument;

use crate::{
    ReconnectPolicy, ReplError,
    connection::{Command, ConnectionManager},
    exec_result::{ExecListener, ExecResultHandle},
};

/// Per-instruction options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Server-side timeout hint; overrides the session default.
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    #[must_use]
    pub const fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Configures and starts a [`Repl`].
pub struct ReplBuilder {
    config: ReplConfig,
    policy: ReconnectPolicy,
    connector: Option<Arc<dyn Connector>>,
}

impl ReplBuilder {
    #[must_use]
    pub fn new(config: ReplConfig) -> Self {
        Self {
            config,
            policy: ReconnectPolicy::default(),
            connector: None,
        }
    }

    /// Override the reconnect policy.
    #[must_use]
    pub const fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a custom connector instead of the WebSocket one.
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Spawn the connection task and return the session.
    ///
    /// The first connection is opened in the background; submissions made
    /// before it is up are sent once it is.
    ///
    /// # Errors
    /// `NoRuntime` outside a Tokio runtime; `Config` if the default
    /// connector cannot be built (no token).
    pub fn connect(self) -> Result<Repl, ReplError> {
        let runtime = Handle::try_current().map_err(|_| ReplError::NoRuntime)?;
        let connector = match self.connector {
            Some(connector) => connector,
            None => default_connector(&self.config)?,
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (machine_tx, machine_rx) = watch::channel(self.config.machine.clone());
        let (connected_tx, connected_rx) = watch::channel(false);

        let span = tracing::info_span!(
            "repl",
            machine = self.config.machine.as_ref().map_or("new", MachineName::as_str)
        );
        let manager =
            ConnectionManager::new(connector, self.policy, machine_tx, connected_tx, commands_rx);
        let task = runtime.spawn(manager.run().instrument(span));

        Ok(Repl {
            commands: commands_tx,
            machine: machine_rx,
            connected: connected_rx,
            task,
            next_request: RequestSeq::default(),
            last_settled: None,
            default_timeout: self.config.default_timeout,
        })
    }
}

#[cfg(feature = "websocket")]
fn default_connector(config: &ReplConfig) -> Result<Arc<dyn Connector>, ReplError> {
    let connector = remote_repl_transport::websocket::WebSocketConnector::new(config)?;
    Ok(Arc::new(connector))
}

#[cfg(not(feature = "websocket"))]
fn default_connector(_config: &ReplConfig) -> Result<Arc<dyn Connector>, ReplError> {
    Err(ReplError::NoConnector)
}

/// A session on one remote machine.
///
/// Instructions run one at a time. The connection is kept alive in the
/// background and re-established transparently; the machine name learned
/// from the server is reused across reconnects. Dropping the session closes
/// the connection.
pub struct Repl {
    commands: mpsc::UnboundedSender<Command>,
    machine: watch::Receiver<Option<MachineName>>,
    connected: watch::Receiver<bool>,
    task: JoinHandle<()>,
    next_request: RequestSeq,
    last_settled: Option<Arc<AtomicBool>>,
    default_timeout: Option<Duration>,
}

impl Repl {
    /// Start a session with the WebSocket connector and default policy.
    ///
    /// # Errors
    /// See [`ReplBuilder::connect`].
    pub fn connect(config: ReplConfig) -> Result<Self, ReplError> {
        ReplBuilder::new(config).connect()
    }

    /// Submit code for execution.
    ///
    /// # Errors
    /// See [`Repl::exec_with`].
    pub fn exec(&mut self, code: impl Into<String>) -> Result<ExecResultHandle, ReplError> {
        self.exec_with(code, ExecOptions::default())
    }

    /// Submit code with per-instruction options.
    ///
    /// # Errors
    /// `InstructionPending` while the previous handle is alive and has no
    /// result yet (drop it to abandon that instruction); `Closed` once the
    /// connection task has stopped.
    pub fn exec_with(
        &mut self,
        code: impl Into<String>,
        options: ExecOptions,
    ) -> Result<ExecResultHandle, ReplError> {
        if self
            .last_settled
            .as_ref()
            .is_some_and(|settled| !settled.load(Ordering::Acquire))
        {
            return Err(ReplError::InstructionPending);
        }

        let mut instruction = Instruction::new(code);
        if let Some(timeout) = options.timeout.or(self.default_timeout) {
            instruction = instruction.with_timeout(timeout);
        }
        let request_id = self.next_request;
        let frame = MessageToServer::Exec {
            instruction,
            request_id,
        }
        .to_frame()?;

        let (listener, handle) = ExecListener::new(request_id);
        self.commands
            .send(Command::Exec { frame, listener })
            .map_err(|_| ReplError::Closed)?;

        tracing::debug!(%request_id, "Instruction submitted");
        self.next_request = request_id.next();
        self.last_settled = Some(handle.settled_flag());
        Ok(handle)
    }

    /// Machine name, once known.
    #[must_use]
    pub fn machine_name(&self) -> Option<MachineName> {
        self.machine.borrow().clone()
    }

    /// Wait until the server has named the machine.
    ///
    /// # Errors
    /// `Closed` if the connection task stops first.
    pub async fn wait_for_machine_name(&self) -> Result<MachineName, ReplError> {
        let mut machine = self.machine.clone();
        let name = machine
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ReplError::Closed)?;
        name.clone().ok_or(ReplError::Closed)
    }

    /// Whether a transport is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until a transport is open.
    ///
    /// # Errors
    /// `Closed` if the connection task stops first.
    pub async fn wait_connected(&self) -> Result<(), ReplError> {
        let mut connected = self.connected.clone();
        connected
            .wait_for(|up| *up)
            .await
            .map(|_| ())
            .map_err(|_| ReplError::Closed)
    }

    /// Close the connection and wait for the connection task to finish.
    ///
    /// An instruction still in flight resolves with `Interrupted`.
    pub async fn close(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            tracing::error!("Connection task failed: {e}");
        }
    }
}

impl std::fmt::Debug for Repl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repl")
            .field("machine", &*self.machine.borrow())
            .field("connected", &*self.connected.borrow())
            .field("next_request", &self.next_request)
            .finish_non_exhaustive()
    }
}
