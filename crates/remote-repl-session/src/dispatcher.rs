//! Routes decoded server messages to the current submission.

use remote_repl_transport::{MessageFromServer, MessageLevel};

use crate::{ReplError, exec_result::ExecListener};

/// Holds at most one in-flight submission.
#[derive(Default)]
pub(crate) struct Dispatcher {
    current: Option<ExecListener>,
}

impl Dispatcher {
    /// Make `listener` the current submission, abandoning any previous one.
    pub(crate) fn install(&mut self, listener: ExecListener) {
        if let Some(previous) = self.current.replace(listener) {
            if !previous.is_terminal() {
                tracing::debug!(
                    request_id = %previous.request_id(),
                    "Abandoning unfinished instruction"
                );
            }
        }
    }

    /// Route one message. `connected` is handled by the caller.
    pub(crate) fn dispatch(&mut self, msg: MessageFromServer) {
        match msg {
            MessageFromServer::Message { message, level } => match level {
                MessageLevel::Info => tracing::info!(target: "remote_repl::server", "{message}"),
                MessageLevel::Warn => tracing::warn!(target: "remote_repl::server", "{message}"),
                MessageLevel::Error => tracing::error!(target: "remote_repl::server", "{message}"),
            },
            MessageFromServer::Connected { machine_name } => {
                tracing::debug!(%machine_name, "Connected message reached dispatcher");
            }
            msg => self.route(msg),
        }
    }

    /// Fail the current submission, if any.
    pub(crate) fn abort_current(&mut self, error: ReplError) {
        if let Some(mut listener) = self.current.take() {
            listener.abort(error);
        }
    }

    fn route(&mut self, msg: MessageFromServer) {
        let Some(listener) = self.current.as_mut() else {
            match msg {
                MessageFromServer::Error { code, id } => {
                    tracing::error!(%code, %id, "Server error with no instruction in flight");
                }
                other => tracing::warn!(kind = other.kind(), "No instruction in flight, dropping"),
            }
            return;
        };

        match msg {
            MessageFromServer::ExecReceived { seq, request_id } => {
                listener.on_received(request_id, seq);
            }
            MessageFromServer::Output {
                chunk,
                instruction_id,
            } => {
                listener.on_output(instruction_id, chunk);
            }
            MessageFromServer::Result {
                instruction_id,
                result,
            } => {
                listener.on_result(instruction_id, result);
            }
            MessageFromServer::Error { code, id } => {
                listener.on_error(code, id);
            }
            MessageFromServer::Connected { .. } | MessageFromServer::Message { .. } => {}
        }

        if listener.is_terminal() {
            self.current = None;
        }
    }
}
