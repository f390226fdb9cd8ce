//! Robot control session.
//!
//! [`Session`] is the orchestrator a robot program talks to. It owns one
//! transport (through the dispatch task), the event handler task, and the
//! connection state. All operations take `&self` and may run concurrently
//! from several tasks; each one suspends only its own caller.
//!
//! Dropping a `Session` or calling [`Session::close`] tears everything down:
//! pending requests and action waits fail with
//! [`ClientError::SessionClosed`], periodic streams end, and the transport is
//! closed.
//!
//! Submodules:
//! - `dispatch`: the receive/dispatch task and its control protocol.
//! - `actions`: action status tracking.
//! - `periodic`: periodic query streams.
//! - `events`: event handler registry.

pub mod actions;
pub(crate) mod dispatch;
pub mod events;
pub mod periodic;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SessionConfig;
use crate::protocol::{messages, parse_privileges, Attributes, Command, Event, Reply};
use crate::transport::Transport;
use crate::{ClientError, Result};

use self::actions::{ActionHandle, ActionOutcome, ActionStatus};
use self::dispatch::{Control, ControlSender, Dispatcher, Expect};
use self::events::{spawn_handler_task, HandlerMsg};
use self::periodic::PeriodicQuery;

/// Connection lifecycle as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is being established.
    Connecting,
    /// Dispatch task running.
    Open,
    /// Closed by the caller.
    Closed,
    /// Transport dropped unexpectedly.
    Failed,
}

/// Sizes of the dispatch task's tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Requests awaiting a correlated response.
    pub pending_requests: usize,
    /// Resident actions (running, or finished and kept).
    pub actions: usize,
    /// Live periodic query subscriptions.
    pub subscriptions: usize,
}

/// Sends a control message when dropped unless disarmed.
///
/// Used to release dispatch-side state when a caller's future is cancelled
/// or times out.
struct ReleaseGuard {
    control: ControlSender,
    msg: Option<Control>,
}

impl ReleaseGuard {
    fn new(control: &ControlSender, msg: Control) -> Self {
        Self {
            control: control.clone(),
            msg: Some(msg),
        }
    }

    fn disarm(mut self) {
        self.msg = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(msg) = self.msg.take() {
            let _ = self.control.send(msg);
        }
    }
}

/// An open session with a robot control server.
pub struct Session {
    control: ControlSender,
    handlers: mpsc::UnboundedSender<HandlerMsg>,
    state: watch::Receiver<ConnectionState>,
    ids: Arc<AtomicU64>,
    config: SessionConfig,
    cancel: CancellationToken,
    dispatch: Option<JoinHandle<()>>,
    closed: bool,
}

impl Session {
    /// Connect to the endpoint in `config` and start the dispatch task.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Config`] if `config` fails validation.
    /// - [`ClientError::ConnectTimeout`] / [`ClientError::ConnectionRefused`]
    ///   if the transport cannot be opened.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        info!(endpoint = %config.endpoint.authority(), "session: connecting");

        let transport = Transport::open(&config).await?;
        Ok(Self::attach(transport, config))
    }

    /// Start a session over an already-open transport.
    ///
    /// The state reads [`ConnectionState::Connecting`] until the dispatch
    /// task is first polled.
    #[must_use]
    pub fn attach(transport: Transport, config: SessionConfig) -> Self {
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let (control, control_rx) = mpsc::unbounded_channel();
        let (handlers, _handler_task) = spawn_handler_task();
        let ids = Arc::new(AtomicU64::new(1));
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher::new(
            transport.into_split(),
            control_rx,
            handlers.clone(),
            state_tx,
            Arc::clone(&ids),
            cancel.clone(),
        );
        let dispatch = tokio::spawn(
            dispatcher
                .run()
                .instrument(info_span!("session_dispatch", endpoint = %config.endpoint.authority())),
        );

        Self {
            control,
            handlers,
            state,
            ids,
            config,
            cancel,
            dispatch: Some(dispatch),
            closed: false,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Configuration this session was started with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register `handler` for events of type `kind` (`error`, `warning`, ...).
    ///
    /// Handlers for one type run in registration order on the handler task.
    /// The returned flag is informational only.
    pub fn handle<F>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let kind = kind.into();
        debug!(kind = kind.as_str(), "session: handler registered");
        if self
            .handlers
            .send(HandlerMsg::Register {
                kind,
                handler: Arc::new(handler),
            })
            .is_err()
        {
            debug!("session: handler task gone, registration dropped");
        }
    }

    /// Send `command` and wait for its correlated response.
    ///
    /// # Errors
    ///
    /// - [`ClientError::RemoteError`] if the server answered with an error.
    /// - [`ClientError::RequestTimeout`] if no response arrived in time.
    /// - [`ClientError::PrivilegeRequired`] if the command is gated.
    /// - [`ClientError::ConnectionLost`] / [`ClientError::SessionClosed`].
    pub async fn query(&self, command: impl Into<Command>) -> Result<Reply> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.submit(Control::Request {
            id,
            command: command.into(),
            expect: Expect::Reply(tx),
        })?;
        self.await_response(id, rx).await
    }

    /// Send `command` without waiting for a response.
    ///
    /// Returns once the frame has been written.
    ///
    /// # Errors
    ///
    /// - [`ClientError::TransportClosed`] if the write failed.
    /// - [`ClientError::PrivilegeRequired`] if the command is gated.
    /// - [`ClientError::ConnectionLost`] / [`ClientError::SessionClosed`].
    pub async fn send(&self, command: impl Into<Command>) -> Result<()> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.submit(Control::Request {
            id,
            command: command.into(),
            expect: Expect::Sent(tx),
        })?;
        self.await_response(id, rx).await
    }

    /// Ask the server for privilege `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::PrivilegeDenied`] if the server refuses, plus
    /// the errors of [`query`](Self::query).
    pub async fn request_privilege(&self, name: &str) -> Result<()> {
        let reply = match self.query(messages::request_privilege(name)).await {
            Ok(reply) => reply,
            Err(ClientError::RemoteError { code, message }) => {
                warn!(privilege = name, %code, %message, "session: privilege request rejected");
                return Err(ClientError::PrivilegeDenied(name.to_owned()));
            }
            Err(e) => return Err(e),
        };

        let granted = parse_privileges(&reply.payload)
            .iter()
            .any(|(privilege, has)| privilege == name && *has);
        if granted {
            info!(privilege = name, "session: privilege granted");
            Ok(())
        } else {
            warn!(privilege = name, "session: privilege denied");
            Err(ClientError::PrivilegeDenied(name.to_owned()))
        }
    }

    /// Privileges currently granted to this session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionLost`] / [`ClientError::SessionClosed`].
    pub async fn privileges(&self) -> Result<BTreeSet<String>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Control::Privileges { reply })?;
        rx.await.map_err(|_| self.terminal_error())
    }

    /// Send an action command and return a handle once the server accepts it.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Protocol`] if `command` is not an `action-*` command
    ///   or the acknowledgement lacks an `action-id`.
    /// - the errors of [`query`](Self::query).
    pub async fn submit_action(&self, command: impl Into<Command>) -> Result<ActionHandle> {
        let command = command.into();
        if !command.is_action() {
            return Err(ClientError::Protocol(format!(
                "'{}' is not an action command",
                command.kind()
            )));
        }

        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.submit(Control::Request {
            id,
            command,
            expect: Expect::Action(tx),
        })?;
        let handle = self.await_response(id, rx).await?;
        info!(action_id = handle.id(), kind = handle.kind(), "session: action accepted");
        Ok(handle)
    }

    /// Wait until the action behind `handle` reaches a terminal status.
    ///
    /// With `remove_after` the action is retired on the server once it has
    /// finished; otherwise it stays resident and queryable. Waits on
    /// different actions proceed independently. Cancelling the returned
    /// future stops tracking for this waiter; when no waiter is left on an
    /// unfinished action the server is asked to cancel it.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ActionFailed`] if the action failed or was cancelled.
    /// - [`ClientError::RequestTimeout`] if `timeouts.action_seconds` elapsed.
    /// - [`ClientError::ConnectionLost`] / [`ClientError::SessionClosed`].
    pub async fn wait(&self, handle: &ActionHandle, remove_after: bool) -> Result<ActionOutcome> {
        let action_id = handle.id();
        let waiter_id = self.next_id();
        let (reply, rx) = oneshot::channel();
        self.submit(Control::WaitAction {
            action_id,
            waiter_id,
            remove_after,
            reply,
        })?;

        let guard = ReleaseGuard::new(
            &self.control,
            Control::AbandonWait {
                action_id,
                waiter_id,
            },
        );

        let received = match self.config.action_timeout() {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(action_id, ?limit, "session: action wait timed out");
                    return Err(ClientError::RequestTimeout(limit));
                }
            },
            None => rx.await,
        };
        guard.disarm();

        let outcome = received.unwrap_or_else(|_| Err(self.terminal_error()));
        match outcome {
            Ok(ref done) => info!(action_id, status = done.status.as_str(), "session: action complete"),
            Err(ref e) => warn!(action_id, error = %e, "session: action did not succeed"),
        }
        outcome
    }

    /// [`submit_action`](Self::submit_action) followed by [`wait`](Self::wait).
    ///
    /// # Errors
    ///
    /// The errors of both steps.
    pub async fn wait_action(
        &self,
        command: impl Into<Command>,
        remove_after: bool,
    ) -> Result<ActionOutcome> {
        let handle = self.submit_action(command).await?;
        self.wait(&handle, remove_after).await
    }

    /// Status of a resident action, or `None` once it has been retired.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionLost`] / [`ClientError::SessionClosed`].
    pub async fn action_status(&self, handle: &ActionHandle) -> Result<Option<ActionStatus>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Control::ActionStatus {
            action_id: handle.id(),
            reply,
        })?;
        rx.await.map_err(|_| self.terminal_error())
    }

    /// Subscribe to a group of queries evaluated every `interval`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Protocol`] if `queries` is empty, `interval` is zero,
    ///   or the acknowledgement lacks a `query-id`.
    /// - the errors of [`query`](Self::query).
    pub async fn periodic_query(
        &self,
        queries: Vec<Command>,
        interval: Duration,
    ) -> Result<PeriodicQuery> {
        if queries.is_empty() {
            return Err(ClientError::Protocol(
                "periodic query needs at least one query".into(),
            ));
        }
        if interval.is_zero() {
            return Err(ClientError::Protocol(
                "periodic query interval must be greater than zero".into(),
            ));
        }

        let count = queries.len();
        let entries: Vec<Value> = queries.iter().map(Command::to_entry).collect();
        let command = Command::new("add-periodic-query", Attributes::new())
            .with_attribute("queries", entries)
            .with_attribute("period", interval.as_secs_f64());

        let id = self.next_id();
        let (reply, rx) = oneshot::channel();
        self.submit(Control::Request {
            id,
            command,
            expect: Expect::Subscription {
                queries: count,
                reply,
            },
        })?;
        let (query_id, slot) = self.await_response(id, rx).await?;
        info!(query_id, queries = count, ?interval, "session: periodic query started");
        Ok(PeriodicQuery::new(query_id, slot, self.control.clone()))
    }

    /// Sizes of the pending, action and subscription tables.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionLost`] / [`ClientError::SessionClosed`].
    pub async fn diagnostics(&self) -> Result<Diagnostics> {
        let (reply, rx) = oneshot::channel();
        self.submit(Control::Diagnostics { reply })?;
        rx.await.map_err(|_| self.terminal_error())
    }

    /// Close the session and wait for the dispatch task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the dispatch task panicked.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;

        let (done, done_rx) = oneshot::channel();
        if self.control.send(Control::Shutdown { done: Some(done) }).is_ok() {
            let _ = done_rx.await;
        }

        if let Some(task) = self.dispatch.take() {
            task.await
                .map_err(|err| ClientError::Io(format!("dispatch task failed: {err}")))?;
        }
        info!("session: closed");
        Ok(())
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    fn submit(&self, msg: Control) -> Result<()> {
        self.control.send(msg).map_err(|_| self.terminal_error())
    }

    /// Error reported to callers once the dispatch task has stopped.
    fn terminal_error(&self) -> ClientError {
        match *self.state.borrow() {
            ConnectionState::Failed => ClientError::ConnectionLost,
            _ => ClientError::SessionClosed,
        }
    }

    /// Wait for the reply to request `id`, releasing it on timeout or drop.
    async fn await_response<T>(&self, id: u64, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        let guard = ReleaseGuard::new(&self.control, Control::Forget { id });
        let timeout = self.config.request_timeout();

        let received = match tokio::time::timeout(timeout, rx).await {
            Ok(received) => received,
            Err(_) => {
                warn!(request_id = id, ?timeout, "session: request timed out");
                return Err(ClientError::RequestTimeout(timeout));
            }
        };
        guard.disarm();

        received.unwrap_or_else(|_| Err(self.terminal_error()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            debug!("session: dropped without close, shutting down");
            self.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.config.endpoint.authority())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
