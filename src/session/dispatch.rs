//! Session dispatch task: the correlation engine.
//!
//! One dispatch task per session owns both transport halves and every piece
//! of mutable protocol state:
//!
//! - the pending-request table (correlation id → waiting caller),
//! - the [`ActionTable`],
//! - the [`SubscriptionTable`],
//! - the set of granted privileges.
//!
//! Callers never touch that state. They post [`Control`] messages on an
//! unbounded channel and receive results on `oneshot` replies. Inbound frames
//! are classified here: a frame whose id matches a pending request resolves
//! that request; everything else is an event, which updates the action or
//! subscription tables where relevant and is then queued for the handler
//! task.
//!
//! When the transport drops, every suspended caller is failed with
//! [`ClientError::ConnectionLost`]; on an orderly shutdown they get
//! [`ClientError::SessionClosed`].

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{
    parse_entries, parse_privileges, Attributes, Command, InboundFrame, Reply,
    ACTION_STATUS_KIND, PERIODIC_RESULT_KIND, PRIVILEGES_KIND,
};
use crate::session::actions::{ActionHandle, ActionStatus, ActionTable, Followup, WaitReply};
use crate::session::events::HandlerMsg;
use crate::session::periodic::{StreamSlot, SubscriptionTable};
use crate::session::{ConnectionState, Diagnostics};
use crate::transport::{TransportReader, TransportWriter};
use crate::{ClientError, Result};

/// Sender side of the control channel.
pub(crate) type ControlSender = mpsc::UnboundedSender<Control>;

/// Reply carrying a new subscription's id and consumer end.
pub(crate) type SubscriptionReply = oneshot::Sender<Result<(u64, watch::Receiver<StreamSlot>)>>;

/// What the caller of a [`Control::Request`] is waiting for.
pub(crate) enum Expect {
    /// Only that the frame was written.
    Sent(oneshot::Sender<Result<()>>),
    /// The correlated response.
    Reply(oneshot::Sender<Result<Reply>>),
    /// The server-assigned action id of an `action-*` command.
    Action(oneshot::Sender<Result<ActionHandle>>),
    /// The server-assigned query id of an `add-periodic-query` command.
    Subscription {
        queries: usize,
        reply: SubscriptionReply,
    },
}

impl Expect {
    fn fail(self, err: ClientError) {
        match self {
            Self::Sent(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Reply(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Action(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Subscription { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Requests from session handles to the dispatch task.
pub(crate) enum Control {
    /// Transmit `command` under correlation id `id`.
    Request {
        id: u64,
        command: Command,
        expect: Expect,
    },
    /// The caller stopped waiting for `id` (timeout or cancellation).
    Forget { id: u64 },
    /// Wait for an action to finish.
    WaitAction {
        action_id: u64,
        waiter_id: u64,
        remove_after: bool,
        reply: WaitReply,
    },
    /// A waiter stopped waiting.
    AbandonWait { action_id: u64, waiter_id: u64 },
    /// Read the status of a resident action.
    ActionStatus {
        action_id: u64,
        reply: oneshot::Sender<Option<ActionStatus>>,
    },
    /// Release a periodic query.
    Unsubscribe { query_id: u64 },
    /// Read the granted privilege set.
    Privileges {
        reply: oneshot::Sender<BTreeSet<String>>,
    },
    /// Read table sizes.
    Diagnostics { reply: oneshot::Sender<Diagnostics> },
    /// Orderly shutdown; `done` fires once the transport is closed.
    Shutdown { done: Option<oneshot::Sender<()>> },
}

/// Whether the dispatch loop keeps running after handling a message.
enum Flow {
    Continue,
    Stop,
}

struct PendingRequest {
    kind: String,
    issued_at: Instant,
    expect: Expect,
}

/// The dispatch task state. Built by the session and consumed by [`run`](Self::run).
pub(crate) struct Dispatcher {
    reader: TransportReader,
    writer: TransportWriter,
    control_rx: mpsc::UnboundedReceiver<Control>,
    handlers: mpsc::UnboundedSender<HandlerMsg>,
    state_tx: watch::Sender<ConnectionState>,
    ids: Arc<AtomicU64>,
    cancel: CancellationToken,
    pending: HashMap<u64, PendingRequest>,
    actions: ActionTable,
    subscriptions: SubscriptionTable,
    privileges: BTreeSet<String>,
}

impl Dispatcher {
    pub(crate) fn new(
        (reader, writer): (TransportReader, TransportWriter),
        control_rx: mpsc::UnboundedReceiver<Control>,
        handlers: mpsc::UnboundedSender<HandlerMsg>,
        state_tx: watch::Sender<ConnectionState>,
        ids: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader,
            writer,
            control_rx,
            handlers,
            state_tx,
            ids,
            cancel,
            pending: HashMap::new(),
            actions: ActionTable::default(),
            subscriptions: SubscriptionTable::default(),
            privileges: BTreeSet::new(),
        }
    }

    /// Receive/dispatch loop. Returns once the session is closed or the
    /// connection is lost; all tables are empty at that point.
    pub(crate) async fn run(mut self) {
        self.state_tx.send_replace(ConnectionState::Open);
        info!("session dispatch: started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!("session dispatch: cancellation received");
                    self.shutdown(None).await;
                    break;
                }

                msg = self.control_rx.recv() => {
                    let flow = match msg {
                        None => {
                            self.shutdown(None).await;
                            Flow::Stop
                        }
                        Some(Control::Shutdown { done }) => {
                            self.shutdown(done).await;
                            Flow::Stop
                        }
                        Some(msg) => self.handle_control(msg).await,
                    };
                    if matches!(flow, Flow::Stop) {
                        break;
                    }
                }

                frame = self.reader.receive() => {
                    match frame {
                        Ok(frame) => self.handle_frame(frame).await,
                        Err(e) => {
                            self.connection_lost(&e).await;
                            break;
                        }
                    }
                }
            }
        }

        info!("session dispatch: stopped");
    }

    // ── Control messages ──────────────────────────────────────────────────────

    async fn handle_control(&mut self, msg: Control) -> Flow {
        match msg {
            Control::Request { id, command, expect } => {
                return self.transmit(id, command, expect).await;
            }

            Control::Forget { id } => {
                if let Some(pending) = self.pending.remove(&id) {
                    debug!(request_id = id, kind = pending.kind.as_str(), "session dispatch: request abandoned");
                }
            }

            Control::WaitAction {
                action_id,
                waiter_id,
                remove_after,
                reply,
            } => {
                let followup = self.actions.wait(action_id, waiter_id, remove_after, reply);
                self.follow_up(followup).await;
            }

            Control::AbandonWait {
                action_id,
                waiter_id,
            } => {
                let followup = self.actions.abandon(action_id, waiter_id);
                self.follow_up(followup).await;
            }

            Control::ActionStatus { action_id, reply } => {
                let _ = reply.send(self.actions.status(action_id));
            }

            Control::Unsubscribe { query_id } => {
                if self.subscriptions.close(query_id) {
                    info!(query_id, "session dispatch: periodic query released");
                    self.notify("remove-periodic-query", json!({ "query-id": query_id }))
                        .await;
                }
            }

            Control::Privileges { reply } => {
                let _ = reply.send(self.privileges.clone());
            }

            Control::Diagnostics { reply } => {
                let _ = reply.send(Diagnostics {
                    pending_requests: self.pending.len(),
                    actions: self.actions.len(),
                    subscriptions: self.subscriptions.len(),
                });
            }

            // Handled by the loop before reaching here.
            Control::Shutdown { done } => {
                self.shutdown(done).await;
                return Flow::Stop;
            }
        }

        Flow::Continue
    }

    async fn transmit(&mut self, id: u64, command: Command, expect: Expect) -> Flow {
        if let Some(required) = command.required_privilege() {
            if !self.privileges.contains(required) {
                warn!(
                    request_id = id,
                    kind = command.kind(),
                    privilege = required,
                    "session dispatch: privilege not granted, command not sent"
                );
                expect.fail(ClientError::PrivilegeRequired(required.to_owned()));
                return Flow::Continue;
            }
        }

        if let Err(e) = self.writer.send(&command, id).await {
            expect.fail(e.clone());
            if e == ClientError::TransportClosed {
                self.connection_lost(&e).await;
                return Flow::Stop;
            }
            return Flow::Continue;
        }

        match expect {
            Expect::Sent(tx) => {
                let _ = tx.send(Ok(()));
            }
            expect => {
                self.pending.insert(
                    id,
                    PendingRequest {
                        kind: command.kind().to_owned(),
                        issued_at: Instant::now(),
                        expect,
                    },
                );
            }
        }

        Flow::Continue
    }

    // ── Inbound frames ────────────────────────────────────────────────────────

    async fn handle_frame(&mut self, frame: InboundFrame) {
        if frame.kind == PRIVILEGES_KIND {
            self.record_privileges(&frame.payload);
        }

        if let Some(id) = frame.id {
            if let Some(pending) = self.pending.remove(&id) {
                self.resolve(id, pending, frame).await;
                return;
            }
        }

        match frame.kind.as_str() {
            ACTION_STATUS_KIND => self.apply_action_status(&frame.payload).await,
            PERIODIC_RESULT_KIND => self.publish_periodic(&frame.payload),
            _ => {}
        }

        if self.handlers.send(HandlerMsg::Dispatch(frame.into_event())).is_err() {
            debug!("session dispatch: handler task gone, event dropped");
        }
    }

    async fn resolve(&mut self, id: u64, pending: PendingRequest, frame: InboundFrame) {
        debug!(
            request_id = id,
            kind = pending.kind.as_str(),
            reply_kind = frame.kind.as_str(),
            elapsed_ms = u64::try_from(pending.issued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "session dispatch: response matched"
        );

        let outcome = frame.into_reply();
        match pending.expect {
            Expect::Sent(tx) => {
                let _ = tx.send(outcome.map(|_| ()));
            }

            Expect::Reply(tx) => {
                let _ = tx.send(outcome);
            }

            Expect::Action(tx) => match outcome
                .and_then(|reply| reply.require_u64("action-id").map(|action_id| (action_id, reply)))
            {
                Ok((action_id, ack)) => {
                    self.actions.track(action_id, &pending.kind);
                    // Acks may already report a status; a terminal one resolves later waits.
                    if ack.get("status").is_some() {
                        self.apply_action_status(&ack.payload).await;
                    }
                    let handle = ActionHandle::new(action_id, pending.kind);
                    if tx.send(Ok(handle)).is_err() {
                        debug!(action_id, "session dispatch: action submitter gone");
                        let followup = self.actions.discard(action_id);
                        self.follow_up(followup).await;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            },

            Expect::Subscription { queries, reply } => {
                match outcome.and_then(|reply| reply.require_u64("query-id")) {
                    Ok(query_id) => {
                        let rx = self.subscriptions.open(query_id, queries);
                        if reply.send(Ok((query_id, rx))).is_err() {
                            debug!(query_id, "session dispatch: subscriber gone");
                            self.subscriptions.close(query_id);
                            self.notify("remove-periodic-query", json!({ "query-id": query_id }))
                                .await;
                        }
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
        }
    }

    fn record_privileges(&mut self, payload: &Value) {
        for (name, has) in parse_privileges(payload) {
            if has {
                if self.privileges.insert(name.clone()) {
                    info!(privilege = name.as_str(), "session dispatch: privilege granted");
                }
            } else if self.privileges.remove(&name) {
                info!(privilege = name.as_str(), "session dispatch: privilege revoked");
            }
        }
    }

    async fn apply_action_status(&mut self, payload: &Value) {
        let action_id = payload.get("action-id").and_then(Value::as_u64);
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .and_then(ActionStatus::parse);

        let (Some(action_id), Some(status)) = (action_id, status) else {
            warn!(%payload, "session dispatch: malformed action status, skipping");
            return;
        };

        let info = payload.get("info").cloned().unwrap_or(Value::Null);
        let followup = self.actions.apply(action_id, status, info);
        self.follow_up(followup).await;
    }

    fn publish_periodic(&mut self, payload: &Value) {
        let Some(query_id) = payload.get("query-id").and_then(Value::as_u64) else {
            warn!(%payload, "session dispatch: periodic result without query-id, skipping");
            return;
        };

        match payload.get("results").map(parse_entries) {
            Some(Ok(results)) => {
                self.subscriptions.publish(query_id, results);
            }
            Some(Err(e)) => {
                warn!(query_id, error = %e, "session dispatch: malformed periodic result, skipping");
            }
            None => {
                warn!(query_id, "session dispatch: periodic result without results, skipping");
            }
        }
    }

    // ── Outbound notifications ────────────────────────────────────────────────

    async fn follow_up(&mut self, followup: Option<Followup>) {
        match followup {
            Some(Followup::Remove(action_id)) => {
                self.notify("remove-action", json!({ "action-id": action_id }))
                    .await;
            }
            Some(Followup::Cancel(action_id)) => {
                self.notify("cancel-action", json!({ "action-id": action_id }))
                    .await;
            }
            None => {}
        }
    }

    /// Best-effort fire-and-forget command issued by the session itself.
    async fn notify(&mut self, kind: &str, attributes: Value) {
        let attributes = match attributes {
            Value::Object(map) => map,
            _ => Attributes::new(),
        };
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.writer.send(&Command::new(kind, attributes), id).await {
            debug!(kind, error = %e, "session dispatch: notification not delivered");
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Fail everything with `err` and leave all tables empty.
    fn drain(&mut self, err: &ClientError) {
        for (_, pending) in self.pending.drain() {
            pending.expect.fail(err.clone());
        }
        self.actions.fail_all(err);
        self.subscriptions.end_all(err);
    }

    async fn connection_lost(&mut self, cause: &ClientError) {
        warn!(
            error = %cause,
            pending = self.pending.len(),
            actions = self.actions.len(),
            subscriptions = self.subscriptions.len(),
            "session dispatch: connection lost"
        );
        self.state_tx.send_replace(ConnectionState::Failed);
        self.drain(&ClientError::ConnectionLost);
        self.writer.close().await;
    }

    async fn shutdown(&mut self, done: Option<oneshot::Sender<()>>) {
        info!(
            pending = self.pending.len(),
            actions = self.actions.len(),
            subscriptions = self.subscriptions.len(),
            "session dispatch: closing"
        );

        self.state_tx.send_replace(ConnectionState::Closed);
        let released = self.subscriptions.end_all(&ClientError::SessionClosed);
        for query_id in released {
            self.notify("remove-periodic-query", json!({ "query-id": query_id }))
                .await;
        }
        self.drain(&ClientError::SessionClosed);
        self.writer.close().await;

        if let Some(done) = done {
            let _ = done.send(());
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
