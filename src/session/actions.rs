//! Long-running robot action tracking.
//!
//! The dispatch task owns one [`ActionTable`]. Actions enter the table when
//! the server acknowledges an `action-*` command with an `action-id`, move
//! forward on `action-status-changed` events, and leave it once a terminal
//! status has been observed by a waiter that asked for removal.
//!
//! Status transitions are monotonic: `pending → active → terminal`. Updates
//! that would move an action backwards, or touch an action that already
//! finished, are ignored.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{ClientError, Result};

/// Lifecycle status of a tracked action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionStatus {
    /// Accepted by the server, not started yet.
    Pending,
    /// Currently executing.
    Active,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Stopped before completion.
    Cancelled,
}

impl ActionStatus {
    /// Parse a wire status name. Accepts the long-form aliases some servers
    /// emit (`running`, `success`, `failure`, `canceled`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" | "queued" => Some(Self::Pending),
            "active" | "running" => Some(Self::Active),
            "succeeded" | "success" => Some(Self::Succeeded),
            "failed" | "failure" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Canonical wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Succeeded | Self::Failed | Self::Cancelled => 2,
        }
    }
}

/// Handle to an action the server accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionHandle {
    id: u64,
    kind: String,
}

impl ActionHandle {
    pub(crate) fn new(id: u64, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
        }
    }

    /// Server-assigned action identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Kind of the command that created the action (e.g. `action-goto`).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

/// Final state of an action that completed successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    /// Server-assigned action identifier.
    pub action_id: u64,
    /// Terminal status (always [`ActionStatus::Succeeded`]).
    pub status: ActionStatus,
    /// Final `info` payload reported with the status.
    pub info: Value,
}

/// Channel delivering the result of one `wait`.
pub(crate) type WaitReply = oneshot::Sender<Result<ActionOutcome>>;

/// Server notification the dispatch task must send after a table update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Followup {
    /// Retire a completed action (`remove-action`).
    Remove(u64),
    /// Stop an action nobody waits on any more (`cancel-action`).
    Cancel(u64),
}

struct Waiter {
    id: u64,
    remove_after: bool,
    reply: WaitReply,
}

struct TrackedAction {
    kind: String,
    status: ActionStatus,
    info: Value,
    waiters: Vec<Waiter>,
    orphaned: bool,
}

impl TrackedAction {
    fn outcome(&self, action_id: u64) -> Result<ActionOutcome> {
        match self.status {
            ActionStatus::Succeeded => Ok(ActionOutcome {
                action_id,
                status: self.status,
                info: self.info.clone(),
            }),
            ActionStatus::Cancelled => Err(ClientError::ActionFailed {
                reason: format!("cancelled{}", reason_suffix(&self.info)),
            }),
            _ => Err(ClientError::ActionFailed {
                reason: format!("{}{}", self.kind, reason_suffix(&self.info)),
            }),
        }
    }
}

/// Status table keyed by action id. Owned by the dispatch task.
#[derive(Default)]
pub(crate) struct ActionTable {
    actions: HashMap<u64, TrackedAction>,
}

impl ActionTable {
    /// Start tracking a freshly acknowledged action.
    pub(crate) fn track(&mut self, action_id: u64, kind: &str) {
        self.actions.insert(
            action_id,
            TrackedAction {
                kind: kind.to_owned(),
                status: ActionStatus::Pending,
                info: Value::Null,
                waiters: Vec::new(),
                orphaned: false,
            },
        );
        debug!(action_id, kind, "actions: tracking");
    }

    /// Current status of a resident action.
    pub(crate) fn status(&self, action_id: u64) -> Option<ActionStatus> {
        self.actions.get(&action_id).map(|a| a.status)
    }

    /// Number of resident actions.
    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }

    /// Apply a status update from the server.
    pub(crate) fn apply(
        &mut self,
        action_id: u64,
        status: ActionStatus,
        info: Value,
    ) -> Option<Followup> {
        let Some(action) = self.actions.get_mut(&action_id) else {
            debug!(action_id, status = status.as_str(), "actions: update for untracked action");
            return None;
        };

        if !action.status.can_transition_to(status) {
            debug!(
                action_id,
                from = action.status.as_str(),
                to = status.as_str(),
                "actions: ignoring non-monotonic transition"
            );
            return None;
        }

        action.status = status;
        if !info.is_null() {
            action.info = info;
        }

        if !status.is_terminal() {
            return None;
        }

        info!(action_id, kind = action.kind.as_str(), status = status.as_str(), "actions: finished");

        let outcome = action.outcome(action_id);
        let mut remove = action.orphaned;
        for waiter in action.waiters.drain(..) {
            remove |= waiter.remove_after;
            let _ = waiter.reply.send(outcome.clone());
        }

        if remove {
            self.actions.remove(&action_id);
            Some(Followup::Remove(action_id))
        } else {
            None
        }
    }

    /// Register a waiter; resolves immediately if the action already finished.
    pub(crate) fn wait(
        &mut self,
        action_id: u64,
        waiter_id: u64,
        remove_after: bool,
        reply: WaitReply,
    ) -> Option<Followup> {
        let Some(action) = self.actions.get_mut(&action_id) else {
            let _ = reply.send(Err(ClientError::Protocol(format!(
                "action {action_id} is not tracked"
            ))));
            return None;
        };

        if !action.status.is_terminal() {
            action.waiters.push(Waiter {
                id: waiter_id,
                remove_after,
                reply,
            });
            return None;
        }

        let _ = reply.send(action.outcome(action_id));
        if remove_after {
            self.actions.remove(&action_id);
            Some(Followup::Remove(action_id))
        } else {
            None
        }
    }

    /// Drop a waiter whose caller stopped waiting. Idempotent.
    ///
    /// When the last waiter of an unfinished action leaves, the action is
    /// marked orphaned (it is retired as soon as it finishes) and the server
    /// is asked to cancel it.
    pub(crate) fn abandon(&mut self, action_id: u64, waiter_id: u64) -> Option<Followup> {
        let action = self.actions.get_mut(&action_id)?;
        let before = action.waiters.len();
        action.waiters.retain(|w| w.id != waiter_id);

        if action.waiters.len() == before || !action.waiters.is_empty() {
            return None;
        }
        if action.status.is_terminal() || action.orphaned {
            return None;
        }

        action.orphaned = true;
        debug!(action_id, "actions: last waiter abandoned, cancelling");
        Some(Followup::Cancel(action_id))
    }

    /// Stop tracking an action no caller ever received a handle for.
    ///
    /// A finished action is retired; an unfinished one is cancelled.
    pub(crate) fn discard(&mut self, action_id: u64) -> Option<Followup> {
        self.actions.remove(&action_id).map(|action| {
            if action.status.is_terminal() {
                Followup::Remove(action_id)
            } else {
                Followup::Cancel(action_id)
            }
        })
    }

    /// Fail every waiter with `err` and forget all actions.
    pub(crate) fn fail_all(&mut self, err: &ClientError) {
        for (_, action) in self.actions.drain() {
            for waiter in action.waiters {
                let _ = waiter.reply.send(Err(err.clone()));
            }
        }
    }
}

/// `": <info>"` when the status carried a readable reason.
fn reason_suffix(info: &Value) -> String {
    match info {
        Value::Null => String::new(),
        Value::String(s) if s.is_empty() => String::new(),
        Value::String(s) => format!(": {s}"),
        other => format!(": {other}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
