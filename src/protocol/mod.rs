//! JSON control protocol envelope.
//!
//! Every frame on the wire is one JSON array on its own line:
//!
//! | Direction | Shape                          | Notes                                  |
//! |-----------|--------------------------------|----------------------------------------|
//! | outbound  | `[kind, attributes, id]`       | `id` is the session's correlation id   |
//! | inbound   | `[kind, payload, id]`          | response to the pending request `id`   |
//! | inbound   | `[kind, payload]`              | server-initiated event                 |
//!
//! An inbound frame whose `kind` is `error` and whose `id` matches a pending
//! request resolves that request with [`ClientError::RemoteError`].
//!
//! Submodules:
//! - `codec`: newline framing with a bounded line length.
//! - `messages`: constructors for the commands used by robot programs.

pub mod codec;
pub mod messages;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::{ClientError, Result};

/// Structured command attributes: string keys, JSON values.
pub type Attributes = Map<String, Value>;

/// Privilege that gates every `action-*` command.
pub const ACTION_PRIVILEGE: &str = "change-action-command";

/// Inbound kind carrying a server-side error.
pub const ERROR_KIND: &str = "error";

/// Inbound kind carrying the granted privilege list.
pub const PRIVILEGES_KIND: &str = "privileges";

/// Inbound kind reporting an action status transition.
pub const ACTION_STATUS_KIND: &str = "action-status-changed";

/// Inbound kind carrying one periodic-query batch.
pub const PERIODIC_RESULT_KIND: &str = "periodic-result";

/// An outgoing command: a kind tag plus its attribute map.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: String,
    attributes: Attributes,
    privilege: Option<String>,
}

impl Command {
    /// Build a command from a kind and an attribute map.
    #[must_use]
    pub fn new(kind: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            kind: kind.into(),
            attributes,
            privilege: None,
        }
    }

    /// Build a command whose attributes are given as a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Protocol` if `attributes` is not a JSON object.
    pub fn from_value(kind: impl Into<String>, attributes: Value) -> Result<Self> {
        let kind = kind.into();
        match attributes {
            Value::Object(map) => Ok(Self::new(kind, map)),
            Value::Null => Ok(Self::new(kind, Attributes::new())),
            other => Err(ClientError::Protocol(format!(
                "attributes for '{kind}' must be an object, got {other}"
            ))),
        }
    }

    /// Set a single attribute, replacing any previous value.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Require an explicit privilege before this command may be sent.
    #[must_use]
    pub fn requiring_privilege(mut self, privilege: impl Into<String>) -> Self {
        self.privilege = Some(privilege.into());
        self
    }

    /// Command name as written on the wire.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Attribute map as written on the wire.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Whether this command starts a long-running robot action.
    #[must_use]
    pub fn is_action(&self) -> bool {
        self.kind.starts_with("action-")
    }

    /// Privilege the server must have granted before this command is sent.
    #[must_use]
    pub fn required_privilege(&self) -> Option<&str> {
        match self.privilege {
            Some(ref name) => Some(name.as_str()),
            None if self.is_action() => Some(ACTION_PRIVILEGE),
            None => None,
        }
    }

    /// Serialise as a single outbound NDJSON line (without the newline).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Protocol` if serialisation fails.
    pub fn encode(&self, id: u64) -> Result<String> {
        Ok(serde_json::to_string(&json!([self.kind, self.attributes, id]))?)
    }

    /// `[kind, attributes]` pair used inside periodic-query groups.
    #[must_use]
    pub fn to_entry(&self) -> Value {
        json!([self.kind, self.attributes])
    }
}

/// Successful response to a request, or one element of a periodic batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Response kind (e.g. `robot-info`, `timestamp`).
    pub kind: String,
    /// Response payload object.
    pub payload: Value,
}

impl Reply {
    /// Look up a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Read a required unsigned integer payload field.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Protocol` if the field is absent or not a `u64`.
    pub fn require_u64(&self, key: &str) -> Result<u64> {
        self.payload.get(key).and_then(Value::as_u64).ok_or_else(|| {
            ClientError::Protocol(format!(
                "missing required field: `{key}` in '{}' reply",
                self.kind
            ))
        })
    }
}

/// Server-initiated message not tied to a pending request.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event type used to select handlers (`error`, `warning`, ...).
    pub kind: String,
    /// Event payload object.
    pub payload: Value,
}

impl Event {
    /// The conventional human-readable `info` field, or `""`.
    #[must_use]
    pub fn info(&self) -> &str {
        self.payload
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// Frame kind.
    pub kind: String,
    /// Frame payload (an object for every well-formed server message).
    pub payload: Value,
    /// Correlation id, present on responses.
    pub id: Option<u64>,
}

impl InboundFrame {
    /// Interpret this frame as the response to a pending request.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::RemoteError` for `error` frames.
    pub fn into_reply(self) -> Result<Reply> {
        if self.kind == ERROR_KIND {
            return Err(remote_error(&self.payload));
        }
        Ok(Reply {
            kind: self.kind,
            payload: self.payload,
        })
    }

    /// Interpret this frame as an event.
    #[must_use]
    pub fn into_event(self) -> Event {
        Event {
            kind: self.kind,
            payload: self.payload,
        }
    }
}

/// Parse a single NDJSON line into an [`InboundFrame`].
///
/// # Return value
///
/// - `Ok(Some(frame))`: a well-formed envelope.
/// - `Ok(None)`: the line is empty or whitespace.
/// - `Err(ClientError::Protocol(...))`: not JSON, or not an envelope.
///
/// # Errors
///
/// - [`ClientError::Protocol`]`("malformed json: …")`: not valid JSON.
/// - [`ClientError::Protocol`]`("malformed envelope: …")`: not a
///   `[kind, payload]` / `[kind, payload, id]` array.
pub fn parse_inbound_line(line: &str) -> Result<Option<InboundFrame>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line)?;
    let Value::Array(mut parts) = value else {
        return Err(ClientError::Protocol(
            "malformed envelope: expected a JSON array".into(),
        ));
    };

    if parts.len() < 2 || parts.len() > 3 {
        return Err(ClientError::Protocol(format!(
            "malformed envelope: expected 2 or 3 elements, got {}",
            parts.len()
        )));
    }

    let id = match parts.get(2) {
        None | Some(Value::Null) => None,
        Some(raw) => Some(raw.as_u64().ok_or_else(|| {
            ClientError::Protocol(format!("malformed envelope: id {raw} is not an unsigned integer"))
        })?),
    };
    parts.truncate(2);
    let payload = parts.pop().unwrap_or(Value::Null);
    let kind = match parts.pop() {
        Some(Value::String(kind)) => kind,
        other => {
            return Err(ClientError::Protocol(format!(
                "malformed envelope: kind must be a string, got {other:?}"
            )))
        }
    };

    debug!(kind = kind.as_str(), ?id, "protocol: frame decoded");
    Ok(Some(InboundFrame { kind, payload, id }))
}

/// Parse a list of `[kind, payload]` pairs (periodic-query results).
///
/// # Errors
///
/// Returns `ClientError::Protocol` if `value` is not an array of pairs.
pub fn parse_entries(value: &Value) -> Result<Vec<Reply>> {
    let entries = value
        .as_array()
        .ok_or_else(|| ClientError::Protocol("results must be an array".into()))?;

    entries
        .iter()
        .map(|entry| match entry.as_array().map(Vec::as_slice) {
            Some([Value::String(kind), payload]) => Ok(Reply {
                kind: kind.clone(),
                payload: payload.clone(),
            }),
            _ => Err(ClientError::Protocol(format!(
                "result entry must be [kind, payload], got {entry}"
            ))),
        })
        .collect()
}

/// Read `(privilege, has)` pairs from a `privileges` payload.
#[must_use]
pub fn parse_privileges(payload: &Value) -> Vec<(String, bool)> {
    payload
        .get("privileges")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|entry| {
                    let name = entry.get("privilege")?.as_str()?;
                    let has = entry.get("has").and_then(Value::as_bool).unwrap_or(false);
                    Some((name.to_owned(), has))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Build [`ClientError::RemoteError`] from an `error` payload.
fn remote_error(payload: &Value) -> ClientError {
    let code = match payload.get("code").or_else(|| payload.get("type")) {
        Some(Value::String(code)) => code.clone(),
        Some(Value::Number(code)) => code.to_string(),
        _ => ERROR_KIND.to_owned(),
    };
    let message = payload
        .get("info")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    ClientError::RemoteError { code, message }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
