#![forbid(unsafe_code)]

//! Async session client for JSON robot control servers.
//!
//! A [`Session`] multiplexes one NDJSON connection between request/response
//! queries, long-running robot actions, periodic telemetry streams, and
//! server-initiated events.

pub mod config;
pub mod demo;
pub mod errors;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use errors::{ClientError, Result};
pub use protocol::{Command, Event, Reply};
pub use session::actions::{ActionHandle, ActionOutcome, ActionStatus};
pub use session::periodic::{Batch, PeriodicQuery};
pub use session::{ConnectionState, Diagnostics, Session};
