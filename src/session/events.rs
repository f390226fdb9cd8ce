//! Event handler registry.
//!
//! Handlers are fed through an unbounded channel by the dispatch task. Each
//! event's handlers run on the blocking pool via
//! [`tokio::task::spawn_blocking`], so a slow or blocking handler delays other
//! handlers but never the runtime thread that delivers responses. Events are
//! handled one at a time, and handlers for one event type run in registration
//! order. A panicking handler is logged and skipped; the remaining handlers
//! still see the event.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, Instrument};

use crate::protocol::Event;

/// Event callback. The returned flag reports whether the event was handled;
/// it is logged and has no effect on delivery.
pub type Handler = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Messages accepted by the handler task.
pub(crate) enum HandlerMsg {
    /// Append a handler for `kind`.
    Register { kind: String, handler: Handler },
    /// Deliver an event to every handler registered for its kind.
    Dispatch(Event),
}

/// Spawn the handler task.
pub(crate) fn spawn_handler_task() -> (mpsc::UnboundedSender<HandlerMsg>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_handlers(rx).instrument(info_span!("event_handlers")));
    (tx, handle)
}

/// Handler loop; exits when every sender has been dropped.
async fn run_handlers(mut rx: mpsc::UnboundedReceiver<HandlerMsg>) {
    let mut registry: HashMap<String, Vec<Handler>> = HashMap::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            HandlerMsg::Register { kind, handler } => {
                let handlers = registry.entry(kind).or_default();
                handlers.push(handler);
            }
            HandlerMsg::Dispatch(event) => {
                let Some(handlers) = registry.get(&event.kind).cloned() else {
                    debug!(kind = event.kind.as_str(), "event handlers: no handler registered");
                    continue;
                };
                let kind = event.kind.clone();
                if let Err(err) = tokio::task::spawn_blocking(move || invoke(&handlers, &event)).await {
                    error!(kind = kind.as_str(), error = %err, "event handlers: handler batch failed");
                }
            }
        }
    }

    debug!("event handlers: channel closed, stopping");
}

fn invoke(handlers: &[Handler], event: &Event) {
    for (index, handler) in handlers.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(handled) => {
                debug!(kind = event.kind.as_str(), index, handled, "event handlers: invoked");
            }
            Err(panic) => {
                error!(
                    kind = event.kind.as_str(),
                    index,
                    panic = panic_message(panic.as_ref()),
                    "event handlers: handler panicked"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
