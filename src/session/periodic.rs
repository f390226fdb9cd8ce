//! Periodic query streams.
//!
//! A [`PeriodicQuery`] is the consumer side of a standing server-side
//! subscription: every period the server evaluates the query group and pushes
//! one `periodic-result` frame. The dispatch task publishes each batch into a
//! [`watch`] channel, so at most one batch is buffered per stream and a slow
//! consumer only ever sees the newest one.
//!
//! Dropping or [`close`](PeriodicQuery::close)-ing the stream removes the
//! subscription from the dispatch task and sends `remove-periodic-query` to
//! the server, on every exit path including task cancellation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures_util::Stream;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::protocol::Reply;
use crate::session::dispatch::{Control, ControlSender};
use crate::{ClientError, Result};

/// One evaluation of a query group.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Zero-based sequence number within this subscription.
    pub tick: u64,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
    /// One result per query, in the order the queries were given.
    pub results: Vec<Reply>,
}

/// Latest-value slot shared between the dispatch task and one consumer.
#[derive(Debug, Clone)]
pub(crate) enum StreamSlot {
    /// Subscribed, nothing published yet.
    Waiting,
    /// Most recent batch.
    Batch(Batch),
    /// The stream ended with this error.
    Ended(ClientError),
}

struct Subscription {
    queries: usize,
    next_tick: u64,
    tx: watch::Sender<StreamSlot>,
}

/// Subscription table keyed by server query id. Owned by the dispatch task.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    subs: HashMap<u64, Subscription>,
}

impl SubscriptionTable {
    /// Register a subscription and return its consumer end.
    pub(crate) fn open(&mut self, query_id: u64, queries: usize) -> watch::Receiver<StreamSlot> {
        let (tx, rx) = watch::channel(StreamSlot::Waiting);
        if let Some(old) = self.subs.insert(
            query_id,
            Subscription {
                queries,
                next_tick: 0,
                tx,
            },
        ) {
            warn!(query_id, "periodic: server reused a live query id");
            old.tx.send_replace(StreamSlot::Ended(ClientError::Protocol(format!(
                "query id {query_id} reassigned"
            ))));
        }
        debug!(query_id, queries, "periodic: subscription opened");
        rx
    }

    /// Publish a batch, replacing any batch the consumer has not read yet.
    ///
    /// Returns `false` when the query id is unknown or the batch is malformed.
    pub(crate) fn publish(&mut self, query_id: u64, results: Vec<Reply>) -> bool {
        let Some(sub) = self.subs.get_mut(&query_id) else {
            debug!(query_id, "periodic: result for inactive subscription dropped");
            return false;
        };

        if results.len() != sub.queries {
            warn!(
                query_id,
                expected = sub.queries,
                got = results.len(),
                "periodic: batch size mismatch, dropping"
            );
            return false;
        }

        let batch = Batch {
            tick: sub.next_tick,
            received_at: Utc::now(),
            results,
        };
        sub.next_tick += 1;
        sub.tx.send_replace(StreamSlot::Batch(batch));
        true
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub(crate) fn close(&mut self, query_id: u64) -> bool {
        self.subs.remove(&query_id).is_some()
    }

    /// End every stream with `err` and forget all subscriptions.
    pub(crate) fn end_all(&mut self, err: &ClientError) -> Vec<u64> {
        self.subs
            .drain()
            .map(|(query_id, sub)| {
                sub.tx.send_replace(StreamSlot::Ended(err.clone()));
                query_id
            })
            .collect()
    }

    /// Number of live subscriptions.
    pub(crate) fn len(&self) -> usize {
        self.subs.len()
    }
}

/// Consumer handle for one periodic query group.
///
/// Yields [`Batch`]es in tick order until the stream is closed, the session
/// shuts down, or the connection is lost.
pub struct PeriodicQuery {
    query_id: u64,
    rx: watch::Receiver<StreamSlot>,
    control: ControlSender,
    released: bool,
    ended: bool,
}

impl PeriodicQuery {
    pub(crate) fn new(query_id: u64, rx: watch::Receiver<StreamSlot>, control: ControlSender) -> Self {
        Self {
            query_id,
            rx,
            control,
            released: false,
            ended: false,
        }
    }

    /// Server-assigned query id.
    #[must_use]
    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    /// Wait for the next batch.
    ///
    /// Returns `None` once the stream was closed by the caller or ended, and
    /// `Some(Err(_))` exactly once when the session ended it
    /// ([`ClientError::ConnectionLost`] or [`ClientError::SessionClosed`]).
    pub async fn next(&mut self) -> Option<Result<Batch>> {
        if self.released || self.ended {
            return None;
        }

        loop {
            if self.rx.changed().await.is_err() {
                self.ended = true;
                return None;
            }

            let slot = self.rx.borrow_and_update().clone();
            match slot {
                StreamSlot::Waiting => {}
                StreamSlot::Batch(batch) => return Some(Ok(batch)),
                StreamSlot::Ended(err) => {
                    self.ended = true;
                    return Some(Err(err));
                }
            }
        }
    }

    /// Stop the stream and release the server-side subscription.
    ///
    /// Idempotent; also performed on drop.
    pub fn close(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.ended {
            return;
        }
        if self
            .control
            .send(Control::Unsubscribe {
                query_id: self.query_id,
            })
            .is_err()
        {
            debug!(query_id = self.query_id, "periodic: session already gone on close");
        }
    }

    /// Adapt into a [`Stream`]; the subscription is released when the stream
    /// is dropped.
    pub fn into_stream(self) -> impl Stream<Item = Result<Batch>> + Send {
        futures_util::stream::unfold(self, |mut query| async move {
            query.next().await.map(|item| (item, query))
        })
    }
}

impl Drop for PeriodicQuery {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PeriodicQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicQuery")
            .field("query_id", &self.query_id)
            .field("released", &self.released)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}
