//! Correlator: request id → pending completion + optional event sink.
//!
//! DESIGN
//! ======
//! One `std::sync::Mutex` guards the table. It is held only for map
//! operations and never across an await or while user code runs:
//! - `register` inserts before the request is sent.
//! - `route` settles a completion or clones the entry's sink handle.
//! - `retire` removes, and is called only by the waiting side.
//!
//! Each completion slot is a oneshot sender kept in an `Option`. Settling
//! takes it, so a second settlement for the same id is detected instead of
//! silently overwriting the first.
//!
//! Sinks run on the receive task, one event at a time, behind a per-entry
//! mutex. A panicking sink is caught and counted; routing continues.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use frames::{Event, Inbound, Response};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::diagnostics::Diagnostics;
use crate::error::ClientError;

/// Final outcome delivered to a waiting `invoke`.
pub type Settlement = Result<Response, ClientError>;

/// Receiving half of a completion slot.
pub type Completion = oneshot::Receiver<Settlement>;

/// Callback invoked once per event for a single request id.
pub trait EventSink: Send + 'static {
    fn on_event(&mut self, event: &Event);
}

impl<F> EventSink for F
where
    F: FnMut(&Event) + Send + 'static,
{
    fn on_event(&mut self, event: &Event) {
        self(event);
    }
}

/// Sink that forwards every event into a channel. A dropped receiver is ignored.
#[must_use]
pub fn channel_sink(tx: mpsc::UnboundedSender<Event>) -> impl EventSink {
    move |event: &Event| {
        let _ = tx.send(event.clone());
    }
}

type SharedSink = Arc<Mutex<Box<dyn EventSink>>>;

struct PendingEntry {
    slot: Option<oneshot::Sender<Settlement>>,
    sink: Option<SharedSink>,
}

impl PendingEntry {
    /// Settle the slot. Returns `false` when it was already settled.
    fn settle(&mut self, settlement: Settlement) -> bool {
        let Some(tx) = self.slot.take() else {
            return false;
        };
        // The waiter may have gone away (cancelled) before retiring.
        let _ = tx.send(settlement);
        true
    }
}

enum RouteOutcome {
    Settled,
    AlreadySettled,
    Unknown,
}

#[derive(Default)]
struct Table {
    entries: HashMap<u64, PendingEntry>,
    closed: bool,
}

pub struct Correlator {
    table: Mutex<Table>,
    diagnostics: Arc<Diagnostics>,
}

impl Correlator {
    #[must_use]
    pub fn new(diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            diagnostics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a pending entry for `id` and return its completion.
    ///
    /// # Errors
    ///
    /// [`ClientError::DuplicateId`] if `id` is already pending, and
    /// [`ClientError::ConnectionLost`] once [`fail_all`](Self::fail_all) ran.
    pub fn register(&self, id: u64) -> Result<Completion, ClientError> {
        let mut table = self.lock();
        if table.closed {
            return Err(ClientError::ConnectionLost);
        }
        match table.entries.entry(id) {
            Entry::Occupied(_) => Err(ClientError::DuplicateId(id)),
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                vacant.insert(PendingEntry {
                    slot: Some(tx),
                    sink: None,
                });
                Ok(rx)
            }
        }
    }

    /// Attach an event sink to a pending entry. Returns `false` (and drops
    /// the sink) when the entry is already retired.
    pub fn register_event_sink(&self, id: u64, sink: Box<dyn EventSink>) -> bool {
        let mut table = self.lock();
        let Some(entry) = table.entries.get_mut(&id) else {
            return false;
        };
        entry.sink = Some(Arc::new(Mutex::new(sink)));
        true
    }

    /// Deliver an inbound message to whoever is waiting on its id.
    pub fn route(&self, message: Inbound) {
        match message {
            Inbound::Event(event) => self.route_event(&event),
            Inbound::Response(response) => self.route_response(response),
        }
    }

    fn route_event(&self, event: &Event) {
        let sink = self
            .lock()
            .entries
            .get(&event.id)
            .and_then(|entry| entry.sink.clone());

        let Some(sink) = sink else {
            self.diagnostics.record_orphan_event();
            trace!(id = event.id, kind = %event.kind, "discarding event without sink");
            return;
        };

        self.diagnostics.record_event_delivered();
        let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
        if panic::catch_unwind(AssertUnwindSafe(|| sink.on_event(event))).is_err() {
            self.diagnostics.record_sink_panic();
            warn!(id = event.id, kind = %event.kind, "event sink panicked");
        }
    }

    fn route_response(&self, response: Response) {
        let id = response.id;
        let outcome = match self.lock().entries.get_mut(&id) {
            None => RouteOutcome::Unknown,
            Some(entry) => {
                if entry.settle(Ok(response)) {
                    RouteOutcome::Settled
                } else {
                    RouteOutcome::AlreadySettled
                }
            }
        };

        match outcome {
            RouteOutcome::Settled => {
                self.diagnostics.record_response_routed();
                debug!(id, "response routed");
            }
            RouteOutcome::AlreadySettled => {
                self.diagnostics.record_duplicate_response();
                warn!(id, "second response for a settled request; dropping it");
            }
            RouteOutcome::Unknown => {
                self.diagnostics.record_unknown_response();
                trace!(id, "discarding response for unknown or retired id");
            }
        }
    }

    /// Remove the entry for `id`. Returns whether one existed.
    pub fn retire(&self, id: u64) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    /// Settle every pending slot with [`ClientError::ConnectionLost`] and
    /// refuse further registrations. Only the first call has any effect;
    /// returns how many slots it settled.
    pub fn fail_all(&self) -> usize {
        let mut table = self.lock();
        if table.closed {
            return 0;
        }
        table.closed = true;
        table
            .entries
            .values_mut()
            .map(|entry| entry.settle(Err(ClientError::ConnectionLost)))
            .filter(|settled| *settled)
            .count()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().entries.len()
    }
}

#[cfg(test)]
#[path = "correlator_test.rs"]
mod tests;
