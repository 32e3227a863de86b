//! Counters for conditions the multiplexer swallows instead of surfacing.
//!
//! Unknown ids, sink panics and undecodable frames never fail a caller, but
//! they can point at a misbehaving bridge. The counters make them visible
//! without turning them into errors.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Diagnostics {
    responses_routed: AtomicU64,
    events_delivered: AtomicU64,
    unknown_responses: AtomicU64,
    duplicate_responses: AtomicU64,
    orphan_events: AtomicU64,
    sink_panics: AtomicU64,
    decode_failures: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    /// Responses that settled a pending request.
    pub responses_routed: u64,
    /// Events handed to a sink (including ones whose sink panicked).
    pub events_delivered: u64,
    /// Responses for ids that were never registered or are already retired.
    pub unknown_responses: u64,
    /// Responses for ids that are still pending but were already settled.
    pub duplicate_responses: u64,
    /// Events with no pending entry or no sink attached.
    pub orphan_events: u64,
    pub sink_panics: u64,
    pub decode_failures: u64,
}

impl Diagnostics {
    pub(crate) fn record_response_routed(&self) {
        self.responses_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unknown_response(&self) {
        self.unknown_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate_response(&self) {
        self.duplicate_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_orphan_event(&self) {
        self.orphan_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sink_panic(&self) {
        self.sink_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            responses_routed: self.responses_routed.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            unknown_responses: self.unknown_responses.load(Ordering::Relaxed),
            duplicate_responses: self.duplicate_responses.load(Ordering::Relaxed),
            orphan_events: self.orphan_events.load(Ordering::Relaxed),
            sink_panics: self.sink_panics.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}
