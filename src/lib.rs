//! Multiplexed request/response client for the agent WebSocket bridge.
//!
//! Many logical requests share one connection. Each request carries a
//! numeric id; the bridge answers with zero or more events for that id and
//! then exactly one terminal response.
//!
//! ```text
//! invoke ─┬─ register(id) ──────────► Correlator ◄── route ── receive loop ◄── transport
//!         └─ send frame ──► transport                  │
//!            wait (tiered timeout) ◄── settle ─────────┘
//! ```
//!
//! The receive loop is the only reader of the transport. When the transport
//! closes, every outstanding call fails with [`ClientError::ConnectionLost`].

mod client;
mod config;
mod correlator;
mod diagnostics;
mod error;
mod receive;
pub mod transport;

pub use client::{AgentClient, ConnectionState, InvokeOptions};
pub use config::{
    ClientConfig, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_HOST, DEFAULT_LONG_RUNNING_COMMANDS,
    DEFAULT_LONG_TIMEOUT_SECS, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS, TimeoutPolicy, bridge_url,
    parse_secs,
};
pub use correlator::{Completion, Correlator, EventSink, Settlement, channel_sink};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use error::ClientError;
pub use frames::{Args, Event, EventKind, Response};
