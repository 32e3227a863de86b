//! `AgentClient`: connection lifecycle and request engine.
//!
//! DESIGN
//! ======
//! A client owns at most one live connection at a time:
//! - `Live` bundles the shared write side, the connection's correlator, its
//!   id counter and the receive loop handle. Reconnecting builds a fresh
//!   `Live`, so ids restart at 1 and stale entries cannot leak across.
//! - `invoke*` clones the `Arc<Live>` under a short lock and then works
//!   lock-free, so callers never block one another.
//! - `connect`/`disconnect` are serialized by an async mutex held across
//!   the whole transition.
//!
//! CLEANUP
//! =======
//! Every registered id is retired by a drop guard owned by the waiting call.
//! That covers success, remote error, timeout, send failure, and the caller
//! dropping the `invoke` future mid-flight.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use frames::{Args, Request};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::correlator::{Correlator, EventSink};
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::error::ClientError;
use crate::receive;
use crate::transport::{Connection, Connector, FrameSink, TransportError, WsConnector};

/// Observable lifecycle position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Per-call knobs for [`AgentClient::invoke_with`].
#[derive(Default)]
pub struct InvokeOptions {
    sink: Option<Box<dyn EventSink>>,
    timeout: Option<Duration>,
}

impl InvokeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive progress/log/status events for this call.
    #[must_use]
    pub fn with_events(mut self, sink: impl EventSink) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Wait this long instead of the command's tier.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// =============================================================================
// LIVE CONNECTION
// =============================================================================

struct Live {
    sink: Arc<dyn FrameSink>,
    correlator: Arc<Correlator>,
    next_id: AtomicU64,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Live {
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn take_receiver(&self) -> Option<JoinHandle<()>> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        if let Some(handle) = self.take_receiver() {
            handle.abort();
        }
        self.correlator.fail_all();
    }
}

struct Slot {
    state: ConnectionState,
    live: Option<Arc<Live>>,
}

/// Retires a pending id when the waiting call finishes or is dropped.
struct RetireOnDrop {
    correlator: Arc<Correlator>,
    id: u64,
}

impl Drop for RetireOnDrop {
    fn drop(&mut self) {
        self.correlator.retire(self.id);
    }
}

/// Resets the client to `Disconnected` if a lifecycle future is dropped
/// before it disarms the guard.
struct ResetOnDrop<'a> {
    client: &'a AgentClient,
    armed: bool,
}

impl<'a> ResetOnDrop<'a> {
    fn arm(client: &'a AgentClient) -> Self {
        Self {
            client,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.client.reset_now();
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct AgentClient {
    config: ClientConfig,
    connector: Box<dyn Connector>,
    slot: Mutex<Slot>,
    transitions: tokio::sync::Mutex<()>,
    diagnostics: Arc<Diagnostics>,
}

impl AgentClient {
    /// Client for the WebSocket bridge at `config.url`.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let connector = WsConnector::new(config.url.clone());
        Self::with_connector(config, connector)
    }

    /// Client over a caller-supplied transport.
    #[must_use]
    pub fn with_connector(config: ClientConfig, connector: impl Connector + 'static) -> Self {
        Self {
            config,
            connector: Box::new(connector),
            slot: Mutex::new(Slot {
                state: ConnectionState::Disconnected,
                live: None,
            }),
            transitions: tokio::sync::Mutex::new(()),
            diagnostics: Arc::new(Diagnostics::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock_slot().state
    }

    /// `true` while connected and the transport has not closed underneath.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let slot = self.lock_slot();
        slot.state == ConnectionState::Connected
            && slot
                .live
                .as_ref()
                .is_some_and(|live| !live.correlator.is_closed())
    }

    /// Requests currently awaiting a response on the live connection.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.lock_slot()
            .live
            .as_ref()
            .map_or(0, |live| live.correlator.pending_count())
    }

    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        self.lock_slot().state = state;
    }

    /// Synchronous teardown: take the live connection, stop its reader and
    /// fail its pending calls. The write side closes when the last handle
    /// to it drops.
    fn reset_now(&self) {
        let live = {
            let mut slot = self.lock_slot();
            slot.state = ConnectionState::Disconnected;
            slot.live.take()
        };
        if let Some(live) = live {
            if let Some(handle) = live.take_receiver() {
                handle.abort();
            }
            live.correlator.fail_all();
            warn!(
                target = %self.connector.target(),
                "lifecycle future dropped mid-session; connection torn down"
            );
        }
    }

    // -------------------------------------------------------------------------
    // lifecycle
    // -------------------------------------------------------------------------

    /// Open the transport and start the receive loop.
    ///
    /// # Errors
    ///
    /// [`ClientError::AlreadyConnected`] when a connection is live, or a
    /// [`ClientError::Transport`] error when the transport cannot be opened.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let _transition = self.transitions.lock().await;
        if self.lock_slot().live.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        self.set_state(ConnectionState::Connecting);
        let reset = ResetOnDrop::arm(self);
        let opened = self.open().await;
        reset.disarm();
        match opened {
            Ok(live) => {
                let mut slot = self.lock_slot();
                slot.live = Some(Arc::new(live));
                slot.state = ConnectionState::Connected;
                drop(slot);
                info!(target = %self.connector.target(), "agent client connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(target = %self.connector.target(), error = %e, "agent client connect failed");
                Err(e)
            }
        }
    }

    async fn open(&self) -> Result<Live, ClientError> {
        let connect_timeout = self.config.connect_timeout;
        let Connection { sink, source } =
            tokio::time::timeout(connect_timeout, self.connector.connect())
                .await
                .map_err(|_| TransportError::ConnectTimeout(connect_timeout))??;

        let correlator = Arc::new(Correlator::new(Arc::clone(&self.diagnostics)));
        let (handle, ready) =
            receive::spawn(source, Arc::clone(&correlator), Arc::clone(&self.diagnostics));

        // Owning the handle from here on means a dropped `connect` aborts the reader.
        let live = Live {
            sink: Arc::from(sink),
            correlator,
            next_id: AtomicU64::new(1),
            receiver: Mutex::new(Some(handle)),
        };

        if ready.await.is_err() {
            let _ = live.sink.close().await;
            return Err(ClientError::ConnectionLost);
        }
        Ok(live)
    }

    /// Stop the receive loop, fail anything still pending, and close the
    /// transport. Safe to call repeatedly or before any `connect`.
    pub async fn disconnect(&self) {
        let _transition = self.transitions.lock().await;
        let live = {
            let mut slot = self.lock_slot();
            let live = slot.live.take();
            slot.state = if live.is_some() {
                ConnectionState::Disconnecting
            } else {
                ConnectionState::Disconnected
            };
            live
        };
        let Some(live) = live else {
            return;
        };
        // Dropped mid-teardown: `live` drops with the future, so only the state is left.
        let reset = ResetOnDrop::arm(self);

        if let Some(handle) = live.take_receiver() {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!(error = %e, "receive loop panicked"),
            }
        }
        // Normally already done by the loop's teardown guard.
        live.correlator.fail_all();

        if let Err(e) = live.sink.close().await {
            debug!(error = %e, "transport close failed");
        }

        reset.disarm();
        self.set_state(ConnectionState::Disconnected);
        info!(target = %self.connector.target(), "agent client disconnected");
    }

    /// Connect, run `work`, and disconnect on every exit path.
    ///
    /// A panic inside `work` is resumed after the connection is torn down.
    /// Dropping the returned future (an outer timeout, `select!`) tears the
    /// connection down synchronously.
    ///
    /// # Errors
    ///
    /// Connect failures, or whatever `work` returns.
    pub async fn scoped<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ClientError>,
    {
        self.connect().await?;
        let reset = ResetOnDrop::arm(self);
        let outcome = AssertUnwindSafe(work).catch_unwind().await;
        reset.disarm();
        self.disconnect().await;
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    // -------------------------------------------------------------------------
    // request engine
    // -------------------------------------------------------------------------

    /// Invoke `command` with the command's default timeout tier.
    ///
    /// # Errors
    ///
    /// See [`invoke_with`](Self::invoke_with).
    pub async fn invoke(&self, command: &str, args: Args) -> Result<Value, ClientError> {
        self.invoke_with(command, args, InvokeOptions::default())
            .await
    }

    /// Invoke `command`, delivering its events to `sink` before the result.
    ///
    /// # Errors
    ///
    /// See [`invoke_with`](Self::invoke_with).
    pub async fn invoke_with_events(
        &self,
        command: &str,
        args: Args,
        sink: impl EventSink,
    ) -> Result<Value, ClientError> {
        self.invoke_with(command, args, InvokeOptions::new().with_events(sink))
            .await
    }

    /// Send one request and wait for its terminal response.
    ///
    /// The id is registered before the frame is written, so a reply can
    /// never race ahead of its waiter.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotConnected`] without a live connection
    /// - [`ClientError::Timeout`] when the effective tier elapses
    /// - [`ClientError::Remote`] when the bridge answers with an error
    /// - [`ClientError::ConnectionLost`] when the transport closes
    pub async fn invoke_with(
        &self,
        command: &str,
        args: Args,
        options: InvokeOptions,
    ) -> Result<Value, ClientError> {
        let live = self
            .lock_slot()
            .live
            .clone()
            .ok_or(ClientError::NotConnected)?;

        let id = live.allocate_id();
        let timeout = self.config.timeouts.timeout_for(command, options.timeout);
        let request = Request::new(id, command, args).with_token(self.config.token.clone());
        let text = frames::encode_request(&request)?;

        let completion = live.correlator.register(id)?;
        let _retire = RetireOnDrop {
            correlator: Arc::clone(&live.correlator),
            id,
        };
        if let Some(sink) = options.sink {
            live.correlator.register_event_sink(id, sink);
        }

        live.sink.send(text).await.map_err(|e| match e {
            TransportError::Closed => ClientError::ConnectionLost,
            other => ClientError::Transport(other),
        })?;
        debug!(id, command, ?timeout, "request sent");

        let response = match tokio::time::timeout(timeout, completion).await {
            Err(_) => {
                debug!(id, command, ?timeout, "request timed out");
                return Err(ClientError::Timeout {
                    command: command.to_owned(),
                    timeout,
                });
            }
            // Slot dropped unsettled: the correlator went away with the connection.
            Ok(Err(_)) => return Err(ClientError::ConnectionLost),
            Ok(Ok(settlement)) => settlement?,
        };

        response.into_result().map_err(ClientError::Remote)
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
