//! Transport seam between the client core and the wire.
//!
//! DESIGN
//! ======
//! A [`Connector`] opens one connection and hands back its two halves:
//! - [`FrameSink`]: shared write side. Called concurrently by every `invoke`,
//!   so implementations serialize whole frames.
//! - [`FrameSource`]: exclusive read side, owned by the receive loop.
//!
//! [`WsConnector`] speaks WebSocket text frames through `tokio-tungstenite`.
//! [`memory`] wires the same seam to in-process channels for tests and
//! embedding.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(Box<tungstenite::Error>),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("websocket send failed: {0}")]
    Send(Box<tungstenite::Error>),
    #[error("websocket receive failed: {0}")]
    Receive(Box<tungstenite::Error>),
    #[error("transport closed")]
    Closed,
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one complete text frame.
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Close the write side. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound text frame, or `Ok(None)` once the peer has closed.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;
}

/// Both halves of an established connection.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

/// Opens connections. One call per `AgentClient::connect`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, TransportError>;

    /// Human-readable target for logs.
    fn target(&self) -> String;
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Connects to a `ws://` or `wss://` URL.
#[derive(Clone, Debug)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;
        let (write, read) = stream.split();
        Ok(Connection {
            sink: Box::new(WsSink {
                inner: Mutex::new(write),
            }),
            source: Box::new(WsSource { inner: read }),
        })
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

struct WsSink {
    inner: Mutex<SplitSink<WsStream, Message>>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        let mut sink = self.inner.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    TransportError::Closed
                }
                other => TransportError::Send(Box::new(other)),
            })
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sink = self.inner.lock().await;
        match sink.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(TransportError::Send(Box::new(e))),
        }
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            let Some(message) = self.inner.next().await else {
                return Ok(None);
            };
            match message {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        tracing::warn!(len = bytes.len(), "ignoring non-utf8 binary frame");
                    }
                },
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Ok(None);
                }
                Err(e) => return Err(TransportError::Receive(Box::new(e))),
            }
        }
    }
}

// =============================================================================
// MEMORY
// =============================================================================

pub mod memory {
    //! In-process transport backed by unbounded channels.
    //!
    //! Every `connect` creates a fresh channel pair and publishes the server
    //! end as a [`MemoryPeer`] on the receiver returned by [`channel`].

    use std::sync::{Mutex, PoisonError};

    use async_trait::async_trait;
    use frames::{Request, Response};
    use serde_json::Value;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    use super::{Connection, Connector, FrameSink, FrameSource, TransportError};

    /// Create a connector and the stream of peers it will produce.
    #[must_use]
    pub fn channel() -> (MemoryConnector, UnboundedReceiver<MemoryPeer>) {
        let (peers_tx, peers_rx) = unbounded_channel();
        (MemoryConnector { peers: peers_tx }, peers_rx)
    }

    pub struct MemoryConnector {
        peers: UnboundedSender<MemoryPeer>,
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<Connection, TransportError> {
            let (to_peer_tx, to_peer_rx) = unbounded_channel();
            let (to_client_tx, to_client_rx) = unbounded_channel();

            let peer = MemoryPeer {
                from_client: to_peer_rx,
                to_client: Some(to_client_tx),
            };
            self.peers.send(peer).map_err(|_| TransportError::Closed)?;

            Ok(Connection {
                sink: Box::new(MemorySink {
                    tx: Mutex::new(Some(to_peer_tx)),
                }),
                source: Box::new(MemorySource { rx: to_client_rx }),
            })
        }

        fn target(&self) -> String {
            "memory".to_owned()
        }
    }

    struct MemorySink {
        tx: Mutex<Option<UnboundedSender<String>>>,
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send(&self, text: String) -> Result<(), TransportError> {
            let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(tx) = guard.as_ref() else {
                return Err(TransportError::Closed);
            };
            tx.send(text).map_err(|_| TransportError::Closed)
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            Ok(())
        }
    }

    struct MemorySource {
        rx: UnboundedReceiver<String>,
    }

    #[async_trait]
    impl FrameSource for MemorySource {
        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            Ok(self.rx.recv().await)
        }
    }

    /// Server end of an in-process connection.
    pub struct MemoryPeer {
        from_client: UnboundedReceiver<String>,
        to_client: Option<UnboundedSender<String>>,
    }

    impl MemoryPeer {
        /// Next raw frame written by the client, or `None` once it closed.
        pub async fn recv_text(&mut self) -> Option<String> {
            self.from_client.recv().await
        }

        /// Next request written by the client. Frames that do not parse as
        /// requests are skipped.
        pub async fn recv_request(&mut self) -> Option<Request> {
            loop {
                let text = self.from_client.recv().await?;
                if let Ok(request) = serde_json::from_str::<Request>(&text) {
                    return Some(request);
                }
            }
        }

        /// Push a raw frame to the client. Returns `false` once closed.
        pub fn send_text(&self, text: impl Into<String>) -> bool {
            self.to_client
                .as_ref()
                .is_some_and(|tx| tx.send(text.into()).is_ok())
        }

        pub fn send_json(&self, value: &Value) -> bool {
            self.send_text(value.to_string())
        }

        pub fn respond(&self, response: &Response) -> bool {
            let mut frame = serde_json::Map::new();
            frame.insert("id".to_owned(), Value::from(response.id));
            if let Some(result) = &response.result {
                frame.insert("result".to_owned(), result.clone());
            }
            if let Some(error) = &response.error {
                frame.insert("error".to_owned(), Value::String(error.clone()));
            }
            self.send_json(&Value::Object(frame))
        }

        /// Close the server side. The client's receive loop sees end-of-stream.
        pub fn close(&mut self) {
            self.to_client = None;
        }
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
