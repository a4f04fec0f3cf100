//! Duplex channel client
//!
//! A single websocket connection to the realtime backend. Outgoing messages
//! are serialized to JSON text frames; incoming text frames are parsed and
//! appended to an ordered inbox that the caller drains one message at a
//! time. The channel knows nothing about the protocol carried on top.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_REALTIME_NAMESPACE;

/// Realtime wire protocol version (`v` query parameter)
pub const PROTOCOL_VERSION: &str = "5";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors raised by the duplex channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("Channel is not connected")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Channel closed before a message arrived")]
    Closed,

    #[error("No message received within {0:?}")]
    Timeout(Duration),
}

/// A message-oriented duplex connection
///
/// Methods take `&mut self`, so a channel has exactly one user and at most
/// one outstanding [`await_message`](DuplexChannel::await_message).
#[allow(async_fn_in_trait)]
pub trait DuplexChannel {
    /// Open a connection to `host`, optionally resuming a prior session
    async fn connect(&mut self, host: &str, resume_session: Option<&str>)
        -> Result<(), ChannelError>;

    /// Serialize `message` and transmit it
    async fn send<M: Serialize + Sync>(&mut self, message: &M) -> Result<(), ChannelError>;

    /// Dequeue the oldest received message
    fn next_message(&mut self) -> Option<Value>;

    /// Suspend until at least one message is queued
    ///
    /// Resolves immediately when messages are already waiting. Fails with
    /// [`ChannelError::Closed`] if the connection ends first, and with
    /// [`ChannelError::Timeout`] once `timeout` elapses.
    async fn await_message(&mut self, timeout: Duration) -> Result<(), ChannelError>;

    /// Drop every queued message
    fn reset(&mut self);

    /// Release the transport; calling it twice is harmless
    async fn close(&mut self);
}

/// Where and how to reach the realtime backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoint {
    /// `wss` in production, `ws` against a local server
    pub scheme: String,
    /// Database namespace (`ns` parameter)
    pub namespace: String,
}

impl Default for ChannelEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_REALTIME_NAMESPACE)
    }
}

impl ChannelEndpoint {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            scheme: "wss".to_string(),
            namespace: namespace.into(),
        }
    }

    /// Use a different URL scheme (e.g. plain `ws` for tests)
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Build the connect URL for `host`
    pub fn url(&self, host: &str, resume_session: Option<&str>) -> String {
        let mut url = format!(
            "{}://{}/.ws?ns={}&v={}",
            self.scheme, host, self.namespace, PROTOCOL_VERSION
        );
        if let Some(session) = resume_session.filter(|s| !s.is_empty()) {
            url.push_str("&ls=");
            url.push_str(session);
        }
        url
    }
}

/// Messages received on one connection
#[derive(Default)]
struct Inbox {
    messages: Mutex<VecDeque<Value>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Inbox {
    fn push(&self, message: Value) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Value> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn is_empty(&self) -> bool {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    fn clear(&self) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct Connection {
    writer: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

/// Websocket implementation of [`DuplexChannel`]
pub struct WsChannel {
    endpoint: ChannelEndpoint,
    connection: Option<Connection>,
    inbox: Option<Arc<Inbox>>,
}

impl WsChannel {
    pub fn new(endpoint: ChannelEndpoint) -> Self {
        Self {
            endpoint,
            connection: None,
            inbox: None,
        }
    }

    pub fn endpoint(&self) -> &ChannelEndpoint {
        &self.endpoint
    }

    /// Whether a socket is currently open
    pub fn is_connected(&self) -> bool {
        self.connection.is_some() && self.inbox.as_ref().is_some_and(|inbox| !inbox.is_closed())
    }
}

impl DuplexChannel for WsChannel {
    async fn connect(
        &mut self,
        host: &str,
        resume_session: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.close().await;

        let url = self.endpoint.url(host, resume_session);
        debug!("Connecting to {}", url);
        let (ws_stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|source| ChannelError::Connect {
                    url: url.clone(),
                    source,
                })?;
        info!("Realtime connection established with {}", host);

        let (writer, read) = ws_stream.split();
        let inbox = Arc::new(Inbox::default());
        let reader = tokio::spawn(read_loop(read, Arc::clone(&inbox)));

        self.inbox = Some(inbox);
        self.connection = Some(Connection { writer, reader });
        Ok(())
    }

    async fn send<M: Serialize + Sync>(&mut self, message: &M) -> Result<(), ChannelError> {
        let Some(connection) = self.connection.as_mut() else {
            warn!("Dropping outgoing message: channel is not connected");
            return Err(ChannelError::NotConnected);
        };

        let text = serde_json::to_string(message)?;
        debug!("Sending {}", text);
        connection
            .writer
            .send(Message::Text(text))
            .await
            .map_err(ChannelError::Send)
    }

    fn next_message(&mut self) -> Option<Value> {
        self.inbox.as_ref().and_then(|inbox| inbox.pop())
    }

    async fn await_message(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        let Some(inbox) = self.inbox.clone() else {
            return Err(ChannelError::NotConnected);
        };

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so a push in between still wakes us
            let notified = inbox.notify.notified();
            if !inbox.is_empty() {
                return Ok(());
            }
            if inbox.is_closed() {
                return Err(ChannelError::Closed);
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ChannelError::Timeout(timeout));
                }
            }
        }
    }

    fn reset(&mut self) {
        if let Some(inbox) = &self.inbox {
            inbox.clear();
        }
    }

    async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.writer.close().await {
                debug!("Error while closing realtime socket: {}", e);
            }
            connection.reader.abort();
            info!("Realtime connection closed");
        }
        if let Some(inbox) = &self.inbox {
            inbox.mark_closed();
        }
    }
}

/// Parse incoming text frames into the inbox until the socket ends
async fn read_loop(mut read: SplitStream<WsStream>, inbox: Arc<Inbox>) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(message) => {
                    debug!("Received {}", text);
                    inbox.push(message);
                }
                Err(e) => warn!("Ignoring unparseable frame: {}", e),
            },
            Ok(Message::Close(_)) => {
                debug!("Server closed the realtime connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Realtime connection error: {}", e);
                break;
            }
        }
    }
    inbox.mark_closed();
}
