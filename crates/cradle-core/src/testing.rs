//! Test doubles shared by the unit tests
//!
//! - [`MockRealtimeServer`]: a local websocket server playing scripted
//!   realtime connections
//! - [`MockHttpServer`]: a local axum server with a canned response
//! - [`ScriptedChannel`]: an in-memory [`DuplexChannel`] that records calls
//! - [`FakeGateway`]: a [`Gateway`] returning canned responses

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use crate::channel::{ChannelError, DuplexChannel};
use crate::gateway::{
    Gateway, GatewayError, GatewayResult, PasswordGrant, StatsResult, TokenGrant,
};

/// Behaviour of one accepted connection
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnection {
    /// Sent as soon as the socket opens
    pub on_open: Vec<Value>,
    /// Sent one at a time, each after a client message arrives
    pub replies: Vec<Value>,
    /// Close the socket right after `on_open`
    pub hang_up: bool,
}

impl ScriptedConnection {
    pub fn new(on_open: Vec<Value>) -> Self {
        Self {
            on_open,
            ..Self::default()
        }
    }

    pub fn with_replies(mut self, replies: Vec<Value>) -> Self {
        self.replies = replies;
        self
    }

    pub fn hanging_up(mut self) -> Self {
        self.hang_up = true;
        self
    }
}

/// Local websocket server serving scripted connections in order
pub struct MockRealtimeServer {
    port: u16,
    received: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    paths: Arc<Mutex<Vec<String>>>,
}

impl MockRealtimeServer {
    pub async fn start(connections: Vec<ScriptedConnection>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let paths = Arc::new(Mutex::new(Vec::new()));

        let task_paths = Arc::clone(&paths);
        tokio::spawn(async move {
            for script in connections {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let paths = Arc::clone(&task_paths);
                let callback = move |request: &Request,
                                      response: Response|
                      -> Result<Response, ErrorResponse> {
                    paths.lock().unwrap().push(request.uri().to_string());
                    Ok(response)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    continue;
                };
                tokio::spawn(serve(ws, script, received_tx.clone()));
            }
        });

        Self {
            port,
            received: tokio::sync::Mutex::new(received_rx),
            paths,
        }
    }

    /// `host:port` to pass to `connect`
    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Next message a client sent, across all connections
    pub async fn next_received(&self, timeout: Duration) -> Option<Value> {
        let mut rx = self.received.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Request paths of accepted connections, in order
    pub async fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

async fn serve<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    script: ScriptedConnection,
    received: mpsc::UnboundedSender<Value>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();
    for message in &script.on_open {
        if write.send(Message::Text(message.to_string())).await.is_err() {
            return;
        }
    }
    if script.hang_up {
        let _ = write.close().await;
        return;
    }

    let mut replies: VecDeque<Value> = script.replies.into();
    while let Some(Ok(frame)) = read.next().await {
        match frame {
            Message::Text(text) => {
                if let Ok(value) = serde_json::from_str::<Value>(&text) {
                    let _ = received.send(value);
                }
                if let Some(reply) = replies.pop_front() {
                    if write.send(Message::Text(reply.to_string())).await.is_err() {
                        return;
                    }
                }
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}

/// Request captured by [`MockHttpServer`]
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    /// Path and query, e.g. `/token?key=api-key`
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Clone)]
struct CannedResponse {
    status: StatusCode,
    body: Value,
    requests: mpsc::UnboundedSender<CapturedRequest>,
}

/// Local axum server answering every request with one canned response
pub struct MockHttpServer {
    port: u16,
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<CapturedRequest>>,
}

impl MockHttpServer {
    pub async fn start(status: u16, body: Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();
        let canned = CannedResponse {
            status: StatusCode::from_u16(status).unwrap(),
            body,
            requests: tx,
        };
        let router = Router::new().fallback(answer).with_state(canned);

        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            port,
            requests: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Next request the server received
    pub async fn request(&self) -> Option<CapturedRequest> {
        let mut rx = self.requests.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }
}

async fn answer(
    State(canned): State<CannedResponse>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let _ = canned.requests.send(CapturedRequest {
        method,
        uri: uri.to_string(),
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });
    (canned.status, Json(canned.body))
}

/// One recorded call on a [`ScriptedChannel`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCall {
    Connect {
        host: String,
        resume_session: Option<String>,
    },
    Send(Value),
    Reset,
    Close,
}

/// In-memory channel delivering scripted responses
///
/// Each `send` releases the next scripted reply into the queue; each
/// `connect` releases the next scripted greeting. Calls are recorded for
/// assertions.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    greetings: VecDeque<Value>,
    replies: VecDeque<Value>,
    queue: VecDeque<Value>,
    connected: bool,
    pub calls: Vec<ChannelCall>,
}

impl ScriptedChannel {
    pub fn new(greetings: Vec<Value>, replies: Vec<Value>) -> Self {
        Self {
            greetings: greetings.into(),
            replies: replies.into(),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                ChannelCall::Connect { host, .. } => Some(host.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent(&self) -> Vec<Value> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                ChannelCall::Send(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }
}

impl DuplexChannel for ScriptedChannel {
    async fn connect(
        &mut self,
        host: &str,
        resume_session: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.calls.push(ChannelCall::Connect {
            host: host.to_string(),
            resume_session: resume_session.map(str::to_string),
        });
        self.connected = true;
        if let Some(greeting) = self.greetings.pop_front() {
            self.queue.push_back(greeting);
        }
        Ok(())
    }

    async fn send<M: Serialize + Sync>(&mut self, message: &M) -> Result<(), ChannelError> {
        if !self.connected {
            return Err(ChannelError::NotConnected);
        }
        self.calls.push(ChannelCall::Send(serde_json::to_value(message)?));
        if let Some(reply) = self.replies.pop_front() {
            self.queue.push_back(reply);
        }
        Ok(())
    }

    fn next_message(&mut self) -> Option<Value> {
        self.queue.pop_front()
    }

    async fn await_message(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        if !self.queue.is_empty() {
            Ok(())
        } else if !self.connected {
            Err(ChannelError::Closed)
        } else {
            Err(ChannelError::Timeout(timeout))
        }
    }

    fn reset(&mut self) {
        self.calls.push(ChannelCall::Reset);
        self.queue.clear();
    }

    async fn close(&mut self) {
        self.calls.push(ChannelCall::Close);
        self.connected = false;
    }
}

/// Canned REST gateway recording which endpoints were hit
#[derive(Default)]
pub struct FakeGateway {
    pub password: Option<PasswordGrant>,
    pub refresh: Option<TokenGrant>,
    pub stats: Mutex<VecDeque<StatsResult>>,
    /// When set, `fetch_stats` waits for this before answering
    pub hold_fetch: Option<Arc<Notify>>,
    pub calls: Mutex<Vec<String>>,
    /// `(id_token, family_key, cursor)` of each fetch
    pub fetches: Mutex<Vec<(String, String, String)>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresh(mut self, grant: TokenGrant) -> Self {
        self.refresh = Some(grant);
        self
    }

    pub fn with_stats(self, result: StatsResult) -> Self {
        self.stats.lock().unwrap().push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl Gateway for FakeGateway {
    async fn verify_password(&self, _email: &str, _password: &str) -> GatewayResult<PasswordGrant> {
        self.record("verify");
        self.password
            .clone()
            .ok_or(GatewayError::AuthenticationFailed)
    }

    async fn refresh_token(&self, _refresh_token: &str) -> GatewayResult<TokenGrant> {
        self.record("refresh");
        self.refresh.clone().ok_or_else(|| GatewayError::Status {
            status: 400,
            body: "TOKEN_EXPIRED".to_string(),
        })
    }

    async fn fetch_stats(
        &self,
        id_token: &str,
        family_key: &str,
        cursor: &str,
    ) -> GatewayResult<StatsResult> {
        self.record("fetch");
        self.fetches.lock().unwrap().push((
            id_token.to_string(),
            family_key.to_string(),
            cursor.to_string(),
        ));
        if let Some(hold) = &self.hold_fetch {
            hold.notified().await;
        }
        let next = self.stats.lock().unwrap().pop_front();
        next.ok_or_else(|| GatewayError::Status {
            status: 500,
            body: "internal".to_string(),
        })
    }
}
