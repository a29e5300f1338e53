//! Common test utilities for the WebSocket transport tests
//!
//! Provides shared helpers for:
//! - Connecting a multiplexer to an in-process peer
//! - Connecting through real tokio-tungstenite streams over a duplex pipe
//! - Building response and notification messages

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use surreal_ws::socket::memory::{MemoryConnector, MemoryPeer};
use surreal_ws::socket::{self, Connector, SocketHalves};
use surreal_ws::{Multiplexer, WsClientBuilder, WsError, WsResult};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const TEST_URL: &str = "ws://localhost:8000/rpc";

// ============================================================================
// In-process peer
// ============================================================================

pub async fn memory_mux() -> (Multiplexer, MemoryPeer) {
    memory_mux_with(WsClientBuilder::new(TEST_URL)).await
}

pub async fn memory_mux_with(builder: WsClientBuilder) -> (Multiplexer, MemoryPeer) {
    let (connector, mut peers) = MemoryConnector::new();
    let mux = builder
        .connector(Arc::new(connector))
        .connect()
        .await
        .expect("Failed to connect to memory peer");
    let peer = peers.recv().await.expect("No peer for connection");
    (mux, peer)
}

/// Receive the next request the client sent, as JSON.
pub async fn next_request(peer: &mut MemoryPeer) -> Value {
    let bytes = peer
        .recv_message()
        .await
        .expect("Client closed before sending a request");
    serde_json::from_slice(&bytes).expect("Request is not valid JSON")
}

pub fn response(id: &str, result: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({"id": id, "result": result})).unwrap()
}

pub fn error_response(id: &str, code: i64, message: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({"id": id, "error": {"code": code, "message": message}})).unwrap()
}

pub fn notification(id: &str, method: &str, params: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({"id": id, "method": method, "params": params})).unwrap()
}

/// Serialize a JSON request the way the client would.
pub fn request_bytes(mux: &Multiplexer, id: &str, method: &str) -> surreal_ws::PooledWriter {
    let mut writer = mux.pool().writer();
    surreal_ws::Request::with_id(id, method)
        .write_to(&mut writer)
        .unwrap();
    writer
}

// ============================================================================
// tokio-tungstenite over a duplex pipe
// ============================================================================

pub type ServerStream = WebSocketStream<DuplexStream>;

/// Connects through a real WebSocket handshake on an in-memory pipe and
/// hands out the server end of every connection.
pub struct DuplexConnector {
    servers: mpsc::UnboundedSender<ServerStream>,
}

impl DuplexConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { servers: tx }, rx)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, url: &str) -> WsResult<SocketHalves> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client, server) = futures::future::join(
            tokio_tungstenite::client_async(url, client),
            tokio_tungstenite::accept_async(server),
        )
        .await;

        let (ws, _) = client?;
        self.servers
            .send(server?)
            .map_err(|_| WsError::Transport("test server is gone".to_string()))?;
        Ok(socket::tungstenite::split(ws))
    }
}

/// A connector whose connect never completes.
pub struct StalledConnector;

#[async_trait]
impl Connector for StalledConnector {
    async fn connect(&self, _url: &str) -> WsResult<SocketHalves> {
        std::future::pending().await
    }
}

pub async fn duplex_mux_with(builder: WsClientBuilder) -> (Multiplexer, ServerStream) {
    let (connector, mut servers) = DuplexConnector::new();
    let mux = builder
        .connector(Arc::new(connector))
        .connect()
        .await
        .expect("Failed to connect over duplex pipe");
    let server = servers.recv().await.expect("No server stream");
    (mux, server)
}

/// Run a server that answers every request through `reply`, which returns
/// the messages to send back for it.
pub fn spawn_server<F>(mut server: ServerStream, reply: F) -> tokio::task::JoinHandle<Vec<Value>>
where
    F: Fn(&Value) -> Vec<Vec<u8>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(Ok(message)) = server.next().await {
            let request: Value = match message {
                Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                Message::Binary(data) => serde_json::from_slice(&data).unwrap(),
                Message::Close(_) => break,
                _ => continue,
            };
            for out in reply(&request) {
                let text = String::from_utf8(out).unwrap();
                if server.send(Message::Text(text.into())).await.is_err() {
                    return seen;
                }
            }
            seen.push(request);
        }
        seen
    })
}
