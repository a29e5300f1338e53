//! WebSocket Transport Tests
//!
//! End-to-end tests through real tokio-tungstenite streams on an in-memory
//! pipe, including:
//! - Request wire format
//! - Responses larger than the receive buffer
//! - Streamed (fragmented) request bodies
//! - Live notifications and server-side close

mod common;

use common::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use surreal_ws::{RequestBody, WsClientBuilder, WsError};
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Request / Response
// ============================================================================

#[tokio::test]
async fn test_round_trip_over_websocket() {
    let (mux, server) = duplex_mux_with(WsClientBuilder::new(TEST_URL)).await;
    let server = spawn_server(server, |request| {
        let id = request["id"].as_str().unwrap();
        vec![response(id, json!({"version": "2.0.0"}))]
    });

    let request = mux.request("version");
    let incoming = mux.send(&request).await.unwrap();
    assert_eq!(incoming.id(), request.id);
    let value: Option<Value> = incoming.body.read_value().await.unwrap();
    assert_eq!(value, Some(json!({"version": "2.0.0"})));

    mux.close().await.unwrap();
    let seen = server.await.unwrap();
    assert_eq!(seen.len(), 1);
    // async and empty params are left out
    assert_eq!(seen[0], json!({"id": request.id, "method": "version"}));
}

#[tokio::test]
async fn test_request_fields_on_the_wire() {
    let (mux, server) = duplex_mux_with(WsClientBuilder::new(TEST_URL)).await;
    let server = spawn_server(server, |request| {
        vec![response(request["id"].as_str().unwrap(), Value::Null)]
    });

    let request = mux
        .request("query")
        .with_async(true)
        .param("SELECT * FROM person WHERE age > $age")
        .param(json!({"age": 21}));
    assert_eq!(request.id.len(), 8);
    mux.send(&request).await.unwrap();

    mux.close().await.unwrap();
    let seen = server.await.unwrap();
    assert_eq!(
        seen[0],
        json!({
            "id": request.id,
            "async": true,
            "method": "query",
            "params": ["SELECT * FROM person WHERE age > $age", {"age": 21}]
        })
    );
}

#[tokio::test]
async fn test_large_response_is_read_in_pieces() {
    let (mux, server) =
        duplex_mux_with(WsClientBuilder::new(TEST_URL).receive_buffer_size(1024)).await;
    let rows: Vec<Value> = (0..2000)
        .map(|i| json!({"id": format!("person:{}", i), "name": "Tobie"}))
        .collect();
    let expected = rows.clone();
    let _server = spawn_server(server, move |request| {
        vec![response(request["id"].as_str().unwrap(), json!(rows))]
    });

    let incoming = mux.send(&mux.request("select")).await.unwrap();
    assert!(!incoming.body.is_complete());
    let value: Option<Vec<Value>> = incoming.body.read_value().await.unwrap();
    assert_eq!(value.unwrap(), expected);
    assert!(mux.pool().rented() <= 1);
}

#[tokio::test]
async fn test_streamed_request_body_arrives_as_one_message() {
    let (mux, server) =
        duplex_mux_with(WsClientBuilder::new(TEST_URL).send_chunk_size(64)).await;
    let server = spawn_server(server, |request| {
        vec![response(request["id"].as_str().unwrap(), json!("stored"))]
    });

    let content = "x".repeat(1000);
    let payload = serde_json::to_vec(&json!({
        "id": "stream-1",
        "method": "create",
        "params": ["document", {"content": content}]
    }))
    .unwrap();
    assert!(payload.len() > 64 * 10);

    let body = RequestBody::reader(std::io::Cursor::new(payload));
    let incoming = mux.request_once("stream-1", body).await.unwrap();
    assert_eq!(
        incoming.body.read_value::<String>().await.unwrap().as_deref(),
        Some("stored")
    );

    mux.close().await.unwrap();
    let seen = server.await.unwrap();
    assert_eq!(seen[0]["params"][1]["content"], json!(content));
}

// ============================================================================
// Live Notifications
// ============================================================================

#[tokio::test]
async fn test_live_notifications() {
    let (mux, server) = duplex_mux_with(WsClientBuilder::new(TEST_URL)).await;
    let _server = spawn_server(server, |request| {
        let id = request["id"].as_str().unwrap();
        (1..=3)
            .map(|n| notification(id, "notify", json!([{"action": "CREATE", "n": n}])))
            .collect()
    });

    let request = mux.request("live").param("person");
    let mut subscription = mux.subscribe(&request).await.unwrap();

    for n in 1..=3 {
        let incoming = subscription.next().await.unwrap().unwrap();
        assert_eq!(incoming.id(), request.id);
        assert_eq!(incoming.header.method(), Some("notify"));
        let value: Option<Value> = incoming.body.read_value().await.unwrap();
        assert_eq!(value.unwrap()[0]["n"], json!(n));
    }

    subscription.cancel();
    assert!(!mux.is_registered(&request.id));
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn test_server_close_fails_pending_request() {
    let (mux, mut server) = duplex_mux_with(WsClientBuilder::new(TEST_URL)).await;
    let server = tokio::spawn(async move {
        // read the request, then close without answering
        let _ = server.next().await;
        let _ = server.close(None).await;
    });

    let err = mux.send(&mux.request("sleep")).await.unwrap_err();
    assert_eq!(err, WsError::ConnectionClosed);
    assert!(!mux.is_connected());
    server.await.unwrap();

    let err = mux.send(&mux.request("ping")).await.unwrap_err();
    assert_eq!(err, WsError::NotConnected);
}

#[tokio::test]
async fn test_client_close_handshake() {
    let (mux, mut server) = duplex_mux_with(WsClientBuilder::new(TEST_URL)).await;
    let server = tokio::spawn(async move {
        while let Some(Ok(message)) = server.next().await {
            if let Message::Close(_) = message {
                return true;
            }
        }
        false
    });

    mux.close().await.unwrap();
    assert!(server.await.unwrap());
    assert!(!mux.is_connected());
}

#[tokio::test]
async fn test_raw_server_messages_reach_client() {
    let (mux, mut server) = duplex_mux_with(WsClientBuilder::new(TEST_URL)).await;
    let request = mux.request("info");

    let id = request.id.clone();
    let server = tokio::spawn(async move {
        let _ = server.next().await;
        // a stray message, a ping, then the real answer as binary
        server
            .send(Message::Text(
                String::from_utf8(notification("other", "notify", json!([]))).unwrap().into(),
            ))
            .await
            .unwrap();
        server.send(Message::Ping(Vec::new().into())).await.unwrap();
        server
            .send(Message::Binary(response(&id, json!({"ns": "test"})).into()))
            .await
            .unwrap();
        server
    });

    let incoming = mux.send(&request).await.unwrap();
    let value: Option<Value> = incoming.body.read_value().await.unwrap();
    assert_eq!(value, Some(json!({"ns": "test"})));
    let _server = server.await.unwrap();
}
