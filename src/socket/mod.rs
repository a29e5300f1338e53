//! Raw WebSocket primitive used by the channel.
//!
//! A connection is split into a send half and a receive half so that writes
//! and reads never wait on each other. Receives are frame-oriented: each call
//! fills at most one buffer and reports whether the current message ended.

pub mod memory;
pub mod tungstenite;

use async_trait::async_trait;

use crate::error::WsResult;

pub use self::tungstenite::TungsteniteConnector;

/// Outcome of a single receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receive {
    /// `count` bytes were written to the front of the buffer. A zero count
    /// means nothing usable was received.
    Data { count: usize, end_of_message: bool },
    /// The peer closed the connection.
    Closed,
}

/// Receive half of a connection.
#[async_trait]
pub trait SocketSource: Send {
    /// Receive the next part of the current message into `buf`.
    async fn receive(&mut self, buf: &mut [u8]) -> WsResult<Receive>;
}

/// Send half of a connection.
#[async_trait]
pub trait SocketSink: Send {
    /// Send one frame. Frames sent with `end_of_message == false` are
    /// continued by the next call.
    async fn send(&mut self, data: &[u8], end_of_message: bool) -> WsResult<()>;

    /// Perform the close handshake.
    async fn close(&mut self) -> WsResult<()>;
}

/// Both halves of an open connection.
pub struct SocketHalves {
    pub sink: Box<dyn SocketSink>,
    pub source: Box<dyn SocketSource>,
}

impl std::fmt::Debug for SocketHalves {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHalves").finish_non_exhaustive()
    }
}

/// Opens connections to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> WsResult<SocketHalves>;
}
