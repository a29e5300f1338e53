//! In-process socket for deterministic tests.
//!
//! [`MemoryConnector`] hands every accepted connection's far end out as a
//! [`MemoryPeer`], which plays the server: it observes the client's frames and
//! scripts the frames the client receives.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connector, Receive, SocketHalves, SocketSink, SocketSource};
use crate::error::{WsError, WsResult};

#[derive(Debug)]
enum Event {
    Frame(Vec<u8>, bool),
    Close,
}

/// Connector whose connections end in a [`MemoryPeer`].
#[derive(Debug)]
pub struct MemoryConnector {
    peers: Option<mpsc::UnboundedSender<MemoryPeer>>,
}

impl MemoryConnector {
    /// Create a connector and the receiver that yields one peer per connect.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peers: Some(tx) }, rx)
    }

    /// A connector that refuses every connection.
    pub fn refusing() -> Self {
        Self { peers: None }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> WsResult<SocketHalves> {
        let peers = self
            .peers
            .as_ref()
            .ok_or_else(|| WsError::Transport(format!("Connection refused: {}", url)))?;

        let (halves, peer) = pair();
        peers
            .send(peer)
            .map_err(|_| WsError::Transport(format!("Connection refused: {}", url)))?;
        Ok(halves)
    }
}

/// Create a connected pair of client halves and server peer.
pub fn pair() -> (SocketHalves, MemoryPeer) {
    let (to_peer, from_client) = mpsc::unbounded_channel();
    let (to_client, from_peer) = mpsc::unbounded_channel();

    let halves = SocketHalves {
        sink: Box::new(MemorySink {
            tx: to_peer,
            closed: false,
        }),
        source: Box::new(MemorySource {
            rx: from_peer,
            current: Vec::new(),
            pos: 0,
            end_of_message: true,
        }),
    };
    let peer = MemoryPeer {
        tx: to_client,
        rx: from_client,
    };
    (halves, peer)
}

struct MemorySink {
    tx: mpsc::UnboundedSender<Event>,
    closed: bool,
}

#[async_trait]
impl SocketSink for MemorySink {
    async fn send(&mut self, data: &[u8], end_of_message: bool) -> WsResult<()> {
        if self.closed {
            return Err(WsError::ConnectionClosed);
        }
        self.tx
            .send(Event::Frame(data.to_vec(), end_of_message))
            .map_err(|_| WsError::ConnectionClosed)
    }

    async fn close(&mut self) -> WsResult<()> {
        if !self.closed {
            self.closed = true;
            let _ = self.tx.send(Event::Close);
        }
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Event>,
    current: Vec<u8>,
    pos: usize,
    end_of_message: bool,
}

#[async_trait]
impl SocketSource for MemorySource {
    async fn receive(&mut self, buf: &mut [u8]) -> WsResult<Receive> {
        if self.pos >= self.current.len() {
            match self.rx.recv().await {
                Some(Event::Frame(data, end_of_message)) => {
                    self.current = data;
                    self.pos = 0;
                    self.end_of_message = end_of_message;
                }
                Some(Event::Close) | None => return Ok(Receive::Closed),
            }
        }

        let count = buf.len().min(self.current.len() - self.pos);
        buf[..count].copy_from_slice(&self.current[self.pos..self.pos + count]);
        self.pos += count;
        Ok(Receive::Data {
            count,
            end_of_message: self.end_of_message && self.pos == self.current.len(),
        })
    }
}

/// The server end of an in-process connection.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl MemoryPeer {
    /// Push one frame to the client.
    pub fn send_frame(&self, data: impl Into<Vec<u8>>, end_of_message: bool) -> WsResult<()> {
        self.tx
            .send(Event::Frame(data.into(), end_of_message))
            .map_err(|_| WsError::ConnectionClosed)
    }

    /// Push a complete single-frame message to the client.
    pub fn send_message(&self, data: impl Into<Vec<u8>>) -> WsResult<()> {
        self.send_frame(data, true)
    }

    /// Receive the next frame sent by the client, or `None` once it closed.
    pub async fn recv_frame(&mut self) -> Option<(Vec<u8>, bool)> {
        match self.rx.recv().await? {
            Event::Frame(data, end_of_message) => Some((data, end_of_message)),
            Event::Close => None,
        }
    }

    /// Receive the next complete message sent by the client.
    pub async fn recv_message(&mut self) -> Option<Vec<u8>> {
        let mut message = Vec::new();
        loop {
            let (data, end_of_message) = self.recv_frame().await?;
            message.extend_from_slice(&data);
            if end_of_message {
                return Some(message);
            }
        }
    }

    /// Start the close handshake from the server side.
    pub fn close(&self) {
        let _ = self.tx.send(Event::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_frames_are_served_in_buffer_sized_pieces() {
        let (mut halves, peer) = pair();
        assert_ok!(peer.send_frame(b"hello world".to_vec(), false));
        assert_ok!(peer.send_frame(b"!".to_vec(), true));

        let mut buf = [0u8; 5];
        let r = halves.source.receive(&mut buf).await.unwrap();
        assert_eq!(r, Receive::Data { count: 5, end_of_message: false });
        assert_eq!(&buf, b"hello");

        let r = halves.source.receive(&mut buf).await.unwrap();
        assert_eq!(r, Receive::Data { count: 5, end_of_message: false });
        let r = halves.source.receive(&mut buf).await.unwrap();
        assert_eq!(r, Receive::Data { count: 1, end_of_message: false });
        assert_eq!(&buf[..1], b"d");

        let r = halves.source.receive(&mut buf).await.unwrap();
        assert_eq!(r, Receive::Data { count: 1, end_of_message: true });
        assert_eq!(&buf[..1], b"!");
    }

    #[tokio::test]
    async fn test_peer_close_is_reported() {
        let (mut halves, peer) = pair();
        peer.close();
        let mut buf = [0u8; 8];
        assert_eq!(halves.source.receive(&mut buf).await.unwrap(), Receive::Closed);

        drop(peer);
        assert_eq!(halves.source.receive(&mut buf).await.unwrap(), Receive::Closed);
    }

    #[tokio::test]
    async fn test_client_frames_reach_peer() {
        let (mut halves, mut peer) = pair();
        assert_ok!(halves.sink.send(b"{\"id\":", false).await);
        assert_ok!(halves.sink.send(b"\"a\"}", true).await);
        assert_eq!(peer.recv_message().await.unwrap(), b"{\"id\":\"a\"}");

        assert_ok!(halves.sink.close().await);
        assert!(peer.recv_message().await.is_none());
        assert_err!(halves.sink.send(b"late", true).await);
    }

    #[tokio::test]
    async fn test_refusing_connector() {
        let connector = MemoryConnector::refusing();
        let err = connector.connect("ws://nowhere").await.unwrap_err();
        assert!(matches!(err, WsError::Transport(_)));
    }
}
