//! Socket halves over `tokio-tungstenite`.
//!
//! tungstenite hands out whole messages, so the receive half keeps the rest of
//! the current message and serves it in buffer-sized pieces, reporting
//! end-of-message when the last piece is taken.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::{Connector, Receive, SocketHalves, SocketSink, SocketSource};
use crate::error::{WsError, WsResult};

/// Connects with `tokio_tungstenite::connect_async` (plain and TLS endpoints).
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> WsResult<SocketHalves> {
        let (ws, response) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!("WebSocket handshake with {} completed ({})", url, response.status());
        Ok(split(ws))
    }
}

/// Split an established WebSocket into socket halves.
pub fn split<S>(ws: WebSocketStream<S>) -> SocketHalves
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    SocketHalves {
        sink: Box::new(TungsteniteSink {
            sink,
            fragmenting: false,
        }),
        source: Box::new(TungsteniteSource {
            stream,
            pending: Bytes::new(),
        }),
    }
}

pub struct TungsteniteSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    /// A message was started with a non-final frame.
    fragmenting: bool,
}

#[async_trait]
impl<S> SocketSink for TungsteniteSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, data: &[u8], end_of_message: bool) -> WsResult<()> {
        let message = if !self.fragmenting && end_of_message {
            match std::str::from_utf8(data) {
                Ok(text) => Message::Text(text.to_owned().into()),
                Err(_) => Message::Binary(Bytes::copy_from_slice(data)),
            }
        } else {
            let opcode = if self.fragmenting {
                Data::Continue
            } else {
                Data::Text
            };
            Message::Frame(Frame::message(
                data.to_vec(),
                OpCode::Data(opcode),
                end_of_message,
            ))
        };

        self.fragmenting = !end_of_message;
        self.sink.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) -> WsResult<()> {
        match self.sink.close().await {
            Ok(()) => Ok(()),
            Err(e) => match WsError::from(e) {
                WsError::ConnectionClosed => Ok(()),
                other => Err(other),
            },
        }
    }
}

pub struct TungsteniteSource<S> {
    stream: SplitStream<WebSocketStream<S>>,
    /// Unserved rest of the current message.
    pending: Bytes,
}

#[async_trait]
impl<S> SocketSource for TungsteniteSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn receive(&mut self, buf: &mut [u8]) -> WsResult<Receive> {
        if self.pending.is_empty() {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        self.pending = Bytes::from(text);
                        break;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        self.pending = data;
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!("Peer sent close frame: {:?}", frame);
                        return Ok(Receive::Closed);
                    }
                    None => return Ok(Receive::Closed),
                    Some(Err(e)) => {
                        return match WsError::from(e) {
                            WsError::ConnectionClosed => Ok(Receive::Closed),
                            other => Err(other),
                        }
                    }
                }
            }
        }

        let count = buf.len().min(self.pending.len());
        let chunk = self.pending.split_to(count);
        buf[..count].copy_from_slice(&chunk);
        Ok(Receive::Data {
            count,
            end_of_message: self.pending.is_empty(),
        })
    }
}
