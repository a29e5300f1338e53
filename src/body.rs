//! Body streams over rented receive buffers.
//!
//! A [`BodyStream`] serves the payload that follows a parsed header. When the
//! whole message arrived in the first receive it only reads from the rented
//! buffer. Otherwise it is a continuation: it holds the channel's receive half
//! and, once the buffered bytes are used up, receives the next frames into the
//! same buffer until the socket reports end-of-message.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::OwnedMutexGuard;

use crate::error::{WsError, WsResult};
use crate::pool::RentedBuffer;
use crate::protocol::decode_payload;
use crate::socket::{Receive, SocketSource};

/// The receive half of a channel, shared between the channel and a
/// continuation body.
pub(crate) struct SourceState {
    pub(crate) socket: Option<Box<dyn SocketSource>>,
    /// A message was started but its remaining frames were not received.
    pub(crate) unfinished: bool,
}

impl SourceState {
    pub(crate) fn new() -> Self {
        Self {
            socket: None,
            unfinished: false,
        }
    }
}

type Refill = (
    RentedBuffer,
    OwnedMutexGuard<SourceState>,
    WsResult<Receive>,
);

/// Readable payload of one inbound message.
///
/// Dropping the stream returns its buffer to the pool. Dropping a
/// continuation before the end of the message releases the receive half and
/// the channel skips the rest of that message on its next read.
pub struct BodyStream {
    buf: Option<RentedBuffer>,
    pos: usize,
    end: usize,
    /// Held while more frames of the message are pending.
    source: Option<OwnedMutexGuard<SourceState>>,
    refill: Option<BoxFuture<'static, Refill>>,
}

impl BodyStream {
    /// A body that lies entirely in `buf[start..end]`.
    pub(crate) fn complete(buf: RentedBuffer, start: usize, end: usize) -> Self {
        let end = end.min(buf.len());
        Self {
            buf: Some(buf),
            pos: start.min(end),
            end,
            source: None,
            refill: None,
        }
    }

    /// A body that starts in `buf[start..end]` and continues on the socket.
    pub(crate) fn continuation(
        buf: RentedBuffer,
        start: usize,
        end: usize,
        mut source: OwnedMutexGuard<SourceState>,
    ) -> Self {
        source.unfinished = true;
        let mut body = Self::complete(buf, start, end);
        body.source = Some(source);
        body
    }

    /// A body over bytes that do not belong to any pool.
    pub fn detached(bytes: impl Into<Vec<u8>>) -> Self {
        let buf = RentedBuffer::unpooled(bytes.into());
        let end = buf.len();
        Self::complete(buf, 0, end)
    }

    /// True if the rest of the body is already buffered.
    pub fn is_complete(&self) -> bool {
        self.source.is_none() && self.refill.is_none()
    }

    /// Bytes that can be read without touching the socket.
    pub fn buffered(&self) -> usize {
        self.end - self.pos
    }

    /// Read the rest of the body and decode the payload value.
    ///
    /// The trailing `}` of the envelope is ignored; `None` means the message
    /// carried no payload.
    pub async fn read_value<T: DeserializeOwned>(mut self) -> WsResult<Option<T>> {
        let mut bytes = Vec::with_capacity(self.buffered());
        self.read_to_end(&mut bytes).await?;
        decode_payload(&bytes)
    }

    /// Read the rest of the body into memory.
    pub async fn into_bytes(mut self) -> WsResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.buffered());
        self.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }

    /// Dispose of the body without reading it.
    pub fn discard(self) {
        if !self.is_complete() {
            tracing::debug!("Discarding body with frames still pending");
        }
    }
}

impl AsyncRead for BodyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if let Some(refill) = this.refill.as_mut() {
                let (buf, mut source, result) = ready!(refill.as_mut().poll(cx));
                this.refill = None;

                match result {
                    Ok(Receive::Data {
                        count,
                        end_of_message,
                    }) => {
                        this.buf = Some(buf);
                        this.pos = 0;
                        this.end = count;
                        if end_of_message {
                            source.unfinished = false;
                        } else {
                            this.source = Some(source);
                        }
                        continue;
                    }
                    Ok(Receive::Closed) => {
                        source.unfinished = false;
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            WsError::ConnectionClosed,
                        )));
                    }
                    Err(e) => return Poll::Ready(Err(e.into())),
                }
            }

            if this.pos < this.end {
                if let Some(buf) = this.buf.as_ref() {
                    let n = out.remaining().min(this.end - this.pos);
                    out.put_slice(&buf[this.pos..this.pos + n]);
                    this.pos += n;
                }
                if this.pos == this.end && this.source.is_none() {
                    this.buf = None;
                }
                return Poll::Ready(Ok(()));
            }

            let Some(mut source) = this.source.take() else {
                this.buf = None;
                return Poll::Ready(Ok(()));
            };
            let Some(mut buf) = this.buf.take() else {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::Other,
                    "body buffer already released",
                )));
            };

            this.refill = Some(Box::pin(async move {
                let result = match source.socket.as_mut() {
                    Some(socket) => socket.receive(&mut buf).await,
                    None => Err(WsError::NotConnected),
                };
                (buf, source, result)
            }));
        }
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream")
            .field("buffered", &self.buffered())
            .field("complete", &self.is_complete())
            .finish()
    }
}
