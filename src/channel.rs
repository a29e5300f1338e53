//! Transport channel: raw I/O and per-message framing.
//!
//! Writes and reads go through separate halves with separate locks. A write
//! holds the send half for the duration of one message, so frames of
//! concurrent requests never interleave. Reads are made by one reader at a
//! time; a continuation body keeps the receive half until its message ends.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::body::{BodyStream, SourceState};
use crate::config::WsConfig;
use crate::error::{WsError, WsResult};
use crate::pool::{BufferPool, PooledWriter, DEFAULT_BUFFER_SIZE};
use crate::protocol::{parse_header, Header, RpcError};
use crate::socket::{Connector, Receive, SocketSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Fresh,
    Opening,
    Open,
    Closed,
}

/// One inbound message: its parsed header and the unread payload.
#[derive(Debug)]
pub struct Incoming {
    pub header: Header,
    pub body: BodyStream,
}

impl Incoming {
    pub fn id(&self) -> &str {
        self.header.id()
    }

    pub fn error(&self) -> Option<&RpcError> {
        self.header.error()
    }

    pub fn into_parts(self) -> (Header, BodyStream) {
        (self.header, self.body)
    }
}

/// Payload handed to [`Channel::write`].
pub enum RequestBody {
    /// Already serialized; sent as one final frame without copying.
    Buffered(PooledWriter),
    /// Streamed through a pooled scratch buffer in fixed-size frames.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl RequestBody {
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        RequestBody::Reader(Box::new(reader))
    }
}

impl From<PooledWriter> for RequestBody {
    fn from(writer: PooledWriter) -> Self {
        RequestBody::Buffered(writer)
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Buffered(writer) => f.debug_tuple("Buffered").field(writer).finish(),
            RequestBody::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

pub struct Channel {
    connector: Arc<dyn Connector>,
    state: Mutex<ChannelState>,
    sink: tokio::sync::Mutex<Option<Box<dyn SocketSink>>>,
    source: Arc<tokio::sync::Mutex<SourceState>>,
    pool: BufferPool,
    receive_buffer_size: usize,
    send_chunk_size: usize,
}

impl Channel {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_pool(connector, BufferPool::new(), DEFAULT_BUFFER_SIZE, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_config(connector: Arc<dyn Connector>, config: &WsConfig) -> Self {
        Self::with_pool(
            connector,
            BufferPool::with_capacity(config.pool_capacity),
            config.receive_buffer_size,
            config.send_chunk_size,
        )
    }

    pub fn with_pool(
        connector: Arc<dyn Connector>,
        pool: BufferPool,
        receive_buffer_size: usize,
        send_chunk_size: usize,
    ) -> Self {
        Self {
            connector,
            state: Mutex::new(ChannelState::Fresh),
            sink: tokio::sync::Mutex::new(None),
            source: Arc::new(tokio::sync::Mutex::new(SourceState::new())),
            pool,
            receive_buffer_size: receive_buffer_size.max(1),
            send_chunk_size: send_chunk_size.max(1),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn is_connected(&self) -> bool {
        *self.state.lock() == ChannelState::Open
    }

    /// Connect to `url`.
    ///
    /// A failed (or abandoned) attempt leaves the channel as it was before,
    /// so `open` can be called again.
    pub async fn open(&self, url: &str) -> WsResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ChannelState::Fresh => *state = ChannelState::Opening,
                ChannelState::Opening | ChannelState::Open => return Err(WsError::AlreadyOpen),
                ChannelState::Closed => return Err(WsError::ConnectionClosed),
            }
        }
        let mut attempt = OpenAttempt {
            state: &self.state,
            done: false,
        };

        let halves = match self.connector.connect(url).await {
            Ok(halves) => halves,
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", url, e);
                return Err(e);
            }
        };

        *self.sink.lock().await = Some(halves.sink);
        {
            let mut source = self.source.lock().await;
            source.socket = Some(halves.source);
            source.unfinished = false;
        }

        attempt.done = true;
        let opened = {
            let mut state = self.state.lock();
            if *state == ChannelState::Opening {
                *state = ChannelState::Open;
                true
            } else {
                false
            }
        };
        if !opened {
            // closed while connecting
            self.source.lock().await.socket = None;
            let sink = self.sink.lock().await.take();
            if let Some(mut sink) = sink {
                if let Err(e) = sink.close().await {
                    tracing::debug!("Closing connection opened after close: {}", e);
                }
            }
            return Err(WsError::ConnectionClosed);
        }

        tracing::info!("Connected to {}", url);
        Ok(())
    }

    /// Close the connection. Closing a channel that is not open does nothing.
    pub async fn close(&self) -> WsResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), ChannelState::Closed);
        if previous == ChannelState::Closed {
            return Ok(());
        }

        let sink = self.sink.lock().await.take();
        // the receive half is dropped now only if no reader holds it
        if let Ok(mut source) = self.source.try_lock() {
            source.socket = None;
        }

        match sink {
            Some(mut sink) => {
                let result = sink.close().await;
                if let Err(e) = &result {
                    tracing::warn!("Close handshake failed: {}", e);
                }
                tracing::info!("Connection closed");
                result
            }
            None => Ok(()),
        }
    }

    /// Send one request message.
    pub async fn write(&self, body: impl Into<RequestBody>) -> WsResult<()> {
        self.ensure_open()?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(WsError::NotConnected)?;

        let result = match body.into() {
            RequestBody::Buffered(writer) => sink.send(writer.as_bytes(), true).await,
            RequestBody::Reader(mut reader) => self.stream_body(sink.as_mut(), &mut reader).await,
        };

        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::warn!("Send failed, dropping connection: {}", e);
                guard.take();
                *self.state.lock() = ChannelState::Closed;
            }
        }
        result
    }

    async fn stream_body(
        &self,
        sink: &mut dyn SocketSink,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> WsResult<()> {
        let mut chunk = self.pool.rent(self.send_chunk_size);
        loop {
            let count = fill(reader, &mut chunk).await?;
            let end_of_message = count < chunk.len();
            self.ensure_open()?;
            sink.send(&chunk[..count], end_of_message).await?;
            if end_of_message {
                return Ok(());
            }
        }
    }

    /// Receive the next message.
    ///
    /// Returns `Ok(None)` when the receive produced no bytes. The header must
    /// fit in the first receive; the body may continue on later frames.
    pub async fn read(&self) -> WsResult<Option<Incoming>> {
        self.ensure_open()?;
        let mut source = self.source.clone().lock_owned().await;

        if source.unfinished {
            self.skip_rest(&mut source).await?;
        }

        let mut buf = self.pool.rent(self.receive_buffer_size);
        let received = match source.socket.as_mut() {
            Some(socket) => socket.receive(&mut buf).await,
            None => Err(WsError::NotConnected),
        };

        let (count, end_of_message) = match received {
            Ok(Receive::Data {
                count,
                end_of_message,
            }) => (count, end_of_message),
            Ok(Receive::Closed) => {
                tracing::info!("Connection closed by peer");
                *self.state.lock() = ChannelState::Closed;
                return Err(WsError::ConnectionClosed);
            }
            Err(e) => {
                if e.is_fatal() {
                    *self.state.lock() = ChannelState::Closed;
                }
                return Err(e);
            }
        };

        if count == 0 {
            source.unfinished = !end_of_message;
            return Ok(None);
        }

        match parse_header(&buf[..count]) {
            Ok((header, resume)) => {
                tracing::trace!(
                    "Received message for {} ({} bytes, final: {})",
                    header.id(),
                    count,
                    end_of_message
                );
                let body = if end_of_message {
                    drop(source);
                    BodyStream::complete(buf, resume, count)
                } else {
                    BodyStream::continuation(buf, resume, count, source)
                };
                Ok(Some(Incoming { header, body }))
            }
            Err(e) => {
                source.unfinished = !end_of_message;
                Err(e)
            }
        }
    }

    /// Receive and drop the remaining frames of a partly read message.
    async fn skip_rest(&self, source: &mut SourceState) -> WsResult<()> {
        let mut scratch = self.pool.rent(self.receive_buffer_size);
        let socket = source.socket.as_mut().ok_or(WsError::NotConnected)?;
        loop {
            match socket.receive(&mut scratch).await? {
                Receive::Data {
                    end_of_message: true,
                    ..
                } => break,
                Receive::Data { .. } => {}
                Receive::Closed => {
                    *self.state.lock() = ChannelState::Closed;
                    return Err(WsError::ConnectionClosed);
                }
            }
        }
        tracing::debug!("Skipped the rest of an abandoned message");
        source.unfinished = false;
        Ok(())
    }

    fn ensure_open(&self) -> WsResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(WsError::NotConnected)
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("state", &*self.state.lock())
            .field("pool", &self.pool)
            .field("receive_buffer_size", &self.receive_buffer_size)
            .field("send_chunk_size", &self.send_chunk_size)
            .finish()
    }
}

/// Resets an interrupted `open` back to `Fresh`.
struct OpenAttempt<'a> {
    state: &'a Mutex<ChannelState>,
    done: bool,
}

impl Drop for OpenAttempt<'_> {
    fn drop(&mut self) {
        if !self.done {
            let mut state = self.state.lock();
            if *state == ChannelState::Opening {
                *state = ChannelState::Fresh;
            }
        }
    }
}

/// Read until `buf` is full or the reader is exhausted.
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> WsResult<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
