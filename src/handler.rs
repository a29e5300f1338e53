//! Handlers waiting for inbound messages.
//!
//! A one-shot handler resolves exactly once through a `oneshot` channel. A
//! persistent handler feeds an unbounded channel that the caller consumes as
//! a [`Subscription`] stream.

use dashmap::DashMap;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

use crate::channel::Incoming;
use crate::error::{WsError, WsResult};

/// Handlers by request id.
pub(crate) type Registry = DashMap<String, Handler>;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn next_token() -> u64 {
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

pub(crate) enum Handler {
    Once(OnceHandler),
    Persistent(PersistentHandler),
}

impl Handler {
    pub(crate) fn once() -> (Self, oneshot::Receiver<WsResult<Incoming>>) {
        let (tx, rx) = oneshot::channel();
        let handler = OnceHandler {
            token: next_token(),
            tx,
        };
        (Handler::Once(handler), rx)
    }

    pub(crate) fn persistent() -> (Self, mpsc::UnboundedReceiver<WsResult<Incoming>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = PersistentHandler {
            token: next_token(),
            tx,
        };
        (Handler::Persistent(handler), rx)
    }

    /// Identifies one registration, so that a stale owner cannot remove a
    /// newer handler registered under the same id.
    pub(crate) fn token(&self) -> u64 {
        match self {
            Handler::Once(h) => h.token,
            Handler::Persistent(h) => h.token,
        }
    }

    pub(crate) fn is_persistent(&self) -> bool {
        matches!(self, Handler::Persistent(_))
    }

    /// Resolve the handler with an error and release it.
    pub(crate) fn fail(self, error: WsError) {
        // the waiting side may already be gone
        match self {
            Handler::Once(h) => {
                let _ = h.tx.send(Err(error));
            }
            Handler::Persistent(h) => {
                let _ = h.tx.send(Err(error));
            }
        }
    }
}

pub(crate) struct OnceHandler {
    token: u64,
    tx: oneshot::Sender<WsResult<Incoming>>,
}

impl OnceHandler {
    /// Resolve the handler. Returns false, and drops the message, if the
    /// caller stopped waiting.
    pub(crate) fn deliver(self, incoming: Incoming) -> bool {
        self.tx.send(Ok(incoming)).is_ok()
    }
}

pub(crate) struct PersistentHandler {
    token: u64,
    tx: mpsc::UnboundedSender<WsResult<Incoming>>,
}

impl PersistentHandler {
    /// Queue one message for the subscriber. Returns false, and drops the
    /// message, if the subscription is gone.
    pub(crate) fn deliver(&self, incoming: Incoming) -> bool {
        self.tx.send(Ok(incoming)).is_ok()
    }
}

/// Stream of the messages delivered to a persistent handler.
///
/// Cancelling or dropping the subscription unregisters the handler; messages
/// that were queued but not yet taken are discarded.
pub struct Subscription {
    id: String,
    token: u64,
    rx: mpsc::UnboundedReceiver<WsResult<Incoming>>,
    registry: Arc<Registry>,
    cancelled: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        token: u64,
        rx: mpsc::UnboundedReceiver<WsResult<Incoming>>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            id,
            token,
            rx,
            registry,
            cancelled: false,
        }
    }

    /// The request id the subscription is registered under.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Stop the stream and unregister its handler.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        unregister(&self.registry, &self.id, self.token);
        self.rx.close();

        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        tracing::debug!(
            "Subscription {} cancelled ({} queued messages discarded)",
            self.id,
            discarded
        );
    }
}

impl Stream for Subscription {
    type Item = WsResult<Incoming>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

/// Remove the handler for `id` if it is still the registration `token`.
pub(crate) fn unregister(registry: &Registry, id: &str, token: u64) -> bool {
    registry.remove_if(id, |_, handler| handler.token() == token).is_some()
}
