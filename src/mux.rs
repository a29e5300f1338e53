//! Multiplexer: many requests over one channel.
//!
//! Callers register a handler under their request id before writing the
//! request. One background task reads the channel and routes each message to
//! the handler registered under its id.

use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::channel::{Channel, Incoming, RequestBody};
use crate::config::WsConfig;
use crate::error::{WsError, WsResult};
use crate::handler::{unregister, Handler, Registry, Subscription};
use crate::pool::BufferPool;
use crate::protocol::{request_id, Request, DEFAULT_ID_LENGTH};
use crate::socket::Connector;

pub struct Multiplexer {
    channel: Arc<Channel>,
    registry: Arc<Registry>,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    /// Set once `close` starts; no handler is registered after that.
    closing: AtomicBool,
    id_length: usize,
}

impl Multiplexer {
    /// Open a channel through `connector` and start receiving.
    pub async fn connect(connector: Arc<dyn Connector>, config: WsConfig) -> WsResult<Self> {
        let channel = Arc::new(Channel::with_config(connector, &config));

        let open = channel.open(&config.url);
        match config.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, open)
                .await
                .map_err(|_| WsError::Timeout(timeout.as_millis() as u64))??,
            None => open.await?,
        }

        let mut mux = Self::start(channel);
        mux.id_length = config.id_length;
        Ok(mux)
    }

    /// Start the receive loop over an open channel.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(channel: Arc<Channel>) -> Self {
        let registry = Arc::new(Registry::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(receive_loop(
            channel.clone(),
            registry.clone(),
            shutdown_rx,
        ));

        Self {
            channel,
            registry,
            receive_loop: Mutex::new(Some(handle)),
            shutdown: Mutex::new(Some(shutdown_tx)),
            closing: AtomicBool::new(false),
            id_length: DEFAULT_ID_LENGTH,
        }
    }

    /// Send a request and wait for the single response to `id`.
    ///
    /// Fails with `DuplicateId` if a handler is already registered under
    /// `id`. If the returned future is dropped, the handler is removed.
    pub async fn request_once(
        &self,
        id: &str,
        body: impl Into<RequestBody>,
    ) -> WsResult<Incoming> {
        let (handler, rx) = Handler::once();
        let _registration = self.register(id, handler)?;

        self.channel.write(body).await?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(WsError::Cancelled),
        }
    }

    /// Send a request and receive every message for `id` until the returned
    /// subscription is cancelled or dropped.
    pub async fn request_persistent(
        &self,
        id: &str,
        body: impl Into<RequestBody>,
    ) -> WsResult<Subscription> {
        let (handler, rx) = Handler::persistent();
        let registration = self.register(id, handler)?;

        self.channel.write(body).await?;

        let (id, token) = registration.keep();
        Ok(Subscription::new(id, token, rx, self.registry.clone()))
    }

    /// Serialize `request` and wait for its response.
    pub async fn send(&self, request: &Request) -> WsResult<Incoming> {
        let mut writer = self.channel.pool().writer();
        request.write_to(&mut writer)?;
        self.request_once(&request.id, writer).await
    }

    /// Serialize `request` and subscribe to every message for its id.
    pub async fn subscribe(&self, request: &Request) -> WsResult<Subscription> {
        let mut writer = self.channel.pool().writer();
        request.write_to(&mut writer)?;
        self.request_persistent(&request.id, writer).await
    }

    /// A new request for `method` with an id of the configured length.
    pub fn request(&self, method: &str) -> Request {
        Request::with_id(request_id(self.id_length), method)
    }

    /// Cancel every registered handler, stop the receive loop and close the
    /// channel.
    pub async fn close(&self) -> WsResult<()> {
        self.closing.store(true, Ordering::SeqCst);
        fail_all(&self.registry, &WsError::Cancelled);

        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        let handle = self.receive_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Receive loop ended abnormally: {}", e);
            }
        }

        let result = self.channel.close().await;
        // a registration that raced the closing flag
        fail_all(&self.registry, &WsError::Cancelled);
        result
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.registry.contains_key(id)
    }

    /// Ids with a registered handler.
    pub fn registered(&self) -> Vec<String> {
        self.registry.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn pool(&self) -> &BufferPool {
        self.channel.pool()
    }

    fn register(&self, id: &str, handler: Handler) -> WsResult<Registration> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(WsError::NotConnected);
        }
        let token = handler.token();
        match self.registry.entry(id.to_string()) {
            Entry::Occupied(_) => Err(WsError::DuplicateId(id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(handler);
                tracing::debug!("Registered handler for {}", id);
                Ok(Registration {
                    registry: self.registry.clone(),
                    id: id.to_string(),
                    token,
                    armed: true,
                })
            }
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.get_mut().take() {
            self.closing.store(true, Ordering::SeqCst);
            let _ = shutdown.send(());
            fail_all(&self.registry, &WsError::Cancelled);
        }
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("channel", &self.channel)
            .field("handlers", &self.registry.len())
            .finish()
    }
}

/// Removes its handler when dropped, unless kept.
struct Registration {
    registry: Arc<Registry>,
    id: String,
    token: u64,
    armed: bool,
}

impl Registration {
    /// Leave the handler registered and hand over its id and token.
    fn keep(mut self) -> (String, u64) {
        self.armed = false;
        (std::mem::take(&mut self.id), self.token)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.armed && unregister(&self.registry, &self.id, self.token) {
            tracing::debug!("Unregistered handler for {}", self.id);
        }
    }
}

async fn receive_loop(
    channel: Arc<Channel>,
    registry: Arc<Registry>,
    mut shutdown: oneshot::Receiver<()>,
) {
    tracing::debug!("Receive loop started");
    loop {
        let result = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::debug!("Receive loop stopped");
                return;
            }
            result = channel.read() => result,
        };

        match result {
            Ok(Some(incoming)) => dispatch(&registry, incoming),
            Ok(None) => continue,
            Err(e) => {
                match &e {
                    WsError::ConnectionClosed => tracing::info!("Receive loop ended: {}", e),
                    _ => tracing::warn!("Receive loop failed: {}", e),
                }
                if let Err(close_err) = channel.close().await {
                    tracing::debug!("Closing after receive failure: {}", close_err);
                }
                fail_all(&registry, &e);
                return;
            }
        }
    }
}

/// Route one message to the handler registered under its id.
fn dispatch(registry: &Registry, incoming: Incoming) {
    match registry.entry(incoming.id().to_string()) {
        Entry::Occupied(entry) => {
            if entry.get().is_persistent() {
                if let Handler::Persistent(handler) = entry.get() {
                    if !handler.deliver(incoming) {
                        tracing::debug!("Subscription {} is gone, message discarded", entry.key());
                    }
                }
            } else if let (id, Handler::Once(handler)) = entry.remove_entry() {
                if !handler.deliver(incoming) {
                    tracing::debug!("Request {} is no longer waiting, message discarded", id);
                }
            }
        }
        Entry::Vacant(entry) => {
            tracing::debug!("No handler for {}, message discarded", entry.key());
            incoming.body.discard();
        }
    }
}

/// Remove every handler and resolve it with `error`.
fn fail_all(registry: &Registry, error: &WsError) {
    let ids: Vec<String> = registry.iter().map(|entry| entry.key().clone()).collect();
    for id in ids {
        if let Some((_, handler)) = registry.remove(&id) {
            handler.fail(error.clone());
        }
    }
}
