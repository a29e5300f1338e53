//! Connection configuration and the client builder.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{WsError, WsResult};
use crate::mux::Multiplexer;
use crate::pool::{DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY};
use crate::protocol::DEFAULT_ID_LENGTH;
use crate::socket::{Connector, TungsteniteConnector};

/// Smallest receive buffer accepted; a message header must fit in one.
pub const MIN_BUFFER_SIZE: usize = 256;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:8000/rpc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsConfig {
    pub url: String,
    /// Size of the buffer each receive is made into.
    pub receive_buffer_size: usize,
    /// Frame size used when streaming a request body.
    pub send_chunk_size: usize,
    /// Idle buffers the pool keeps for reuse.
    pub pool_capacity: usize,
    /// Random bytes per generated request id.
    pub id_length: usize,
    pub connect_timeout_ms: Option<u64>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            receive_buffer_size: DEFAULT_BUFFER_SIZE,
            send_chunk_size: DEFAULT_BUFFER_SIZE,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            id_length: DEFAULT_ID_LENGTH,
            connect_timeout_ms: None,
        }
    }
}

impl WsConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

/// Validate a WebSocket endpoint. A bare `host:port` is taken as `ws://`.
pub fn normalize_url(url: &str) -> WsResult<String> {
    let url = url.trim();
    let url = if url.contains("://") {
        Url::parse(url)?
    } else {
        Url::parse(&format!("ws://{}", url))?
    };

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(WsError::InvalidUrl(format!(
                "unsupported scheme `{}`, expected ws or wss",
                other
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(WsError::InvalidUrl(format!("`{}` has no host", url)));
    }

    Ok(url.to_string())
}

/// Builder for an open [`Multiplexer`].
///
/// ```no_run
/// # async fn run() -> surreal_ws::WsResult<()> {
/// let mux = surreal_ws::WsClientBuilder::new("ws://127.0.0.1:8000/rpc")
///     .connect_timeout_ms(5000)
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct WsClientBuilder {
    config: WsConfig,
    connector: Option<Arc<dyn Connector>>,
}

impl WsClientBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            config: WsConfig::new(url),
            connector: None,
        }
    }

    pub fn from_config(config: WsConfig) -> Self {
        Self {
            config,
            connector: None,
        }
    }

    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size.max(MIN_BUFFER_SIZE);
        self
    }

    pub fn send_chunk_size(mut self, size: usize) -> Self {
        self.config.send_chunk_size = size.max(1);
        self
    }

    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_capacity = capacity;
        self
    }

    pub fn id_length(mut self, len: usize) -> Self {
        self.config.id_length = len.max(1);
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = Some(ms);
        self
    }

    /// Use a custom socket implementation instead of tokio-tungstenite.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Validate and return the configuration.
    pub fn build(&self) -> WsResult<WsConfig> {
        let mut config = self.config.clone();
        config.url = normalize_url(&config.url)?;
        Ok(config)
    }

    /// Open the connection and start its receive loop.
    pub async fn connect(self) -> WsResult<Multiplexer> {
        let config = self.build()?;
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector));
        Multiplexer::connect(connector, config).await
    }
}

impl std::fmt::Debug for WsClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClientBuilder")
            .field("config", &self.config)
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}
