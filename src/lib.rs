pub mod body;
pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod mux;
pub mod pool;
pub mod protocol;
pub mod socket;

pub use body::BodyStream;
pub use channel::{Channel, Incoming, RequestBody};
pub use config::{WsClientBuilder, WsConfig};
pub use error::{WsError, WsResult};
pub use handler::Subscription;
pub use mux::Multiplexer;
pub use pool::{BufferPool, PooledWriter, RentedBuffer};
pub use protocol::{Header, NotifyHeader, Request, ResponseHeader, RpcError};
pub use socket::{Connector, Receive, SocketHalves, SocketSink, SocketSource};
