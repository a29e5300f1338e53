//! Wire protocol definitions for the RPC connection
//!
//! Messages are JSON objects carried in WebSocket text frames:
//! - **Request**: `{"id": "..", "async": true, "method": "..", "params": [..]}`
//! - **Response**: `{"id": "..", "error": {"code": .., "message": ".."}, "result": ..}`
//! - **Notify**: `{"id": "..", "method": "..", "params": [..]}`
//!
//! Inbound messages are only parsed up to the start of their payload; see
//! [`header`].

pub mod codec;
pub mod header;
mod lexer;
pub mod request;
pub mod response;

pub use codec::{decode_payload, encode_request, request_id, DEFAULT_ID_LENGTH};
pub use header::{parse_header, parse_notify_header, parse_response_header, HeaderError};
pub use request::Request;
pub use response::{Header, NotifyHeader, ResponseHeader, RpcError};
