//! Request encoding and payload decoding

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::de::DeserializeOwned;

use super::request::Request;
use crate::error::WsResult;
use crate::pool::PooledWriter;

/// Number of random bytes in a generated request id.
pub const DEFAULT_ID_LENGTH: usize = 6;

/// Generate a random request id from `len` random bytes, base64 encoded.
pub fn request_id(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Serialize a request straight into a pooled send buffer.
pub fn encode_request(request: &Request, writer: &mut PooledWriter) -> WsResult<()> {
    serde_json::to_writer(writer, request)?;
    Ok(())
}

impl Request {
    /// Serialize this request into `writer`, appending to what is already there.
    pub fn write_to(&self, writer: &mut PooledWriter) -> WsResult<()> {
        encode_request(self, writer)
    }
}

/// Decode the first JSON value of a message payload.
///
/// `bytes` starts at the resume offset reported by the header parser, so it
/// is followed by the rest of the envelope (at least its closing `}`), which
/// is ignored. Returns `None` when the message carried no payload value.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> WsResult<Option<T>> {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let rest = &bytes[start..];
    if rest.is_empty() || rest[0] == b'}' {
        return Ok(None);
    }

    let mut values = serde_json::Deserializer::from_slice(rest).into_iter::<T>();
    match values.next() {
        Some(value) => Ok(Some(value?)),
        None => Ok(None),
    }
}
