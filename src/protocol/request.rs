use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec::{request_id, DEFAULT_ID_LENGTH};

/// An outbound RPC request.
///
/// `async` is omitted from the wire form when false, `params` when empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    #[serde(rename = "async", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_async: bool,
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
}

impl Request {
    /// Create a request for `method` with a fresh random id.
    pub fn new(method: &str) -> Self {
        Self::with_id(request_id(DEFAULT_ID_LENGTH), method)
    }

    pub fn with_id(id: impl Into<String>, method: &str) -> Self {
        Self {
            id: id.into(),
            is_async: false,
            method: method.to_string(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }
}
