use serde::{Deserialize, Serialize};

/// The `error` object of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Routing part of a response; the `result` payload is left in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub id: String,
    pub error: Option<RpcError>,
}

/// Routing part of a notification; the `params` payload is left in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyHeader {
    pub id: String,
    pub method: String,
}

/// The parsed header of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Response(ResponseHeader),
    Notify(NotifyHeader),
}

impl Header {
    pub fn id(&self) -> &str {
        match self {
            Header::Response(rsp) => &rsp.id,
            Header::Notify(nty) => &nty.id,
        }
    }

    /// The raw decoded error object, if the message carried one.
    ///
    /// A code of `0` is reported as-is; whether it means "no error" is up to
    /// the caller.
    pub fn error(&self) -> Option<&RpcError> {
        match self {
            Header::Response(rsp) => rsp.error.as_ref(),
            Header::Notify(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Header::Response(_) => None,
            Header::Notify(nty) => Some(&nty.method),
        }
    }

    pub fn is_notify(&self) -> bool {
        matches!(self, Header::Notify(_))
    }
}
