use serde::{Deserialize, Serialize};

use crate::protocol::exception::RpcException;

/// Dynamic payload value carried by requests and responses.
///
/// Arguments and results are JSON values so handlers can accept and return
/// any serializable shape without a schema.
pub type RpcValue = serde_json::Value;

/// A call request travelling from client to server.
///
/// Wire keys: `message`, `args`, `token`. The `message` expression is always
/// of the form `object.method`; object names may themselves contain dots,
/// method names never do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Call expression, `"object.method"`.
    pub message: String,
    /// Ordered call arguments.
    #[serde(default)]
    pub args: Vec<RpcValue>,
    /// Authentication token, compared against the server's configured token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Request {
    pub fn new(message: impl Into<String>, args: Vec<RpcValue>) -> Self {
        Request {
            message: message.into(),
            args,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_token_opt(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

/// A call response travelling from server to client.
///
/// Wire keys: `obj`, `async`. `obj` is either the call result or a structured
/// exception mapping; `async` marks responses produced by a deferred
/// completion so the transport does not double-send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Result value, or an exception mapping on failure.
    pub obj: RpcValue,
    /// Whether this response was produced by an async handler completion.
    #[serde(rename = "async", default)]
    pub is_async: bool,
}

impl Response {
    /// Creates a successful response carrying `obj`.
    pub fn success(obj: RpcValue) -> Self {
        Response {
            obj,
            is_async: false,
        }
    }

    /// Creates a failure response carrying the structured exception.
    pub fn from_exception(exception: &RpcException) -> Self {
        Response {
            obj: exception.to_obj(),
            is_async: false,
        }
    }

    pub fn mark_async(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Returns the structured exception if `obj` is an exception mapping.
    pub fn exception(&self) -> Option<RpcException> {
        RpcException::from_obj(&self.obj)
    }
}
