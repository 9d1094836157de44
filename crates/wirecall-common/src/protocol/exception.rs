use std::fmt;

use serde_json::json;

use crate::protocol::error::WirecallError;
use crate::protocol::message::RpcValue;

/// Discriminant of a structured exception crossing the wire.
///
/// Unknown `type` strings decode as [`ExceptionKind::RemoteException`] so a
/// newer server never breaks an older client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    InvalidObject,
    InvalidMethod,
    InvalidToken,
    SslPeerVerificationFailed,
    ConnectionError,
    RemoteException,
}

impl ExceptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionKind::InvalidObject => "InvalidObject",
            ExceptionKind::InvalidMethod => "InvalidMethod",
            ExceptionKind::InvalidToken => "InvalidToken",
            ExceptionKind::SslPeerVerificationFailed => "SSLPeerVerificationFailed",
            ExceptionKind::ConnectionError => "ConnectionError",
            ExceptionKind::RemoteException => "RemoteException",
        }
    }

    pub fn from_str(kind: &str) -> Self {
        match kind {
            "InvalidObject" => ExceptionKind::InvalidObject,
            "InvalidMethod" => ExceptionKind::InvalidMethod,
            "InvalidToken" => ExceptionKind::InvalidToken,
            "SSLPeerVerificationFailed" => ExceptionKind::SslPeerVerificationFailed,
            "ConnectionError" => ExceptionKind::ConnectionError,
            _ => ExceptionKind::RemoteException,
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serializable record standing in for a raised error, crossing the network
/// boundary as ordinary data.
///
/// Wire shape inside a response's `obj`:
/// `{ "exception": <message>, "backtrace": [<frame>, ...], "type": <kind> }`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcException {
    pub kind: ExceptionKind,
    pub message: String,
    pub backtrace: Vec<String>,
}

impl RpcException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        RpcException {
            kind,
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn with_backtrace(mut self, backtrace: Vec<String>) -> Self {
        self.backtrace = backtrace;
        self
    }

    /// Serializes into the exception mapping carried by a response's `obj`.
    pub fn to_obj(&self) -> RpcValue {
        json!({
            "exception": self.message,
            "backtrace": self.backtrace,
            "type": self.kind.as_str(),
        })
    }

    /// Reads an exception back out of a response's `obj`, if it is one.
    ///
    /// The `exception` key alone marks the mapping as an exception; missing
    /// `backtrace` or `type` keys degrade gracefully.
    pub fn from_obj(obj: &RpcValue) -> Option<Self> {
        let map = obj.as_object()?;
        let message = map.get("exception")?.as_str()?.to_string();

        let backtrace = map
            .get("backtrace")
            .and_then(|bt| bt.as_array())
            .map(|frames| {
                frames
                    .iter()
                    .filter_map(|frame| frame.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let kind = map
            .get("type")
            .and_then(|kind| kind.as_str())
            .map(ExceptionKind::from_str)
            .unwrap_or(ExceptionKind::RemoteException);

        Some(RpcException {
            kind,
            message,
            backtrace,
        })
    }

    /// Maps an error to the exception that represents it on the wire.
    ///
    /// Known taxonomy kinds pass through; anything else becomes a
    /// `RemoteException`.
    pub fn from_error(err: &WirecallError) -> Self {
        match err {
            WirecallError::InvalidObject(msg) => {
                RpcException::new(ExceptionKind::InvalidObject, msg.clone())
            }
            WirecallError::InvalidMethod(msg) => {
                RpcException::new(ExceptionKind::InvalidMethod, msg.clone())
            }
            WirecallError::InvalidToken(msg) => {
                RpcException::new(ExceptionKind::InvalidToken, msg.clone())
            }
            WirecallError::SslPeerVerification(msg) => {
                RpcException::new(ExceptionKind::SslPeerVerificationFailed, msg.clone())
            }
            WirecallError::Connection(msg) => {
                RpcException::new(ExceptionKind::ConnectionError, msg.clone())
            }
            WirecallError::Remote(exception) => exception.clone(),
            other => RpcException::new(ExceptionKind::RemoteException, other.to_string()),
        }
    }
}

impl fmt::Display for RpcException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RpcException {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_string_round_trip() {
        let kinds = [
            ExceptionKind::InvalidObject,
            ExceptionKind::InvalidMethod,
            ExceptionKind::InvalidToken,
            ExceptionKind::SslPeerVerificationFailed,
            ExceptionKind::ConnectionError,
            ExceptionKind::RemoteException,
        ];

        for kind in kinds {
            assert_eq!(ExceptionKind::from_str(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_unknown_kind_decodes_as_remote_exception() {
        assert_eq!(
            ExceptionKind::from_str("SomethingNew"),
            ExceptionKind::RemoteException
        );
    }

    #[test]
    fn test_obj_round_trip() {
        let exception = RpcException::new(ExceptionKind::InvalidMethod, "no such method")
            .with_backtrace(vec!["frame one".into(), "frame two".into()]);

        let decoded = RpcException::from_obj(&exception.to_obj()).unwrap();
        assert_eq!(decoded, exception);
    }

    #[test]
    fn test_plain_result_is_not_an_exception() {
        assert!(RpcException::from_obj(&serde_json::json!({"value": 42})).is_none());
        assert!(RpcException::from_obj(&serde_json::json!(42)).is_none());
        assert!(RpcException::from_obj(&serde_json::json!(null)).is_none());
    }

    #[test]
    fn test_from_error_maps_taxonomy_kinds() {
        let err = WirecallError::InvalidToken("Token missing or invalid".into());
        let exception = RpcException::from_error(&err);
        assert_eq!(exception.kind, ExceptionKind::InvalidToken);

        let err = WirecallError::Decode("garbled".into());
        let exception = RpcException::from_error(&err);
        assert_eq!(exception.kind, ExceptionKind::RemoteException);
    }
}
