use thiserror::Error;

use crate::protocol::exception::RpcException;

#[derive(Error, Debug)]
pub enum WirecallError {
    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("SSL peer verification failed: {0}")]
    SslPeerVerification(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("remote exception: {0}")]
    Remote(RpcException),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("call timed out after {0}ms")]
    Timeout(u64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WirecallError {
    /// Transport-level failures that the client retry policy may re-dial.
    ///
    /// Decode and peer-verification failures are fatal for the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WirecallError::Connection(_) | WirecallError::Io(_))
    }
}

/// Reconstructs the typed failure a structured exception stands for.
impl From<RpcException> for WirecallError {
    fn from(exception: RpcException) -> Self {
        use crate::protocol::exception::ExceptionKind;

        match exception.kind {
            ExceptionKind::InvalidObject => WirecallError::InvalidObject(exception.message),
            ExceptionKind::InvalidMethod => WirecallError::InvalidMethod(exception.message),
            ExceptionKind::InvalidToken => WirecallError::InvalidToken(exception.message),
            ExceptionKind::SslPeerVerificationFailed => {
                WirecallError::SslPeerVerification(exception.message)
            }
            ExceptionKind::ConnectionError => WirecallError::Connection(exception.message),
            ExceptionKind::RemoteException => WirecallError::Remote(exception),
        }
    }
}

pub type Result<T> = std::result::Result<T, WirecallError>;
