pub mod error;
pub mod exception;
pub mod message;

pub use error::{Result, WirecallError};
pub use exception::{ExceptionKind, RpcException};
pub use message::{Request, Response, RpcValue};
