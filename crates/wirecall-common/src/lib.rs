//! Wirecall common types and transport
//!
//! This crate provides the core protocol definitions and the connection layer
//! for the wirecall RPC system.
//!
//! # Overview
//!
//! Wirecall is a length-prefixed, serialized-object RPC protocol carried over
//! TCP (optionally TLS) or a local Unix domain socket. This crate contains the
//! pieces shared by the client and the server:
//!
//! - **Protocol layer**: Request/Response types, the structured exception
//!   taxonomy and the error type
//! - **Transport layer**: serializers, framing, the per-socket connection
//!   state machine and the TLS peer-verification gate
//! - **Authentication**: shared-secret token validation
//!
//! # Wire format
//!
//! Every message is one frame: `[4-byte length prefix as u32 big-endian] +
//! [serialized payload]`. Payloads are mappings produced by the connection's
//! negotiated serializer (JSON by default, CBOR as the compact alternative).
//! Frames are handed to the transport in chunks of at most 16 KiB; receivers
//! reassemble from a growable buffer regardless of chunk boundaries.
//!
//! # Example
//!
//! ```
//! use wirecall_common::{Request, Response};
//! use serde_json::json;
//!
//! let request = Request::new("calculator.add", vec![json!(1), json!(2)])
//!     .with_token("superdupersecret");
//!
//! let response = Response::success(json!(3));
//! assert!(response.exception().is_none());
//! ```

pub mod auth;
pub mod protocol;
pub mod transport;

pub use protocol::*;
pub use transport::Endpoint;
