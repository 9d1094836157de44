//! Wirecall transport layer
//!
//! Everything between a socket and a decoded message:
//!
//! - **[`serializer`]**: pluggable payload formats with per-connection
//!   fallback negotiation
//! - **[`framing`]**: u32 big-endian length-prefixed frames, chunked writes,
//!   receive-buffer reassembly
//! - **[`connection`]**: the per-socket state machine driven by client and
//!   server
//! - **[`tls`]**: certificate material, handshake setup and the peer
//!   verification gate

pub mod connection;
pub mod framing;
pub mod serializer;
pub mod tls;

pub use connection::{Connection, ConnectionReader, ConnectionWriter, Role, Status};
pub use framing::{FrameBuffer, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE};
pub use serializer::{Serializer, SerializerStack};
pub use tls::TlsMaterial;

use std::fmt;
use std::path::PathBuf;

/// Address of a wirecall endpoint: a TCP host/port pair or a local
/// Unix-domain socket path. TLS applies to TCP endpoints only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix { path: path.into() }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::tcp("localhost", 7331).to_string(), "localhost:7331");
        assert_eq!(
            Endpoint::unix("/tmp/wirecall.sock").to_string(),
            "unix:/tmp/wirecall.sock"
        );
    }
}
