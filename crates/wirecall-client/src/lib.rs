//! Wirecall client
//!
//! Issues `object.method` calls against a wirecall server over the
//! length-prefixed wire protocol, with automatic reconnect-on-failure,
//! a bounded pool of reusable connections and optional TLS peer
//! verification.
//!
//! # Example
//!
//! ```no_run
//! use wirecall_client::{Client, ClientConfig};
//! use wirecall_common::Endpoint;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new(Endpoint::tcp("localhost", 7331))
//!     .with_token("superdupersecret");
//! let client = Client::new(config)?;
//!
//! let sum = client.call("calculator.add", vec![json!(1), json!(2)]).await?;
//! assert_eq!(sum, json!(3));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod pool;

pub use client::{Client, ClientConfig, DEFAULT_MAX_RETRIES, DEFAULT_POOL_CAPACITY};
pub use pool::ConnectionPool;
