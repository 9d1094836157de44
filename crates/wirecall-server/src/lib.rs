//! Wirecall server
//!
//! Accepts wirecall connections, authenticates every request against the
//! configured shared-secret token, resolves `object.method` expressions
//! against registered handlers and sends responses back over the same
//! connection. Handler methods may be synchronous (return a value) or
//! asynchronous (report their result through an explicit [`Completion`]);
//! which methods follow the completion protocol is decided once at
//! registration time by the configured async checks.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wirecall_server::{Handler, HandlerResult, Server, ServerConfig};
//! use wirecall_common::{Endpoint, RpcValue};
//!
//! struct Calculator;
//!
//! impl Handler for Calculator {
//!     fn methods(&self) -> Vec<String> {
//!         vec!["add".into()]
//!     }
//!
//!     fn call(&self, method: &str, args: &[RpcValue]) -> HandlerResult {
//!         match method {
//!             "add" => {
//!                 let sum = args.iter().filter_map(|v| v.as_i64()).sum::<i64>();
//!                 Ok(sum.into())
//!             }
//!             other => anyhow::bail!("unhandled method {other}"),
//!         }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::new(Endpoint::tcp("localhost", 7331))
//!     .with_token("superdupersecret");
//! let server = Server::bind(config).await?;
//! server.add_handler("calculator", Arc::new(Calculator));
//!
//! let shutdown = server.shutdown_handle();
//! # shutdown.shutdown();
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod handler;
pub mod registry;
pub mod server;

pub use handler::{Completion, Handler, HandlerResult};
pub use registry::HandlerRegistry;
pub use server::{Server, ServerConfig, ShutdownHandle};
