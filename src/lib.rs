//! # Remux
//!
//! Resilient Redis client library for Rust: a single logical connection that
//! multiplexes many concurrently-issued requests over one transport, pipelines
//! aggressively, authenticates on connect, and reconnects automatically with
//! exponential backoff.
//!
//! ## Features
//!
//! - `tls` - TLS/SSL support with an injectable certificate-verification hook
//!
//! ## Example
//!
//! ```no_run
//! use remux::{Config, Connection, Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::builder()
//!         .host("localhost")
//!         .port(6379)
//!         .build()?;
//!
//!     let conn = Connection::new();
//!     let runner = conn.clone();
//!     tokio::spawn(async move {
//!         let _ = runner.run(config).await;
//!     });
//!
//!     let mut req = Request::new();
//!     req.push("PING", &["hello"]);
//!     let resp = conn.execute(req).await?;
//!     println!("{:?}", resp.frames());
//!
//!     conn.cancel();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub(crate) mod core;
pub mod proto;

// Re-export the connection types and protocol surface for convenience
pub use crate::core::config::{Config, ConfigBuilder, RedeliveryPolicy};
pub use crate::core::request::{Request, Response};
pub use crate::core::{Connection, ConnectionState, ExecHandle};
pub use crate::proto::error::{Error, Result, TlsHandshakeError};
pub use crate::proto::frame::Frame;

#[cfg(feature = "tls")]
pub use crate::core::VerifyHook;
