// packages/intercept/src/lib.rs
//! Sentra Lab Request Interception Library
//!
//! Intercepts outgoing HTTP/1.1 requests and, without changes to the calling
//! code, can mirror a copy of each request to a listener, substitute the
//! outgoing bytes, or redirect the request to another host while keeping its
//! `Host` header consistent.
//!
//! # Architecture
//!
//! - **interception**: overrides, scopes, mirroring and raw message rewriting
//! - **transport**: the transport interface and its TCP/in-memory implementations
//! - **observability**: tracing setup
//! - **utils**: configuration and errors
//!
//! # Example
//!
//! ```no_run
//! use sentra_lab_intercept::{Endpoint, HttpInterceptor};
//!
//! # async fn run() -> sentra_lab_intercept::Result<()> {
//! let interceptor = HttpInterceptor::default();
//! let mut conn = interceptor.connection(Endpoint::new("api.example.com", 80));
//!
//! let response = interceptor
//!     .with_mirror(
//!         "http://127.0.0.1:9000/capture",
//!         conn.request(&b"GET / HTTP/1.1\r\nHost: api.example.com\r\n\r\n"[..]),
//!     )
//!     .await??;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

// Public module exports
pub mod interception;
pub mod observability;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use interception::{HttpInterceptor, InterceptionScope, Override, OverrideKind};
pub use transport::{Endpoint, InterceptedConnection, Transport};
pub use utils::config::InterceptorConfig;
pub use utils::errors::{InterceptError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
