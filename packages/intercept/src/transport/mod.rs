// packages/intercept/src/transport/mod.rs
//! Transport layer wrapped by the interceptors
//!
//! - **Transport**: the capability interface {connect, transmit, receive, close}
//! - **TcpTransport**: plaintext tokio TCP connection
//! - **MemoryTransport**: in-process transport that records traffic
//! - **InterceptedConnection**: routes every send through a hook slot
//!
//! ```text
//! caller ── send(bytes) ──► InterceptedConnection
//!                               │ snapshot of HookSlot
//!                               ▼
//!                 override N ► ... ► override 1 ► Transport::transmit
//! ```

pub mod connection;
pub mod endpoint;
pub mod memory;
pub mod tcp;

use crate::utils::errors::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub use connection::InterceptedConnection;
pub use endpoint::Endpoint;
pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

/// The real network primitive that overrides ultimately delegate to
#[async_trait]
pub trait Transport: Send {
    /// Destination this transport is (or will be) connected to
    fn endpoint(&self) -> &Endpoint;

    fn is_connected(&self) -> bool;

    /// (Re)connect to `endpoint`, closing any existing connection first
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<()>;

    /// Write bytes on the connection, opening it first if needed
    async fn transmit(&mut self, data: &[u8]) -> Result<()>;

    /// Read one response
    async fn receive(&mut self) -> Result<Bytes>;

    async fn close(&mut self) -> Result<()>;
}
