// packages/intercept/src/utils/errors.rs
//! Error types for the interception layer

use crate::interception::overrides::OverrideKind;
use crate::transport::Endpoint;
use thiserror::Error;
use ulid::Ulid;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, InterceptError>;

/// Interception errors
#[derive(Debug, Error)]
pub enum InterceptError {
    /// Raw request has no blank line between headers and body
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Forwarding a copy to the mirror listener failed.
    ///
    /// Produced by mirror sinks and always discarded by the forwarder.
    #[error("Mirror forwarding failed: {0}")]
    MirrorForwarding(String),

    /// A scope ended while a newer scope was still active.
    ///
    /// Only the ending scope's layer is removed; the newer one is left in
    /// place. Fatal for the owning interceptor.
    #[error("Failed to restore transport hook for {kind} scope {scope}")]
    ScopeRestoration { scope: Ulid, kind: OverrideKind },

    /// A manual scope was requested while another unit of work held the interceptor
    #[error("Interceptor is busy with another unit of work")]
    InterceptorBusy,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Not connected to {0}")]
    NotConnected(Endpoint),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Observability error: {0}")]
    ObservabilityError(String),
}

impl InterceptError {
    /// Whether the interceptor that produced this error is still usable
    pub fn is_fatal(&self) -> bool {
        matches!(self, InterceptError::ScopeRestoration { .. })
    }
}
