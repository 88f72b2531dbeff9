// packages/intercept/src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use self::config::{InterceptorConfig, LoggingConfig, MirrorConfig, TransportConfig};
pub use self::errors::{InterceptError, Result};
