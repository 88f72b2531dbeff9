// packages/intercept/src/transport/endpoint.rs
//! Network destinations for connections and redirect targets

use crate::utils::errors::{InterceptError, Result};
use hyper::Uri;
use serde::Deserialize;
use std::fmt;

/// A `host:port` destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Endpoint {
    /// Bare network location, without scheme, port or path
    pub host: String,

    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Build a redirect target, reducing `host` to its bare network location.
    ///
    /// `host` may be a URL (`http://evil.com/`) or an authority with an
    /// optional path (`evil.com:8080/x`). Any port inside `host` is dropped in
    /// favour of `port`.
    pub fn redirect(host: &str, port: u16) -> Result<Self> {
        Ok(Self::new(Self::network_location(host)?, port))
    }

    /// Reduce a URL or authority to the bare host
    pub fn network_location(raw: &str) -> Result<String> {
        let raw = raw.trim();
        let candidate = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };

        let uri: Uri = candidate
            .parse()
            .map_err(|e| InterceptError::InvalidEndpoint(format!("{}: {}", raw, e)))?;

        match uri.host() {
            Some(host) if !host.is_empty() => Ok(host.to_string()),
            _ => Err(InterceptError::InvalidEndpoint(format!(
                "No host in {:?}",
                raw
            ))),
        }
    }

    /// Value for the request's `Host` line.
    ///
    /// The bare host for the default HTTP and HTTPS ports, `host:port`
    /// otherwise, so the upstream sees the authority it is actually serving.
    pub fn host_header(&self) -> String {
        match self.port {
            80 | 443 => self.host.clone(),
            port => format!("{}:{}", self.host, port),
        }
    }

    /// Host as passed to the resolver (IPv6 brackets removed)
    pub fn connect_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
