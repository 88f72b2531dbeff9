// packages/intercept/src/interception/overrides.rs
//! Send overrides: mirror, body substitution and target redirect
//!
//! Each override receives the outgoing bytes plus the rest of the hook chain,
//! and hands the (possibly transformed) bytes to [`Next::run`]. The chain's
//! result is returned untouched.

use crate::interception::mirror::MirrorForwarder;
use crate::interception::raw_message::RawRequest;
use crate::interception::scope::Next;
use crate::interception::stats::InterceptStats;
use crate::transport::{Endpoint, Transport};
use crate::utils::errors::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

tokio::task_local! {
    /// Mirror overrides whose forward is running on this call path
    static FORWARDING: Vec<usize>;
}

/// Kinds of override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideKind {
    Mirror,
    BodySubstitution,
    TargetRedirect,
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverrideKind::Mirror => "mirror",
            OverrideKind::BodySubstitution => "body substitution",
            OverrideKind::TargetRedirect => "target redirect",
        };
        f.write_str(name)
    }
}

/// Override configuration, turned into a [`SendOverride`] by [`Override::build`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Override {
    /// Copy every send to `listener_url`
    Mirror { listener_url: String },

    /// Replace every send with `payload` (pass-through when `None` or empty)
    BodySubstitution { payload: Option<Bytes> },

    /// Deliver every send to `target` with a matching `Host` line
    TargetRedirect { target: Endpoint },
}

impl Override {
    pub fn mirror(listener_url: impl Into<String>) -> Self {
        Override::Mirror {
            listener_url: listener_url.into(),
        }
    }

    pub fn body_substitution(payload: Option<Bytes>) -> Self {
        Override::BodySubstitution { payload }
    }

    /// Redirect to `host` (URL or authority) and `port`
    pub fn target_redirect(host: &str, port: u16) -> Result<Self> {
        Ok(Override::TargetRedirect {
            target: Endpoint::redirect(host, port)?,
        })
    }

    pub fn kind(&self) -> OverrideKind {
        match self {
            Override::Mirror { .. } => OverrideKind::Mirror,
            Override::BodySubstitution { .. } => OverrideKind::BodySubstitution,
            Override::TargetRedirect { .. } => OverrideKind::TargetRedirect,
        }
    }

    pub fn build(
        self,
        forwarder: &Arc<MirrorForwarder>,
        stats: &Arc<InterceptStats>,
    ) -> Arc<dyn SendOverride> {
        match self {
            Override::Mirror { listener_url } => Arc::new(MirrorOverride::new(
                listener_url,
                Arc::clone(forwarder),
                Arc::clone(stats),
            )),
            Override::BodySubstitution { payload } => {
                Arc::new(BodySubstitutionOverride::new(payload, Arc::clone(stats)))
            }
            Override::TargetRedirect { target } => {
                Arc::new(TargetRedirectOverride::new(target, Arc::clone(stats)))
            }
        }
    }
}

/// A strategy wrapping the transport's send
#[async_trait]
pub trait SendOverride: Send + Sync + fmt::Debug {
    fn kind(&self) -> OverrideKind;

    /// Handle one send, continuing the chain through `next`
    async fn send(&self, transport: &mut dyn Transport, data: Bytes, next: Next<'_>) -> Result<()>;
}

/// Mirrors each send before delegating.
///
/// A send issued by this override's own forward (a sink that loops back
/// through the same interceptor) is passed through without another copy.
/// Only the forwarding call path is marked, so concurrent sends on other
/// connections are all mirrored.
pub struct MirrorOverride {
    listener_url: String,
    forwarder: Arc<MirrorForwarder>,
    stats: Arc<InterceptStats>,
}

impl MirrorOverride {
    pub fn new(
        listener_url: impl Into<String>,
        forwarder: Arc<MirrorForwarder>,
        stats: Arc<InterceptStats>,
    ) -> Self {
        Self {
            listener_url: listener_url.into(),
            forwarder,
            stats,
        }
    }

    pub fn listener_url(&self) -> &str {
        &self.listener_url
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    fn is_forwarding(&self) -> bool {
        let key = self.key();
        FORWARDING
            .try_with(|forwarding| forwarding.contains(&key))
            .unwrap_or(false)
    }
}

impl fmt::Debug for MirrorOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorOverride")
            .field("listener_url", &self.listener_url)
            .field("timeout", &self.forwarder.timeout())
            .finish()
    }
}

#[async_trait]
impl SendOverride for MirrorOverride {
    fn kind(&self) -> OverrideKind {
        OverrideKind::Mirror
    }

    async fn send(&self, transport: &mut dyn Transport, data: Bytes, next: Next<'_>) -> Result<()> {
        if self.is_forwarding() {
            // The forward itself is being sent through this override
            debug!("Not mirroring send issued while forwarding to {}", self.listener_url);
            return next.run(transport, data).await;
        }

        let mut forwarding = FORWARDING
            .try_with(|forwarding| forwarding.clone())
            .unwrap_or_default();
        forwarding.push(self.key());

        let delivered = FORWARDING
            .scope(forwarding, self.forwarder.mirror(&self.listener_url, data.clone()))
            .await;
        self.stats.record_mirror(delivered);

        next.run(transport, data).await
    }
}

/// Replaces each send with a fixed payload
#[derive(Debug)]
pub struct BodySubstitutionOverride {
    payload: Option<Bytes>,
    stats: Arc<InterceptStats>,
}

impl BodySubstitutionOverride {
    pub fn new(payload: Option<Bytes>, stats: Arc<InterceptStats>) -> Self {
        Self { payload, stats }
    }
}

#[async_trait]
impl SendOverride for BodySubstitutionOverride {
    fn kind(&self) -> OverrideKind {
        OverrideKind::BodySubstitution
    }

    async fn send(&self, transport: &mut dyn Transport, data: Bytes, next: Next<'_>) -> Result<()> {
        match &self.payload {
            Some(payload) if !payload.is_empty() => {
                debug!(
                    "Substituting {} outgoing bytes with {} byte payload",
                    data.len(),
                    payload.len()
                );
                self.stats.record_substitution();
                next.run(transport, payload.clone()).await
            }
            _ => next.run(transport, data).await,
        }
    }
}

/// Reconnects to a target and rewrites `Host` before delegating
#[derive(Debug)]
pub struct TargetRedirectOverride {
    target: Endpoint,
    stats: Arc<InterceptStats>,
}

impl TargetRedirectOverride {
    pub fn new(target: Endpoint, stats: Arc<InterceptStats>) -> Self {
        Self { target, stats }
    }

    pub fn target(&self) -> &Endpoint {
        &self.target
    }
}

#[async_trait]
impl SendOverride for TargetRedirectOverride {
    fn kind(&self) -> OverrideKind {
        OverrideKind::TargetRedirect
    }

    async fn send(&self, transport: &mut dyn Transport, data: Bytes, next: Next<'_>) -> Result<()> {
        let request = RawRequest::parse(data)?;
        if request.host().is_none() {
            warn!("Request redirected to {} carries no Host line", self.target);
        }

        if !transport.is_connected() || transport.endpoint() != &self.target {
            info!("Redirecting {} -> {}", transport.endpoint(), self.target);
            transport.connect(&self.target).await?;
        }

        let rewritten = request.with_host(&self.target.host_header()).into_bytes();
        self.stats.record_redirect();
        next.run(transport, rewritten).await
    }
}
