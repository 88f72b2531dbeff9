// packages/intercept/src/interception/mirror.rs
//! Best-effort mirroring of outgoing requests to a listener
//!
//! Mirroring is observability only: every failure (bad URL, connection
//! error, non-2xx status, timeout) is logged and dropped so the primary
//! request path never sees it.

use crate::utils::config::MirrorConfig;
use crate::utils::errors::{InterceptError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{header, Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Destination for mirrored payloads
#[async_trait]
pub trait MirrorSink: Send + Sync {
    /// Deliver `payload` to `listener_url`
    async fn submit(&self, listener_url: &str, payload: Bytes) -> Result<()>;
}

/// Sink that POSTs payloads over plain HTTP
pub struct HttpMirrorSink {
    content_type: String,
    http_client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpMirrorSink {
    pub fn new(content_type: impl Into<String>) -> Self {
        let http_client = Client::builder(TokioExecutor::new()).build_http();

        Self {
            content_type: content_type.into(),
            http_client,
        }
    }
}

#[async_trait]
impl MirrorSink for HttpMirrorSink {
    async fn submit(&self, listener_url: &str, payload: Bytes) -> Result<()> {
        let uri: Uri = listener_url.parse().map_err(|e| {
            InterceptError::MirrorForwarding(format!("Invalid listener URL {}: {}", listener_url, e))
        })?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, self.content_type.as_str())
            .body(Full::new(payload))
            .map_err(|e| InterceptError::MirrorForwarding(format!("Request build error: {}", e)))?;

        let response = self
            .http_client
            .request(request)
            .await
            .map_err(|e| InterceptError::MirrorForwarding(format!("Listener request failed: {}", e)))?;

        let status = response.status();
        // Drain so the pooled connection can be reused
        let _ = response.into_body().collect().await;

        if status.is_success() {
            Ok(())
        } else {
            Err(InterceptError::MirrorForwarding(format!(
                "Listener answered {}",
                status
            )))
        }
    }
}

/// Forwards copies of outgoing bytes, bounded by a timeout
pub struct MirrorForwarder {
    sink: Arc<dyn MirrorSink>,
    timeout: Duration,
}

impl MirrorForwarder {
    pub fn new(sink: Arc<dyn MirrorSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Forwarder using [`HttpMirrorSink`]
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self::new(
            Arc::new(HttpMirrorSink::new(config.content_type.clone())),
            config.timeout(),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward `payload` to `listener_url`.
    ///
    /// Never fails; returns whether the listener accepted the copy.
    pub async fn mirror(&self, listener_url: &str, payload: Bytes) -> bool {
        let size = payload.len();
        match timeout(self.timeout, self.sink.submit(listener_url, payload)).await {
            Ok(Ok(())) => {
                debug!("Mirrored {} bytes to {}", size, listener_url);
                true
            }
            Ok(Err(e)) => {
                debug!("Dropping mirror copy for {}: {}", listener_url, e);
                false
            }
            Err(_) => {
                warn!(
                    "Mirror to {} timed out after {:?}, copy dropped",
                    listener_url, self.timeout
                );
                false
            }
        }
    }
}
