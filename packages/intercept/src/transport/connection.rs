// packages/intercept/src/transport/connection.rs
//! Connections whose sends run through a hook slot

use crate::interception::raw_message::RawRequest;
use crate::interception::scope::HookSlot;
use crate::interception::stats::InterceptStats;
use crate::transport::{Endpoint, Transport};
use crate::utils::config::LoggingConfig;
use crate::utils::errors::Result;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// A transport bound to an interceptor's hook slot.
///
/// Caller code sends through this exactly as it would through the bare
/// transport; whatever overrides are active on the slot at the time of each
/// send are applied.
pub struct InterceptedConnection<T: Transport> {
    transport: T,
    slot: Arc<HookSlot>,
    stats: Arc<InterceptStats>,
    logging: LoggingConfig,
}

impl<T: Transport> InterceptedConnection<T> {
    pub fn new(
        transport: T,
        slot: Arc<HookSlot>,
        stats: Arc<InterceptStats>,
        logging: LoggingConfig,
    ) -> Self {
        Self {
            transport,
            slot,
            stats,
            logging,
        }
    }

    /// Send raw bytes through the active hook chain
    pub async fn send(&mut self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        if self.logging.log_requests {
            self.log_request(&data);
        }
        self.stats.record_send();

        let hook = self.slot.current();
        hook.send(&mut self.transport, data).await?;
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<Bytes> {
        self.transport.receive().await
    }

    /// Send a request and read its response
    pub async fn request(&mut self, data: impl Into<Bytes>) -> Result<Bytes> {
        self.send(data).await?;
        self.receive().await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    /// Current destination, which a redirect may have changed
    pub fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Log HTTP request
    fn log_request(&self, data: &Bytes) {
        let request = match RawRequest::parse(data.clone()) {
            Ok(request) => request,
            Err(_) => {
                debug!(
                    "Sending {} raw bytes to {}",
                    data.len(),
                    self.transport.endpoint()
                );
                return;
            }
        };

        debug!(
            "Request to {}: {}",
            self.transport.endpoint(),
            request.request_line().unwrap_or("<binary>")
        );
        for line in request.header_lines().skip(1) {
            debug!("  {}", String::from_utf8_lossy(line));
        }

        let body = request.body();
        if !body.is_empty() {
            let shown = body.len().min(self.logging.max_log_body_size);
            debug!(
                "  body ({} bytes): {}",
                body.len(),
                String::from_utf8_lossy(&body[..shown])
            );
        }
    }
}
