// packages/intercept/src/transport/tcp.rs
//! Plaintext TCP transport
//!
//! Opens lazily on first transmit. Responses are framed by `Content-Length`
//! when the server sends one, otherwise read until the peer closes.

use crate::interception::raw_message::{self, HEADER_TERMINATOR};
use crate::transport::{Endpoint, Transport};
use crate::utils::config::TransportConfig;
use crate::utils::errors::{InterceptError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

/// TCP connection to a single endpoint
pub struct TcpTransport {
    endpoint: Endpoint,
    stream: Option<TcpStream>,
    config: TransportConfig,
}

impl TcpTransport {
    pub fn new(endpoint: Endpoint, config: TransportConfig) -> Self {
        Self {
            endpoint,
            stream: None,
            config,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        let endpoint = self.endpoint.clone();
        self.stream
            .as_mut()
            .ok_or(InterceptError::NotConnected(endpoint))
    }

    /// Total length of the response in `buf`, once its headers are complete.
    ///
    /// `None` when there is no usable `Content-Length`, including one too
    /// large to add up; the caller then reads until EOF or the size cap.
    fn expected_len(buf: &[u8]) -> Option<usize> {
        let boundary = raw_message::find_boundary(buf)?;
        let body_len = raw_message::content_length(&buf[..boundary])?;
        boundary
            .checked_add(HEADER_TERMINATOR.len())?
            .checked_add(body_len)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.close().await?;

        debug!("Connecting to {}", endpoint);
        let addr = (endpoint.connect_host(), endpoint.port);
        let stream = timeout(self.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| InterceptError::Timeout(format!("connect to {}", endpoint)))??;

        self.endpoint = endpoint.clone();
        self.stream = Some(stream);
        Ok(())
    }

    async fn transmit(&mut self, data: &[u8]) -> Result<()> {
        if self.stream.is_none() {
            let endpoint = self.endpoint.clone();
            self.connect(&endpoint).await?;
        }

        let stream = self.stream()?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes> {
        let read_timeout = self.config.read_timeout();
        let max_bytes = self.config.max_response_bytes;
        let endpoint = self.endpoint.clone();
        let stream = self.stream()?;

        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            if let Some(expected) = Self::expected_len(&buf) {
                if buf.len() >= expected {
                    buf.truncate(expected);
                    break;
                }
            }
            if buf.len() >= max_bytes {
                warn!("Response from {} truncated at {} bytes", endpoint, max_bytes);
                buf.truncate(max_bytes);
                break;
            }

            buf.reserve(READ_CHUNK);
            let read = timeout(read_timeout, stream.read_buf(&mut buf))
                .await
                .map_err(|_| InterceptError::Timeout(format!("read from {}", endpoint)))??;
            if read == 0 {
                break;
            }
        }

        debug!("Received {} bytes from {}", buf.len(), endpoint);
        Ok(buf.freeze())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing connection to {}", self.endpoint);
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.endpoint, e);
            }
        }
        Ok(())
    }
}
