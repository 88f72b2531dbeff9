// packages/intercept/src/transport/memory.rs
//! In-process transport that records connects and transmitted bytes

use crate::transport::{Endpoint, Transport};
use crate::utils::errors::{InterceptError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;

/// Transport that never touches the network
#[derive(Debug)]
pub struct MemoryTransport {
    endpoint: Endpoint,
    connected: bool,
    connects: Vec<Endpoint>,
    sent: Vec<(Endpoint, Bytes)>,
    responses: VecDeque<Bytes>,
}

impl MemoryTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connected: false,
            connects: Vec::new(),
            sent: Vec::new(),
            responses: VecDeque::new(),
        }
    }

    /// Queue a response for the next `receive`
    pub fn with_response(mut self, response: impl Into<Bytes>) -> Self {
        self.responses.push_back(response.into());
        self
    }

    /// Every endpoint connected to, in order
    pub fn connects(&self) -> &[Endpoint] {
        &self.connects
    }

    /// Every transmitted buffer with the endpoint it went to
    pub fn sent(&self) -> &[(Endpoint, Bytes)] {
        &self.sent
    }

    /// Transmitted buffers only
    pub fn sent_bytes(&self) -> Vec<Bytes> {
        self.sent.iter().map(|(_, data)| data.clone()).collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.endpoint = endpoint.clone();
        self.connected = true;
        self.connects.push(endpoint.clone());
        Ok(())
    }

    async fn transmit(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            let endpoint = self.endpoint.clone();
            self.connect(&endpoint).await?;
        }
        self.sent
            .push((self.endpoint.clone(), Bytes::copy_from_slice(data)));
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes> {
        if !self.connected {
            return Err(InterceptError::NotConnected(self.endpoint.clone()));
        }
        Ok(self.responses.pop_front().unwrap_or_default())
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }
}
