// packages/intercept/src/test_helpers.rs
//! Shared fixtures for unit tests

use crate::interception::mirror::MirrorSink;
use crate::utils::errors::{InterceptError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Sink that keeps every submission in memory
#[derive(Default)]
pub struct RecordingSink {
    submissions: Mutex<Vec<(String, Bytes)>>,

    /// Time each submission takes before it is recorded
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn submissions(&self) -> Vec<(String, Bytes)> {
        self.submissions.lock().clone()
    }

    pub fn payloads(&self) -> Vec<Bytes> {
        self.submissions
            .lock()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl MirrorSink for RecordingSink {
    async fn submit(&self, listener_url: &str, payload: Bytes) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.submissions
            .lock()
            .push((listener_url.to_string(), payload));
        Ok(())
    }
}

/// Sink that always fails
pub struct FailingSink;

#[async_trait]
impl MirrorSink for FailingSink {
    async fn submit(&self, listener_url: &str, _payload: Bytes) -> Result<()> {
        Err(InterceptError::MirrorForwarding(format!(
            "{} refused the copy",
            listener_url
        )))
    }
}

/// HTTP listener answering `status` and forwarding each request body to the receiver
pub async fn spawn_listener(status: StatusCode) -> (SocketAddr, mpsc::UnboundedReceiver<Bytes>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let tx = tx.clone();
                    async move {
                        let body = req.into_body().collect().await?.to_bytes();
                        let _ = tx.send(body);
                        Ok::<_, hyper::Error>(
                            Response::builder()
                                .status(status)
                                .body(Full::new(Bytes::new()))
                                .unwrap(),
                        )
                    }
                });

                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, rx)
}

/// Listener that accepts connections and never answers
pub async fn spawn_silent_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    addr
}
