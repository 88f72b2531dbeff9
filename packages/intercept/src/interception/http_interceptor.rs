// packages/intercept/src/interception/http_interceptor.rs
//! HTTP request interceptor
//!
//! Applies mirror, body-substitution and target-redirect overrides to the
//! connections it hands out, for the duration of a unit of work. Caller code
//! inside the unit of work sends exactly as it normally would.
//!
//! Scopes nest. The scope opened last runs first on each send, so the
//! outermost scope sits next to the real transport and sees bytes already
//! transformed by the inner ones:
//!
//! ```text
//! with_mirror(url, with_body_substitution(p, work))
//!
//! send(X) ─► body substitution ─► mirror(p) ─► transport(p)
//! ```
//!
//! Units of work on one interceptor run one at a time: a second `with_*`
//! call waits until the first has finished and its overrides are gone.
//! Calls nested inside a unit of work join it instead of waiting.

use crate::interception::mirror::{MirrorForwarder, MirrorSink};
use crate::interception::overrides::Override;
use crate::interception::scope::{HookSlot, InterceptionScope, ScopeStack};
use crate::interception::stats::{InterceptStats, StatsSnapshot};
use crate::transport::{Endpoint, InterceptedConnection, TcpTransport, Transport};
use crate::utils::config::InterceptorConfig;
use crate::utils::errors::Result;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Interceptor owning one hook slot
///
/// Every connection created by an interceptor shares its slot. Independent
/// interceptors never affect each other and run fully in parallel; units of
/// work on the same interceptor are serialized.
pub struct HttpInterceptor {
    config: InterceptorConfig,
    slot: Arc<HookSlot>,
    forwarder: Arc<MirrorForwarder>,
    stats: Arc<InterceptStats>,
}

impl HttpInterceptor {
    /// Create an interceptor that mirrors over HTTP
    pub fn new(config: InterceptorConfig) -> Self {
        let forwarder = Arc::new(MirrorForwarder::from_config(&config.mirror));
        Self::with_forwarder(config, forwarder)
    }

    /// Create an interceptor delivering mirror copies to a custom sink
    pub fn with_mirror_sink(config: InterceptorConfig, sink: Arc<dyn MirrorSink>) -> Self {
        let forwarder = Arc::new(MirrorForwarder::new(sink, config.mirror.timeout()));
        Self::with_forwarder(config, forwarder)
    }

    fn with_forwarder(config: InterceptorConfig, forwarder: Arc<MirrorForwarder>) -> Self {
        Self {
            config,
            slot: Arc::new(HookSlot::new()),
            forwarder,
            stats: Arc::new(InterceptStats::new()),
        }
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    pub fn slot(&self) -> &Arc<HookSlot> {
        &self.slot
    }

    /// Bind an existing transport to this interceptor
    pub fn wrap<T: Transport>(&self, transport: T) -> InterceptedConnection<T> {
        InterceptedConnection::new(
            transport,
            Arc::clone(&self.slot),
            Arc::clone(&self.stats),
            self.config.logging.clone(),
        )
    }

    /// Lazily-opened TCP connection to `endpoint`
    pub fn connection(&self, endpoint: Endpoint) -> InterceptedConnection<TcpTransport> {
        self.wrap(TcpTransport::new(endpoint, self.config.transport.clone()))
    }

    /// Activate `over` until the returned scope is exited or dropped.
    ///
    /// Outside a unit of work the scope holds the interceptor for its whole
    /// life, and fails with `InterceptorBusy` if another unit of work has it.
    /// Do not start a `with_*` call on this interceptor while holding one.
    pub fn enter(&self, over: Override) -> Result<InterceptionScope> {
        let gate = self.slot.try_acquire()?;
        Ok(self.install(over).holding(gate))
    }

    fn install(&self, over: Override) -> InterceptionScope {
        info!("Installing {} override", over.kind());
        InterceptionScope::enter(&self.slot, over.build(&self.forwarder, &self.stats))
    }

    /// Run `work` with `over` active.
    ///
    /// Returns the work's own output. The override is removed on every exit
    /// path, including panics and cancellation; the only error is a failed
    /// restoration.
    pub async fn with_override<F>(&self, over: Override, work: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.with_overrides(std::iter::once(over), work).await
    }

    /// Run `work` with every override in `overrides` active, first one outermost
    pub async fn with_overrides<I, F>(&self, overrides: I, work: F) -> Result<F::Output>
    where
        I: IntoIterator<Item = Override>,
        F: Future,
    {
        // Declared first so it is released after the scopes are undone
        let _gate = self.slot.acquire().await;

        let mut scopes = ScopeStack::new();
        for over in overrides {
            scopes.push(self.install(over));
        }

        let output = self.slot.hold(work).await;
        scopes.exit()?;
        Ok(output)
    }

    /// Run `work` while every send is mirrored to `listener_url`
    pub async fn with_mirror<F>(&self, listener_url: impl Into<String>, work: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.with_override(Override::mirror(listener_url), work).await
    }

    /// Run `work` while every send is replaced with `payload`
    pub async fn with_body_substitution<F>(&self, payload: Option<Bytes>, work: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.with_override(Override::body_substitution(payload), work).await
    }

    /// Run `work` while every send goes to `target`
    pub async fn with_target_redirect<F>(&self, target: Endpoint, work: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.with_override(Override::TargetRedirect { target }, work).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for HttpInterceptor {
    fn default() -> Self {
        Self::new(InterceptorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::overrides::OverrideKind;
    use crate::interception::raw_message;
    use crate::interception::scope::TransportHook;
    use crate::test_helpers::{spawn_listener, spawn_silent_listener, RecordingSink};
    use crate::transport::MemoryTransport;
    use crate::utils::errors::InterceptError;
    use futures::FutureExt;
    use hyper::StatusCode;
    use std::panic::AssertUnwindSafe;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const REQUEST: &[u8] = b"POST /submit HTTP/1.1\r\nHost: api.example.com\r\nContent-Length: 4\r\n\r\ndata";

    fn recording_interceptor() -> (HttpInterceptor, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let interceptor = HttpInterceptor::with_mirror_sink(InterceptorConfig::default(), sink.clone());
        (interceptor, sink)
    }

    fn memory_connection(interceptor: &HttpInterceptor) -> InterceptedConnection<MemoryTransport> {
        interceptor.wrap(MemoryTransport::new(Endpoint::new("api.example.com", 80)))
    }

    async fn failing_work() -> u32 {
        panic!("unit of work failed")
    }

    #[test]
    fn test_interceptor_creation() {
        let interceptor = HttpInterceptor::default();
        assert!(interceptor.slot().is_direct());
        assert_eq!(interceptor.stats(), StatsSnapshot::default());
        assert!(interceptor.config().logging.log_requests);
    }

    #[tokio::test]
    async fn test_with_override_returns_work_output() {
        let (interceptor, _) = recording_interceptor();
        let depth = interceptor
            .with_body_substitution(None, async { interceptor.slot().current().depth() })
            .await
            .unwrap();

        assert_eq!(depth, 1);
        assert!(interceptor.slot().is_direct());
    }

    #[tokio::test]
    async fn test_restored_after_work_error() {
        let (interceptor, _) = recording_interceptor();
        let before = interceptor.slot().current();

        let output = interceptor
            .with_mirror("http://listener.test/", async {
                Err::<(), _>(InterceptError::Timeout("upstream".to_string()))
            })
            .await
            .unwrap();

        assert!(matches!(output, Err(InterceptError::Timeout(_))));
        assert!(Arc::ptr_eq(&interceptor.slot().current(), &before));
    }

    #[tokio::test]
    async fn test_restored_after_work_panic() {
        let (interceptor, _) = recording_interceptor();
        let before = interceptor.slot().current();

        let result = AssertUnwindSafe(
            interceptor.with_mirror("http://listener.test/", failing_work()),
        )
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert!(Arc::ptr_eq(&interceptor.slot().current(), &before));
    }

    #[tokio::test]
    async fn test_restored_after_cancellation() {
        let (interceptor, _) = recording_interceptor();
        let before = interceptor.slot().current();

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            interceptor.with_mirror("http://listener.test/", futures::future::pending::<()>()),
        )
        .await;

        assert!(result.is_err());
        assert!(Arc::ptr_eq(&interceptor.slot().current(), &before));
    }

    #[tokio::test]
    async fn test_mirror_outside_substitution_sees_substituted_bytes() {
        let (interceptor, sink) = recording_interceptor();
        let mut conn = memory_connection(&interceptor);

        interceptor
            .with_mirror(
                "http://listener.test/",
                interceptor.with_body_substitution(Some(Bytes::from_static(b"SUBSTITUTED")), async {
                    conn.send(REQUEST).await
                }),
            )
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(sink.payloads(), vec![Bytes::from_static(b"SUBSTITUTED")]);
        assert_eq!(
            conn.transport().sent_bytes(),
            vec![Bytes::from_static(b"SUBSTITUTED")]
        );
        assert!(interceptor.slot().is_direct());
    }

    #[tokio::test]
    async fn test_with_overrides_first_is_outermost() {
        let (interceptor, sink) = recording_interceptor();
        let mut conn = memory_connection(&interceptor);

        let overrides = vec![
            Override::mirror("http://listener.test/"),
            Override::target_redirect("http://evil.com/", 443).unwrap(),
        ];
        let kinds = interceptor
            .with_overrides(overrides, async {
                conn.send(REQUEST).await.unwrap();
                interceptor.slot().current().kinds()
            })
            .await
            .unwrap();

        assert_eq!(kinds, vec![OverrideKind::TargetRedirect, OverrideKind::Mirror]);

        let expected = Bytes::from_static(
            b"POST /submit HTTP/1.1\r\nHost: evil.com\r\nContent-Length: 4\r\n\r\ndata",
        );
        assert_eq!(sink.payloads(), vec![expected.clone()]);
        assert_eq!(conn.transport().sent(), &[(Endpoint::new("evil.com", 443), expected)]);
        assert_eq!(conn.endpoint(), &Endpoint::new("evil.com", 443));

        let stats = interceptor.stats();
        assert_eq!(stats.sends, 1);
        assert_eq!(stats.mirrored, 1);
        assert_eq!(stats.redirects, 1);
        assert!(interceptor.slot().is_direct());
    }

    #[tokio::test]
    async fn test_sends_outside_work_are_untouched() {
        let (interceptor, sink) = recording_interceptor();
        let mut conn = memory_connection(&interceptor);

        interceptor
            .with_mirror("http://listener.test/", async { conn.send("inside").await })
            .await
            .unwrap()
            .unwrap();
        conn.send("outside").await.unwrap();

        assert_eq!(sink.payloads(), vec![Bytes::from_static(b"inside")]);
        assert_eq!(conn.transport().sent().len(), 2);
    }

    #[tokio::test]
    async fn test_interceptors_are_independent() {
        let (first, first_sink) = recording_interceptor();
        let (second, _) = recording_interceptor();
        let mut conn = memory_connection(&second);

        first
            .with_mirror("http://listener.test/", async { conn.send("payload").await })
            .await
            .unwrap()
            .unwrap();

        assert!(first_sink.payloads().is_empty());
        assert!(matches!(*second.slot().current(), TransportHook::Direct));
    }

    #[tokio::test]
    async fn test_silent_listener_does_not_block_primary_send() {
        let addr = spawn_silent_listener().await;
        let mut config = InterceptorConfig::default();
        config.mirror.timeout_ms = 200;
        let interceptor = HttpInterceptor::new(config);
        let mut conn = memory_connection(&interceptor);

        let start = Instant::now();
        interceptor
            .with_mirror(format!("http://{}/", addr), async { conn.send(REQUEST).await })
            .await
            .unwrap()
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(conn.transport().sent_bytes(), vec![Bytes::from_static(REQUEST)]);
        assert_eq!(interceptor.stats().mirror_failures, 1);
    }

    #[tokio::test]
    async fn test_end_to_end_over_tcp() {
        // Upstream that answers one request
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = upstream.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = upstream.accept().await.unwrap();
            let mut received = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                if let Some(boundary) = raw_message::find_boundary(&received) {
                    // headers + terminator + 4 byte body
                    if received.len() >= boundary + 8 {
                        break;
                    }
                }
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
            received
        });

        let (listener_addr, mut mirrored) = spawn_listener(StatusCode::OK).await;
        let interceptor = HttpInterceptor::default();
        // Original destination is unreachable; the redirect supplies the real one
        let mut conn = interceptor.connection(Endpoint::new("203.0.113.1", 80));

        let response = interceptor
            .with_mirror(
                format!("http://{}/", listener_addr),
                interceptor.with_target_redirect(Endpoint::new("127.0.0.1", upstream_port), async {
                    conn.request(REQUEST).await
                }),
            )
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(&response[..], &b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"[..]);

        let expected = format!(
            "POST /submit HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nContent-Length: 4\r\n\r\ndata",
            upstream_port
        )
        .into_bytes();
        assert_eq!(&server.await.unwrap()[..], &expected[..]);
        assert_eq!(&mirrored.recv().await.unwrap()[..], &expected[..]);
        assert_eq!(interceptor.stats().redirects, 1);
    }

    #[tokio::test]
    async fn test_manual_scope() {
        let (interceptor, sink) = recording_interceptor();
        let mut conn = memory_connection(&interceptor);

        let scope = interceptor.enter(Override::mirror("http://listener.test/")).unwrap();
        assert_eq!(scope.kind(), OverrideKind::Mirror);
        conn.send("payload").await.unwrap();
        scope.exit().unwrap();

        assert_eq!(sink.payloads().len(), 1);
        assert!(interceptor.slot().is_direct());
    }

    #[tokio::test]
    async fn test_manual_scope_rejected_while_busy() {
        let (interceptor, _) = recording_interceptor();

        let first = interceptor.enter(Override::mirror("http://listener.test/")).unwrap();
        let err = interceptor
            .enter(Override::body_substitution(None))
            .unwrap_err();
        assert!(matches!(err, InterceptError::InterceptorBusy));
        assert_eq!(interceptor.slot().current().depth(), 1);

        first.exit().unwrap();
        assert!(interceptor.slot().is_direct());
    }

    #[tokio::test]
    async fn test_manual_scope_inside_unit_of_work() {
        let (interceptor, sink) = recording_interceptor();
        let mut conn = memory_connection(&interceptor);

        let kinds = interceptor
            .with_body_substitution(Some(Bytes::from_static(b"patched")), async {
                let scope = interceptor.enter(Override::mirror("http://listener.test/")).unwrap();
                conn.send(REQUEST).await.unwrap();
                let kinds = interceptor.slot().current().kinds();
                scope.exit().unwrap();
                kinds
            })
            .await
            .unwrap();

        assert_eq!(kinds, vec![OverrideKind::Mirror, OverrideKind::BodySubstitution]);
        assert_eq!(sink.payloads(), vec![Bytes::from_static(REQUEST)]);
        assert!(interceptor.slot().is_direct());
    }

    #[tokio::test]
    async fn test_overlapping_units_of_work_are_serialized() {
        let (interceptor, _) = recording_interceptor();

        let (first, second) = tokio::join!(
            interceptor.with_mirror("http://listener.test/", async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                interceptor.slot().current().kinds()
            }),
            interceptor.with_body_substitution(Some(Bytes::from_static(b"patched")), async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                interceptor.slot().current().kinds()
            }),
        );

        // each unit of work only ever saw its own override
        assert_eq!(first.unwrap(), vec![OverrideKind::Mirror]);
        assert_eq!(second.unwrap(), vec![OverrideKind::BodySubstitution]);
        assert!(interceptor.slot().is_direct());
    }

    #[tokio::test]
    async fn test_cancelled_unit_of_work_releases_interceptor() {
        let (interceptor, _) = recording_interceptor();

        let (cancelled, waiting) = tokio::join!(
            tokio::time::timeout(
                Duration::from_millis(20),
                interceptor.with_mirror("http://listener.test/", futures::future::pending::<()>()),
            ),
            interceptor.with_body_substitution(None, async {
                interceptor.slot().current().kinds()
            }),
        );

        assert!(cancelled.is_err());
        assert_eq!(waiting.unwrap(), vec![OverrideKind::BodySubstitution]);
        assert!(interceptor.slot().is_direct());
    }

    #[tokio::test]
    async fn test_concurrent_sends_are_all_mirrored() {
        let sink = Arc::new(RecordingSink::with_delay(Duration::from_millis(50)));
        let interceptor = HttpInterceptor::with_mirror_sink(InterceptorConfig::default(), sink.clone());
        let mut first = memory_connection(&interceptor);
        let mut second = memory_connection(&interceptor);

        interceptor
            .with_mirror("http://listener.test/", async {
                let (a, b) = tokio::join!(first.send("first"), second.send("second"));
                a.unwrap();
                b.unwrap();
            })
            .await
            .unwrap();

        let mut payloads = sink.payloads();
        payloads.sort();
        assert_eq!(
            payloads,
            vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
        );

        let stats = interceptor.stats();
        assert_eq!(stats.sends, 2);
        assert_eq!(stats.mirrored, 2);
        assert_eq!(stats.mirror_failures, 0);
    }
}
