// packages/intercept/src/interception/mod.rs
//! Request interception layer
//!
//! This module substitutes the send step of outgoing HTTP/1.1 requests
//! without changing the calling code:
//!
//! - **HTTP Interceptor**: public API composing overrides around a unit of work
//! - **Overrides**: mirror, body substitution, target redirect
//! - **Scope**: hook slots and RAII activation of one override
//! - **Mirror**: best-effort forwarding of request copies to a listener
//! - **Raw Message**: header/body splitting and `Host` rewriting
//! - **Stats**: interception counters
//!
//! # Architecture
//!
//! ```text
//! Client Code (Unmodified)
//!     │
//!     └─ send(bytes) → HookSlot → override chain → Transport
//!                                    │
//!                                    └─ mirror copy → Listener (best-effort)
//! ```

pub mod http_interceptor;
pub mod mirror;
pub mod overrides;
pub mod raw_message;
pub mod scope;
pub mod stats;

// Re-export commonly used types
pub use http_interceptor::HttpInterceptor;
pub use mirror::{HttpMirrorSink, MirrorForwarder, MirrorSink};
pub use overrides::{
    BodySubstitutionOverride, MirrorOverride, Override, OverrideKind, SendOverride,
    TargetRedirectOverride,
};
pub use raw_message::{rewrite_host, RawRequest};
pub use scope::{HookSlot, InterceptionScope, Next, ScopeStack, SlotGuard, TransportHook};
pub use stats::{InterceptStats, StatsSnapshot};
