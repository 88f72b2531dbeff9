// packages/intercept/src/interception/scope.rs
//! Hook slots and scoped override activation
//!
//! A [`HookSlot`] holds the [`TransportHook`] that runs whenever a connection
//! bound to it sends bytes. An [`InterceptionScope`] layers one override on
//! top of the slot's current hook and takes that layer off again when it
//! ends, whether the wrapped work returned, failed, panicked or was dropped
//! mid-flight.
//!
//! Units of work on one slot are serialized through its gate. Nested
//! activations from inside a unit of work already hold the gate and go
//! straight through.

use crate::interception::overrides::{OverrideKind, SendOverride};
use crate::transport::Transport;
use crate::utils::errors::{InterceptError, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error};
use ulid::Ulid;

tokio::task_local! {
    /// Slots whose gate is held by the unit of work running on this task
    static HELD_SLOTS: Vec<usize>;
}

/// What runs when a connection is asked to send bytes
#[derive(Debug)]
pub enum TransportHook {
    /// The transport's own transmit
    Direct,

    /// `outer` runs first and hands the (possibly transformed) bytes to `inner`
    Layered {
        outer: Arc<dyn SendOverride>,
        inner: Arc<TransportHook>,
    },
}

impl TransportHook {
    /// Run this hook chain for one send
    pub fn send<'a>(
        &'a self,
        transport: &'a mut dyn Transport,
        data: Bytes,
    ) -> BoxFuture<'a, Result<()>> {
        match self {
            TransportHook::Direct => Box::pin(async move { transport.transmit(&data).await }),
            TransportHook::Layered { outer, inner } => {
                outer.send(transport, data, Next { hook: inner.as_ref() })
            }
        }
    }

    /// Overrides in this chain, outermost (first to run) first
    pub fn kinds(&self) -> Vec<OverrideKind> {
        let mut kinds = Vec::new();
        let mut hook = self;
        while let TransportHook::Layered { outer, inner } = hook {
            kinds.push(outer.kind());
            hook = inner.as_ref();
        }
        kinds
    }

    pub fn depth(&self) -> usize {
        self.kinds().len()
    }
}

/// `hook` with the layer for `layer` unlinked, or `None` if it has no such layer
fn without_layer(
    hook: &Arc<TransportHook>,
    layer: &Arc<dyn SendOverride>,
) -> Option<Arc<TransportHook>> {
    match hook.as_ref() {
        TransportHook::Direct => None,
        TransportHook::Layered { outer, inner } if Arc::ptr_eq(outer, layer) => {
            Some(Arc::clone(inner))
        }
        TransportHook::Layered { outer, inner } => without_layer(inner, layer).map(|rest| {
            Arc::new(TransportHook::Layered {
                outer: Arc::clone(outer),
                inner: rest,
            })
        }),
    }
}

/// The remainder of a hook chain, handed to each override
pub struct Next<'a> {
    hook: &'a TransportHook,
}

impl<'a> Next<'a> {
    /// Continue the chain with `data`
    pub async fn run(self, transport: &mut dyn Transport, data: Bytes) -> Result<()> {
        self.hook.send(transport, data).await
    }
}

/// Exclusive use of a [`HookSlot`], released on drop
#[derive(Debug)]
pub struct SlotGuard {
    _gate: OwnedMutexGuard<()>,
}

/// Holder of the currently active hook
#[derive(Debug)]
pub struct HookSlot {
    current: Mutex<Arc<TransportHook>>,

    /// Held for the whole of each unit of work
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl HookSlot {
    /// A slot whose hook sends directly
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Arc::new(TransportHook::Direct)),
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Snapshot of the active hook
    pub fn current(&self) -> Arc<TransportHook> {
        Arc::clone(&self.current.lock())
    }

    pub fn is_direct(&self) -> bool {
        matches!(*self.current(), TransportHook::Direct)
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// Whether the calling task is inside a unit of work holding this slot
    pub fn is_held_here(&self) -> bool {
        let key = self.key();
        HELD_SLOTS
            .try_with(|held| held.contains(&key))
            .unwrap_or(false)
    }

    /// Wait for exclusive use of the slot.
    ///
    /// Returns `None` when the calling unit of work already holds it.
    pub async fn acquire(&self) -> Option<SlotGuard> {
        if self.is_held_here() {
            return None;
        }
        let gate = Arc::clone(&self.gate).lock_owned().await;
        Some(SlotGuard { _gate: gate })
    }

    /// Like [`acquire`](Self::acquire), but fails instead of waiting
    pub fn try_acquire(&self) -> Result<Option<SlotGuard>> {
        if self.is_held_here() {
            return Ok(None);
        }
        let gate = Arc::clone(&self.gate)
            .try_lock_owned()
            .map_err(|_| InterceptError::InterceptorBusy)?;
        Ok(Some(SlotGuard { _gate: gate }))
    }

    /// Run `work` as the holder of this slot, so nested activations skip the gate
    pub async fn hold<F: Future>(&self, work: F) -> F::Output {
        let mut held = HELD_SLOTS.try_with(|held| held.clone()).unwrap_or_default();
        held.push(self.key());
        HELD_SLOTS.scope(held, work).await
    }
}

impl Default for HookSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// One activated override, undone when the scope ends
#[derive(Debug)]
pub struct InterceptionScope {
    id: Ulid,
    kind: OverrideKind,
    slot: Arc<HookSlot>,

    /// Hook active before this scope
    saved: Arc<TransportHook>,

    /// Override this scope layered on
    layer: Arc<dyn SendOverride>,

    finished: bool,

    /// Released after restoration, since fields drop after `Drop::drop`
    gate: Option<SlotGuard>,
}

impl InterceptionScope {
    /// Layer `over` on top of the slot's current hook
    pub fn enter(slot: &Arc<HookSlot>, over: Arc<dyn SendOverride>) -> Self {
        let id = Ulid::new();
        let kind = over.kind();

        let mut current = slot.current.lock();
        let saved = Arc::clone(&current);
        let installed = Arc::new(TransportHook::Layered {
            outer: Arc::clone(&over),
            inner: Arc::clone(&saved),
        });
        *current = Arc::clone(&installed);
        drop(current);

        debug!("Entered {} scope {} (depth {})", kind, id, installed.depth());

        Self {
            id,
            kind,
            slot: Arc::clone(slot),
            saved,
            layer: over,
            finished: false,
            gate: None,
        }
    }

    /// Keep `gate` until this scope has been undone
    pub fn holding(mut self, gate: Option<SlotGuard>) -> Self {
        self.gate = gate;
        self
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn kind(&self) -> OverrideKind {
        self.kind
    }

    /// Hook that was active when this scope was entered
    pub fn saved(&self) -> &Arc<TransportHook> {
        &self.saved
    }

    /// End the scope, restoring the captured hook
    pub fn exit(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut current = self.slot.current.lock();
        let below = match &**current {
            TransportHook::Layered { outer, inner } if Arc::ptr_eq(outer, &self.layer) => {
                Some(Arc::clone(inner))
            }
            _ => None,
        };
        if let Some(below) = below {
            *current = below;
            drop(current);
            debug!("Exited {} scope {}", self.kind, self.id);
            return Ok(());
        }

        // A newer scope is still on top. Unlink only this layer; the newer
        // one stays active and takes the slot back to empty when it exits.
        if let Some(rest) = without_layer(&current, &self.layer) {
            *current = rest;
        }
        Err(InterceptError::ScopeRestoration {
            scope: self.id,
            kind: self.kind,
        })
    }
}

impl Drop for InterceptionScope {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("{}", e);
            if !std::thread::panicking() {
                panic!("{}", e);
            }
        }
    }
}

/// Nested scopes, unwound innermost first
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<InterceptionScope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scope: InterceptionScope) {
        self.scopes.push(scope);
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Exit every scope, innermost first, reporting the first failure
    pub fn exit(mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(scope) = self.scopes.pop() {
            if let Err(e) = scope.exit() {
                error!("{}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ScopeStack {
    fn drop(&mut self) {
        // Vec drops front to back; scopes must go back to front
        while let Some(scope) = self.scopes.pop() {
            drop(scope);
        }
    }
}
