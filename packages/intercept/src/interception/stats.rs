// packages/intercept/src/interception/stats.rs
//! Interception counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by an interceptor, its connections and overrides
#[derive(Debug, Default)]
pub struct InterceptStats {
    sends: AtomicU64,
    mirrored: AtomicU64,
    mirror_failures: AtomicU64,
    substitutions: AtomicU64,
    redirects: AtomicU64,
}

impl InterceptStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_send(&self) {
        self.sends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_mirror(&self, delivered: bool) {
        if delivered {
            self.mirrored.fetch_add(1, Ordering::Relaxed);
        } else {
            self.mirror_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_substitution(&self) {
        self.substitutions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redirect(&self) {
        self.redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sends: self.sends.load(Ordering::Relaxed),
            mirrored: self.mirrored.load(Ordering::Relaxed),
            mirror_failures: self.mirror_failures.load(Ordering::Relaxed),
            substitutions: self.substitutions.load(Ordering::Relaxed),
            redirects: self.redirects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`InterceptStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Sends issued through intercepted connections
    pub sends: u64,

    /// Mirror copies delivered to a listener
    pub mirrored: u64,

    /// Mirror copies dropped (error or timeout)
    pub mirror_failures: u64,

    /// Sends whose bytes were replaced
    pub substitutions: u64,

    /// Sends delivered to a redirect target
    pub redirects: u64,
}

impl StatsSnapshot {
    /// Share of mirror attempts that were dropped, as a percentage
    pub fn mirror_failure_rate(&self) -> f64 {
        let attempts = self.mirrored + self.mirror_failures;
        if attempts == 0 {
            0.0
        } else {
            (self.mirror_failures as f64 / attempts as f64) * 100.0
        }
    }
}
