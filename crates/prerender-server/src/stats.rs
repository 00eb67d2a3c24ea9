//! Per-request render statistics.
//!
//! Every render carries a [`RequestStats`] record. The fetch path counts
//! package fetches and cache hits, the context factory records the sandbox
//! size, and the orchestrator emits the whole record as a stable log line at
//! response completion:
//!
//! ```text
//! render-stats for <entry-url>: {"pendingRenderRequests":1,...}
//! ```
//!
//! The pending-render gauge is process-global: incremented on request entry,
//! decremented on response finish, success and error paths alike.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Process-global gauge of currently running renders.
#[derive(Debug, Default)]
pub struct PendingRenders {
    count: AtomicI64,
}

impl PendingRenders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Enters a render: bumps the gauge and returns a guard that restores it
    /// on drop, which covers every exit path of the orchestrator including
    /// cancellation.
    pub fn enter(self: &Arc<Self>) -> PendingGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        PendingGuard {
            gauge: Arc::clone(self),
        }
    }
}

/// Guard that decrements the pending-render gauge when dropped.
pub struct PendingGuard {
    gauge: Arc<PendingRenders>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.gauge.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counters for one render request.
///
/// Fields are atomic so the record can be shared with sandbox bindings that
/// trigger fetches mid-render.
#[derive(Debug)]
pub struct RequestStats {
    /// Value of the pending gauge when this request entered (includes self)
    pending_render_requests: i64,
    package_fetches: AtomicU64,
    from_cache: AtomicU64,
    vm_context_size: AtomicU64,
    created_vm_context: AtomicBool,
}

impl RequestStats {
    pub fn new(pending_render_requests: i64) -> Self {
        Self {
            pending_render_requests,
            package_fetches: AtomicU64::new(0),
            from_cache: AtomicU64::new(0),
            vm_context_size: AtomicU64::new(0),
            created_vm_context: AtomicBool::new(false),
        }
    }

    pub fn record_package_fetch(&self) {
        self.package_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.from_cache.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vm_context(&self, size_bytes: u64) {
        self.created_vm_context.store(true, Ordering::Relaxed);
        self.vm_context_size.store(size_bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pending_render_requests: self.pending_render_requests,
            package_fetches: self.package_fetches.load(Ordering::Relaxed),
            from_cache: self.from_cache.load(Ordering::Relaxed),
            vm_context_size: self.vm_context_size.load(Ordering::Relaxed),
            created_vm_context: self.created_vm_context.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of [`RequestStats`], in the wire casing the stats
/// log line uses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub pending_render_requests: i64,
    pub package_fetches: u64,
    pub from_cache: u64,
    pub vm_context_size: u64,
    pub created_vm_context: bool,
}
