//! Memory accounting hooks.
//!
//! Every allocation and release inside the arena and the staging buffers
//! reports its byte delta through [`AllocationTracker`]. Summation, limits,
//! and enforcement live with the caller; the builder only reports.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for observing memory allocated and released during a build.
///
/// Implementations must be cheap: the hooks are called on every page
/// allocation and every staging-buffer growth or release.
pub trait AllocationTracker: Send + Sync {
    /// Records `bytes` newly allocated.
    fn on_alloc(&self, bytes: u64);

    /// Records `bytes` released.
    fn on_free(&self, bytes: u64);
}

/// A no-op implementation of [`AllocationTracker`] that discards all deltas.
#[derive(Default)]
pub struct NoopTracker;

impl AllocationTracker for NoopTracker {
    fn on_alloc(&self, _bytes: u64) {}
    fn on_free(&self, _bytes: u64) {}
}

/// A thread-safe counter-based implementation of [`AllocationTracker`].
#[derive(Default)]
pub struct CountingTracker {
    /// Total bytes allocated over the lifetime of the build.
    pub allocated: AtomicU64,

    /// Total bytes released over the lifetime of the build.
    pub freed: AtomicU64,

    /// High-water mark of bytes in use, best-effort under concurrency.
    pub peak: AtomicU64,
}

impl CountingTracker {
    /// Bytes currently held, i.e. allocated minus freed.
    pub fn in_use(&self) -> u64 {
        self.allocated
            .load(Ordering::Relaxed)
            .saturating_sub(self.freed.load(Ordering::Relaxed))
    }

    /// Highest observed [`in_use`](Self::in_use) value.
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }
}

impl AllocationTracker for CountingTracker {
    fn on_alloc(&self, bytes: u64) {
        let allocated = self.allocated.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let in_use = allocated.saturating_sub(self.freed.load(Ordering::Relaxed));
        self.peak.fetch_max(in_use, Ordering::Relaxed);
    }

    fn on_free(&self, bytes: u64) {
        self.freed.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Returns the default tracker wrapped in an [`Arc`].
///
/// The default is [`NoopTracker`], which has zero overhead.
pub fn default_tracker() -> Arc<dyn AllocationTracker> {
    Arc::new(NoopTracker)
}
