//! Progress-observer trait for per-fragment processing events.
//!
//! Inject an [`Arc<dyn ProgressObserver>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through a document's fragments.
//!
//! Events for fragments of the same batch may arrive concurrently and in any
//! order; the `index` argument is always the fragment's position in the
//! document.
//!
//! # Example
//!
//! ```rust
//! use edgequake_repurpose::{PipelineConfig, ProgressObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     done: AtomicUsize,
//! }
//!
//! impl ProgressObserver for CountingObserver {
//!     fn on_fragment_complete(&self, index: usize, total: usize, _len: usize, cached: bool) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("fragment {index} ({n}/{total}, cached: {cached})");
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { done: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(observer)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each fragment.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must protect shared mutable state
/// (`Mutex`, atomics); fragment events are emitted from concurrent tasks.
pub trait ProgressObserver: Send + Sync {
    /// Called once after segmentation.
    ///
    /// # Arguments
    /// * `title`           — document title
    /// * `total_fragments` — number of fragments the document was split into
    fn on_document_start(&self, title: &str, total_fragments: usize) {
        let _ = (title, total_fragments);
    }

    /// Called just before a backend request is sent for a fragment.
    fn on_fragment_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when a fragment has output, either fresh or from the cache.
    ///
    /// # Arguments
    /// * `index`      — 0-based fragment index
    /// * `total`      — fragments in the document
    /// * `output_len` — byte length of the produced text
    /// * `cached`     — true when served without a backend call
    fn on_fragment_complete(&self, index: usize, total: usize, output_len: usize, cached: bool) {
        let _ = (index, total, output_len, cached);
    }

    /// Called when a fragment fails after all retries are exhausted.
    fn on_fragment_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called when a fragment is left out of the plan by the budget.
    fn on_fragment_skipped(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called once after assembly.
    ///
    /// # Arguments
    /// * `title`     — document title
    /// * `succeeded` — fragments with output
    /// * `total`     — fragments in the document
    fn on_document_complete(&self, title: &str, succeeded: usize, total: usize) {
        let _ = (title, succeeded, total);
    }
}

/// A no-op observer; the default when none is configured.
pub struct NoopProgressObserver;

impl ProgressObserver for NoopProgressObserver {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn ProgressObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingObserver {
        starts: AtomicUsize,
        completes: AtomicUsize,
        cached: AtomicUsize,
        errors: AtomicUsize,
        skipped: AtomicUsize,
        succeeded: AtomicUsize,
    }

    impl ProgressObserver for TrackingObserver {
        fn on_fragment_start(&self, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_fragment_complete(&self, _index: usize, _total: usize, _len: usize, cached: bool) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            if cached {
                self.cached.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_fragment_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_fragment_skipped(&self, _index: usize, _total: usize) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _title: &str, succeeded: usize, _total: usize) {
            self.succeeded.store(succeeded, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let cb = NoopProgressObserver;
        cb.on_document_start("doc", 3);
        cb.on_fragment_start(0, 3);
        cb.on_fragment_complete(0, 3, 42, false);
        cb.on_fragment_error(1, 3, "timeout");
        cb.on_fragment_skipped(2, 3);
        cb.on_document_complete("doc", 1, 3);
    }

    #[test]
    fn tracking_observer_receives_events() {
        let t = TrackingObserver::default();
        t.on_fragment_complete(0, 4, 10, true);
        t.on_fragment_start(1, 4);
        t.on_fragment_complete(1, 4, 20, false);
        t.on_fragment_start(2, 4);
        t.on_fragment_error(2, 4, "backend down");
        t.on_fragment_skipped(3, 4);
        t.on_document_complete("doc", 2, 4);

        assert_eq!(t.starts.load(Ordering::SeqCst), 2);
        assert_eq!(t.completes.load(Ordering::SeqCst), 2);
        assert_eq!(t.cached.load(Ordering::SeqCst), 1);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
        assert_eq!(t.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(t.succeeded.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressObserver);
        cb.on_document_start("doc", 10);
        cb.on_fragment_complete(0, 10, 512, false);
    }
}
