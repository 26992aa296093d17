//! Run metrics tracking
//!
//! Thread-safe counters for reap operations, shared across bucket reapers
//! via atomic counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Thread-safe metrics for one reap run
#[derive(Debug, Clone)]
pub struct ReaperMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    buckets_started: AtomicUsize,
    buckets_completed: AtomicUsize,
    buckets_failed: AtomicUsize,
    uploads_listed: AtomicU64,
    aborts_attempted: AtomicUsize,
    aborts_succeeded: AtomicUsize,
    aborts_already_gone: AtomicUsize,
    aborts_failed: AtomicUsize,
    retries_attempted: AtomicUsize,
}

impl Default for ReaperMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaperMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                buckets_started: AtomicUsize::new(0),
                buckets_completed: AtomicUsize::new(0),
                buckets_failed: AtomicUsize::new(0),
                uploads_listed: AtomicU64::new(0),
                aborts_attempted: AtomicUsize::new(0),
                aborts_succeeded: AtomicUsize::new(0),
                aborts_already_gone: AtomicUsize::new(0),
                aborts_failed: AtomicUsize::new(0),
                retries_attempted: AtomicUsize::new(0),
            }),
        }
    }

    pub fn record_bucket_start(&self) {
        self.inner.buckets_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bucket_complete(&self) {
        self.inner.buckets_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bucket_failure(&self) {
        self.inner.buckets_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload_listed(&self) {
        self.inner.uploads_listed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort_attempt(&self) {
        self.inner.aborts_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort_success(&self) {
        self.inner.aborts_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_already_gone(&self) {
        self.inner
            .aborts_already_gone
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort_failure(&self) {
        self.inner.aborts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, count: u32) {
        if count > 0 {
            self.inner
                .retries_attempted
                .fetch_add(count as usize, Ordering::Relaxed);
        }
    }

    pub fn aborts_attempted(&self) -> usize {
        self.inner.aborts_attempted.load(Ordering::Relaxed)
    }

    pub fn aborts_succeeded(&self) -> usize {
        self.inner.aborts_succeeded.load(Ordering::Relaxed)
    }

    pub fn retries_attempted(&self) -> usize {
        self.inner.retries_attempted.load(Ordering::Relaxed)
    }

    /// Snapshot of all counters
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            buckets_started: self.inner.buckets_started.load(Ordering::Relaxed),
            buckets_completed: self.inner.buckets_completed.load(Ordering::Relaxed),
            buckets_failed: self.inner.buckets_failed.load(Ordering::Relaxed),
            uploads_listed: self.inner.uploads_listed.load(Ordering::Relaxed),
            aborts_attempted: self.inner.aborts_attempted.load(Ordering::Relaxed),
            aborts_succeeded: self.inner.aborts_succeeded.load(Ordering::Relaxed),
            aborts_already_gone: self.inner.aborts_already_gone.load(Ordering::Relaxed),
            aborts_failed: self.inner.aborts_failed.load(Ordering::Relaxed),
            retries_attempted: self.inner.retries_attempted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of run metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub buckets_started: usize,
    pub buckets_completed: usize,
    pub buckets_failed: usize,
    pub uploads_listed: u64,
    pub aborts_attempted: usize,
    pub aborts_succeeded: usize,
    pub aborts_already_gone: usize,
    pub aborts_failed: usize,
    pub retries_attempted: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        tracing::info!(
            buckets_started = self.buckets_started,
            buckets_completed = self.buckets_completed,
            buckets_failed = self.buckets_failed,
            uploads_listed = self.uploads_listed,
            aborts_attempted = self.aborts_attempted,
            aborts_succeeded = self.aborts_succeeded,
            aborts_already_gone = self.aborts_already_gone,
            aborts_failed = self.aborts_failed,
            retries_attempted = self.retries_attempted,
            "run metrics"
        );
    }
}
