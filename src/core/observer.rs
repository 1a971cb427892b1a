//! Download event observer
//!
//! Components report what they do through an injected [`DownloadObserver`]
//! instead of a process-wide logger. [`TracingObserver`] forwards every event
//! to `tracing`; tests plug in their own recorder.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

pub trait DownloadObserver: Send + Sync {
    /// A single fetch attempt failed; more attempts may follow.
    fn attempt_failed(&self, index: usize, url: &str, attempt: usize, budget: usize, cause: &str) {
        let _ = (index, url, attempt, budget, cause);
    }

    /// A dispatched request produced its final outcome.
    fn request_finished(&self, index: usize, url: &str, result: Result<&str, &str>) {
        let _ = (index, url, result);
    }

    /// One segment was appended to the output and its temp file removed.
    fn segment_combined(&self, position: usize, total: usize, segment: &Path) {
        let _ = (position, total, segment);
    }

    fn job_skipped(&self, key: &str, reason: &str) {
        let _ = (key, reason);
    }

    fn job_started(&self, key: &str) {
        let _ = key;
    }

    fn job_succeeded(&self, key: &str) {
        let _ = key;
    }

    fn job_failed(&self, key: &str, cause: &str) {
        let _ = (key, cause);
    }
}

/// Observer that writes every event as a `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TracingObserver {
    pub fn shared() -> Arc<dyn DownloadObserver> {
        Arc::new(TracingObserver)
    }
}

impl DownloadObserver for TracingObserver {
    fn attempt_failed(&self, index: usize, url: &str, attempt: usize, budget: usize, cause: &str) {
        warn!(index, url, attempt, budget, "fetch attempt failed: {}", cause);
    }

    fn request_finished(&self, index: usize, url: &str, result: Result<&str, &str>) {
        match result {
            Ok(summary) => info!(index, url, "{}", summary),
            Err(cause) => error!(index, url, "{}", cause),
        }
    }

    fn segment_combined(&self, position: usize, total: usize, segment: &Path) {
        debug!("combined segment {}/{}: {}", position + 1, total, segment.display());
    }

    fn job_skipped(&self, key: &str, reason: &str) {
        info!(key, "job skipped: {}", reason);
    }

    fn job_started(&self, key: &str) {
        info!(key, "job started");
    }

    fn job_succeeded(&self, key: &str) {
        info!(key, "job succeeded");
    }

    fn job_failed(&self, key: &str, cause: &str) {
        error!(key, "job failed: {}", cause);
    }
}
