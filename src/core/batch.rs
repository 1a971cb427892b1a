//! 批量下载
//!
//! 每个任务以来源地址为 key，经由断点续传账本逐个执行。
//! 单个任务失败只记录，不会中断整个批次。

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;

use crate::core::config::{LedgerConfig, OverwritePolicy};
use crate::core::error_handling::DownloadError;
use crate::core::ledger::{ResumeLedger, RunOutcome};
use crate::core::models::{BatchJob, JobState, PageIndexRow, PlaylistRow};
use crate::core::observer::{DownloadObserver, TracingObserver};
use crate::core::orchestrator::DownloadOrchestrator;

/// 批次统计
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Keys on the skip list
    pub skipped: usize,
    /// Keys completed in a previous run
    pub resumed: usize,
    pub failed_keys: Vec<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl BatchSummary {
    fn new(total: usize) -> Self {
        let now = Local::now();
        Self {
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            resumed: 0,
            failed_keys: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Jobs for playlist rows, keyed by their manifest URL under `base`
pub fn jobs_from_playlist(rows: &[PlaylistRow], base: &str) -> Vec<BatchJob> {
    rows.iter()
        .map(|row| BatchJob::new(row.manifest_url(base), row.name.clone()))
        .collect()
}

/// Jobs for page index rows, keyed by `{site_base}{link}`
pub fn jobs_from_page_index(rows: &[PageIndexRow], site_base: &str) -> Vec<BatchJob> {
    rows.iter()
        .map(|row| BatchJob::new(format!("{}{}", site_base, row.link), row.name.clone()))
        .collect()
}

pub struct BatchRunner {
    orchestrator: Arc<DownloadOrchestrator>,
    ledger: LedgerConfig,
    observer: Arc<dyn DownloadObserver>,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<DownloadOrchestrator>, ledger: LedgerConfig) -> Self {
        Self {
            orchestrator,
            ledger,
            observer: TracingObserver::shared(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DownloadObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Runs `jobs` one after another through the resume ledger.
    ///
    /// A key that failed in an earlier run is retried with overwrite enabled,
    /// so its partial output does not count as done.
    pub async fn run(&self, jobs: &mut [BatchJob]) -> Result<BatchSummary, DownloadError> {
        let mut ledger = ResumeLedger::open(
            self.ledger.paths(),
            self.ledger.current.clone(),
            self.ledger.skip_keys.iter().cloned(),
        )
        .await?
        .with_observer(Arc::clone(&self.observer));

        let summary = self.run_jobs(&mut ledger, jobs).await;
        ledger.close().await;

        tracing::info!(
            "batch finished: {} succeeded, {} failed, {} skipped, {} resumed of {} in {}s",
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.resumed,
            summary.total,
            summary.elapsed().num_seconds()
        );
        Ok(summary)
    }

    async fn run_jobs(
        &self,
        ledger: &mut ResumeLedger,
        jobs: &mut [BatchJob],
    ) -> BatchSummary {
        let mut summary = BatchSummary::new(jobs.len());

        for job in jobs.iter_mut() {
            let overwrite = if ledger.is_failed(&job.key) {
                OverwritePolicy::Overwrite
            } else {
                self.orchestrator.overwrite_policy()
            };
            let orchestrator = self.orchestrator.as_ref();
            let name = job.name.clone();

            job.state = JobState::InProgress;
            let result = ledger
                .run(&job.key, move |key| async move {
                    orchestrator
                        .download_one_with(&key, &name, overwrite)
                        .await
                        .map(|_| true)
                        .map_err(anyhow::Error::from)
                })
                .await;
            // Only a key the ledger cannot store ends up here; it is not
            // written to the error log.
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.observer.job_failed(&job.key, &e.to_string());
                    RunOutcome::Failed
                }
            };

            job.state = match outcome {
                RunOutcome::Succeeded => {
                    summary.succeeded += 1;
                    JobState::Succeeded
                }
                RunOutcome::Failed => {
                    summary.failed += 1;
                    summary.failed_keys.push(job.key.clone());
                    JobState::Failed
                }
                RunOutcome::FastForwarded | RunOutcome::CaughtUp => {
                    summary.resumed += 1;
                    JobState::Succeeded
                }
                RunOutcome::Skipped => {
                    summary.skipped += 1;
                    JobState::Pending
                }
            };
        }

        summary.finished_at = Local::now();
        summary
    }
}
