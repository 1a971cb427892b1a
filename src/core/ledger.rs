//! 断点续传账本
//!
//! 以三个纯文本文件记录批处理进度：
//! - 成功日志：每个成功的 key 追加一行
//! - 失败日志：每个失败的 key 追加一行
//! - 当前指针：最近一次成功的 key，每次成功时整体覆盖
//!
//! 重新启动时先快进跳过指针之前的 key，再重试上一轮失败的 key，
//! 到达指针之后恢复正常执行。

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::core::error_handling::DownloadError;
use crate::core::observer::{DownloadObserver, TracingObserver};

/// 账本文件位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPaths {
    pub success_log: PathBuf,
    pub error_log: PathBuf,
    pub current_log: PathBuf,
}

impl LedgerPaths {
    /// `downloaded.log`, `errors.log` and `current.log` under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            success_log: dir.join("downloaded.log"),
            error_log: dir.join("errors.log"),
            current_log: dir.join("current.log"),
        }
    }

    fn all(&self) -> [&Path; 3] {
        [&self.success_log, &self.error_log, &self.current_log]
    }
}

/// What `run` did with a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Key is on the skip list
    Skipped,
    /// Key precedes the resume point of a previous run
    FastForwarded,
    /// Key is the resume point itself; it was completed in a previous run
    CaughtUp,
    Succeeded,
    Failed,
}

impl RunOutcome {
    pub fn executed(&self) -> bool {
        matches!(self, RunOutcome::Succeeded | RunOutcome::Failed)
    }
}

pub struct ResumeLedger {
    paths: LedgerPaths,
    current: String,
    failed: HashSet<String>,
    skip: HashSet<String>,
    caught_up: bool,
    success_log: Option<File>,
    error_log: Option<File>,
    observer: Arc<dyn DownloadObserver>,
}

/// Rejects keys that would break the one-key-per-line log format.
pub fn validate_key(key: &str) -> Result<(), DownloadError> {
    if key.contains(['\n', '\r']) {
        return Err(DownloadError::configuration(
            format!("ledger key must not contain a line break: {key:?}"),
            "key",
        ));
    }
    Ok(())
}

impl ResumeLedger {
    /// 打开账本
    ///
    /// `explicit_current` 不为空时覆盖已保存的指针；否则读取指针文件首行。
    /// 存在指针时才加载失败日志，已出现在成功日志中的 key 不再视为失败。
    pub async fn open(
        paths: LedgerPaths,
        explicit_current: Option<String>,
        skip_keys: impl IntoIterator<Item = String>,
    ) -> Result<Self, DownloadError> {
        let skip: HashSet<String> = skip_keys.into_iter().collect();
        for key in skip.iter().chain(explicit_current.iter()) {
            validate_key(key)?;
        }

        for path in paths.all() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DownloadError::ledger_io(parent, e))?;
            }
        }

        // Create without truncating.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.current_log)
            .await
            .map_err(|e| DownloadError::ledger_io(&paths.current_log, e))?;

        let current = match explicit_current.filter(|c| !c.is_empty()) {
            Some(current) => {
                write_current(&paths.current_log, &current).await?;
                current
            }
            None => read_lines(&paths.current_log)
                .await?
                .into_iter()
                .next()
                .unwrap_or_default(),
        };

        // A key that failed once and succeeded later is done.
        let failed: HashSet<String> = if current.is_empty() {
            HashSet::new()
        } else {
            let succeeded: HashSet<String> =
                read_lines(&paths.success_log).await?.into_iter().collect();
            read_lines(&paths.error_log)
                .await?
                .into_iter()
                .filter(|key| !succeeded.contains(key))
                .collect()
        };

        let success_log = open_append(&paths.success_log).await?;
        let error_log = open_append(&paths.error_log).await?;

        tracing::info!(
            "ledger opened (current: {:?}, {} failed, {} skipped)",
            current,
            failed.len(),
            skip.len()
        );

        Ok(Self {
            paths,
            current,
            failed,
            skip,
            caught_up: false,
            success_log: Some(success_log),
            error_log: Some(error_log),
            observer: TracingObserver::shared(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn DownloadObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Resume point: the furthest completed key, empty when none
    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn is_failed(&self, key: &str) -> bool {
        self.failed.contains(key)
    }

    pub fn paths(&self) -> &LedgerPaths {
        &self.paths
    }

    /// Runs `work` for `key` unless the ledger says it must be skipped.
    ///
    /// A failing job (`Ok(false)` or `Err`) is recorded and reported as
    /// [`RunOutcome::Failed`]; it never aborts the batch. The only error
    /// returned is a key that cannot be stored.
    pub async fn run<F, Fut>(&mut self, key: &str, work: F) -> Result<RunOutcome, DownloadError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = anyhow::Result<bool>>,
    {
        validate_key(key)?;

        if self.skip.contains(key) {
            self.observer.job_skipped(key, "on skip list");
            return Ok(RunOutcome::Skipped);
        }

        if !(self.caught_up || self.failed.contains(key)) {
            if self.current.is_empty() {
                self.caught_up = true;
            } else if key != self.current {
                self.observer.job_skipped(key, "before resume point");
                return Ok(RunOutcome::FastForwarded);
            } else {
                self.caught_up = true;
                self.observer.job_skipped(key, "completed in a previous run");
                return Ok(RunOutcome::CaughtUp);
            }
        }

        self.observer.job_started(key);
        let result = work(key.to_string()).await;
        match result {
            Ok(true) => {
                self.record_success(key).await;
                self.observer.job_succeeded(key);
                Ok(RunOutcome::Succeeded)
            }
            Ok(false) => {
                self.record_failure(key, "job reported failure").await;
                Ok(RunOutcome::Failed)
            }
            Err(e) => {
                self.record_failure(key, &format!("{e:#}")).await;
                Ok(RunOutcome::Failed)
            }
        }
    }

    async fn record_success(&mut self, key: &str) {
        // A failed key retried before the resume point must not move the
        // cursor back; the resume point stays the furthest completed key.
        if self.caught_up {
            if let Err(e) = write_current(&self.paths.current_log, key).await {
                tracing::error!("{}", e);
            }
            self.current = key.to_string();
        }
        self.failed.remove(key);
        append_key(self.success_log.as_mut(), &self.paths.success_log, key).await;
    }

    async fn record_failure(&mut self, key: &str, cause: &str) {
        self.observer.job_failed(key, cause);
        self.failed.insert(key.to_string());
        append_key(self.error_log.as_mut(), &self.paths.error_log, key).await;
    }

    /// Flushes and closes both logs. Errors are logged, never raised.
    pub async fn close(&mut self) {
        for (file, path) in [
            (self.success_log.take(), &self.paths.success_log),
            (self.error_log.take(), &self.paths.error_log),
        ] {
            if let Some(mut file) = file {
                if let Err(e) = file.flush().await {
                    tracing::error!("failed to flush {}: {}", path.display(), e);
                }
                if let Err(e) = file.sync_all().await {
                    tracing::debug!("failed to sync {}: {}", path.display(), e);
                }
            }
        }
    }
}

async fn open_append(path: &Path) -> Result<File, DownloadError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| DownloadError::ledger_io(path, e))
}

async fn read_lines(path: &Path) -> Result<Vec<String>, DownloadError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(DownloadError::ledger_io(path, e)),
    }
}

async fn write_current(path: &Path, key: &str) -> Result<(), DownloadError> {
    tokio::fs::write(path, key)
        .await
        .map_err(|e| DownloadError::ledger_io(path, e))
}

async fn append_key(file: Option<&mut File>, path: &Path, key: &str) {
    let Some(file) = file else {
        tracing::error!("{} already closed, dropping key {}", path.display(), key);
        return;
    };
    let line = format!("{key}\n");
    let result = async {
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = result {
        tracing::error!("failed to append to {}: {}", path.display(), e);
    }
}
