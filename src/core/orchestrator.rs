//! 单个视频的下载编排
//!
//! 流程：
//! - 检查工作目录与输出文件（不允许覆盖时直接跳过已存在的文件）
//! - 通过链接解析器得到 m3u8 地址
//! - 交给下载后端：内置分片流水线（aio）或外部转码进程（ff）

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::core::assembler::SegmentAssembler;
use crate::core::config::{AppConfig, BackendMode, OverwritePolicy, PathsConfig};
use crate::core::dispatcher::BoundedDispatcher;
use crate::core::error_handling::{normalize_retry_budget, DownloadError};
use crate::core::fetcher::{HttpTransport, RetryingFetcher};
use crate::core::models::{FetchRequest, Manifest};
use crate::core::observer::{DownloadObserver, TracingObserver};
use crate::parsers::link_resolver::{DirectLinkResolver, LinkResolver, PlayerPageResolver};
use crate::parsers::m3u8_parser::{resolve_segment_url, ManifestParser};
use crate::utils::file_utils::{sanitize_component, sanitize_filename};

/// Fetch and assembly of one resolved manifest
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Downloads `manifest_url` into `output` and returns the path written.
    async fn fetch(
        &self,
        manifest_url: &str,
        name: &str,
        output: &Path,
        headers: &HashMap<String, String>,
        overwrite: OverwritePolicy,
    ) -> Result<PathBuf, DownloadError>;
}

/// 内置分片流水线
pub struct SegmentPipeline {
    dispatcher: BoundedDispatcher,
    parser: ManifestParser,
    assembler: SegmentAssembler,
    m3u8_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl SegmentPipeline {
    pub fn new(dispatcher: BoundedDispatcher, m3u8_dir: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        let assembler = SegmentAssembler::default().with_observer(dispatcher.fetcher().observer());
        Self {
            dispatcher,
            parser: ManifestParser,
            assembler,
            m3u8_dir: m3u8_dir.into(),
            tmp_dir: tmp_dir.into(),
        }
    }

    /// Segment directory of the job named `name`
    pub fn job_dir(&self, name: &str) -> PathBuf {
        self.tmp_dir.join(sanitize_component(name))
    }

    async fn download_segments(
        &self,
        manifest_url: &str,
        name: &str,
        job_dir: &Path,
        headers: &HashMap<String, String>,
    ) -> Result<Manifest, DownloadError> {
        let manifest_path =
            sanitize_filename(&self.m3u8_dir.join(format!("{}.m3u8", sanitize_component(name))));
        let request = FetchRequest::download(0, manifest_url, &manifest_path).with_headers(headers.clone());
        self.dispatcher.fetcher().download(&request, &manifest_path).await?;
        let manifest = self.parser.parse_file(&manifest_path).await?;

        let urls = manifest
            .iter()
            .map(|segment| resolve_segment_url(manifest_url, &segment.identifier))
            .collect::<Result<Vec<_>, _>>()?;
        let destinations: Vec<PathBuf> = manifest
            .iter()
            .map(|segment| job_dir.join(segment.file_name()))
            .collect();

        tokio::fs::create_dir_all(job_dir).await?;
        tracing::info!(
            "downloading {} segments of {} with concurrency {}",
            urls.len(),
            name,
            self.dispatcher.concurrency()
        );
        let outcomes = self
            .dispatcher
            .download_all(&urls, &destinations, headers, None)
            .await?;

        let failed: Vec<(usize, &str)> = outcomes
            .iter()
            .filter_map(|(index, outcome)| outcome.failure().map(|cause| (*index, cause)))
            .collect();
        if let Some((index, cause)) = failed.first() {
            return Err(DownloadError::FetchExhausted {
                url: urls[*index].clone(),
                attempts: self.dispatcher.fetcher().retry_budget(),
                last_error: format!("{} ({} of {} segments failed)", cause, failed.len(), urls.len()),
            });
        }
        Ok(manifest)
    }
}

#[async_trait]
impl DownloadBackend for SegmentPipeline {
    fn name(&self) -> &'static str {
        "aio"
    }

    async fn fetch(
        &self,
        manifest_url: &str,
        name: &str,
        output: &Path,
        headers: &HashMap<String, String>,
        _overwrite: OverwritePolicy,
    ) -> Result<PathBuf, DownloadError> {
        let job_dir = self.job_dir(name);
        let result = match self.download_segments(manifest_url, name, &job_dir, headers).await {
            Ok(manifest) => self
                .assembler
                .combine(&manifest, &job_dir, output)
                .await
                .map(|report| report.output),
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove {}: {}", job_dir.display(), e);
            }
        }
        result
    }
}

/// 外部转码进程后端
pub struct ExternalTranscoder {
    program: String,
    retry_budget: usize,
    observer: Arc<dyn DownloadObserver>,
}

impl ExternalTranscoder {
    pub fn new(program: impl Into<String>, retry_budget: usize) -> Self {
        Self {
            program: program.into(),
            retry_budget: normalize_retry_budget(retry_budget),
            observer: TracingObserver::shared(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DownloadObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Command line arguments for one invocation
    pub fn arguments(
        &self,
        manifest_url: &str,
        output: &Path,
        headers: &HashMap<String, String>,
        overwrite: OverwritePolicy,
    ) -> Vec<String> {
        let mut args = vec![if overwrite.allows_overwrite() { "-y" } else { "-n" }.to_string()];
        if !headers.is_empty() {
            let mut pairs: Vec<String> = headers.iter().map(|(k, v)| format!("{k}:{v}")).collect();
            pairs.sort();
            args.push("-headers".to_string());
            args.push(pairs.join("\r\n"));
        }
        args.extend([
            "-i".to_string(),
            manifest_url.to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.to_string_lossy().into_owned(),
        ]);
        args
    }
}

#[async_trait]
impl DownloadBackend for ExternalTranscoder {
    fn name(&self) -> &'static str {
        "ff"
    }

    async fn fetch(
        &self,
        manifest_url: &str,
        _name: &str,
        output: &Path,
        headers: &HashMap<String, String>,
        overwrite: OverwritePolicy,
    ) -> Result<PathBuf, DownloadError> {
        let args = self.arguments(manifest_url, output, headers, overwrite);
        let mut last_status = String::new();

        for attempt in 1..=self.retry_budget {
            let result = Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .await;

            match result {
                Ok(out) if out.status.success() => return Ok(output.to_path_buf()),
                Ok(out) => {
                    last_status = out.status.to_string();
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    if let Some(line) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                        tracing::debug!("{}: {}", self.program, line);
                    }
                }
                Err(e) => last_status = e.to_string(),
            }
            self.observer
                .attempt_failed(0, manifest_url, attempt, self.retry_budget, &last_status);
        }

        Err(DownloadError::Transcode {
            url: manifest_url.to_string(),
            attempts: self.retry_budget,
            last_status,
        })
    }
}

/// Where the source URL of a job points to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSource {
    /// A player page holding the manifest URL
    Page,
    /// The manifest itself
    Direct,
}

pub struct DownloadOrchestrator {
    resolver: Arc<dyn LinkResolver>,
    backend: Arc<dyn DownloadBackend>,
    paths: PathsConfig,
    headers: HashMap<String, String>,
    overwrite: OverwritePolicy,
}

impl DownloadOrchestrator {
    pub fn new(
        resolver: Arc<dyn LinkResolver>,
        backend: Arc<dyn DownloadBackend>,
        paths: PathsConfig,
        headers: HashMap<String, String>,
        overwrite: OverwritePolicy,
    ) -> Self {
        Self {
            resolver,
            backend,
            paths,
            headers,
            overwrite,
        }
    }

    /// Wires the HTTP stack, the resolver and the configured backend.
    pub fn from_config(
        config: &AppConfig,
        source: LinkSource,
        observer: Arc<dyn DownloadObserver>,
    ) -> Result<Self, DownloadError> {
        config.validate()?;
        let download = &config.download;
        let transport = Arc::new(HttpTransport::new(download.transport_config())?);
        let fetcher = RetryingFetcher::new(transport, download.retry_budget())
            .with_observer(Arc::clone(&observer));

        let resolver: Arc<dyn LinkResolver> = match source {
            LinkSource::Page => Arc::new(PlayerPageResolver::new(fetcher.clone())?),
            LinkSource::Direct => Arc::new(DirectLinkResolver),
        };
        let backend: Arc<dyn DownloadBackend> = match config.mode {
            BackendMode::Aio => Arc::new(SegmentPipeline::new(
                BoundedDispatcher::new(fetcher, download.concurrency)?,
                &config.paths.m3u8_dir,
                &config.paths.tmp_dir,
            )),
            BackendMode::Ff => Arc::new(
                ExternalTranscoder::new(&download.transcoder_program, download.retry_budget())
                    .with_observer(observer),
            ),
        };

        Ok(Self::new(
            resolver,
            backend,
            config.paths.clone(),
            download.headers.clone(),
            download.overwrite,
        ))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn overwrite_policy(&self) -> OverwritePolicy {
        self.overwrite
    }

    /// Final output path of the job named `name`
    pub fn output_path(&self, name: &str) -> PathBuf {
        SegmentAssembler::output_path(
            &self
                .paths
                .videos_dir
                .join(format!("{}.ts", sanitize_component(name))),
        )
    }

    /// Downloads one video with the configured overwrite policy.
    ///
    /// Returns the output path and whether anything was downloaded.
    pub async fn download_one(&self, source_url: &str, name: &str) -> Result<(PathBuf, bool), DownloadError> {
        self.download_one_with(source_url, name, self.overwrite).await
    }

    pub async fn download_one_with(
        &self,
        source_url: &str,
        name: &str,
        overwrite: OverwritePolicy,
    ) -> Result<(PathBuf, bool), DownloadError> {
        for dir in [&self.paths.m3u8_dir, &self.paths.tmp_dir, &self.paths.videos_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let output = self.output_path(name);
        if !overwrite.allows_overwrite() && output.exists() {
            tracing::info!("{} already exists, skipped", output.display());
            return Ok((output, false));
        }

        let link = self
            .resolver
            .resolve(source_url, &self.headers)
            .await?
            .ok_or_else(|| DownloadError::manifest(source_url, "cannot get m3u8 link from page"))?;

        let written = self
            .backend
            .fetch(&link, name, &output, &self.headers, overwrite)
            .await?;
        tracing::info!("downloaded {} from {}", written.display(), source_url);
        Ok((written, true))
    }
}
