//! Core data models for the batch downloader

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::utils::file_utils::sanitize_component;

/// 单个抓取请求
///
/// Immutable once handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// 批次内的稳定编号
    pub index: usize,
    /// 请求地址
    pub url: String,
    /// 本地保存路径，`None` 表示文本请求
    pub destination: Option<PathBuf>,
    /// 请求头
    pub headers: HashMap<String, String>,
    /// 代理地址
    pub proxy: Option<String>,
}

impl FetchRequest {
    /// Text request kept in memory.
    pub fn text(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
            destination: None,
            headers: HashMap::new(),
            proxy: None,
        }
    }

    /// Streamed download into `destination`.
    pub fn download(index: usize, url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            index,
            url: url.into(),
            destination: Some(destination.into()),
            headers: HashMap::new(),
            proxy: None,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Result of one dispatched request. Every request yields exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Success(T),
    Failure(String),
}

impl<T> FetchOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            FetchOutcome::Success(value) => Some(value),
            FetchOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            FetchOutcome::Success(_) => None,
            FetchOutcome::Failure(cause) => Some(cause),
        }
    }
}

/// 播放列表中的一个片段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRef {
    /// 在播放列表中的位置
    pub position: usize,
    /// 片段标识（相对路径或完整 URL）
    pub identifier: String,
}

impl SegmentRef {
    pub fn new(position: usize, identifier: impl Into<String>) -> Self {
        Self {
            position,
            identifier: identifier.into(),
        }
    }

    /// Local file name of this segment inside a job's segment directory.
    ///
    /// Only the last path component of the identifier is kept (query strings
    /// dropped); the position prefix keeps repeated identifiers apart.
    pub fn file_name(&self) -> String {
        let without_query = self
            .identifier
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let base = without_query
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or("segment.ts");
        format!("{:05}-{}", self.position, sanitize_component(base))
    }
}

/// Ordered segment list. Order is playback order and is never changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub segments: Vec<SegmentRef>,
}

impl Manifest {
    pub fn from_identifiers<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = identifiers
            .into_iter()
            .enumerate()
            .map(|(position, id)| SegmentRef::new(position, id))
            .collect();
        Self { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentRef> {
        self.segments.iter()
    }
}

/// Job state enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobState {
    Pending,

    InProgress,

    Succeeded,

    Failed,
}

/// One top-level unit of work, identified by its idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    /// Source URL or playlist row id
    pub key: String,

    /// Output name without extension
    pub name: String,

    pub state: JobState,
}

impl BatchJob {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            state: JobState::Pending,
        }
    }
}

/// Row of the CSV playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRow {
    #[serde(rename = "subject_Name")]
    pub subject: String,

    #[serde(rename = "videoLength")]
    pub length: String,

    #[serde(rename = "videoName")]
    pub name: String,

    #[serde(rename = "parentCode")]
    pub parent_code: String,

    #[serde(rename = "videoCode")]
    pub video_code: String,

    #[serde(rename = "updateTime")]
    pub update_time: String,

    #[serde(rename = "orderNum")]
    pub order_num: String,
}

impl PlaylistRow {
    /// Manifest location of this row under `base` (which ends with `/`).
    pub fn manifest_url(&self, base: &str) -> String {
        format!(
            "{}{}/{}/index.m3u8",
            base, self.parent_code, self.video_code
        )
    }
}

/// Row of a page index CSV: a display name and a page link relative to a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageIndexRow {
    pub name: String,
    pub link: String,
}
