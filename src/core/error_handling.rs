//! Error taxonomy for the download engine
//!
//! Errors are grouped so callers can tell the difference between failures
//! that are worth another attempt and failures that end a job:
//! - transport and HTTP status failures are retried by the fetcher
//! - exhausted fetches, manifest and assembly errors fail only their job
//! - configuration errors are raised before any I/O happens
//! - ledger I/O errors are raised from `open` and logged everywhere else

use std::path::PathBuf;
use thiserror::Error;

/// Default retry budget used when a non-positive budget is configured
pub const DEFAULT_RETRY_BUDGET: usize = 3;

/// Default number of concurrent segment fetches
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Broad error categories, used for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Network-related errors (DNS, connection, timeout)
    Network,
    /// Protocol-specific errors (HTTP status codes)
    Protocol,
    /// Parsing and format errors
    Parsing,
    /// File system errors (missing segments, permissions)
    FileSystem,
    /// Configuration errors (invalid settings, mismatched inputs)
    Configuration,
    /// Failures of an external process
    ExternalProcess,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("failed to fetch {url} after {attempts} attempts: {last_error}")]
    FetchExhausted {
        url: String,
        attempts: usize,
        last_error: String,
    },

    #[error("manifest error ({}): {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("response handler rejected {url}: {message}")]
    Transform { url: String, message: String },

    #[error("segment {} missing or unreadable ({processed}/{expected} combined)", .segment.display())]
    Assembly {
        segment: PathBuf,
        expected: usize,
        processed: usize,
    },

    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        parameter: Option<String>,
    },

    #[error("ledger I/O error ({}): {source}", .path.display())]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoder failed for {url} after {attempts} attempts (last status: {last_status})")]
    Transcode {
        url: String,
        attempts: usize,
        last_status: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Only single-attempt network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::HttpStatus { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport { .. } | Self::FetchExhausted { .. } => ErrorCategory::Network,
            Self::HttpStatus { .. } => ErrorCategory::Protocol,
            Self::Manifest { .. } | Self::Transform { .. } => ErrorCategory::Parsing,
            Self::Assembly { .. } | Self::LedgerIo { .. } | Self::Io(_) => {
                ErrorCategory::FileSystem
            }
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Transcode { .. } => ErrorCategory::ExternalProcess,
        }
    }

    pub fn configuration(message: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            parameter: Some(parameter.into()),
        }
    }

    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn ledger_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LedgerIo {
            path: path.into(),
            source,
        }
    }
}

/// Normalizes a configured retry budget: zero means "use the default".
pub fn normalize_retry_budget(budget: usize) -> usize {
    if budget == 0 {
        DEFAULT_RETRY_BUDGET
    } else {
        budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_failures_are_retryable() {
        let transport = DownloadError::Transport {
            url: "http://x/a.ts".into(),
            message: "reset".into(),
        };
        let status = DownloadError::HttpStatus {
            url: "http://x/a.ts".into(),
            status: 503,
        };
        let transform = DownloadError::Transform {
            url: "http://x/".into(),
            message: "bad json".into(),
        };

        assert!(transport.is_retryable());
        assert!(status.is_retryable());
        assert!(!transform.is_retryable());
        assert!(!DownloadError::configuration("bad", "concurrency").is_retryable());
    }

    #[test]
    fn test_categories() {
        let err = DownloadError::Assembly {
            segment: PathBuf::from("tmp/b.ts"),
            expected: 3,
            processed: 1,
        };
        assert_eq!(err.category(), ErrorCategory::FileSystem);
        assert!(err.to_string().contains("1/3"));

        let err = DownloadError::manifest("m3u8/x.m3u8", "empty");
        assert_eq!(err.category(), ErrorCategory::Parsing);
    }

    #[test]
    fn test_normalize_retry_budget() {
        assert_eq!(normalize_retry_budget(0), DEFAULT_RETRY_BUDGET);
        assert_eq!(normalize_retry_budget(5), 5);
    }
}
