//! m3u8 Batch Downloader - Core Library
//!
//! Downloads segmented m3u8 videos with bounded concurrency and retry,
//! assembles them in playlist order and tracks batch progress in a resume
//! ledger so interrupted runs continue where they stopped.

pub mod core;
pub mod parsers;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    assembler::{AssemblyReport, SegmentAssembler},
    batch::{jobs_from_page_index, jobs_from_playlist, BatchRunner, BatchSummary},
    config::{AppConfig, BackendMode, DownloadConfig, LedgerConfig, OverwritePolicy, PathsConfig},
    dispatcher::BoundedDispatcher,
    error_handling::{DownloadError, ErrorCategory},
    fetcher::{HttpTransport, ResponseHandler, RetryingFetcher, Transport, TransportConfig},
    ledger::{LedgerPaths, ResumeLedger, RunOutcome},
    models::{BatchJob, FetchOutcome, FetchRequest, JobState, Manifest, PlaylistRow, SegmentRef},
    observer::{DownloadObserver, TracingObserver},
    orchestrator::{DownloadBackend, DownloadOrchestrator, ExternalTranscoder, LinkSource, SegmentPipeline},
};

pub use parsers::{
    DirectLinkResolver, LinkResolver, ManifestParser, PlayerLinkExtractor, PlayerPageResolver,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging to stderr with default settings
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_tracing(None);
    tracing::info!("{} v{} initialized", NAME, VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        assert!(init().is_ok());
        // Repeated initialization is ignored.
        assert!(init().is_ok());
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "m3u8-batch-downloader");
    }
}
