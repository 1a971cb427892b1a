//! Core download engine
//!
//! Fetching with retry, bounded dispatch, segment assembly, the resume
//! ledger and the orchestration that ties them into batch runs.

pub mod assembler;
pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod error_handling;
pub mod fetcher;
pub mod ledger;
pub mod models;
pub mod observer;
pub mod orchestrator;

#[cfg(test)]
mod test_server;


// Re-export commonly used types
pub use config::AppConfig;
pub use error_handling::DownloadError;
pub use orchestrator::DownloadOrchestrator;
