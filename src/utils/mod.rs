//! Utility modules and helper functions
//!
//! File naming, directory helpers and logging setup shared across the crate.

pub mod file_utils;
pub mod logging;

pub use file_utils::*;
pub use logging::*;
