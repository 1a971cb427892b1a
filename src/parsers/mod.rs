//! Input parsing modules
//!
//! Playlist manifests, player pages and CSV batch inputs.

pub mod csv_parser;
pub mod link_resolver;
pub mod m3u8_parser;

pub use csv_parser::*;
pub use link_resolver::*;
pub use m3u8_parser::*;
