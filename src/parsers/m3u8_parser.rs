//! M3U8 playlist parsing utilities
//!
//! Only media playlists are accepted. A master playlist would need a
//! variant choice, which the downloader does not make.

use m3u8_rs::Playlist;
use std::path::Path;
use url::Url;

use crate::core::error_handling::DownloadError;
use crate::core::models::Manifest;

#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestParser;

impl ManifestParser {
    /// Parse a downloaded manifest file into its ordered segment list
    pub async fn parse_file(&self, path: &Path) -> Result<Manifest, DownloadError> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| DownloadError::manifest(path, format!("cannot read manifest: {e}")))?;
        self.parse_bytes(&content, path)
    }

    /// Parse manifest content; `origin` only labels errors
    pub fn parse_bytes(&self, content: &[u8], origin: &Path) -> Result<Manifest, DownloadError> {
        match m3u8_rs::parse_playlist_res(content) {
            Ok(Playlist::MediaPlaylist(playlist)) => {
                let manifest =
                    Manifest::from_identifiers(playlist.segments.into_iter().map(|s| s.uri));
                if manifest.is_empty() {
                    return Err(DownloadError::manifest(origin, "playlist has no segments"));
                }
                tracing::debug!("parsed {} segments from {}", manifest.len(), origin.display());
                Ok(manifest)
            }
            Ok(Playlist::MasterPlaylist(_)) => Err(DownloadError::manifest(
                origin,
                "master playlists are not supported, pass a media playlist",
            )),
            Err(e) => Err(DownloadError::manifest(origin, format!("malformed playlist: {e:?}"))),
        }
    }
}

/// Resolve a segment identifier against the manifest URL.
///
/// Absolute identifiers pass through unchanged.
pub fn resolve_segment_url(manifest_url: &str, identifier: &str) -> Result<String, DownloadError> {
    let base = Url::parse(manifest_url).map_err(|e| {
        DownloadError::configuration(format!("invalid manifest URL {manifest_url}: {e}"), "url")
    })?;

    base.join(identifier)
        .map(String::from)
        .map_err(|e| DownloadError::manifest(manifest_url, format!("bad segment URI {identifier}: {e}")))
}
