//! CSV parsing utilities
//!
//! Two inputs drive a batch:
//! - playlist exports with the `subject_Name,videoLength,videoName,...` header
//! - page indexes with `name,_,link` rows, links relative to a site

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Writer};
use std::io::Read;
use std::path::Path;

use crate::core::models::{PageIndexRow, PlaylistRow};

/// Read playlist rows from any reader
pub fn parse_playlist_from_reader<R: Read>(reader: R) -> Result<Vec<PlaylistRow>> {
    let mut csv_reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::new();

    for (line, result) in csv_reader.deserialize().enumerate() {
        let row: PlaylistRow = result.with_context(|| format!("Invalid playlist row {}", line + 1))?;
        rows.push(row);
    }

    Ok(rows)
}

pub fn read_playlist(path: &Path) -> Result<Vec<PlaylistRow>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open playlist: {:?}", path))?;
    let rows = parse_playlist_from_reader(file)?;
    tracing::info!("Read {} playlist rows from {:?}", rows.len(), path);
    Ok(rows)
}

/// Write playlist rows with the standard header, replacing `path`
pub fn write_playlist(path: &Path, rows: &[PlaylistRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    let mut writer =
        Writer::from_path(path).with_context(|| format!("Failed to create playlist: {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a page index; the header row is skipped and the middle column ignored
pub fn parse_page_index_from_reader<R: Read>(reader: R) -> Result<Vec<PageIndexRow>> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let mut rows = Vec::new();

    for (line, result) in csv_reader.records().enumerate() {
        let record = result.with_context(|| format!("Invalid page index row {}", line + 1))?;
        let (Some(name), Some(link)) = (record.get(0), record.get(2)) else {
            tracing::warn!("Skipping page index row {}: expected 3 columns", line + 1);
            continue;
        };
        rows.push(PageIndexRow {
            name: name.trim().to_string(),
            link: link.trim().to_string(),
        });
    }

    Ok(rows)
}

pub fn read_page_index(path: &Path) -> Result<Vec<PageIndexRow>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open page index: {:?}", path))?;
    parse_page_index_from_reader(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PLAYLIST: &str = "subject_Name,videoLength,videoName,parentCode,videoCode,updateTime,orderNum\n\
math,10:00,lesson 1,p01,v01,2022-01-01,1\n\
math, 12:30 ,lesson 2,p01,v02,2022-01-02,2\n";

    #[test]
    fn test_parse_playlist() {
        let rows = parse_playlist_from_reader(PLAYLIST.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "lesson 1");
        assert_eq!(rows[1].length, "12:30");
        assert_eq!(rows[1].video_code, "v02");
    }

    #[test]
    fn test_playlist_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/playlist.csv");
        let rows = parse_playlist_from_reader(PLAYLIST.as_bytes()).unwrap();

        write_playlist(&path, &rows).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with(
            "subject_Name,videoLength,videoName,parentCode,videoCode,updateTime,orderNum"
        ));
        assert_eq!(read_playlist(&path).unwrap(), rows);
    }

    #[test]
    fn test_missing_column_rejected() {
        let broken = "subject_Name,videoName\nmath,lesson\n";
        assert!(parse_playlist_from_reader(broken.as_bytes()).is_err());
    }

    #[test]
    fn test_parse_page_index() {
        let index = "name,_,link\n\
第1集,x,/vod/play/id/1/sid/1/nid/1.html\n\
short row\n\
第2集,x,/vod/play/id/1/sid/1/nid/2.html\n";
        let rows = parse_page_index_from_reader(index.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "第2集");
        assert_eq!(rows[0].link, "/vod/play/id/1/sid/1/nid/1.html");
    }
}
