//! File system utilities

use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Byte budget of a single path component on common file systems
pub const MAX_COMPONENT_BYTES: usize = 255;

/// Budget used for output names, leaving headroom for multi-byte characters
pub const OUTPUT_NAME_BUDGET: usize = 200;

/// Ensure directory exists
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(anyhow!("{} is not a directory", path.display()));
    }
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| anyhow!("Failed to create directory {}: {}", path.display(), e))?;
        tracing::info!("{} did not exist, created it", path.display());
    }
    Ok(())
}

fn is_illegal(c: char) -> bool {
    if c.is_control() || c == '/' {
        return true;
    }
    cfg!(windows) && matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\\')
}

/// Replaces characters that cannot appear in a file name on this platform.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if is_illegal(c) { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Cuts `s` to at most `max_bytes` bytes on a char boundary.
pub fn truncate_to_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Sanitizes the file name of `path` to fit `budget` bytes.
///
/// Illegal characters are replaced, then the stem is shortened so that the
/// encoded name stays within the budget. The extension is kept intact and no
/// multi-byte character is split.
pub fn sanitize_filename_with_budget(path: &Path, budget: usize) -> PathBuf {
    let file_name = match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return path.to_path_buf(),
    };
    let cleaned = sanitize_component(&file_name);

    let (stem, extension) = match cleaned.rfind('.') {
        Some(dot) if dot > 0 => (&cleaned[..dot], &cleaned[dot..]),
        _ => (cleaned.as_str(), ""),
    };

    let name = if cleaned.len() <= budget {
        cleaned.clone()
    } else {
        let stem_budget = budget.saturating_sub(extension.len());
        let stem = truncate_to_bytes(stem, stem_budget);
        tracing::info!("file name too long, cut to {} bytes", stem.len() + extension.len());
        format!("{}{}", stem, extension)
    };

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => PathBuf::from(name),
    }
}

/// Sanitize filename for filesystem, within the 255-byte component limit
pub fn sanitize_filename(path: &Path) -> PathBuf {
    sanitize_filename_with_budget(path, MAX_COMPONENT_BYTES)
}

/// Human readable size with a 1024 radix, e.g. `1.50KB`
pub fn human_size(length: f64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = length;
    for unit in UNITS.iter() {
        if value < 1024.0 {
            return format!("{:.2}{}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.2}{}", value * 1024.0, UNITS[UNITS.len() - 1])
}
