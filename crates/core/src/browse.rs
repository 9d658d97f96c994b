use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::model::DirEntry;

/// Lists `path` one level deep: dot-files hidden, directories first, then
/// by name. Entries whose metadata cannot be read are skipped.
pub fn browse_directory(path: &Path) -> Result<Vec<DirEntry>> {
    let entries = fs::read_dir(path).map_err(|source| EngineError::TargetUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let mut listing = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!("skipping {}: {}", entry.path().display(), err);
                continue;
            }
        };
        listing.push(DirEntry {
            name,
            is_dir: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    listing.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(listing)
}
