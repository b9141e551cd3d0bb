// Directory walker feeding the change detector.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;

/// Directories never worth descending into, on top of config excludes.
const SKIP_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".codescout",
    "target",
    "build",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
];

/// Walk the tree and return candidate files for indexing: not hidden, not
/// excluded by config, and carrying an indexable extension.
///
/// Unreadable directory entries are skipped with a warning, never fatal.
pub fn scan(root: &Path, config: &Config, extensions: &HashSet<String>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        if entry.depth() == 0 {
            return true;
        }
        if name.starts_with('.') {
            return false;
        }
        if entry.file_type().is_dir() && SKIP_DIRS.contains(&name.as_ref()) {
            return false;
        }
        true
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !extensions.contains(&ext.to_ascii_lowercase()) {
            continue;
        }

        let path_str = path.to_string_lossy();
        if !config.should_index_file(&path_str) {
            debug!("Excluded by config: {}", path_str);
            continue;
        }

        files.push(path.to_path_buf());
    }

    files.sort();
    files
}
