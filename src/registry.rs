// File registry and change detection.
//
// The registry maps each indexed file to its content hash, size, mtime,
// schema version and the record identifiers it contributed. Diffing the
// on-disk tree against the registry classifies files as added, modified,
// deleted or unchanged so incremental runs only touch what changed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::errors::StoreError;

/// Global index schema version. Bumping it forces a full re-index: every
/// file recorded under an older version diffs as modified regardless of
/// its hash.
pub const SCHEMA_VERSION: u32 = 1;

/// Per-file indexing state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub hash: String,
    pub mtime: u64,
    pub size: u64,
    pub schema_version: u32,
    #[serde(default)]
    pub record_ids: Vec<String>,
}

/// Durable mapping from relative file path to [`FileRecord`].
///
/// Invariant: the union of `record_ids` across all files equals exactly
/// the identifier set present in every store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registry {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            indexed_at: None,
            files: BTreeMap::new(),
        }
    }
}

impl Registry {
    /// Load a registry from disk. A missing or unparsable file yields a
    /// fresh registry (with a warning), never an error.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("Failed to read registry {}: {}, starting fresh", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(registry) => registry,
            Err(e) => {
                warn!("Failed to parse registry {}: {}, starting fresh", path.display(), e);
                Self::default()
            }
        }
    }

    /// Persist the registry atomically (write to a temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(self)?;
        atomic_write_bytes(path, content.as_bytes())
    }

    /// Union of record identifiers across all file records.
    pub fn all_record_ids(&self) -> BTreeSet<String> {
        self.files
            .values()
            .flat_map(|f| f.record_ids.iter().cloned())
            .collect()
    }
}

/// Stat snapshot of one candidate file, taken while diffing.
#[derive(Debug, Clone)]
pub struct FileStat {
    pub rel: String,
    pub abs: PathBuf,
    pub hash: String,
    pub mtime: u64,
    pub size: u64,
}

/// Result of diffing the tree against the registry.
#[derive(Debug, Default)]
pub struct TreeDiff {
    pub added: Vec<FileStat>,
    pub modified: Vec<FileStat>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    /// Files skipped because they could not be read. Excluded from all
    /// four sets.
    pub unreadable: usize,
}

/// Classify candidate files against the registry.
///
/// A file is `modified` when its hash differs from the stored one, or when
/// it was last indexed under an older schema version. Unreadable files are
/// skipped with a warning.
pub fn diff_tree(root: &Path, candidates: &[PathBuf], registry: &Registry) -> TreeDiff {
    let mut diff = TreeDiff::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(candidates.len());

    let mut sorted: Vec<&PathBuf> = candidates.iter().collect();
    sorted.sort();

    for abs in sorted {
        let Some(rel) = relative_path(root, abs) else {
            continue;
        };

        let metadata = match std::fs::metadata(abs) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", abs.display(), e);
                diff.unreadable += 1;
                continue;
            }
        };
        let size = metadata.len();
        let mtime = mtime_nanos(&metadata);
        seen.insert(rel.clone());

        let old = registry.files.get(&rel);
        let schema_stale = old.map(|o| o.schema_version < SCHEMA_VERSION).unwrap_or(false);

        // Fast path: same size+mtime and current schema means unchanged
        // without rehashing.
        if let Some(old) = old {
            if !schema_stale && old.size == size && old.mtime == mtime {
                diff.unchanged.push(rel);
                continue;
            }
        }

        let hash = match hash_file(abs) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", abs.display(), e);
                diff.unreadable += 1;
                seen.remove(&rel);
                continue;
            }
        };

        let stat = FileStat {
            rel: rel.clone(),
            abs: abs.clone(),
            hash,
            mtime,
            size,
        };

        match old {
            None => diff.added.push(stat),
            Some(_) if schema_stale => {
                debug!("Schema version bump forces re-index of {}", rel);
                diff.modified.push(stat);
            }
            Some(old) if old.hash != stat.hash => diff.modified.push(stat),
            Some(_) => diff.unchanged.push(rel),
        }
    }

    for path in registry.files.keys() {
        if !seen.contains(path) {
            diff.deleted.push(path.clone());
        }
    }
    diff.deleted.sort();

    diff
}

/// Path relative to root, `/`-separated.
pub fn relative_path(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let path = rel.to_string_lossy().replace('\\', "/");
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

/// Streaming blake3 hash of a file.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

fn mtime_nanos(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Write bytes to a temp file and rename it over the target path.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&parent).map_err(|e| StoreError::io(&parent, e))?;

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let tmp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("codescout"),
        std::process::id(),
        nonce
    );
    let tmp_path = parent.join(tmp_name);

    {
        let mut file = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        file.write_all(bytes).map_err(|e| StoreError::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp_path, e))?;
    }

    std::fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path, e))
}

/// Read a source file as UTF-8, tolerating invalid bytes.
pub fn read_source(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
