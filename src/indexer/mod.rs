// Indexing pipeline.
//
// One run moves through fixed phases: scan the tree, diff it against the
// registry, parse changed files, feed the records to every strategy, then
// commit. Strategy state only becomes durable and visible in the commit
// phase, so an aborted run leaves the previous index intact.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::{EmbeddingProvider, HashingEmbedder};
use crate::ident::assign_identifiers;
use crate::parser::ParserRegistry;
use crate::query::SearchEngine;
use crate::registry::{
    diff_tree, read_source, FileRecord, FileStat, Registry, SCHEMA_VERSION,
};
use crate::scanner;
use crate::store::{GraphStore, KeywordStore, VectorStore};
use crate::strategy::{
    GraphStrategy, IndexStrategy, KeywordStrategy, VectorStrategy,
};

/// Phase an indexing run is in, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Scanning,
    Diffing,
    Parsing,
    StrategyApply,
    RegistryCommit,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Scanning => "scanning",
            RunPhase::Diffing => "diffing",
            RunPhase::Parsing => "parsing",
            RunPhase::StrategyApply => "strategy_apply",
            RunPhase::RegistryCommit => "registry_commit",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Counters for one indexing run.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct RunSummary {
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub files_unchanged: usize,
    pub files_unreadable: usize,
    pub parse_failures: usize,
    pub records_indexed: usize,
    pub records_removed: usize,
    /// Records the vector strategy dropped after embedding failures. They
    /// remain searchable through the keyword path.
    pub vector_skipped: usize,
    pub duration_ms: u64,
}

/// Point-in-time index statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub files: usize,
    pub records: usize,
    pub vector_entries: usize,
    pub keyword_documents: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub graph_pending: usize,
    pub indexed_at: Option<String>,
}

/// Coordinates the scanner, parsers, strategies and registry for one
/// project root. One writer at a time; reads stay on the last published
/// state while a run is in flight.
pub struct IndexEngine {
    root: PathBuf,
    config: Config,
    parsers: ParserRegistry,
    provider: Arc<dyn EmbeddingProvider>,
    vector: VectorStore,
    keyword: Arc<RwLock<KeywordStore>>,
    graph: Arc<RwLock<GraphStore>>,
    registry: RwLock<Registry>,
    registry_path: PathBuf,
    keyword_path: PathBuf,
    graph_path: PathBuf,
    write_lease: Mutex<()>,
    /// Set when the stored model signature does not match the configured
    /// provider; the next run re-indexes everything, then clears it.
    force_full: AtomicBool,
}

impl IndexEngine {
    pub fn open(root: impl AsRef<Path>, config: Config) -> Result<Self> {
        let root = root
            .as_ref()
            .canonicalize()
            .with_context(|| format!("project root not found: {}", root.as_ref().display()))?;
        let data_dir = Config::data_dir(&root);
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let provider: Arc<dyn EmbeddingProvider> =
            Arc::new(HashingEmbedder::new(config.embedding.dims));
        let vector = VectorStore::open(data_dir.join("vectors.db"))?;

        let mut force_full = false;
        if let Some((model, dims)) = vector.model_signature()? {
            if model != provider.model_id() || dims != provider.dims() {
                warn!(
                    "Embedding model changed ({model}/{dims} -> {}/{}); forcing full re-index",
                    provider.model_id(),
                    provider.dims()
                );
                vector.clear()?;
                force_full = true;
            }
        }

        let registry_path = data_dir.join("registry.json");
        let keyword_path = data_dir.join("keyword.json");
        let graph_path = data_dir.join("graph.json");

        Ok(Self {
            root,
            config,
            parsers: ParserRegistry::with_defaults(),
            provider,
            vector,
            keyword: Arc::new(RwLock::new(KeywordStore::load(&keyword_path))),
            graph: Arc::new(RwLock::new(GraphStore::load(&graph_path))),
            registry: RwLock::new(Registry::load(&registry_path)),
            registry_path,
            keyword_path,
            graph_path,
            write_lease: Mutex::new(()),
            force_full: AtomicBool::new(force_full),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run one indexing pass. `rebuild` discards the registry and
    /// re-indexes every file.
    pub fn index(&self, rebuild: bool) -> Result<RunSummary> {
        let _lease = self.write_lease.lock();
        let started = Instant::now();
        let rebuild = rebuild || self.force_full.load(Ordering::SeqCst);
        let mut summary = RunSummary::default();

        info!(phase = %RunPhase::Scanning, root = %self.root.display(), "index run started");
        let extensions: HashSet<String> = self.parsers.extensions().into_iter().collect();
        let candidates = scanner::scan(&self.root, &self.config, &extensions);
        debug!("{} candidate files", candidates.len());

        info!(phase = %RunPhase::Diffing, "classifying files");
        let snapshot = self.registry.read().clone();
        let mut work_registry = if rebuild {
            Registry::default()
        } else {
            snapshot.clone()
        };
        let diff = diff_tree(&self.root, &candidates, &work_registry);
        summary.files_added = diff.added.len();
        summary.files_modified = diff.modified.len();
        summary.files_deleted = diff.deleted.len();
        summary.files_unchanged = diff.unchanged.len();
        summary.files_unreadable = diff.unreadable;

        // Nothing to apply and nothing purged: skip the commit phase so an
        // unchanged tree leaves the registry byte-identical.
        if !rebuild
            && diff.added.is_empty()
            && diff.modified.is_empty()
            && diff.deleted.is_empty()
        {
            summary.duration_ms = started.elapsed().as_millis() as u64;
            info!(
                phase = %RunPhase::Done,
                unchanged = summary.files_unchanged,
                "no changes detected, commit skipped"
            );
            return Ok(summary);
        }

        let mut vector_strategy = VectorStrategy::new(
            self.vector.clone(),
            Arc::clone(&self.provider),
            self.config.embedding.max_retries,
        );
        let mut keyword_strategy =
            KeywordStrategy::new(Arc::clone(&self.keyword), self.keyword_path.clone());
        let mut graph_strategy =
            GraphStrategy::new(Arc::clone(&self.graph), self.graph_path.clone());

        info!(phase = %RunPhase::StrategyApply, "applying changes");

        // On rebuild everything previously indexed is purged before the
        // fresh records land under possibly identical identifiers.
        if rebuild {
            let stale: Vec<String> = snapshot.all_record_ids().into_iter().collect();
            if !stale.is_empty() {
                summary.records_removed += stale.len();
                vector_strategy.remove(&stale);
                keyword_strategy.remove(&stale);
                graph_strategy.remove(&stale);
            }
        }

        // Deletions before upserts, so a rename (delete + add of equal
        // content) nets out correctly.
        for path in &diff.deleted {
            if let Some(old) = work_registry.files.remove(path) {
                summary.records_removed += old.record_ids.len();
                vector_strategy.remove(&old.record_ids);
                keyword_strategy.remove(&old.record_ids);
                graph_strategy.remove(&old.record_ids);
            }
        }

        for stat in diff.added.iter().chain(diff.modified.iter()) {
            match self.index_file(
                stat,
                &mut work_registry,
                &mut vector_strategy,
                &mut keyword_strategy,
                &mut graph_strategy,
            ) {
                Ok((indexed, removed, skipped)) => {
                    summary.records_indexed += indexed;
                    summary.records_removed += removed;
                    summary.vector_skipped += skipped;
                }
                Err(e) => {
                    warn!("Failed to index {}: {}", stat.rel, e);
                    summary.parse_failures += 1;
                }
            }
        }

        let resolved = graph_strategy.resolve();
        debug!("{} call names resolved", resolved);

        info!(phase = %RunPhase::RegistryCommit, "committing run");
        keyword_strategy
            .persist()
            .map_err(|e| anyhow!("keyword store commit failed, run aborted: {e}"))?;
        graph_strategy
            .persist()
            .map_err(|e| anyhow!("graph store commit failed, run aborted: {e}"))?;
        vector_strategy
            .persist()
            .map_err(|e| anyhow!("vector store commit failed, run aborted: {e}"))?;

        vector_strategy.publish();
        keyword_strategy.publish();
        graph_strategy.publish();

        work_registry.schema_version = SCHEMA_VERSION;
        work_registry.indexed_at = Some(Utc::now().to_rfc3339());
        work_registry.save(&self.registry_path)?;
        *self.registry.write() = work_registry;
        self.force_full.store(false, Ordering::SeqCst);

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            phase = %RunPhase::Done,
            added = summary.files_added,
            modified = summary.files_modified,
            deleted = summary.files_deleted,
            records = summary.records_indexed,
            ms = summary.duration_ms,
            "index run finished"
        );
        Ok(summary)
    }

    /// Parse one changed file and reconcile its records with the
    /// strategies. Returns (indexed, removed, vector-skipped) counts.
    fn index_file(
        &self,
        stat: &FileStat,
        work_registry: &mut Registry,
        vector: &mut VectorStrategy,
        keyword: &mut KeywordStrategy,
        graph: &mut GraphStrategy,
    ) -> Result<(usize, usize, usize)> {
        debug!(phase = %RunPhase::Parsing, file = %stat.rel, "parsing");
        let extension = Path::new(&stat.rel)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let parser = self
            .parsers
            .parser_for(&extension)
            .ok_or_else(|| anyhow!("no parser for extension '{extension}'"))?;

        let content = read_source(&stat.abs)?;
        let mut records = parser.parse(&stat.rel, &content)?;
        assign_identifiers(&mut records);

        let old_ids: BTreeSet<String> = work_registry
            .files
            .get(&stat.rel)
            .map(|f| f.record_ids.iter().cloned().collect())
            .unwrap_or_default();
        let new_ids: BTreeSet<String> = records.iter().map(|r| r.id.clone()).collect();

        // Only touch what actually changed: identical identifiers mean
        // identical content, so those records are not re-embedded.
        let to_remove: Vec<String> = old_ids.difference(&new_ids).cloned().collect();
        let fresh: Vec<_> = records
            .into_iter()
            .filter(|r| !old_ids.contains(&r.id))
            .collect();

        if !to_remove.is_empty() {
            vector.remove(&to_remove);
            keyword.remove(&to_remove);
            graph.remove(&to_remove);
        }

        let vector_outcome = vector.apply(&fresh);
        keyword.apply(&fresh);
        graph.apply(&fresh);

        work_registry.files.insert(
            stat.rel.clone(),
            FileRecord {
                hash: stat.hash.clone(),
                mtime: stat.mtime,
                size: stat.size,
                schema_version: SCHEMA_VERSION,
                record_ids: new_ids.iter().cloned().collect(),
            },
        );

        Ok((fresh.len(), to_remove.len(), vector_outcome.skipped))
    }

    /// Search handle over the currently published state.
    pub fn searcher(&self) -> SearchEngine {
        SearchEngine::new(
            self.vector.clone(),
            Arc::clone(&self.keyword),
            Arc::clone(&self.graph),
            Arc::clone(&self.provider),
            self.config.search.clone(),
        )
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let registry = self.registry.read();
        let graph = self.graph.read();
        Ok(IndexStats {
            files: registry.files.len(),
            records: registry.all_record_ids().len(),
            vector_entries: self.vector.len()?,
            keyword_documents: self.keyword.read().len(),
            graph_nodes: graph.node_count(),
            graph_edges: graph.edge_count(),
            graph_pending: graph.pending_count(),
            indexed_at: registry.indexed_at.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn engine(root: &Path) -> IndexEngine {
        let mut config = Config::default();
        config.embedding.dims = 64;
        IndexEngine::open(root, config).unwrap()
    }

    #[test]
    fn test_first_run_indexes_everything() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/math.py", "def add(a, b):\n    return a + b\n");
        write(dir.path(), "src/util.py", "def walk(t):\n    return t\n");

        let engine = engine(dir.path());
        let summary = engine.index(false).unwrap();

        assert_eq!(summary.files_added, 2);
        assert_eq!(summary.records_indexed, 2);
        assert_eq!(summary.parse_failures, 0);

        let stats = engine.stats().unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.vector_entries, 2);
        assert_eq!(stats.keyword_documents, 2);
    }

    #[test]
    fn test_second_run_is_noop() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return 1\n");

        let engine = engine(dir.path());
        engine.index(false).unwrap();
        let summary = engine.index(false).unwrap();

        assert_eq!(summary.files_unchanged, 1);
        assert_eq!(summary.files_added + summary.files_modified, 0);
        assert_eq!(summary.records_indexed, 0);
        assert_eq!(summary.records_removed, 0);
    }

    #[test]
    fn test_noop_run_leaves_registry_untouched() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return 1\n");

        let engine = engine(dir.path());
        engine.index(false).unwrap();
        let before = std::fs::read_to_string(&engine.registry_path).unwrap();

        engine.index(false).unwrap();
        let after = std::fs::read_to_string(&engine.registry_path).unwrap();
        assert_eq!(before, after, "unchanged tree must not rewrite the registry");
    }

    #[test]
    fn test_persist_failure_aborts_and_keeps_previous_state() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return 1\n");

        let engine = engine(dir.path());
        engine.index(false).unwrap();
        let registry_before = std::fs::read_to_string(&engine.registry_path).unwrap();

        write(dir.path(), "b.py", "def g():\n    return 2\n");

        // A directory squatting on the keyword store path makes its atomic
        // rename fail, which must abort the whole commit.
        std::fs::remove_file(&engine.keyword_path).unwrap();
        std::fs::create_dir(&engine.keyword_path).unwrap();
        assert!(engine.index(false).is_err());

        // On-disk registry and the published stores still reflect the
        // previous run.
        let registry_after = std::fs::read_to_string(&engine.registry_path).unwrap();
        assert_eq!(registry_before, registry_after);
        assert_eq!(engine.registry.read().files.len(), 1);
        assert_eq!(engine.keyword.read().len(), 1);
        assert_eq!(engine.graph.read().node_count(), 1);
        assert_eq!(engine.stats().unwrap().vector_entries, 1);

        // Clearing the obstruction lets the next run pick up where the
        // registry left off.
        std::fs::remove_dir(&engine.keyword_path).unwrap();
        let summary = engine.index(false).unwrap();
        assert_eq!(summary.files_added, 1);
        assert_eq!(engine.stats().unwrap().records, 2);
    }

    #[test]
    fn test_modified_file_only_touches_changed_records() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "a.py",
            "def changed():\n    return 1\n\n\ndef stable():\n    return 2\n",
        );

        let engine = engine(dir.path());
        engine.index(false).unwrap();
        let before: BTreeSet<String> = engine.registry.read().all_record_ids();

        write(
            dir.path(),
            "a.py",
            "def changed():\n    return 111\n\n\ndef stable():\n    return 2\n",
        );
        let summary = engine.index(false).unwrap();

        assert_eq!(summary.files_modified, 1);
        assert_eq!(summary.records_indexed, 1, "only the edited function re-indexes");
        assert_eq!(summary.records_removed, 1);

        let after: BTreeSet<String> = engine.registry.read().all_record_ids();
        let stable_before: Vec<_> = before.iter().filter(|id| id.contains(":stable:")).collect();
        let stable_after: Vec<_> = after.iter().filter(|id| id.contains(":stable:")).collect();
        assert_eq!(stable_before, stable_after);
    }

    #[test]
    fn test_deleted_file_purges_records() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return 1\n");
        write(dir.path(), "b.py", "def g():\n    return 2\n");

        let engine = engine(dir.path());
        engine.index(false).unwrap();
        std::fs::remove_file(dir.path().join("b.py")).unwrap();

        let summary = engine.index(false).unwrap();
        assert_eq!(summary.files_deleted, 1);
        assert_eq!(summary.records_removed, 1);

        let stats = engine.stats().unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.records, 1);
        assert_eq!(stats.vector_entries, 1);
        assert_eq!(stats.keyword_documents, 1);
    }

    #[test]
    fn test_rebuild_reindexes_from_scratch() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return 1\n");

        let engine = engine(dir.path());
        engine.index(false).unwrap();
        let summary = engine.index(true).unwrap();

        assert_eq!(summary.files_added, 1);
        assert_eq!(summary.records_indexed, 1);
        let stats = engine.stats().unwrap();
        assert_eq!(stats.records, 1, "rebuild must not duplicate records");
        assert_eq!(stats.vector_entries, 1);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return 1\n");

        {
            let engine = engine(dir.path());
            engine.index(false).unwrap();
        }

        let engine = engine(dir.path());
        let stats = engine.stats().unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.records, 1);

        let summary = engine.index(false).unwrap();
        assert_eq!(summary.files_unchanged, 1);
    }

    #[test]
    fn test_model_change_forces_full_reindex() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return 1\n");

        {
            let engine = engine(dir.path());
            engine.index(false).unwrap();
        }

        // Reopen with different dimensionality.
        let mut config = Config::default();
        config.embedding.dims = 32;
        let engine = IndexEngine::open(dir.path(), config).unwrap();
        assert!(engine.force_full.load(Ordering::SeqCst));

        let summary = engine.index(false).unwrap();
        assert_eq!(summary.records_indexed, 1);
        assert_eq!(engine.stats().unwrap().vector_entries, 1);
    }

    #[test]
    fn test_call_graph_built_across_files() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "main.py",
            "def main():\n    return helper()\n",
        );
        write(dir.path(), "util.py", "def helper():\n    return 1\n");

        let engine = engine(dir.path());
        engine.index(false).unwrap();

        let graph = engine.graph.read();
        let callers = graph.callers("helper");
        assert_eq!(callers.len(), 1);
        assert!(callers[0].contains(":main:"));
    }
}
