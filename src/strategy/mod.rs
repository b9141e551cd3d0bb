// Indexing strategies.
//
// Each strategy consumes the same stream of parsed records and maintains
// one store. Mutations are buffered (vector) or made on a working copy
// (keyword, graph) during a run; `persist` makes them durable and
// `publish` makes them visible to readers. A run that aborts before
// persist leaves both the on-disk state and the shared in-memory state
// untouched.

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embedding::{embed_with_retry, EmbeddingProvider};
use crate::errors::StoreError;
use crate::model::{CodeRecord, RecordMeta};
use crate::store::graph::GraphNode;
use crate::store::keyword::KeywordDoc;
use crate::store::{GraphStore, KeywordStore, VectorStore};
use crate::store::vector::VectorEntry;

/// Per-strategy result of applying a batch of records.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApplyOutcome {
    pub applied: usize,
    /// Records dropped by this strategy (embedding failures). The other
    /// strategies still index them.
    pub skipped: usize,
}

/// One consumer of the parsed-record stream.
pub trait IndexStrategy {
    fn name(&self) -> &'static str;

    /// Index a batch of records from one file.
    fn apply(&mut self, records: &[CodeRecord]) -> ApplyOutcome;

    /// Drop records by identifier. Unknown ids are ignored.
    fn remove(&mut self, ids: &[String]);

    /// Make the buffered mutations durable.
    fn persist(&mut self) -> Result<(), StoreError>;

    /// Swap the run's result into the shared read state. Only called after
    /// every strategy persisted successfully.
    fn publish(&mut self);
}

/// Text indexed for a record, shared by the vector and keyword strategies
/// so both retrieval paths score the same content.
pub fn build_document(record: &CodeRecord) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(doc) = &record.docstring {
        parts.push(doc.clone());
    }
    if let Some(sig) = &record.signature {
        parts.push(format!("Signature: {sig}"));
    }
    if let Some(ret) = &record.return_type {
        parts.push(format!("Returns: {ret}"));
    }
    if !record.parameters.is_empty() {
        parts.push(format!("Parameters: {}", record.parameters.join(", ")));
    }
    parts.push(record.content.clone());
    parts.join("\n\n")
}

/// Embeds record documents and batches the writes for one transactional
/// commit against the SQLite collection.
pub struct VectorStrategy {
    store: VectorStore,
    provider: Arc<dyn EmbeddingProvider>,
    max_retries: u32,
    pending_upserts: Vec<VectorEntry>,
    pending_deletes: Vec<String>,
}

impl VectorStrategy {
    pub fn new(store: VectorStore, provider: Arc<dyn EmbeddingProvider>, max_retries: u32) -> Self {
        Self {
            store,
            provider,
            max_retries,
            pending_upserts: Vec::new(),
            pending_deletes: Vec::new(),
        }
    }
}

impl IndexStrategy for VectorStrategy {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn apply(&mut self, records: &[CodeRecord]) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        for record in records {
            let document = build_document(record);
            match embed_with_retry(
                self.provider.as_ref(),
                std::slice::from_ref(&document),
                self.max_retries,
            ) {
                Ok(mut vectors) if !vectors.is_empty() => {
                    self.pending_upserts.push(VectorEntry {
                        id: record.id.clone(),
                        vector: vectors.swap_remove(0),
                        document,
                        meta: RecordMeta::from_record(record),
                    });
                    outcome.applied += 1;
                }
                Ok(_) => {
                    warn!("Embedding provider returned no vector for {}", record.id);
                    outcome.skipped += 1;
                }
                Err(e) => {
                    warn!("Skipping vector entry for {}: {}", record.id, e);
                    outcome.skipped += 1;
                }
            }
        }
        outcome
    }

    fn remove(&mut self, ids: &[String]) {
        self.pending_deletes.extend(ids.iter().cloned());
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        self.store.commit_batch(
            &self.pending_deletes,
            &self.pending_upserts,
            self.provider.model_id(),
            self.provider.dims(),
        )?;
        debug!(
            "Vector strategy persisted {} upserts, {} deletes",
            self.pending_upserts.len(),
            self.pending_deletes.len()
        );
        self.pending_upserts.clear();
        self.pending_deletes.clear();
        Ok(())
    }

    fn publish(&mut self) {
        // The transactional commit in `persist` already published.
    }
}

/// Maintains the BM25 index on a working copy that replaces the shared
/// store only after the whole run persisted.
pub struct KeywordStrategy {
    shared: Arc<RwLock<KeywordStore>>,
    path: PathBuf,
    work: Option<KeywordStore>,
}

impl KeywordStrategy {
    pub fn new(shared: Arc<RwLock<KeywordStore>>, path: PathBuf) -> Self {
        Self {
            shared,
            path,
            work: None,
        }
    }

    fn work(&mut self) -> &mut KeywordStore {
        let shared = &self.shared;
        self.work.get_or_insert_with(|| shared.read().clone())
    }
}

impl IndexStrategy for KeywordStrategy {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn apply(&mut self, records: &[CodeRecord]) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        for record in records {
            let doc = KeywordDoc {
                meta: RecordMeta::from_record(record),
                text: build_document(record),
            };
            self.work().upsert(&record.id, doc);
            outcome.applied += 1;
        }
        outcome
    }

    fn remove(&mut self, ids: &[String]) {
        self.work().remove(ids);
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        let path = self.path.clone();
        self.work().save(&path)
    }

    fn publish(&mut self) {
        if let Some(work) = self.work.take() {
            *self.shared.write() = work;
        }
    }
}

/// Maintains the call graph on a working copy, with the resolve pass
/// deferred until every file of the run was applied.
pub struct GraphStrategy {
    shared: Arc<RwLock<GraphStore>>,
    path: PathBuf,
    work: Option<GraphStore>,
}

impl GraphStrategy {
    pub fn new(shared: Arc<RwLock<GraphStore>>, path: PathBuf) -> Self {
        Self {
            shared,
            path,
            work: None,
        }
    }

    fn work(&mut self) -> &mut GraphStore {
        let shared = &self.shared;
        self.work.get_or_insert_with(|| shared.read().clone())
    }

    /// Bind pending call edges against all definitions seen so far.
    pub fn resolve(&mut self) -> usize {
        self.work().resolve_pending()
    }
}

impl IndexStrategy for GraphStrategy {
    fn name(&self) -> &'static str {
        "graph"
    }

    fn apply(&mut self, records: &[CodeRecord]) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        for record in records {
            let node = GraphNode {
                name: record.name.clone(),
                path: record.path.clone(),
                kind: record.kind,
            };
            let work = self.work();
            work.add_node(&record.id, node);
            for callee in &record.calls {
                work.add_call(&record.id, callee);
            }
            outcome.applied += 1;
        }
        outcome
    }

    fn remove(&mut self, ids: &[String]) {
        self.work().remove(ids);
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        let path = self.path.clone();
        self.work().save(&path)
    }

    fn publish(&mut self) {
        if let Some(work) = self.work.take() {
            *self.shared.write() = work;
        }
    }
}
