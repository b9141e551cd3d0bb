// In-memory BM25 keyword index.
//
// Term-frequency, document-frequency and document-length statistics are
// maintained incrementally on insert/remove; only the id -> document map is
// persisted, and the statistics are rebuilt on load.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use crate::embedding::tokenize;
use crate::errors::StoreError;
use crate::model::RecordMeta;
use crate::registry::atomic_write_bytes;

const BM25_K1: f32 = 1.5;
const BM25_B: f32 = 0.75;

/// One indexed document: the same text the vector strategy embeds, plus
/// the record metadata for building search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordDoc {
    pub meta: RecordMeta,
    pub text: String,
}

/// Incremental BM25 index over record documents.
#[derive(Debug, Clone, Default)]
pub struct KeywordStore {
    docs: BTreeMap<String, KeywordDoc>,
    postings: HashMap<String, HashMap<String, u32>>,
    doc_len: HashMap<String, u32>,
    total_len: u64,
}

impl KeywordStore {
    /// Load from disk, rebuilding statistics from the persisted document
    /// map. Missing or unparsable files yield an empty store.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        let docs: BTreeMap<String, KeywordDoc> = match serde_json::from_str(&content) {
            Ok(docs) => docs,
            Err(e) => {
                warn!("Failed to parse keyword store {}: {}, starting fresh", path.display(), e);
                return Self::default();
            }
        };

        let mut store = Self::default();
        for (id, doc) in docs {
            store.insert_postings(&id, &doc.text);
            store.docs.insert(id, doc);
        }
        info!("Keyword store loaded: {} documents", store.docs.len());
        store
    }

    /// Persist the document map atomically.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string(&self.docs)?;
        atomic_write_bytes(path, content.as_bytes())
    }

    /// Insert or replace one document.
    pub fn upsert(&mut self, id: &str, doc: KeywordDoc) {
        if self.docs.contains_key(id) {
            self.remove_postings(id);
        }
        self.insert_postings(id, &doc.text);
        self.docs.insert(id.to_string(), doc);
    }

    /// Remove documents by id. Unknown ids are ignored.
    pub fn remove(&mut self, ids: &[String]) {
        for id in ids {
            if self.docs.remove(id).is_some() {
                self.remove_postings(id);
            }
        }
    }

    /// BM25 scores for every matching document, highest first (ties break
    /// on id). Documents scoring zero are omitted.
    pub fn search(&self, query: &str, path_filter: Option<&str>) -> Vec<(String, f32)> {
        if self.docs.is_empty() {
            return Vec::new();
        }

        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let n = self.docs.len() as f32;
        let avg_len = self.total_len as f32 / n;

        let mut scores: HashMap<&str, f32> = HashMap::new();
        for term in &terms {
            let Some(posting) = self.postings.get(term) else {
                continue;
            };
            let df = posting.len() as f32;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for (id, &tf) in posting {
                let len = *self.doc_len.get(id).unwrap_or(&0) as f32;
                let tf = tf as f32;
                let score =
                    idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len));
                *scores.entry(id.as_str()).or_insert(0.0) += score;
            }
        }

        let mut results: Vec<(String, f32)> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .filter(|(id, _)| match path_filter {
                Some(prefix) => self
                    .docs
                    .get(*id)
                    .map(|d| d.meta.path.starts_with(prefix))
                    .unwrap_or(false),
                None => true,
            })
            .map(|(id, score)| (id.to_string(), score))
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results
    }

    pub fn get(&self, id: &str) -> Option<&KeywordDoc> {
        self.docs.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.docs.keys()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn insert_postings(&mut self, id: &str, text: &str) {
        let tokens = tokenize(text);
        self.doc_len.insert(id.to_string(), tokens.len() as u32);
        self.total_len += tokens.len() as u64;
        for token in tokens {
            *self
                .postings
                .entry(token)
                .or_default()
                .entry(id.to_string())
                .or_insert(0) += 1;
        }
    }

    fn remove_postings(&mut self, id: &str) {
        if let Some(len) = self.doc_len.remove(id) {
            self.total_len = self.total_len.saturating_sub(len as u64);
        }
        self.postings.retain(|_, posting| {
            posting.remove(id);
            !posting.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordKind;
    use tempfile::tempdir;

    fn doc(path: &str, name: &str, text: &str) -> KeywordDoc {
        KeywordDoc {
            meta: RecordMeta {
                path: path.to_string(),
                name: name.to_string(),
                kind: RecordKind::Function,
                language: "python".to_string(),
                start_line: 0,
                end_line: 1,
                parent: None,
                signature: None,
                return_type: None,
                parameters: None,
                imports: None,
            },
            text: text.to_string(),
        }
    }

    #[test]
    fn test_search_ranks_matching_doc_higher() {
        let mut store = KeywordStore::default();
        store.upsert("a", doc("a.py", "add", "return the sum of two values"));
        store.upsert("b", doc("b.py", "other", "walk the directory tree"));

        let results = store.search("sum two values", None);
        assert_eq!(results[0].0, "a");
        assert!(results.iter().all(|(id, _)| id != "b"));
    }

    #[test]
    fn test_empty_store_returns_empty() {
        let store = KeywordStore::default();
        assert!(store.search("anything", None).is_empty());
    }

    #[test]
    fn test_incremental_remove() {
        let mut store = KeywordStore::default();
        store.upsert("a", doc("a.py", "add", "sum values"));
        store.upsert("b", doc("b.py", "add2", "sum values twice"));

        store.remove(&["a".to_string()]);
        let results = store.search("sum", None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "b");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_upsert_replaces_document() {
        let mut store = KeywordStore::default();
        store.upsert("a", doc("a.py", "add", "sum values"));
        store.upsert("a", doc("a.py", "add", "parse configuration"));

        assert!(store.search("sum", None).is_empty());
        assert_eq!(store.search("configuration", None).len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_path_filter_restricts_candidates() {
        let mut store = KeywordStore::default();
        store.upsert("a", doc("src/a.py", "add", "sum values"));
        store.upsert("b", doc("lib/b.py", "add2", "sum values"));

        let results = store.search("sum", Some("src/"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyword.json");

        let mut store = KeywordStore::default();
        store.upsert("a", doc("a.py", "add", "sum of two values"));
        store.upsert("b", doc("b.py", "walk", "walk the tree"));
        store.save(&path).unwrap();

        let loaded = KeywordStore::load(&path);
        assert_eq!(loaded.len(), 2);
        let results = loaded.search("sum values", None);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn test_rarer_term_scores_higher() {
        let mut store = KeywordStore::default();
        store.upsert("a", doc("a.py", "a", "common rare"));
        store.upsert("b", doc("b.py", "b", "common"));
        store.upsert("c", doc("c.py", "c", "common"));

        let results = store.search("rare", None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "a");
    }
}
