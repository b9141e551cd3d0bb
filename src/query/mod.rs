// Hybrid search over the published index.
//
// Vector and keyword candidates are fetched independently, normalized to
// [0, 1] and fused as `alpha * vector + (1 - alpha) * keyword` over the
// union of both sets, with 0 substituted for a missing side. Pure-vector
// (alpha = 1) and pure-keyword (alpha = 0) searches skip the other
// retrieval path entirely.

use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::SearchConfig;
use crate::embedding::EmbeddingProvider;
use crate::model::RecordMeta;
use crate::store::{GraphStore, KeywordStore, VectorStore};

/// The vector candidate pool never shrinks below this, however small the
/// requested result count, so fusion has something to rank. Keyword
/// candidates are not pooled: every match enters fusion.
pub const FLOOR_K: usize = 10;

/// One ranked search hit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResult {
    pub id: String,
    /// Fused score in [0, 1].
    pub score: f32,
    pub meta: RecordMeta,
    pub snippet: String,
}

struct Candidate {
    vector_score: f32,
    keyword_score: f32,
    meta: RecordMeta,
    text: String,
}

/// Read-side handle over the three stores.
pub struct SearchEngine {
    vector: VectorStore,
    keyword: Arc<RwLock<KeywordStore>>,
    graph: Arc<RwLock<GraphStore>>,
    provider: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        vector: VectorStore,
        keyword: Arc<RwLock<KeywordStore>>,
        graph: Arc<RwLock<GraphStore>>,
        provider: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            vector,
            keyword,
            graph,
            provider,
            config,
        }
    }

    /// Top `n` records for a query. `alpha` overrides the configured
    /// vector weight; `path_filter` keeps only records whose path starts
    /// with the given prefix.
    pub fn search(
        &self,
        query: &str,
        n: usize,
        alpha: Option<f32>,
        path_filter: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() || n == 0 {
            return Ok(Vec::new());
        }

        let alpha = alpha.unwrap_or(self.config.alpha).clamp(0.0, 1.0);
        let k = (2 * n).max(self.config.floor_k).max(FLOOR_K);
        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        if alpha > 0.0 {
            self.collect_vector(query, k, path_filter, &mut candidates)?;
        }
        if alpha < 1.0 {
            self.collect_keyword(query, path_filter, &mut candidates);
        }
        debug!(
            "query '{}': {} fused candidates (alpha {:.2})",
            query,
            candidates.len(),
            alpha
        );

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|(id, c)| SearchResult {
                id,
                score: alpha * c.vector_score + (1.0 - alpha) * c.keyword_score,
                meta: c.meta,
                snippet: snippet(&c.text),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(n);
        Ok(results)
    }

    fn collect_vector(
        &self,
        query: &str,
        k: usize,
        path_filter: Option<&str>,
        candidates: &mut HashMap<String, Candidate>,
    ) -> Result<()> {
        let query_vec = match self.provider.embed_query(query) {
            Ok(vec) => vec,
            Err(e) => {
                // Degrade to keyword-only rather than failing the query.
                tracing::warn!("Query embedding failed, vector path skipped: {}", e);
                return Ok(());
            }
        };

        for hit in self.vector.nearest(&query_vec, k)? {
            if let Some(prefix) = path_filter {
                if !hit.meta.path.starts_with(prefix) {
                    continue;
                }
            }
            candidates.insert(
                hit.id,
                Candidate {
                    vector_score: 1.0 / (1.0 + hit.distance),
                    keyword_score: 0.0,
                    meta: hit.meta,
                    text: hit.document,
                },
            );
        }
        Ok(())
    }

    fn collect_keyword(
        &self,
        query: &str,
        path_filter: Option<&str>,
        candidates: &mut HashMap<String, Candidate>,
    ) {
        let store = self.keyword.read();
        let scored = store.search(query, path_filter);

        // BM25 scores are unbounded; normalize against the best candidate.
        // A lone candidate normalizes to 1.0.
        let max = scored.first().map(|(_, s)| *s).unwrap_or(0.0);
        if max <= 0.0 {
            return;
        }

        for (id, raw) in scored {
            let Some(doc) = store.get(&id) else {
                continue;
            };
            let normalized = raw / max;
            candidates
                .entry(id)
                .and_modify(|c| c.keyword_score = normalized)
                .or_insert_with(|| Candidate {
                    vector_score: 0.0,
                    keyword_score: normalized,
                    meta: doc.meta.clone(),
                    text: doc.text.clone(),
                });
        }
    }

    /// Identifiers of definitions calling `name` (one hop).
    pub fn callers(&self, name: &str) -> Vec<String> {
        self.graph.read().callers(name)
    }

    /// Names called by definitions named `name` (one hop).
    pub fn callees(&self, name: &str) -> Vec<String> {
        self.graph.read().callees(name)
    }
}

const SNIPPET_MAX_LINES: usize = 5;
const SNIPPET_MAX_CHARS: usize = 300;

/// Leading lines of the indexed document, bounded in both directions.
fn snippet(text: &str) -> String {
    let mut out: String = text
        .lines()
        .take(SNIPPET_MAX_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    if out.len() > SNIPPET_MAX_CHARS {
        let mut cut = SNIPPET_MAX_CHARS;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::model::{CodeRecord, RecordKind};
    use crate::store::keyword::KeywordDoc;
    use crate::store::vector::VectorEntry;
    use crate::strategy::build_document;
    use tempfile::tempdir;

    fn record(id: &str, name: &str, path: &str, content: &str) -> CodeRecord {
        CodeRecord {
            id: id.to_string(),
            kind: RecordKind::Function,
            name: name.to_string(),
            path: path.to_string(),
            start_line: 0,
            end_line: 2,
            content: content.to_string(),
            language: "python".to_string(),
            docstring: None,
            signature: None,
            return_type: None,
            parameters: Vec::new(),
            parent: None,
            imports: Vec::new(),
            calls: Vec::new(),
        }
    }

    fn engine_with(records: &[CodeRecord]) -> (SearchEngine, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let provider = Arc::new(HashingEmbedder::new(128));
        let vector = VectorStore::open(dir.path().join("vectors.db")).unwrap();
        let mut keyword = KeywordStore::default();

        let mut entries = Vec::new();
        for r in records {
            let doc = build_document(r);
            let vec = provider.embed_query(&doc).unwrap();
            entries.push(VectorEntry {
                id: r.id.clone(),
                vector: vec,
                document: doc.clone(),
                meta: RecordMeta::from_record(r),
            });
            keyword.upsert(
                &r.id,
                KeywordDoc {
                    meta: RecordMeta::from_record(r),
                    text: doc,
                },
            );
        }
        vector.commit_batch(&[], &entries, "hashing-v1", 128).unwrap();

        let engine = SearchEngine::new(
            vector,
            Arc::new(RwLock::new(keyword)),
            Arc::new(RwLock::new(GraphStore::default())),
            provider,
            SearchConfig {
                alpha: 0.7,
                floor_k: 10,
            },
        );
        (engine, dir)
    }

    fn corpus() -> Vec<CodeRecord> {
        vec![
            record(
                "a",
                "add_numbers",
                "src/math.py",
                "def add_numbers(a, b):\n    \"\"\"Return the sum of two values.\"\"\"\n    return a + b",
            ),
            record(
                "b",
                "unrelated_helper",
                "src/util.py",
                "def unrelated_helper(tree):\n    return walk(tree.root)",
            ),
            record(
                "c",
                "parse_config",
                "lib/config.py",
                "def parse_config(path):\n    return toml.load(path)",
            ),
        ]
    }

    #[test]
    fn test_hybrid_ranks_relevant_record_first() {
        let (engine, _dir) = engine_with(&corpus());
        let results = engine.search("sum two values", 3, None, None).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn test_alpha_one_matches_pure_vector_ranking() {
        let (engine, _dir) = engine_with(&corpus());

        let hybrid = engine.search("sum two values", 3, Some(1.0), None).unwrap();
        let provider = HashingEmbedder::new(128);
        let query = provider.embed_query("sum two values").unwrap();
        let raw = engine.vector.nearest(&query, 10).unwrap();

        let hybrid_ids: Vec<&str> = hybrid.iter().map(|r| r.id.as_str()).collect();
        let raw_ids: Vec<&str> = raw.iter().take(3).map(|h| h.id.as_str()).collect();
        assert_eq!(hybrid_ids, raw_ids);
    }

    #[test]
    fn test_alpha_zero_matches_pure_keyword_ranking() {
        let (engine, _dir) = engine_with(&corpus());

        let hybrid = engine.search("sum two values", 3, Some(0.0), None).unwrap();
        let raw = engine.keyword.read().search("sum two values", None);

        let hybrid_ids: Vec<&str> = hybrid.iter().map(|r| r.id.as_str()).collect();
        let raw_ids: Vec<&str> = raw.iter().take(3).map(|(id, _)| id.as_str()).collect();
        assert_eq!(hybrid_ids, raw_ids);
    }

    #[test]
    fn test_path_filter_restricts_both_paths() {
        let (engine, _dir) = engine_with(&corpus());
        let results = engine.search("values config", 5, None, Some("lib/")).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.meta.path.starts_with("lib/")));
    }

    #[test]
    fn test_empty_query_and_empty_index() {
        let (engine, _dir) = engine_with(&corpus());
        assert!(engine.search("", 5, None, None).unwrap().is_empty());
        assert!(engine.search("   ", 5, None, None).unwrap().is_empty());
        assert!(engine.search("anything", 0, None, None).unwrap().is_empty());

        let (empty, _dir2) = engine_with(&[]);
        assert!(empty.search("anything", 5, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_alpha_is_clamped() {
        let (engine, _dir) = engine_with(&corpus());
        let high = engine.search("sum two values", 3, Some(7.5), None).unwrap();
        let one = engine.search("sum two values", 3, Some(1.0), None).unwrap();
        let high_ids: Vec<&str> = high.iter().map(|r| r.id.as_str()).collect();
        let one_ids: Vec<&str> = one.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(high_ids, one_ids);
    }

    #[test]
    fn test_scores_bounded_and_sorted() {
        let (engine, _dir) = engine_with(&corpus());
        let results = engine.search("return values", 3, None, None).unwrap();
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for r in &results {
            assert!((0.0..=1.0).contains(&r.score), "score {} out of range", r.score);
        }
    }

    #[test]
    fn test_all_keyword_matches_enter_fusion() {
        // More matches than the vector candidate pool would hold.
        let records: Vec<CodeRecord> = (0..3 * FLOOR_K)
            .map(|i| {
                record(
                    &format!("r{i:02}"),
                    &format!("handler_{i}"),
                    "src/handlers.py",
                    &format!("def handler_{i}(event):\n    return dispatch(event)"),
                )
            })
            .collect();
        let (engine, _dir) = engine_with(&records);

        let mut candidates = HashMap::new();
        engine.collect_keyword("dispatch event", None, &mut candidates);
        assert_eq!(candidates.len(), 3 * FLOOR_K);
    }

    #[test]
    fn test_snippet_is_bounded() {
        let long = (0..50).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let s = snippet(&long);
        assert!(s.lines().count() <= SNIPPET_MAX_LINES);

        let wide = "x".repeat(1000);
        assert!(snippet(&wide).len() <= SNIPPET_MAX_CHARS);
    }
}
