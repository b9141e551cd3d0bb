// SQLite-backed embedding collection.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::errors::StoreError;
use crate::model::RecordMeta;

type ConnectionPool = Pool<SqliteConnectionManager>;

/// One upsert-ready entry: identifier, vector, document text and flattened
/// metadata.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub document: String,
    pub meta: RecordMeta,
}

/// One nearest-neighbour hit with a non-negative cosine distance.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub distance: f32,
    pub document: String,
    pub meta: RecordMeta,
}

/// Durable embedding collection with upsert/delete by id and brute-force
/// nearest-neighbour search.
#[derive(Clone)]
pub struct VectorStore {
    pool: ConnectionPool,
    db_path: PathBuf,
}

impl VectorStore {
    /// Create or open the store at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        info!("Opening vector store at: {}", db_path.display());
        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder().max_size(8).build(manager)?;

        {
            let conn = pool.get()?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS embeddings (
                    id TEXT PRIMARY KEY,
                    vector BLOB NOT NULL,
                    document TEXT NOT NULL,
                    metadata TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS store_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );",
            )?;
        }

        Ok(Self { pool, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Model identity and dimensionality the collection was built with.
    pub fn model_signature(&self) -> Result<Option<(String, usize)>, StoreError> {
        let conn = self.pool.get()?;
        let model: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'model_id'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let dims: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dims'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match (model, dims.and_then(|d| d.parse().ok())) {
            (Some(model), Some(dims)) => Ok(Some((model, dims))),
            _ => Ok(None),
        }
    }

    /// Apply deletes and upserts as one transaction: the atomic publish for
    /// an indexing run. Also records the model signature.
    pub fn commit_batch(
        &self,
        deletes: &[String],
        upserts: &[VectorEntry],
        model_id: &str,
        dims: usize,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        for id in deletes {
            tx.execute("DELETE FROM embeddings WHERE id = ?1", [id])?;
        }
        for entry in upserts {
            let metadata = serde_json::to_string(&entry.meta)?;
            tx.execute(
                "INSERT OR REPLACE INTO embeddings (id, vector, document, metadata)
                 VALUES (?1, ?2, ?3, ?4)",
                params![entry.id, vec_to_blob(&entry.vector), entry.document, metadata],
            )?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO store_meta (key, value) VALUES ('model_id', ?1)",
            [model_id],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO store_meta (key, value) VALUES ('dims', ?1)",
            [dims.to_string()],
        )?;

        tx.commit()?;
        debug!(
            "Vector store committed: {} deletes, {} upserts",
            deletes.len(),
            upserts.len()
        );
        Ok(())
    }

    /// Brute-force scan for the `k` nearest entries by cosine distance
    /// (`1 - cosine`, clamped to be non-negative). Ties break on id so the
    /// ordering is deterministic.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id, vector, document, metadata FROM embeddings")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let document: String = row.get(2)?;
            let metadata: String = row.get(3)?;
            Ok((id, blob, document, metadata))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, blob, document, metadata) = row?;
            let vector = blob_to_vec(&blob);
            let distance = (1.0 - cosine_similarity(query, &vector)).max(0.0);
            let meta: RecordMeta = serde_json::from_str(&metadata)?;
            hits.push(VectorHit {
                id,
                distance,
                document,
                meta,
            });
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// All identifiers currently in the collection.
    pub fn ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id FROM embeddings ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Drop every embedding, keeping the schema. Used when a model change
    /// invalidates the collection.
    pub fn clear(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM embeddings", [])?;
        conn.execute("DELETE FROM store_meta", [])?;
        Ok(())
    }
}
