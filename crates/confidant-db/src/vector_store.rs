use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use confidant_common::{Error, Result};
use rusqlite::{Connection, params};
use tracing::{info, warn};

use crate::migrations::VECTOR_SCHEMA_V1;

/// A fact embedding keyed by its deterministic id.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub owner_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// Similarity index over memory facts. Every query is scoped to one owner.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the record with the same id.
    async fn upsert(&self, record: VectorRecord) -> Result<()>;

    async fn query(&self, owner_id: &str, embedding: &[f32], top_k: usize)
    -> Result<Vec<VectorMatch>>;

    async fn delete(&self, ids: &[String]) -> Result<()>;
}

/// Vector index stored as little-endian f32 blobs in SQLite, scored with
/// cosine similarity in process.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening vector index at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open vector database: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(VECTOR_SCHEMA_V1.sql)
            .map_err(|e| Error::Database(format!("vector migration failed: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("vector index lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, record: VectorRecord) -> Result<()> {
        if record.embedding.is_empty() {
            return Err(Error::Database("refusing to index an empty embedding".into()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO fact_vectors (id, owner_id, text, dimensions, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
               owner_id = excluded.owner_id,
               text = excluded.text,
               dimensions = excluded.dimensions,
               embedding = excluded.embedding",
            params![
                record.id,
                record.owner_id,
                record.text,
                record.embedding.len() as i64,
                encode_f32_blob(&record.embedding)
            ],
        )
        .map_err(|e| Error::Database(format!("failed to upsert vector: {e}")))?;
        Ok(())
    }

    async fn query(
        &self,
        owner_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        if embedding.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, text, dimensions, embedding
                 FROM fact_vectors
                 WHERE owner_id = ?1 AND dimensions = ?2",
            )
            .map_err(|e| Error::Database(format!("failed to prepare vector query: {e}")))?;

        let rows = stmt
            .query_map(params![owner_id, embedding.len() as i64], |row| {
                let blob: Vec<u8> = row.get(3)?;
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, blob))
            })
            .map_err(|e| Error::Database(format!("failed to query vectors: {e}")))?;

        let mut matches = Vec::new();
        for row in rows {
            let (id, text, blob) =
                row.map_err(|e| Error::Database(format!("failed to read vector row: {e}")))?;
            let Some(stored) = decode_f32_blob(&blob) else {
                warn!("skipping malformed vector blob for '{id}'");
                continue;
            };
            matches.push(VectorMatch {
                id,
                text,
                score: cosine_similarity(embedding, &stored),
            });
        }

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let conn = self.lock()?;
        for id in ids {
            conn.execute("DELETE FROM fact_vectors WHERE id = ?1", params![id])
                .map_err(|e| Error::Database(format!("failed to delete vector: {e}")))?;
        }
        Ok(())
    }
}

fn encode_f32_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_f32_blob(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, owner: &str, text: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            owner_id: owner.to_string(),
            text: text.to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn query_is_scoped_to_owner() {
        let index = SqliteVectorIndex::in_memory().expect("index");
        index
            .upsert(record("a_1", "asha", "You live in Pune", vec![1.0, 0.0]))
            .await
            .expect("upsert");
        index
            .upsert(record("b_1", "ravi", "You live in Delhi", vec![1.0, 0.0]))
            .await
            .expect("upsert");

        let hits = index.query("asha", &[1.0, 0.0], 3).await.expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "You live in Pune");
    }

    #[tokio::test]
    async fn results_are_ranked_and_truncated() {
        let index = SqliteVectorIndex::in_memory().expect("index");
        index
            .upsert(record("1", "asha", "far", vec![0.0, 1.0]))
            .await
            .expect("upsert");
        index
            .upsert(record("2", "asha", "near", vec![0.9, 0.1]))
            .await
            .expect("upsert");
        index
            .upsert(record("3", "asha", "exact", vec![1.0, 0.0]))
            .await
            .expect("upsert");

        let hits = index.query("asha", &[1.0, 0.0], 2).await.expect("query");
        let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["exact", "near"]);
    }

    #[tokio::test]
    async fn upsert_with_same_id_replaces() {
        let index = SqliteVectorIndex::in_memory().expect("index");
        index
            .upsert(record("a_1", "asha", "old", vec![1.0, 0.0]))
            .await
            .expect("upsert");
        index
            .upsert(record("a_1", "asha", "new", vec![1.0, 0.0]))
            .await
            .expect("upsert");

        let hits = index.query("asha", &[1.0, 0.0], 5).await.expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "new");
    }

    #[tokio::test]
    async fn delete_removes_by_id() {
        let index = SqliteVectorIndex::in_memory().expect("index");
        index
            .upsert(record("a_1", "asha", "fact", vec![1.0]))
            .await
            .expect("upsert");
        index.delete(&["a_1".to_string()]).await.expect("delete");
        assert!(index.query("asha", &[1.0], 3).await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_ignored() {
        let index = SqliteVectorIndex::in_memory().expect("index");
        index
            .upsert(record("a_1", "asha", "fact", vec![1.0, 0.0, 0.0]))
            .await
            .expect("upsert");
        assert!(index.query("asha", &[1.0, 0.0], 3).await.expect("query").is_empty());
    }

    #[test]
    fn blob_encoding_preserves_values() {
        let values = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_f32_blob(&encode_f32_blob(&values)), Some(values));
        assert_eq!(decode_f32_blob(&[0, 1, 2]), None);
    }
}
