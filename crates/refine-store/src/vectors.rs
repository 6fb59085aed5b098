//! Vector collections keyed by `(session, paper)`, stored as f32 BLOBs and
//! searched by brute-force Euclidean distance.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use refine_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;

pub fn f32_slice_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_f32_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Euclidean distance. Vectors of different length compare as infinitely far.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// A chunk of document text with its embedding, ready to store.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddedChunk {
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionInfo {
    pub session_id: String,
    pub paper_id: String,
    pub dimensions: usize,
    pub chunk_count: usize,
    pub created_at: String,
}

/// A search hit. Lower distance is closer.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
    pub chunk_index: usize,
    pub text: String,
    pub distance: f32,
}

pub struct VectorRepo {
    db: Database,
}

impl VectorRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create (or replace) the collection for `(session, paper)`.
    pub fn create(
        &self,
        session_id: &SessionId,
        paper_id: &str,
        chunks: &[EmbeddedChunk],
    ) -> Result<CollectionInfo, StoreError> {
        let info = self.db.with_tx(|tx| {
            delete_collection_in(tx, session_id.as_str(), paper_id)?;
            insert_collection(tx, session_id.as_str(), paper_id, chunks)
        })?;
        info!(
            session_id = %session_id,
            doc_id = paper_id,
            chunks = info.chunk_count,
            "vector collection created"
        );
        Ok(info)
    }

    pub fn exists(&self, session_id: &SessionId, paper_id: &str) -> Result<bool, StoreError> {
        Ok(self.load(session_id, paper_id)?.is_some())
    }

    pub fn load(
        &self,
        session_id: &SessionId,
        paper_id: &str,
    ) -> Result<Option<CollectionInfo>, StoreError> {
        self.db
            .with_conn(|conn| load_collection(conn, session_id.as_str(), paper_id))
    }

    /// Return the existing collection, or build and store one. `build` runs
    /// only when the collection is missing; the check and insert share one
    /// transaction. The flag is true when a collection was created.
    pub fn get_or_create<F>(
        &self,
        session_id: &SessionId,
        paper_id: &str,
        build: F,
    ) -> Result<(CollectionInfo, bool), StoreError>
    where
        F: FnOnce() -> Result<Vec<EmbeddedChunk>, StoreError>,
    {
        self.db.with_tx(|tx| {
            if let Some(existing) = load_collection(tx, session_id.as_str(), paper_id)? {
                debug!(doc_id = paper_id, "vector collection reused");
                return Ok((existing, false));
            }
            let chunks = build()?;
            let info = insert_collection(tx, session_id.as_str(), paper_id, &chunks)?;
            Ok((info, true))
        })
    }

    /// The `top_k` closest chunks, ascending by distance.
    pub fn search(
        &self,
        session_id: &SessionId,
        paper_id: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let info = self
            .load(session_id, paper_id)?
            .ok_or_else(|| StoreError::NotFound(format!("collection {session_id}/{paper_id}")))?;
        if query.len() != info.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: info.dimensions,
                got: query.len(),
            });
        }

        let rows: Vec<(usize, String, Vec<u8>)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_index, text, embedding FROM document_chunks
                 WHERE session_id = ?1 AND paper_id = ?2",
            )?;
            let rows = stmt
                .query_map(params![session_id.as_str(), paper_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)? as usize,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut hits: Vec<ScoredChunk> = rows
            .into_iter()
            .map(|(chunk_index, text, blob)| ScoredChunk {
                distance: euclidean_distance(query, &blob_to_f32_vec(&blob)),
                chunk_index,
                text,
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Returns true when a collection was removed.
    pub fn delete_collection(
        &self,
        session_id: &SessionId,
        paper_id: &str,
    ) -> Result<bool, StoreError> {
        self.db
            .with_tx(|tx| delete_collection_in(tx, session_id.as_str(), paper_id))
    }

    /// Remove every collection of a session. Returns how many were removed.
    pub fn delete_session_collections(&self, session_id: &SessionId) -> Result<usize, StoreError> {
        let removed = self.db.with_tx(|tx| {
            tx.execute(
                "DELETE FROM document_chunks WHERE session_id = ?1",
                [session_id.as_str()],
            )?;
            Ok(tx.execute(
                "DELETE FROM vector_collections WHERE session_id = ?1",
                [session_id.as_str()],
            )?)
        })?;
        info!(session_id = %session_id, removed, "session vector collections deleted");
        Ok(removed)
    }

    pub fn list_collections(&self, session_id: &SessionId) -> Result<Vec<CollectionInfo>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, paper_id, dimensions, chunk_count, created_at
                 FROM vector_collections WHERE session_id = ?1 ORDER BY paper_id",
            )?;
            let rows = stmt
                .query_map([session_id.as_str()], row_to_info)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionInfo> {
    Ok(CollectionInfo {
        session_id: row.get(0)?,
        paper_id: row.get(1)?,
        dimensions: row.get::<_, i64>(2)? as usize,
        chunk_count: row.get::<_, i64>(3)? as usize,
        created_at: row.get(4)?,
    })
}

fn load_collection(
    conn: &Connection,
    session_id: &str,
    paper_id: &str,
) -> Result<Option<CollectionInfo>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT session_id, paper_id, dimensions, chunk_count, created_at
             FROM vector_collections WHERE session_id = ?1 AND paper_id = ?2",
            params![session_id, paper_id],
            row_to_info,
        )
        .optional()?)
}

fn insert_collection(
    conn: &Connection,
    session_id: &str,
    paper_id: &str,
    chunks: &[EmbeddedChunk],
) -> Result<CollectionInfo, StoreError> {
    let dimensions = chunks.first().map_or(0, |c| c.embedding.len());
    if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimensions) {
        return Err(StoreError::DimensionMismatch {
            expected: dimensions,
            got: bad.embedding.len(),
        });
    }

    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO vector_collections (session_id, paper_id, dimensions, chunk_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![session_id, paper_id, dimensions as i64, chunks.len() as i64, created_at],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO document_chunks (session_id, paper_id, chunk_index, text, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (i, chunk) in chunks.iter().enumerate() {
        stmt.execute(params![
            session_id,
            paper_id,
            i as i64,
            chunk.text,
            f32_slice_to_blob(&chunk.embedding),
        ])?;
    }

    Ok(CollectionInfo {
        session_id: session_id.to_string(),
        paper_id: paper_id.to_string(),
        dimensions,
        chunk_count: chunks.len(),
        created_at,
    })
}

fn delete_collection_in(conn: &Connection, session_id: &str, paper_id: &str) -> Result<bool, StoreError> {
    conn.execute(
        "DELETE FROM document_chunks WHERE session_id = ?1 AND paper_id = ?2",
        params![session_id, paper_id],
    )?;
    let removed = conn.execute(
        "DELETE FROM vector_collections WHERE session_id = ?1 AND paper_id = ?2",
        params![session_id, paper_id],
    )?;
    Ok(removed > 0)
}
