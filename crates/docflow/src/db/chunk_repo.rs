//! Chunk repository for the `document_chunks` table.

use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde_json::Value;

use super::{now, object_or_empty, DatabaseError};
use crate::model::{DocumentChunk, Payload};

impl DocumentChunk {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let vector: Option<Value> = row.get("vector")?;
        let vector = match vector {
            Some(v) => Some(serde_json::from_value::<Vec<f32>>(v).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
            })?),
            None => None,
        };
        let extra_info: Option<Value> = row.get("extra_info")?;

        Ok(Self {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            document_uuid: row.get("document_uuid")?,
            chunk_index: row.get("chunk_index")?,
            text: row.get("text")?,
            token_count: row.get("token_count")?,
            vector,
            extra_info: object_or_empty(extra_info),
            created_at: row.get("created_at")?,
        })
    }
}

/// A chunk ready to be written. The index is assigned on insert.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub uuid: String,
    pub text: String,
    pub token_count: u32,
    pub extra_info: Payload,
}

/// Writes `chunks` for a document with `chunk_index` 0..N-1 in order.
pub fn insert_all(
    conn: &Connection,
    document_uuid: &str,
    chunks: &[NewChunk],
) -> Result<usize, DatabaseError> {
    let created_at = now();
    let mut stmt = conn.prepare(
        "INSERT INTO document_chunks (uuid, document_uuid, chunk_index, text, token_count,
         vector, extra_info, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7)",
    )?;

    for (index, chunk) in chunks.iter().enumerate() {
        stmt.execute(params![
            chunk.uuid,
            document_uuid,
            index as u32,
            chunk.text,
            chunk.token_count,
            Value::Object(chunk.extra_info.clone()),
            created_at,
        ])?;
    }

    Ok(chunks.len())
}

/// Removes every chunk of a document. Returns the number removed.
pub fn delete_for_document(conn: &Connection, document_uuid: &str) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM document_chunks WHERE document_uuid = ?1",
        [document_uuid],
    )?;
    Ok(removed)
}

pub fn list_for_document(
    conn: &Connection,
    document_uuid: &str,
) -> Result<Vec<DocumentChunk>, DatabaseError> {
    let mut stmt = conn
        .prepare("SELECT * FROM document_chunks WHERE document_uuid = ?1 ORDER BY chunk_index")?;
    let rows = stmt
        .query_map([document_uuid], DocumentChunk::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
