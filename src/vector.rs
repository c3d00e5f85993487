//! Embedding storage and cosine similarity search.
//!
//! The `vector` extension is provided by this crate itself: creating it
//! registers `vec_distance_cosine(a, b)` on the session connection. Vectors
//! are stored as JSON arrays of numbers.

use rusqlite::Connection;
use rusqlite::functions::{Context, FunctionFlags};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::error::{Result, TreeplexError};
use crate::persist::TenantConnection;

pub const EXTENSION: &str = "vector";
pub const DISTANCE_FUNCTION: &str = "vec_distance_cosine";

pub fn register_functions(connection: &Connection) -> rusqlite::Result<()> {
    connection.create_scalar_function(
        DISTANCE_FUNCTION,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        distance,
    )
}

fn distance(ctx: &Context<'_>) -> rusqlite::Result<Option<f64>> {
    let (Some(a), Some(b)) = (ctx.get::<Option<String>>(0)?, ctx.get::<Option<String>>(1)?) else {
        return Ok(None);
    };
    let a = parse_vector(&a).map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
    let b = parse_vector(&b).map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
    Ok(cosine_distance(&a, &b))
}

pub fn parse_vector(text: &str) -> std::result::Result<Vec<f64>, String> {
    serde_json::from_str::<Vec<f64>>(text).map_err(|e| format!("not a vector: {}", e))
}

/// `1 - cos(a, b)`, or `None` when the lengths differ or either vector has
/// zero magnitude.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(1.0 - dot / (norm_a.sqrt() * norm_b.sqrt()))
}

fn validate(vector: &[f64]) -> Result<()> {
    if vector.is_empty() {
        return Err(TreeplexError::InvalidArgument("vector is empty".into()));
    }
    if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
        return Err(TreeplexError::InvalidArgument(format!(
            "vector component {} is not finite",
            position
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorMatch {
    pub handle: String,
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Json>,
}

#[derive(Debug, Clone)]
pub struct VectorApi {
    connection: TenantConnection,
}

impl VectorApi {
    pub fn new(connection: TenantConnection) -> Self {
        Self { connection }
    }

    fn dimension_of(&self, kind: &str, except_handle: Option<&str>) -> Result<Option<usize>> {
        self.connection.query_optional(
            "select dimension from embedding
              where embedding_kind = ?1 and handle <> coalesce(?2, '')
              limit 1",
            rusqlite::params![kind, except_handle],
            |row| row.get::<_, i64>(0).map(|d| d as usize),
        )
    }

    /// Stores or replaces the `kind` embedding of `handle`. Returns whether a
    /// row was written.
    pub fn store_embedding(&self, handle: &str, kind: &str, vector: &[f64], metadata: Option<&Json>) -> Result<bool> {
        if handle.trim().is_empty() || kind.trim().is_empty() {
            return Err(TreeplexError::InvalidArgument("handle and embedding kind are required".into()));
        }
        validate(vector)?;
        if let Some(dimension) = self.dimension_of(kind, Some(handle))? {
            if dimension != vector.len() {
                return Err(TreeplexError::InvalidArgument(format!(
                    "{} embeddings have dimension {}, got {}",
                    kind,
                    dimension,
                    vector.len()
                )));
            }
        }
        let encoded = serde_json::to_string(vector).map_err(|e| TreeplexError::InvalidArgument(e.to_string()))?;
        let metadata = metadata.map(Json::to_string);
        let written = self.connection.execute(
            "insert into embedding (handle, embedding_kind, dimension, vector, metadata)
             values (?1, ?2, ?3, ?4, ?5)
             on conflict(handle, embedding_kind) do update set
                dimension = excluded.dimension,
                vector = excluded.vector,
                metadata = excluded.metadata",
            rusqlite::params![handle, kind, vector.len() as i64, encoded, metadata],
        )?;
        debug!(handle, kind, dimension = vector.len(), "stored embedding");
        Ok(written > 0)
    }

    /// Embeddings of `kind` whose cosine similarity to `query` is at least
    /// `threshold`, most similar first.
    pub fn similarity_search(&self, query: &[f64], kind: &str, limit: usize, threshold: f64) -> Result<Vec<VectorMatch>> {
        validate(query)?;
        if !threshold.is_finite() {
            return Err(TreeplexError::InvalidArgument("threshold is not finite".into()));
        }
        match self.dimension_of(kind, None)? {
            None => return Ok(Vec::new()),
            Some(dimension) if dimension != query.len() => {
                return Err(TreeplexError::InvalidArgument(format!(
                    "{} embeddings have dimension {}, query has {}",
                    kind,
                    dimension,
                    query.len()
                )));
            }
            Some(_) => {}
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let encoded = serde_json::to_string(query).map_err(|e| TreeplexError::InvalidArgument(e.to_string()))?;
        let rows = self.connection.query(
            "select handle, similarity, metadata from (
                select handle, 1.0 - vec_distance_cosine(vector, ?1) as similarity, metadata
                  from embedding
                 where embedding_kind = ?2
             )
             where similarity >= ?3
             order by similarity desc, handle
             limit ?4",
            rusqlite::params![encoded, kind, threshold, limit as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )?;
        Ok(rows
            .into_iter()
            .map(|(handle, similarity, metadata)| VectorMatch {
                handle,
                similarity,
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            })
            .collect())
    }
}
