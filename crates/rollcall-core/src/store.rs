//! Flat inner-product vector index.
//!
//! Holds `(id, unit-normalized embedding)` pairs and answers exhaustive
//! nearest-neighbor queries. The on-disk format is a small little-endian
//! binary file:
//!
//! ```text
//! "RCIX" | version: u32 | dim: u32 | count: u32 | generation: u64
//!        | count × (id: i64, dim × f32)
//! ```
//!
//! `generation` is written by the gallery and must equal the one in its
//! metadata file; the store itself only carries it.

use crate::types::{dot, normalized, IdentityId};
use std::path::Path;
use thiserror::Error;

const INDEX_MAGIC: &[u8; 4] = b"RCIX";
const INDEX_VERSION: u32 = 2;
const HEADER_LEN: usize = 24;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("id {0} is already present in the index")]
    DuplicateId(IdentityId),
}

/// Why an index file could not be loaded.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("index file not found")]
    Missing,
    #[error("index file corrupted: {0}")]
    Corrupted(String),
    #[error("index built for {actual}-dim embeddings, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Best candidate returned by [`VectorStore::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: IdentityId,
    /// Inner product between the normalized query and the stored vector.
    pub score: f32,
}

/// Exhaustive inner-product index over unit vectors.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dim: usize,
    generation: u64,
    ids: Vec<IdentityId>,
    /// Row-major, `ids.len() * dim` values.
    vectors: Vec<f32>,
}

impl VectorStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            generation: 0,
            ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: IdentityId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> &[IdentityId] {
        &self.ids
    }

    /// Stored (normalized) vector for `id`.
    pub fn get(&self, id: IdentityId) -> Option<&[f32]> {
        let row = self.ids.iter().position(|&i| i == id)?;
        Some(self.row(row))
    }

    fn row(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dim..(row + 1) * self.dim]
    }

    fn check_dim(&self, values: &[f32]) -> Result<(), StoreError> {
        if values.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: values.len(),
            });
        }
        Ok(())
    }

    /// Normalize and append `embedding` under `id`.
    pub fn add(&mut self, id: IdentityId, embedding: &[f32]) -> Result<(), StoreError> {
        self.check_dim(embedding)?;
        if self.contains(id) {
            return Err(StoreError::DuplicateId(id));
        }
        self.ids.push(id);
        self.vectors.extend(normalized(embedding));
        Ok(())
    }

    /// Drop every entry whose id fails `keep`. Returns the removed ids.
    pub fn retain(&mut self, mut keep: impl FnMut(IdentityId) -> bool) -> Vec<IdentityId> {
        let mut ids = Vec::with_capacity(self.ids.len());
        let mut vectors = Vec::with_capacity(self.vectors.len());
        let mut removed = Vec::new();
        for (row, &id) in self.ids.iter().enumerate() {
            if keep(id) {
                ids.push(id);
                vectors.extend_from_slice(self.row(row));
            } else {
                removed.push(id);
            }
        }
        self.ids = ids;
        self.vectors = vectors;
        removed
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.vectors.clear();
    }

    /// Best inner-product match for `query` after normalization.
    ///
    /// Returns `Ok(None)` when the index is empty. On equal scores the
    /// earliest inserted entry wins.
    pub fn search(&self, query: &[f32]) -> Result<Option<SearchHit>, StoreError> {
        self.check_dim(query)?;
        let query = normalized(query);

        let mut best: Option<SearchHit> = None;
        for (row, &id) in self.ids.iter().enumerate() {
            let score = dot(&query, self.row(row));
            let is_better = match best {
                None => true,
                Some(prev) => score > prev.score,
            };
            if is_better {
                best = Some(SearchHit { id, score });
            }
        }
        Ok(best)
    }

    /// Serialize the whole index.
    pub fn to_bytes(&self) -> Vec<u8> {
        let record_len = 8 + self.dim * 4;
        let mut out = Vec::with_capacity(HEADER_LEN + self.ids.len() * record_len);
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dim as u32).to_le_bytes());
        out.extend_from_slice(&(self.ids.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.generation.to_le_bytes());
        for (row, id) in self.ids.iter().enumerate() {
            out.extend_from_slice(&id.0.to_le_bytes());
            for value in self.row(row) {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        out
    }

    /// Parse an index produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8], expected_dim: usize) -> Result<Self, LoadError> {
        if bytes.len() < HEADER_LEN {
            return Err(LoadError::Corrupted(format!(
                "truncated header ({} bytes)",
                bytes.len()
            )));
        }
        if &bytes[0..4] != INDEX_MAGIC {
            return Err(LoadError::Corrupted("bad magic".into()));
        }
        let version = read_u32(bytes, 4);
        if version != INDEX_VERSION {
            return Err(LoadError::Corrupted(format!("unsupported version {version}")));
        }
        let dim = read_u32(bytes, 8) as usize;
        let count = read_u32(bytes, 12) as usize;
        let mut generation = [0u8; 8];
        generation.copy_from_slice(&bytes[16..24]);
        if dim != expected_dim {
            return Err(LoadError::DimensionMismatch {
                expected: expected_dim,
                actual: dim,
            });
        }

        let record_len = 8 + dim * 4;
        let expected_len = count
            .checked_mul(record_len)
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| LoadError::Corrupted("record count overflows".into()))?;
        if bytes.len() != expected_len {
            return Err(LoadError::Corrupted(format!(
                "expected {expected_len} bytes for {count} records, got {}",
                bytes.len()
            )));
        }

        let mut store = Self::new(dim);
        store.generation = u64::from_le_bytes(generation);
        store.vectors.reserve(count * dim);
        for record in bytes[HEADER_LEN..].chunks_exact(record_len) {
            let mut id_bytes = [0u8; 8];
            id_bytes.copy_from_slice(&record[..8]);
            let id = IdentityId(i64::from_le_bytes(id_bytes));
            if store.contains(id) {
                return Err(LoadError::Corrupted(format!("duplicate id {id}")));
            }
            for chunk in record[8..].chunks_exact(4) {
                let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                if !value.is_finite() {
                    return Err(LoadError::Corrupted(format!(
                        "non-finite value in vector {id}"
                    )));
                }
                store.vectors.push(value);
            }
            store.ids.push(id);
        }
        Ok(store)
    }

    /// Read an index file.
    pub fn load(path: &Path, expected_dim: usize) -> Result<Self, LoadError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(LoadError::Missing),
            Err(e) => return Err(LoadError::Io(e)),
        };
        Self::from_bytes(&bytes, expected_dim)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
