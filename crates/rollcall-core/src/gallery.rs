//! Enrolled identities: the vector index plus its id→name metadata.
//!
//! The two halves are always mutated together and persisted together.
//! Loading tolerates a damaged index: names survive on their own so ids
//! stay reserved and nobody's enrollment silently disappears.

use crate::store::{LoadError, SearchHit, StoreError, VectorStore};
use crate::types::IdentityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const METADATA_VERSION: u32 = 2;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("identity id {0} is already assigned")]
    DuplicateId(IdentityId),
    #[error("identity name must not be empty")]
    EmptyName,
    #[error("metadata file corrupted: {0}")]
    MetadataCorrupted(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for GalleryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DimensionMismatch { expected, actual } => {
                GalleryError::DimensionMismatch { expected, actual }
            }
            StoreError::DuplicateId(id) => GalleryError::DuplicateId(id),
        }
    }
}

/// Typed id ↔ name mapping. Ids are unique; names may repeat.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    by_id: BTreeMap<IdentityId, String>,
    by_name: BTreeMap<String, Vec<IdentityId>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: IdentityId, name: &str) -> Result<(), GalleryError> {
        if self.by_id.contains_key(&id) {
            return Err(GalleryError::DuplicateId(id));
        }
        self.by_id.insert(id, name.to_string());
        self.by_name.entry(name.to_string()).or_default().push(id);
        Ok(())
    }

    pub fn name(&self, id: IdentityId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// All ids enrolled under `name`, in enrollment order.
    pub fn ids_for(&self, name: &str) -> &[IdentityId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: IdentityId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (IdentityId, &str)> {
        self.by_id.iter().map(|(&id, name)| (id, name.as_str()))
    }

    /// Largest id plus one, or 0 when empty.
    pub fn next_id(&self) -> IdentityId {
        self.by_id
            .keys()
            .next_back()
            .map(|id| IdentityId(id.0 + 1))
            .unwrap_or(IdentityId(0))
    }

    /// Forget `id`, returning its name.
    pub fn remove(&mut self, id: IdentityId) -> Option<String> {
        let name = self.by_id.remove(&id)?;
        if let Some(ids) = self.by_name.get_mut(&name) {
            ids.retain(|&i| i != id);
            if ids.is_empty() {
                self.by_name.remove(&name);
            }
        }
        Some(name)
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_name.clear();
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    version: u32,
    /// Must equal the index header's generation.
    generation: u64,
    identities: Vec<MetadataEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataEntry {
    id: IdentityId,
    name: String,
}

/// Locations of the two gallery files.
#[derive(Debug, Clone)]
pub struct GalleryPaths {
    pub index: PathBuf,
    pub metadata: PathBuf,
}

impl GalleryPaths {
    /// `<dir>/faces.index` and `<dir>/metadata.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            index: dir.join("faces.index"),
            metadata: dir.join("metadata.json"),
        }
    }
}

/// The enrolled population.
#[derive(Debug, Clone)]
pub struct IdentityGallery {
    store: VectorStore,
    names: IdentityMap,
    paths: Option<GalleryPaths>,
    /// Generation of the last persisted (or loaded) file pair.
    generation: u64,
}

impl IdentityGallery {
    /// Empty gallery that is never written to disk.
    pub fn in_memory(dim: usize) -> Self {
        Self {
            store: VectorStore::new(dim),
            names: IdentityMap::new(),
            paths: None,
            generation: 0,
        }
    }

    /// Load the gallery from `paths`, recovering from a missing or damaged index.
    ///
    /// A missing index yields an empty one. A corrupted index, or one built
    /// for another embedding dimension, is replaced by an empty index while
    /// the metadata names are kept. So is an index whose generation differs
    /// from the metadata's, which is what an interrupted persist leaves.
    /// Unreadable metadata is logged and treated as empty. Other I/O
    /// failures propagate.
    pub fn open(paths: GalleryPaths, dim: usize) -> Result<Self, GalleryError> {
        let (names, metadata_generation) = match read_metadata(&paths.metadata) {
            Ok(Some((names, generation))) => (names, Some(generation)),
            Ok(None) => (IdentityMap::new(), None),
            Err(GalleryError::MetadataCorrupted(msg)) => {
                tracing::warn!(
                    path = %paths.metadata.display(),
                    error = %msg,
                    "metadata unreadable; starting without names"
                );
                (IdentityMap::new(), None)
            }
            Err(e) => return Err(e),
        };

        let mut store = match VectorStore::load(&paths.index, dim) {
            Ok(store) => store,
            Err(LoadError::Missing) => VectorStore::new(dim),
            Err(e @ (LoadError::Corrupted(_) | LoadError::DimensionMismatch { .. })) => {
                tracing::warn!(
                    path = %paths.index.display(),
                    error = %e,
                    preserved_names = names.len(),
                    "vector index unusable; rebuilding empty index"
                );
                VectorStore::new(dim)
            }
            Err(LoadError::Io(e)) => return Err(GalleryError::Io(e)),
        };

        if let Some(expected) = metadata_generation {
            if !store.is_empty() && store.generation() != expected {
                tracing::warn!(
                    path = %paths.index.display(),
                    index_generation = store.generation(),
                    metadata_generation = expected,
                    preserved_names = names.len(),
                    "vector index does not belong to metadata; rebuilding empty index"
                );
                store = VectorStore::new(dim);
            }
        }
        let generation = metadata_generation.unwrap_or(0).max(store.generation());

        let dropped = store.retain(|id| names.contains(id));
        if !dropped.is_empty() {
            tracing::warn!(?dropped, "dropped index vectors with no metadata name");
        }

        let gallery = Self {
            store,
            names,
            paths: Some(paths),
            generation,
        };
        tracing::info!(
            enrolled = gallery.len(),
            orphaned = gallery.orphaned().len(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    pub fn dim(&self) -> usize {
        self.store.dim()
    }

    /// Number of identities that can be matched.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn paths(&self) -> Option<&GalleryPaths> {
        self.paths.as_ref()
    }

    pub fn name(&self, id: IdentityId) -> Option<&str> {
        self.names.name(id)
    }

    pub fn embedding(&self, id: IdentityId) -> Option<&[f32]> {
        self.store.get(id)
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.names
    }

    /// Matchable identities in id order.
    pub fn enrolled(&self) -> Vec<(IdentityId, &str)> {
        self.names
            .iter()
            .filter(|(id, _)| self.store.contains(*id))
            .collect()
    }

    /// Named identities whose vector was lost; they keep their id but cannot match.
    pub fn orphaned(&self) -> Vec<(IdentityId, &str)> {
        self.names
            .iter()
            .filter(|(id, _)| !self.store.contains(*id))
            .collect()
    }

    /// Distinct names of matchable identities.
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .enrolled()
            .into_iter()
            .map(|(_, name)| name.to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn next_id(&self) -> IdentityId {
        let from_store = self
            .store
            .ids()
            .iter()
            .max()
            .map(|id| IdentityId(id.0 + 1))
            .unwrap_or(IdentityId(0));
        from_store.max(self.names.next_id())
    }

    /// Add a new identity. The embedding is stored unit-normalized.
    ///
    /// Only mutates memory; call [`persist`](Self::persist) to make it durable.
    pub fn enroll(&mut self, name: &str, embedding: &[f32]) -> Result<IdentityId, GalleryError> {
        if name.trim().is_empty() {
            return Err(GalleryError::EmptyName);
        }
        let id = self.next_id();
        self.store.add(id, embedding)?;
        if let Err(e) = self.names.insert(id, name) {
            self.store.retain(|i| i != id);
            return Err(e);
        }
        tracing::info!(id = id.0, name, "enrolled identity");
        Ok(id)
    }

    /// [`enroll`](Self::enroll) followed by [`persist`](Self::persist).
    ///
    /// If persisting fails the identity is removed from memory again, so
    /// it never becomes matchable without being on disk.
    pub fn enroll_durable(
        &mut self,
        name: &str,
        embedding: &[f32],
    ) -> Result<IdentityId, GalleryError> {
        let id = self.enroll(name, embedding)?;
        if let Err(e) = self.persist() {
            self.store.retain(|i| i != id);
            self.names.remove(id);
            tracing::warn!(id = id.0, name, error = %e, "persist failed; enrollment rolled back");
            return Err(e);
        }
        Ok(id)
    }

    /// Nearest enrolled vector to `query`, or `None` when nothing is enrolled.
    pub fn search(&self, query: &[f32]) -> Result<Option<SearchHit>, GalleryError> {
        Ok(self.store.search(query)?)
    }

    /// Forget every identity. Ids restart at 0.
    pub fn reset(&mut self) {
        let cleared = self.names.len();
        self.store.clear();
        self.names.clear();
        tracing::info!(cleared, "gallery reset");
    }

    /// Write index and metadata under a fresh shared generation. Each file
    /// goes to a temp sibling and is renamed into place, index first; a
    /// crash between the renames leaves mismatched generations, which
    /// [`open`](Self::open) rejects. In-memory galleries are a no-op.
    pub fn persist(&mut self) -> Result<(), GalleryError> {
        let Some(paths) = self.paths.clone() else {
            return Ok(());
        };
        let generation = self.generation + 1;

        let metadata = MetadataFile {
            version: METADATA_VERSION,
            generation,
            identities: self
                .names
                .iter()
                .map(|(id, name)| MetadataEntry {
                    id,
                    name: name.to_string(),
                })
                .collect(),
        };
        let metadata_json = serde_json::to_vec_pretty(&metadata).map_err(std::io::Error::other)?;
        self.store.set_generation(generation);

        for path in [&paths.index, &paths.metadata] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        replace_file(&paths.index, &self.store.to_bytes())?;
        replace_file(&paths.metadata, &metadata_json)?;
        self.generation = generation;

        tracing::debug!(
            index = %paths.index.display(),
            metadata = %paths.metadata.display(),
            identities = self.names.len(),
            generation,
            "gallery persisted"
        );
        Ok(())
    }
}

/// Write `bytes` to a `.tmp` sibling, then rename it over `path`.
fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = tmp_sibling(path);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Names and generation from the metadata file, or `None` if it does not exist.
fn read_metadata(path: &Path) -> Result<Option<(IdentityMap, u64)>, GalleryError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GalleryError::Io(e)),
    };
    let file: MetadataFile = serde_json::from_slice(&bytes)
        .map_err(|e| GalleryError::MetadataCorrupted(e.to_string()))?;
    if file.version != METADATA_VERSION {
        return Err(GalleryError::MetadataCorrupted(format!(
            "unsupported version {}",
            file.version
        )));
    }
    let mut names = IdentityMap::new();
    for entry in file.identities {
        names
            .insert(entry.id, &entry.name)
            .map_err(|e| GalleryError::MetadataCorrupted(e.to_string()))?;
    }
    Ok(Some((names, file.generation)))
}
