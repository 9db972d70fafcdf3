//! Vector index abstraction and backend selection.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{Collection, FlatMetadata};
use crate::flat::FlatIndex;
use crate::StoreError;

/// An embedded document ready for insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: FlatMetadata,
}

/// A search result. Lower `distance` is closer.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub content: String,
    pub metadata: FlatMetadata,
    pub distance: f32,
}

/// Persistent nearest-neighbour index for one collection.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert entries whose content is not already present. Returns the
    /// number actually added.
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<usize, StoreError>;

    /// Up to `k` nearest entries, closest first, each stored entry at most once.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Name of the embedder the index was built with, when recorded.
    fn embedder(&self) -> Option<String> {
        None
    }
}

/// Which index implementation backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexBackend {
    /// JSON file with exact cosine search.
    #[default]
    Flat,
    /// LanceDB table (requires the `lancedb` feature).
    Lance,
}

impl IndexBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Lance => "lance",
        }
    }

    /// True if an index for `collection` already exists under `dir`.
    pub fn exists(&self, dir: &Path) -> bool {
        match self {
            Self::Flat => FlatIndex::exists(dir),
            Self::Lance => dir.is_dir(),
        }
    }

    /// Create an empty index in `dir`, which must not hold one already.
    pub async fn create(
        &self,
        dir: &Path,
        collection: Collection,
        embedder: &str,
    ) -> Result<Box<dyn VectorIndex>, StoreError> {
        match self {
            Self::Flat => Ok(Box::new(FlatIndex::create(dir, collection, embedder)?)),
            Self::Lance => lance_open(dir, collection).await,
        }
    }

    /// Open the index in `dir`; [`StoreError::StoreNotFound`] if absent.
    pub async fn open(
        &self,
        dir: &Path,
        collection: Collection,
    ) -> Result<Box<dyn VectorIndex>, StoreError> {
        if !self.exists(dir) {
            return Err(StoreError::StoreNotFound(collection.name().to_string()));
        }
        match self {
            Self::Flat => Ok(Box::new(FlatIndex::open(dir)?)),
            Self::Lance => lance_open(dir, collection).await,
        }
    }
}

#[cfg(feature = "lancedb")]
async fn lance_open(dir: &Path, collection: Collection) -> Result<Box<dyn VectorIndex>, StoreError> {
    Ok(Box::new(crate::lance::LanceIndex::open(dir, collection).await?))
}

#[cfg(not(feature = "lancedb"))]
async fn lance_open(_dir: &Path, _collection: Collection) -> Result<Box<dyn VectorIndex>, StoreError> {
    Err(StoreError::Other(
        "lance index backend requires building with the `lancedb` feature".into(),
    ))
}

impl FromStr for IndexBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "lance" | "lancedb" => Ok(Self::Lance),
            other => Err(format!("unknown index backend {other:?} (expected flat or lance)")),
        }
    }
}
