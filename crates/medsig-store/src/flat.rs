//! Flat vector index: one JSON file per collection, exact cosine search.

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::Collection;
use crate::embed::cosine_similarity;
use crate::index::{IndexEntry, IndexHit, VectorIndex};
use crate::tabular::write_atomic;
use crate::StoreError;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Serialize, Deserialize)]
struct FlatFile {
    collection: String,
    embedder: String,
    dim: Option<usize>,
    entries: Vec<IndexEntry>,
}

/// In-memory entries mirrored to `<dir>/index.json` on every write.
pub struct FlatIndex {
    path: PathBuf,
    state: Mutex<FlatFile>,
}

impl FlatIndex {
    pub fn exists(dir: &Path) -> bool {
        dir.join(INDEX_FILE).is_file()
    }

    pub fn create(dir: &Path, collection: Collection, embedder: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let index = Self {
            path: dir.join(INDEX_FILE),
            state: Mutex::new(FlatFile {
                collection: collection.name().to_string(),
                embedder: embedder.to_string(),
                dim: None,
                entries: Vec::new(),
            }),
        };
        {
            let state = index.lock()?;
            index.persist(&state)?;
        }
        Ok(index)
    }

    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(INDEX_FILE);
        let file: FlatFile = serde_json::from_slice(&fs::read(&path)?)?;
        debug!(path = ?path, entries = file.entries.len(), "opened flat index");
        Ok(Self {
            path,
            state: Mutex::new(file),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FlatFile>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Other("flat index lock poisoned".into()))
    }

    fn persist(&self, file: &FlatFile) -> Result<(), StoreError> {
        write_atomic(&self.path, |f| {
            let mut w = BufWriter::new(f);
            serde_json::to_writer(&mut w, file)?;
            w.flush()?;
            Ok(())
        })
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let mut seen: HashSet<String> = state.entries.iter().map(|e| e.content.clone()).collect();

        let Some(dim) = state.dim.or(entries.first().map(|e| e.embedding.len())) else {
            return Ok(0);
        };
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dim) {
            return Err(StoreError::Dimension {
                expected: dim,
                got: bad.embedding.len(),
            });
        }
        state.dim = Some(dim);

        let mut added = 0;
        for entry in entries {
            if seen.insert(entry.content.clone()) {
                state.entries.push(entry);
                added += 1;
            }
        }

        if added > 0 {
            self.persist(&state)?;
        }
        Ok(added)
    }

    fn embedder(&self) -> Option<String> {
        self.lock().ok().map(|state| state.embedder.clone())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, StoreError> {
        let state = self.lock()?;
        if let Some(dim) = state.dim
            && query.len() != dim
        {
            return Err(StoreError::Dimension {
                expected: dim,
                got: query.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexEntry)> = state
            .entries
            .iter()
            .map(|e| (1.0 - cosine_similarity(query, &e.embedding), e))
            .collect();
        // Stable: equal distances keep insertion order.
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, e)| IndexHit {
                content: e.content.clone(),
                metadata: e.metadata.clone(),
                distance,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FlatMetadata, MetaValue};
    use tempfile::TempDir;

    fn entry(content: &str, embedding: Vec<f32>) -> IndexEntry {
        let mut metadata = FlatMetadata::new();
        metadata.insert("tag".into(), MetaValue::Str(content.to_uppercase()));
        IndexEntry {
            content: content.into(),
            embedding,
            metadata,
        }
    }

    #[tokio::test]
    async fn add_dedupes_and_persists() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("sig_examples");
        let index = FlatIndex::create(&dir, Collection::SigExamples, "test").unwrap();

        let added = index
            .add(vec![
                entry("a", vec![1.0, 0.0]),
                entry("b", vec![0.0, 1.0]),
                entry("a", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(index.add(vec![entry("b", vec![0.0, 1.0])]).await.unwrap(), 0);

        let reopened = FlatIndex::open(&dir).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn search_orders_by_distance() {
        let tmp = TempDir::new().unwrap();
        let index = FlatIndex::create(tmp.path(), Collection::SigExamples, "test").unwrap();
        index
            .add(vec![
                entry("far", vec![-1.0, 0.0]),
                entry("near", vec![1.0, 0.1]),
                entry("mid", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(names, ["near", "mid"]);
        assert!(hits[0].distance <= hits[1].distance);
        assert_eq!(hits[0].metadata.get("tag"), Some(&MetaValue::Str("NEAR".into())));

        assert!(index.search(&[1.0, 0.0], 0).await.unwrap().is_empty());
        assert_eq!(index.search(&[1.0, 0.0], 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let index = FlatIndex::create(tmp.path(), Collection::SigExamples, "test").unwrap();
        index.add(vec![entry("a", vec![1.0, 0.0])]).await.unwrap();
        assert!(matches!(
            index.add(vec![entry("b", vec![1.0])]).await,
            Err(StoreError::Dimension { expected: 2, got: 1 })
        ));
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1).await,
            Err(StoreError::Dimension { .. })
        ));
    }
}
