//! Knowledge store: build, persist and query the two retrieval collections.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::corpus;
use crate::document::{Collection, Document, Metadata};
use crate::embed::Embedder;
use crate::index::{IndexBackend, IndexEntry, VectorIndex};
use crate::StoreError;

/// Texts sent to the embedder per request during a build.
pub const EMBED_BATCH_SIZE: usize = 32;

/// Summary of one collection build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildStats {
    pub collection: Collection,
    /// Documents read from the corpus.
    pub loaded: usize,
    /// Documents newly inserted (duplicates of stored content are skipped).
    pub added: usize,
    /// Entries in the index after the build.
    pub total: usize,
    pub elapsed_secs: f64,
}

/// Vector-indexed knowledge, one index per [`Collection`] under `root`.
///
/// Read-only once built; clones of the `Arc` can be shared across tasks.
pub struct KnowledgeStore {
    root: PathBuf,
    backend: IndexBackend,
    embedder: Arc<dyn Embedder>,
    open: RwLock<HashMap<Collection, Arc<dyn VectorIndex>>>,
}

impl KnowledgeStore {
    pub fn new(root: impl Into<PathBuf>, backend: IndexBackend, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            root: root.into(),
            backend,
            embedder,
            open: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backend(&self) -> IndexBackend {
        self.backend
    }

    pub fn collection_dir(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.name())
    }

    /// Embed the corpus at `corpus_path` into `collection`.
    ///
    /// With `rebuild`, any existing index is replaced; otherwise only
    /// documents whose content is not stored yet are added. A missing corpus
    /// fails before anything on disk is touched.
    pub async fn build(
        &self,
        collection: Collection,
        corpus_path: &Path,
        rebuild: bool,
    ) -> Result<BuildStats, StoreError> {
        if !corpus_path.exists() {
            return Err(StoreError::MissingCorpus(corpus_path.to_path_buf()));
        }
        let start = Instant::now();
        fs::create_dir_all(&self.root)?;
        let _lock = BuildLock::acquire(&self.root, collection)?;

        let docs = corpus::load(collection, corpus_path)?;
        let dir = self.collection_dir(collection);

        self.open.write().await.remove(&collection);
        if rebuild && dir.exists() {
            info!(collection = %collection, dir = ?dir, "removing existing index");
            fs::remove_dir_all(&dir)?;
        }
        let index: Arc<dyn VectorIndex> = if self.backend.exists(&dir) {
            let index: Arc<dyn VectorIndex> = Arc::from(self.backend.open(&dir, collection).await?);
            self.check_embedder(collection, &index)?;
            index
        } else {
            Arc::from(
                self.backend
                    .create(&dir, collection, self.embedder.name())
                    .await?,
            )
        };

        let mut added = 0;
        for chunk in docs.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<&str> = chunk.iter().map(|d| d.content.as_str()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != chunk.len() {
                return Err(StoreError::Embedding(format!(
                    "expected {} vectors, got {}",
                    chunk.len(),
                    vectors.len()
                )));
            }
            let entries = chunk
                .iter()
                .zip(vectors)
                .map(|(doc, embedding)| IndexEntry {
                    content: doc.content.clone(),
                    embedding,
                    metadata: doc.metadata.to_flat(),
                })
                .collect();
            added += index.add(entries).await?;
            debug!(collection = %collection, added, "embedded batch");
        }

        let total = index.count().await?;
        self.open.write().await.insert(collection, index);

        let stats = BuildStats {
            collection,
            loaded: docs.len(),
            added,
            total,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            collection = %collection,
            backend = self.backend.name(),
            loaded = stats.loaded,
            added = stats.added,
            total = stats.total,
            elapsed_secs = stats.elapsed_secs,
            "built collection"
        );
        Ok(stats)
    }

    /// The `k` documents nearest to `query`, closest first, without duplicates.
    pub async fn retrieve(
        &self,
        collection: Collection,
        query: &str,
        k: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let index = self.index(collection).await?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        let hits = index.search(&vector, k).await?;

        let mut docs = Vec::with_capacity(hits.len());
        for hit in hits {
            let metadata = Metadata::from_flat(collection, &hit.metadata)?;
            docs.push(Document {
                content: hit.content,
                metadata,
            });
        }
        debug!(collection = %collection, k, returned = docs.len(), "retrieved");
        Ok(docs)
    }

    /// Number of stored entries; [`StoreError::StoreNotFound`] if never built.
    pub async fn count(&self, collection: Collection) -> Result<usize, StoreError> {
        self.index(collection).await?.count().await
    }

    async fn index(&self, collection: Collection) -> Result<Arc<dyn VectorIndex>, StoreError> {
        if let Some(index) = self.open.read().await.get(&collection) {
            return Ok(Arc::clone(index));
        }
        let index: Arc<dyn VectorIndex> =
            Arc::from(self.backend.open(&self.collection_dir(collection), collection).await?);
        self.check_embedder(collection, &index)?;
        self.open
            .write()
            .await
            .insert(collection, Arc::clone(&index));
        Ok(index)
    }

    fn check_embedder(
        &self,
        collection: Collection,
        index: &Arc<dyn VectorIndex>,
    ) -> Result<(), StoreError> {
        match index.embedder() {
            Some(built_with) if built_with != self.embedder.name() => {
                Err(StoreError::EmbedderMismatch {
                    collection: collection.name().to_string(),
                    built_with,
                    using: self.embedder.name().to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Exclusive build marker: `<root>/<collection>.lock`, removed on drop.
struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    fn acquire(root: &Path, collection: Collection) -> Result<Self, StoreError> {
        let path = root.join(format!("{}.lock", collection.name()));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::BuildInProgress {
                collection: collection.name().to_string(),
                lock: path,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = ?self.path, error = %e, "failed to remove build lock");
        }
    }
}
