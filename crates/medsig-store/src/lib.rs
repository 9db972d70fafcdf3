//! Knowledge store: corpus loading, embedding, vector indexes, CSV tables.

mod error;
pub use error::StoreError;

pub mod corpus;
pub mod document;
pub mod embed;
mod flat;
pub mod index;
mod knowledge;
pub mod tabular;

#[cfg(feature = "lancedb")]
mod lance;

pub use document::{Collection, Document, FlatMetadata, MetaValue, Metadata};
pub use embed::{Embedder, HashingEmbedder, cosine_similarity};
pub use flat::FlatIndex;
pub use index::{IndexBackend, IndexEntry, IndexHit, VectorIndex};
pub use knowledge::{BuildStats, EMBED_BATCH_SIZE, KnowledgeStore};
#[cfg(feature = "lancedb")]
pub use lance::LanceIndex;
pub use tabular::{OutputTable, read_output_rows, read_prescriptions};
