//! LanceDB vector index.
//!
//! One Lance database per collection directory, holding a single table named
//! after the collection: `content` (Utf8), one typed column per metadata key,
//! and a fixed-size `embedding` vector column.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, Float64Array, Int64Array,
    RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use tracing::info;

use crate::document::{Collection, FlatMetadata, MetaValue};
use crate::index::{IndexEntry, IndexHit, VectorIndex};
use crate::StoreError;

const CONTENT: &str = "content";
const EMBEDDING: &str = "embedding";
const DISTANCE: &str = "_distance";

pub struct LanceIndex {
    db: lancedb::Connection,
    table_name: String,
}

impl LanceIndex {
    /// Connect to the database in `dir`, creating the directory if needed.
    /// The table itself is created on the first non-empty add.
    pub async fn open(dir: &Path, collection: Collection) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let uri = dir
            .to_str()
            .ok_or_else(|| StoreError::Other("non-UTF8 database path".into()))?;
        let db = lancedb::connect(uri).execute().await?;
        Ok(Self {
            db,
            table_name: collection.name().to_string(),
        })
    }

    async fn table(&self) -> Result<Option<lancedb::Table>, StoreError> {
        let names = self.db.table_names().execute().await?;
        if !names.contains(&self.table_name) {
            return Ok(None);
        }
        Ok(Some(self.db.open_table(&self.table_name).execute().await?))
    }

    async fn existing_contents(&self, table: &lancedb::Table) -> Result<HashSet<String>, StoreError> {
        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&[CONTENT]))
            .execute()
            .await?
            .try_collect()
            .await?;

        let mut seen = HashSet::new();
        for batch in &batches {
            if let Some(col) = string_column(batch, CONTENT) {
                seen.extend((0..col.len()).map(|i| col.value(i).to_string()));
            }
        }
        Ok(seen)
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<usize, StoreError> {
        let table = self.table().await?;
        let mut seen = match &table {
            Some(t) => self.existing_contents(t).await?,
            None => HashSet::new(),
        };
        let fresh: Vec<IndexEntry> = entries
            .into_iter()
            .filter(|e| seen.insert(e.content.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let added = fresh.len();
        let batch = to_batch(&fresh)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match table {
            Some(t) => {
                t.add(Box::new(reader)).execute().await?;
            }
            None => {
                self.db
                    .create_table(&self.table_name, Box::new(reader))
                    .execute()
                    .await?;
            }
        }

        info!(table = %self.table_name, rows = added, "added rows to LanceDB table");
        Ok(added)
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, StoreError> {
        let Some(table) = self.table().await? else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        let batches: Vec<RecordBatch> = table
            .vector_search(query)?
            .limit(k)
            .execute()
            .await?
            .try_collect()
            .await?;

        let mut hits = Vec::new();
        for batch in &batches {
            hits.extend(from_batch(batch)?);
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        match self.table().await? {
            Some(t) => Ok(t.count_rows(None).await?),
            None => Ok(0),
        }
    }
}

fn to_batch(entries: &[IndexEntry]) -> Result<RecordBatch, StoreError> {
    let Some(first) = entries.first() else {
        return Err(StoreError::Other("no entries to write".into()));
    };
    let dim = first.embedding.len();
    if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dim) {
        return Err(StoreError::Dimension {
            expected: dim,
            got: bad.embedding.len(),
        });
    }

    let mut fields = vec![Field::new(CONTENT, DataType::Utf8, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from_iter_values(
        entries.iter().map(|e| e.content.as_str()),
    ))];

    // Column types come from the first entry; all entries of a collection share keys.
    let template = &first.metadata;
    for (key, sample) in template {
        let values = entries.iter().map(|e| e.metadata.get(key));
        let (data_type, column): (DataType, ArrayRef) = match sample {
            MetaValue::Int(_) => (
                DataType::Int64,
                Arc::new(values.map(|v| match v {
                    Some(MetaValue::Int(n)) => Some(*n),
                    _ => None,
                }).collect::<Int64Array>()),
            ),
            MetaValue::Float(_) => (
                DataType::Float64,
                Arc::new(values.map(|v| match v {
                    Some(MetaValue::Float(x)) => Some(*x),
                    Some(MetaValue::Int(n)) => Some(*n as f64),
                    _ => None,
                }).collect::<Float64Array>()),
            ),
            MetaValue::Str(_) => (
                DataType::Utf8,
                Arc::new(values.map(|v| match v {
                    Some(MetaValue::Str(s)) => Some(s.as_str()),
                    _ => None,
                }).collect::<StringArray>()),
            ),
        };
        fields.push(Field::new(key, data_type, true));
        columns.push(column);
    }

    let values = Float32Array::from_iter_values(entries.iter().flat_map(|e| e.embedding.iter().copied()));
    let item = Arc::new(Field::new("item", DataType::Float32, true));
    let embedding = FixedSizeListArray::try_new(item.clone(), dim as i32, Arc::new(values), None)?;
    fields.push(Field::new(
        EMBEDDING,
        DataType::FixedSizeList(item, dim as i32),
        false,
    ));
    columns.push(Arc::new(embedding));

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

fn from_batch(batch: &RecordBatch) -> Result<Vec<IndexHit>, StoreError> {
    let content = string_column(batch, CONTENT)
        .ok_or_else(|| StoreError::Other("LanceDB result has no content column".into()))?;
    let distance = batch
        .column_by_name(DISTANCE)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let schema = batch.schema();
    let mut hits = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut metadata = FlatMetadata::new();
        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            let name = field.name().as_str();
            if name == CONTENT || name == EMBEDDING || name == DISTANCE || column.is_null(row) {
                continue;
            }
            let any = column.as_any();
            let value = if let Some(a) = any.downcast_ref::<Int64Array>() {
                MetaValue::Int(a.value(row))
            } else if let Some(a) = any.downcast_ref::<Float64Array>() {
                MetaValue::Float(a.value(row))
            } else if let Some(a) = any.downcast_ref::<StringArray>() {
                MetaValue::Str(a.value(row).to_string())
            } else {
                continue;
            };
            metadata.insert(name.to_string(), value);
        }
        hits.push(IndexHit {
            content: content.value(row).to_string(),
            metadata,
            distance: distance.map(|d| d.value(row)).unwrap_or(0.0),
        });
    }
    Ok(hits)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(content: &str, embedding: Vec<f32>, n: i64) -> IndexEntry {
        let mut metadata = FlatMetadata::new();
        metadata.insert("drug_name".into(), MetaValue::Str(content.to_uppercase()));
        metadata.insert("max_daily_intakes".into(), MetaValue::Int(n));
        metadata.insert("min_interval_hours".into(), MetaValue::Float(4.0));
        IndexEntry {
            content: content.into(),
            embedding,
            metadata,
        }
    }

    #[test]
    fn batch_round_trips_metadata() {
        let entries = vec![entry("a", vec![1.0, 0.0], 4), entry("b", vec![0.0, 1.0], 3)];
        let batch = to_batch(&entries).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert!(batch.schema().field_with_name(EMBEDDING).is_ok());

        let hits = from_batch(&batch).unwrap();
        assert_eq!(hits[1].content, "b");
        assert_eq!(hits[1].metadata, entries[1].metadata);
    }

    #[tokio::test]
    async fn open_creates_empty_database() {
        let tmp = TempDir::new().unwrap();
        let index = LanceIndex::open(&tmp.path().join("sig_examples"), Collection::SigExamples)
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
        assert!(index.search(&[1.0, 0.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_dedupes_and_searches() {
        let tmp = TempDir::new().unwrap();
        let index = LanceIndex::open(&tmp.path().join("medical_knowledge"), Collection::MedicalKnowledge)
            .await
            .unwrap();
        let added = index
            .add(vec![
                entry("near", vec![1.0, 0.1], 4),
                entry("far", vec![-1.0, 0.0], 2),
                entry("near", vec![1.0, 0.1], 4),
            ])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(index.add(vec![entry("far", vec![-1.0, 0.0], 2)]).await.unwrap(), 0);
        assert_eq!(index.count().await.unwrap(), 2);

        let hits = index.search(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "near");
        assert_eq!(hits[0].metadata.get("max_daily_intakes"), Some(&MetaValue::Int(4)));
    }
}
