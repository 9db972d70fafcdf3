//! Corpus loading: sig examples (JSON Lines) and drug facts (CSV).

use std::fs;
use std::path::Path;

use medsig_core::{StructuredSig, tables};
use serde::Deserialize;
use tracing::info;

use crate::document::{Collection, Document};
use crate::tabular::TextTable;
use crate::StoreError;

/// One JSON Lines record of the sig example corpus.
#[derive(Debug, Deserialize)]
struct SigExampleRecord {
    sig_text: String,
    english_instructions: String,
    structured_instructions: StructuredSig,
}

/// Load the corpus for `collection` from `path`.
pub fn load(collection: Collection, path: &Path) -> Result<Vec<Document>, StoreError> {
    if !path.exists() {
        return Err(StoreError::MissingCorpus(path.to_path_buf()));
    }
    let docs = match collection {
        Collection::SigExamples => load_sig_examples(path)?,
        Collection::MedicalKnowledge => load_medical_knowledge(path)?,
    };
    info!(collection = %collection, path = ?path, documents = docs.len(), "loaded corpus");
    Ok(docs)
}

/// Parse a JSON Lines file; blank lines are skipped.
pub fn load_sig_examples(path: &Path) -> Result<Vec<Document>, StoreError> {
    let text = fs::read_to_string(path)?;
    let mut docs = Vec::new();

    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: SigExampleRecord =
            serde_json::from_str(line).map_err(|e| StoreError::Corpus {
                path: path.to_path_buf(),
                line: i + 1,
                message: e.to_string(),
            })?;
        docs.push(Document::sig_example(
            record.sig_text,
            record.english_instructions,
            record.structured_instructions,
        ));
    }
    Ok(docs)
}

/// Parse the drug-fact CSV, one document per row.
pub fn load_medical_knowledge(path: &Path) -> Result<Vec<Document>, StoreError> {
    let table = TextTable::read(path)?;
    let schema = tables::medical_knowledge_schema();
    let required: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    table.require(&required)?;

    let mut docs = Vec::new();
    for (i, row) in table.rows()?.into_iter().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let bad = |message: String| StoreError::Corpus {
            path: path.to_path_buf(),
            line,
            message,
        };

        let max_daily_intakes: i64 = row
            .get("max_daily_intakes")
            .parse()
            .map_err(|e| bad(format!("max_daily_intakes: {e}")))?;
        let min_interval_hours: f64 = row
            .get("min_interval_hours")
            .parse()
            .map_err(|e| bad(format!("min_interval_hours: {e}")))?;

        docs.push(Document::medical_fact(
            row.get("drug_name"),
            row.get("form"),
            max_daily_intakes,
            min_interval_hours,
            row.get("notes"),
        ));
    }
    Ok(docs)
}
