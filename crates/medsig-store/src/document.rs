//! Retrieval units and their typed metadata.
//!
//! Vector indexes only hold scalar metadata, so nested values (the structured
//! sig of an example) are serialised to JSON strings on the way in and parsed
//! back on the way out. Callers only ever see [`Metadata`].

use std::collections::BTreeMap;
use std::fmt;

use medsig_core::StructuredSig;
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// The two knowledge collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Example sig → translation pairs.
    SigExamples,
    /// Drug reference facts.
    MedicalKnowledge,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::SigExamples, Collection::MedicalKnowledge];

    /// Collection name; also the directory and table name of its index.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SigExamples => "sig_examples",
            Self::MedicalKnowledge => "medical_knowledge",
        }
    }

    /// Default corpus file name inside the data directory.
    pub fn corpus_file(&self) -> &'static str {
        match self {
            Self::SigExamples => "sig_examples.jsonl",
            Self::MedicalKnowledge => "medical_knowledge.csv",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar metadata value as stored by an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    Str(String),
}

/// Flat, scalar-only metadata map.
pub type FlatMetadata = BTreeMap<String, MetaValue>;

/// Typed metadata, one variant per collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    SigExample {
        english_instructions: String,
        structured: StructuredSig,
    },
    MedicalFact {
        drug_name: String,
        form: String,
        max_daily_intakes: i64,
        min_interval_hours: f64,
        notes: String,
    },
}

const ENGLISH: &str = "english_instructions";
const STRUCTURED: &str = "structured_instructions";

impl Metadata {
    pub fn collection(&self) -> Collection {
        match self {
            Self::SigExample { .. } => Collection::SigExamples,
            Self::MedicalFact { .. } => Collection::MedicalKnowledge,
        }
    }

    /// Flatten for storage; the structured sig becomes a JSON string.
    pub fn to_flat(&self) -> FlatMetadata {
        let mut map = FlatMetadata::new();
        match self {
            Self::SigExample {
                english_instructions,
                structured,
            } => {
                map.insert(ENGLISH.into(), MetaValue::Str(english_instructions.clone()));
                map.insert(STRUCTURED.into(), MetaValue::Str(structured.to_json()));
            }
            Self::MedicalFact {
                drug_name,
                form,
                max_daily_intakes,
                min_interval_hours,
                notes,
            } => {
                map.insert("drug_name".into(), MetaValue::Str(drug_name.clone()));
                map.insert("form".into(), MetaValue::Str(form.clone()));
                map.insert("max_daily_intakes".into(), MetaValue::Int(*max_daily_intakes));
                map.insert(
                    "min_interval_hours".into(),
                    MetaValue::Float(*min_interval_hours),
                );
                map.insert("notes".into(), MetaValue::Str(notes.clone()));
            }
        }
        map
    }

    /// Rebuild typed metadata from a stored flat map.
    pub fn from_flat(collection: Collection, map: &FlatMetadata) -> Result<Self, StoreError> {
        let missing = |key: &str| StoreError::Metadata {
            collection: collection.name().to_string(),
            key: key.to_string(),
        };
        let text = |key: &str| match map.get(key) {
            Some(MetaValue::Str(s)) => Ok(s.clone()),
            _ => Err(missing(key)),
        };

        match collection {
            Collection::SigExamples => {
                let structured: StructuredSig = serde_json::from_str(&text(STRUCTURED)?)?;
                Ok(Self::SigExample {
                    english_instructions: text(ENGLISH)?,
                    structured,
                })
            }
            Collection::MedicalKnowledge => {
                let max_daily_intakes = match map.get("max_daily_intakes") {
                    Some(MetaValue::Int(n)) => *n,
                    _ => return Err(missing("max_daily_intakes")),
                };
                let min_interval_hours = match map.get("min_interval_hours") {
                    Some(MetaValue::Float(h)) => *h,
                    Some(MetaValue::Int(h)) => *h as f64,
                    _ => return Err(missing("min_interval_hours")),
                };
                Ok(Self::MedicalFact {
                    drug_name: text("drug_name")?,
                    form: text("form")?,
                    max_daily_intakes,
                    min_interval_hours,
                    notes: text("notes")?,
                })
            }
        }
    }
}

/// A retrieval unit: embedded content plus typed metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub content: String,
    pub metadata: Metadata,
}

impl Document {
    /// A sig example; content is the raw sig text.
    pub fn sig_example(
        sig_text: impl Into<String>,
        english_instructions: impl Into<String>,
        structured: StructuredSig,
    ) -> Self {
        Self {
            content: sig_text.into(),
            metadata: Metadata::SigExample {
                english_instructions: english_instructions.into(),
                structured,
            },
        }
    }

    /// A drug fact; content is the synthesised reference sentence.
    pub fn medical_fact(
        drug_name: impl Into<String>,
        form: impl Into<String>,
        max_daily_intakes: i64,
        min_interval_hours: f64,
        notes: impl Into<String>,
    ) -> Self {
        let (drug_name, form, notes) = (drug_name.into(), form.into(), notes.into());
        let content = format!(
            "Drug: {drug_name} ({form}). Max daily intakes: {max_daily_intakes}. \
             Minimum interval: {min_interval_hours} hours. Notes: {notes}"
        );
        Self {
            content,
            metadata: Metadata::MedicalFact {
                drug_name,
                form,
                max_daily_intakes,
                min_interval_hours,
                notes,
            },
        }
    }
}
