//! CSV tables via Arrow: prescription input, drug-fact corpus, pipeline output.
//!
//! Every column is read as text and converted by the caller, so a CSV only
//! needs the expected header names, in any order, with extra columns ignored.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use medsig_core::{OutputRow, Prescription, tables};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::StoreError;

/// A CSV file loaded as text columns.
pub struct TextTable {
    path: PathBuf,
    batches: Vec<RecordBatch>,
}

impl TextTable {
    /// Read a headed CSV, all columns as nullable Utf8.
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let mut file = File::open(path)?;
        let (inferred, _) = Format::default()
            .with_header(true)
            .infer_schema(&mut file, Some(0))?;
        file.seek(SeekFrom::Start(0))?;

        let schema = Schema::new(
            inferred
                .fields()
                .iter()
                .map(|f| Field::new(f.name().trim(), DataType::Utf8, true))
                .collect::<Vec<_>>(),
        );
        let reader = ReaderBuilder::new(Arc::new(schema))
            .with_header(true)
            .build(file)?;
        let batches = reader.collect::<Result<Vec<_>, _>>()?;
        debug!(path = ?path, batches = batches.len(), "read csv");

        Ok(Self {
            path: path.to_path_buf(),
            batches,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    /// Fail with [`StoreError::MissingColumn`] on the first absent column.
    pub fn require(&self, columns: &[&str]) -> Result<(), StoreError> {
        // Files with a header but no rows still produce no batches.
        if self.batches.is_empty() {
            return Ok(());
        }
        let schema = self.batches[0].schema();
        for column in columns {
            if schema.field_with_name(column).is_err() {
                return Err(StoreError::MissingColumn {
                    path: self.path.clone(),
                    column: (*column).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Rows as string-valued closures over the named columns; nulls read as "".
    pub fn rows(&self) -> Result<Vec<TextRow>, StoreError> {
        let mut rows = Vec::with_capacity(self.num_rows());
        for batch in &self.batches {
            let schema = batch.schema();
            let columns: Vec<(String, &StringArray)> = schema
                .fields()
                .iter()
                .zip(batch.columns())
                .filter_map(|(field, col)| {
                    col.as_any()
                        .downcast_ref::<StringArray>()
                        .map(|a| (field.name().clone(), a))
                })
                .collect();

            for i in 0..batch.num_rows() {
                let cells = columns
                    .iter()
                    .map(|(name, array)| {
                        let value = if array.is_null(i) {
                            String::new()
                        } else {
                            array.value(i).to_string()
                        };
                        (name.clone(), value)
                    })
                    .collect();
                rows.push(TextRow { cells });
            }
        }
        Ok(rows)
    }
}

/// One CSV row as `(column, value)` pairs.
#[derive(Debug, Clone)]
pub struct TextRow {
    cells: Vec<(String, String)>,
}

impl TextRow {
    /// Trimmed cell value, or "" if the column is absent.
    pub fn get(&self, column: &str) -> &str {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v.trim())
            .unwrap_or("")
    }
}

/// Load prescriptions, in file order.
pub fn read_prescriptions(path: &Path) -> Result<Vec<Prescription>, StoreError> {
    let table = TextTable::read(path)?;
    let schema = tables::prescription_schema();
    let required: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    table.require(&required)?;

    Ok(table
        .rows()?
        .into_iter()
        .map(|row| Prescription {
            patient_name: row.get("patient_name").to_string(),
            drug_name: row.get("drug_name").to_string(),
            drug_code: row.get("drug_code").to_string(),
            sig_text: row.get("sig_text").to_string(),
        })
        .collect())
}

/// Load a previously written output table.
pub fn read_output_rows(path: &Path) -> Result<Vec<OutputRow>, StoreError> {
    let table = TextTable::read(path)?;
    table.require(&tables::OUTPUT_COLUMNS[..9])?;

    Ok(table
        .rows()?
        .into_iter()
        .map(|row| OutputRow {
            patient_name: row.get("patient_name").to_string(),
            drug_name: row.get("drug_name").to_string(),
            drug_code: row.get("drug_code").to_string(),
            sig_text: row.get("sig_text").to_string(),
            english_instructions: row.get("english_instructions").to_string(),
            structured_instructions_json: row.get("structured_instructions_json").to_string(),
            validation_decision: row.get("validation_decision").to_string(),
            validation_reason: row.get("validation_reason").to_string(),
            ai_validated_emoji: row.get("ai_validated_emoji").to_string(),
            processed_at: row.get("processed_at").to_string(),
        })
        .collect())
}

/// The pipeline output CSV, rewritten atomically after every append so a
/// crash leaves either the previous or the new complete file.
pub struct OutputTable {
    path: PathBuf,
    rows: Vec<OutputRow>,
}

impl OutputTable {
    /// Start a fresh table, replacing any existing file with a header-only one.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let table = Self {
            path: path.to_path_buf(),
            rows: Vec::new(),
        };
        table.flush()?;
        Ok(table)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append one row and persist the whole table.
    pub fn append(&mut self, row: OutputRow) -> Result<(), StoreError> {
        self.rows.push(row);
        self.flush()
    }

    fn flush(&self) -> Result<(), StoreError> {
        let batch = output_batch(&self.rows)?;
        write_atomic(&self.path, |file| {
            let mut writer = WriterBuilder::new().with_header(true).build(file);
            writer.write(&batch)?;
            Ok(())
        })
    }
}

fn output_batch(rows: &[OutputRow]) -> Result<RecordBatch, StoreError> {
    let column = |f: fn(&OutputRow) -> &str| -> ArrayRef {
        Arc::new(StringArray::from_iter_values(rows.iter().map(f)))
    };
    let columns = vec![
        column(|r| &r.patient_name),
        column(|r| &r.drug_name),
        column(|r| &r.drug_code),
        column(|r| &r.sig_text),
        column(|r| &r.english_instructions),
        column(|r| &r.structured_instructions_json),
        column(|r| &r.validation_decision),
        column(|r| &r.validation_reason),
        column(|r| &r.ai_validated_emoji),
        column(|r| &r.processed_at),
    ];
    Ok(RecordBatch::try_new(
        Arc::new(tables::output_schema()),
        columns,
    )?)
}

/// Write through a temp file in the target directory, then rename over `path`.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<(), StoreError>
where
    F: FnOnce(&mut File) -> Result<(), StoreError>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsig_core::{Decision, StructuredSig, TranslationResult, ValidationResult};
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn prescriptions_in_file_order() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "input.csv",
            "patient_name,drug_name,drug_code,sig_text\n\
             Alice Smith,Paracetamol 500mg,PARA500,1 tab po qd x5d\n\
             Bob Jones,Amoxicillin 500mg,AMOX500,\"1 cap po tid x7d, with food\"\n",
        );
        let rx = read_prescriptions(&path).unwrap();
        assert_eq!(rx.len(), 2);
        assert_eq!(rx[0].patient_name, "Alice Smith");
        assert_eq!(rx[1].sig_text, "1 cap po tid x7d, with food");
    }

    #[test]
    fn missing_column_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "input.csv",
            "patient_name,drug_name,sig_text\nAlice,Paracetamol,1 tab qd\n",
        );
        match read_prescriptions(&path) {
            Err(StoreError::MissingColumn { column, .. }) => assert_eq!(column, "drug_code"),
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }

    #[test]
    fn output_table_is_rewritten_on_append() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("validated.csv");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale\n").unwrap();

        let mut table = OutputTable::create(&path).unwrap();
        assert!(read_output_rows(&path).unwrap().is_empty());

        let rx = Prescription {
            patient_name: "Alice Smith".into(),
            drug_name: "Paracetamol 500mg".into(),
            drug_code: "PARA500".into(),
            sig_text: "1 tab po qd x5d".into(),
        };
        let translation = TranslationResult {
            english_instructions: "Take one tablet, once a day, for 5 days.".into(),
            structured: StructuredSig::default(),
        };
        let validation = ValidationResult::new(Decision::NotOk, "Too frequent.");
        table
            .append(OutputRow::new(&rx, &translation, &validation, "2026-01-01T00:00:00Z".into()))
            .unwrap();
        table
            .append(OutputRow::new(&rx, &translation, &validation, "2026-01-01T00:00:01Z".into()))
            .unwrap();

        let rows = read_output_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].english_instructions, "Take one tablet, once a day, for 5 days.");
        assert_eq!(rows[0].structured_instructions_json, "{\"sigs\":[]}");
        assert_eq!(rows[1].validation_decision, "NOT_OK");
        assert_eq!(rows[1].ai_validated_emoji, "❌");
        assert_eq!(rows[1].processed_at, "2026-01-01T00:00:01Z");
    }
}
