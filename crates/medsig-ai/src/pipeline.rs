//! Batch driver: translate then validate each prescription, persisting rows
//! as they complete.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use medsig_core::{Decision, OutputRow, Prescription, TranslationResult, ValidationResult};
use medsig_store::{Document, OutputTable, StoreError};
use thiserror::Error;
use tracing::info;

use crate::translate::{TranslateError, Translator};
use crate::validate::{ValidateError, Validator};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("record {index} ({sig:?}): translation failed: {source}")]
    Translate {
        index: usize,
        sig: String,
        #[source]
        source: TranslateError,
    },
    #[error("record {index}: validation failed: {source}")]
    Validate {
        index: usize,
        #[source]
        source: ValidateError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything produced for one prescription.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub index: usize,
    pub prescription: Prescription,
    pub examples: Vec<Document>,
    pub translation: TranslationResult,
    pub references: Vec<Document>,
    pub validation: ValidationResult,
    pub row: OutputRow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub ok: usize,
    pub not_ok: usize,
}

pub struct Pipeline {
    translator: Translator,
    validator: Validator,
}

impl Pipeline {
    pub fn new(translator: Translator, validator: Validator) -> Self {
        Self {
            translator,
            validator,
        }
    }

    /// Translate then validate one prescription.
    pub async fn process(
        &self,
        index: usize,
        rx: &Prescription,
    ) -> Result<RecordOutcome, PipelineError> {
        let (translation, examples) = self
            .translator
            .translate(&rx.sig_text)
            .await
            .map_err(|source| PipelineError::Translate {
                index,
                sig: rx.sig_text.clone(),
                source,
            })?;
        let (validation, references) = self
            .validator
            .validate(&rx.drug_name, &translation.english_instructions)
            .await
            .map_err(|source| PipelineError::Validate { index, source })?;

        let processed_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let row = OutputRow::new(rx, &translation, &validation, processed_at);
        Ok(RecordOutcome {
            index,
            prescription: rx.clone(),
            examples,
            translation,
            references,
            validation,
            row,
        })
    }

    /// Process `records` in order, appending each finished row to `output`
    /// before starting the next. `on_record` sees every outcome as it lands.
    /// The first failure stops the run; rows already written stay.
    pub async fn run<F>(
        &self,
        records: &[Prescription],
        output: &mut OutputTable,
        pause: Duration,
        mut on_record: F,
    ) -> Result<RunSummary, PipelineError>
    where
        F: FnMut(&RecordOutcome),
    {
        let mut summary = RunSummary::default();
        for (index, rx) in records.iter().enumerate() {
            let outcome = self.process(index, rx).await?;
            output.append(outcome.row.clone())?;

            summary.processed += 1;
            match outcome.validation.decision {
                Decision::Ok => summary.ok += 1,
                Decision::NotOk => summary.not_ok += 1,
            }
            on_record(&outcome);

            if !pause.is_zero() && index + 1 < records.len() {
                tokio::time::sleep(pause).await;
            }
        }
        info!(
            processed = summary.processed,
            ok = summary.ok,
            not_ok = summary.not_ok,
            output = ?output.path(),
            "run complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::testing::{ScriptedChat, built_store};
    use medsig_store::read_output_rows;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn rx(patient: &str, drug: &str, sig: &str) -> Prescription {
        Prescription {
            patient_name: patient.into(),
            drug_name: drug.into(),
            drug_code: drug.split_whitespace().next().unwrap_or("").to_uppercase(),
            sig_text: sig.into(),
        }
    }

    #[tokio::test]
    async fn run_persists_each_record_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        let chat = Arc::new(ScriptedChat::new([
            r#"{"english_instructions":"Take one tablet by mouth once a day for 5 days.","structured":{"sigs":[{"intakes":1,"intake_period":"P1D","intake_type":"tablet","duration":"P5D"}]}}"#,
            r#"{"decision":"OK","reason":"Within limits."}"#,
            r#"{"english_instructions":"Take one tablet every 2 hours.","structured":{"sigs":[{"intakes":12,"intake_period":"P1D","intake_type":"tablet","duration":"P1D"}]}}"#,
            "That is too much; unsafe below a 4 hour interval.",
        ]));
        let pipeline = Pipeline::new(
            Translator::new(chat.clone(), store.clone()),
            Validator::new(chat.clone(), store),
        );

        let records = vec![
            rx("Alice Smith", "Paracetamol 500mg", "1 tab po qd x5d"),
            rx("Bob Jones", "Paracetamol 500mg", "1 tab po q2h"),
        ];
        let out_path = tmp.path().join("validated_sigs.csv");
        let mut output = OutputTable::create(&out_path).unwrap();

        let mut seen = Vec::new();
        let summary = pipeline
            .run(&records, &mut output, Duration::ZERO, |o| seen.push(o.index))
            .await
            .unwrap();

        assert_eq!(summary, RunSummary { processed: 2, ok: 1, not_ok: 1 });
        assert_eq!(seen, [0, 1]);

        let rows = read_output_rows(&out_path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].patient_name, "Alice Smith");
        assert_eq!(rows[0].ai_validated_emoji, "✅");
        assert_eq!(rows[1].validation_decision, "NOT_OK");
        assert!(rows[1].structured_instructions_json.contains("\"intakes\":12"));
        assert!(!rows[1].processed_at.is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_earlier_rows() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        let chat = Arc::new(ScriptedChat::new([
            r#"{"english_instructions":"Take one tablet by mouth once a day for 5 days.","structured":{"sigs":[{"intakes":1,"intake_period":"P1D","intake_type":"tablet","duration":"P5D"}]}}"#,
            r#"{"decision":"OK","reason":"Fine."}"#,
            "garbage",
        ]));
        let pipeline = Pipeline::new(
            Translator::new(chat.clone(), store.clone()).with_policy(RetryPolicy::bounded(1)),
            Validator::new(chat.clone(), store),
        );

        let records = vec![
            rx("Alice Smith", "Paracetamol 500mg", "1 tab po qd x5d"),
            rx("Bob Jones", "Amoxicillin 500mg", "1 cap po tid x7d"),
        ];
        let out_path = tmp.path().join("validated_sigs.csv");
        let mut output = OutputTable::create(&out_path).unwrap();

        let err = pipeline
            .run(&records, &mut output, Duration::ZERO, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Translate { index: 1, .. }));
        assert_eq!(read_output_rows(&out_path).unwrap().len(), 1);
    }
}
