//! Structured sig schema: the shapes produced by translation and validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::{DurationError, IsoDuration};

/// One regimen segment within a sig.
///
/// "2x tabs/3d then 1x/2d" is two instructions: two tablets a day for three
/// days, then one tablet a day for two days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeInstruction {
    /// Units taken per intake period (e.g. 2 capsules).
    pub intakes: u32,
    /// ISO-8601 duration for how often the intakes occur, e.g. `P1D`.
    pub intake_period: String,
    /// Dosage form, e.g. `tablet`, `capsule`, `milliliter`.
    pub intake_type: String,
    /// ISO-8601 duration for how long this segment applies, e.g. `P3D`.
    pub duration: String,
}

/// Reasons an [`IntakeInstruction`] breaks the schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstructionError {
    #[error("sig has no instructions")]
    NoInstructions,

    #[error("instruction {index}: intakes must be at least 1")]
    ZeroIntakes { index: usize },

    #[error("instruction {index}: invalid intake_period: {source}")]
    IntakePeriod {
        index: usize,
        #[source]
        source: DurationError,
    },

    #[error("instruction {index}: invalid duration: {source}")]
    Duration {
        index: usize,
        #[source]
        source: DurationError,
    },
}

impl IntakeInstruction {
    /// Check the instruction invariants. `index` is its position in the sig.
    pub fn validate(&self, index: usize) -> Result<(), InstructionError> {
        if self.intakes == 0 {
            return Err(InstructionError::ZeroIntakes { index });
        }
        IsoDuration::parse(&self.intake_period)
            .map_err(|source| InstructionError::IntakePeriod { index, source })?;
        IsoDuration::parse(&self.duration)
            .map_err(|source| InstructionError::Duration { index, source })?;
        Ok(())
    }
}

/// An ordered, possibly multi-phase regimen. Order encodes the sequence of
/// phases and is preserved end to end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredSig {
    pub sigs: Vec<IntakeInstruction>,
}

impl StructuredSig {
    pub fn new(sigs: Vec<IntakeInstruction>) -> Self {
        Self { sigs }
    }

    /// Validate every instruction, reporting the first violation. An empty
    /// regimen is itself a violation.
    pub fn validate(&self) -> Result<(), InstructionError> {
        if self.sigs.is_empty() {
            return Err(InstructionError::NoInstructions);
        }
        self.sigs
            .iter()
            .enumerate()
            .try_for_each(|(i, s)| s.validate(i))
    }

    pub fn len(&self) -> usize {
        self.sigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sigs.is_empty()
    }

    /// Compact JSON (`{"sigs":[...]}`), as stored in output rows and metadata.
    pub fn to_json(&self) -> String {
        // A struct of strings and integers always serialises.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"sigs\":[]}"))
    }
}

/// Output of the translation stage for one sig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub english_instructions: String,
    pub structured: StructuredSig,
}

impl TranslationResult {
    /// True when the model returned only the structured part and the English
    /// paraphrase still has to be filled in.
    pub fn needs_english(&self) -> bool {
        self.english_instructions.trim().is_empty()
    }
}

/// Bounded validation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NOT_OK")]
    NotOk,
}

impl Decision {
    /// Coerce any decision string: a trimmed, case-insensitive `OK` is
    /// [`Decision::Ok`], everything else is [`Decision::NotOk`].
    pub fn normalize(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("OK") {
            Self::Ok
        } else {
            Self::NotOk
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotOk => "NOT_OK",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Ok => "✅",
            Self::NotOk => "❌",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display symbol for an arbitrary decision string.
pub fn emoji_for(decision: &str) -> &'static str {
    Decision::normalize(decision).emoji()
}

/// Output of the validation stage for one sig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub decision: Decision,
    pub reason: String,
    pub emoji: String,
}

impl ValidationResult {
    /// Build a finished result; the emoji is derived from the decision.
    pub fn new(decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
            emoji: decision.emoji().to_string(),
        }
    }
}

/// One incoming prescription row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub patient_name: String,
    pub drug_name: String,
    pub drug_code: String,
    pub sig_text: String,
}

/// One translated and validated prescription, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRow {
    pub patient_name: String,
    pub drug_name: String,
    pub drug_code: String,
    pub sig_text: String,
    pub english_instructions: String,
    pub structured_instructions_json: String,
    pub validation_decision: String,
    pub validation_reason: String,
    pub ai_validated_emoji: String,
    /// RFC 3339 timestamp.
    pub processed_at: String,
}

impl OutputRow {
    pub fn new(
        rx: &Prescription,
        translation: &TranslationResult,
        validation: &ValidationResult,
        processed_at: String,
    ) -> Self {
        Self {
            patient_name: rx.patient_name.clone(),
            drug_name: rx.drug_name.clone(),
            drug_code: rx.drug_code.clone(),
            sig_text: rx.sig_text.clone(),
            english_instructions: translation.english_instructions.clone(),
            structured_instructions_json: translation.structured.to_json(),
            validation_decision: validation.decision.as_str().to_string(),
            validation_reason: validation.reason.clone(),
            ai_validated_emoji: validation.emoji.clone(),
            processed_at,
        }
    }
}
