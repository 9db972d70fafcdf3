//! Recovery of schema values from free-form model output.
//!
//! Small local models rarely return clean JSON. The recovery rules here
//! tolerate the usual damage:
//!
//! - the whole answer wrapped in a Markdown code fence
//! - a line of prose before the JSON body
//! - trailing text after a complete JSON value
//!
//! Translation output is decoded strictly into a tagged union
//! ([`RawTranslation`]) and then into schema types. Validation output is
//! decoded leniently and never fails: when no decision can be read, the raw
//! text is scanned for rejection keywords instead.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::sig::{Decision, IntakeInstruction, StructuredSig, TranslationResult};

const SNIPPET_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecoveryError {
    #[error("no JSON object found in model output: {snippet:?}")]
    UnparseableOutput { snippet: String },

    #[error("model output breaks the sig schema: {0}")]
    SchemaViolation(String),

    #[error("model output has unexpected top-level keys: {keys:?}")]
    UnexpectedSchema { keys: Vec<String> },
}

// ── Shared decoding ──

/// Drop a surrounding Markdown code fence.
///
/// Applies only when the first line starts with a triple backtick: the first
/// line is dropped, and the last line too when it is the closing fence.
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    if !text.starts_with("```") {
        return text;
    }
    let Some((_, body)) = text.split_once('\n') else {
        return "";
    };
    match body.rsplit_once('\n') {
        Some((head, last)) if last.trim_start().starts_with("```") => head.trim(),
        None if body.trim_start().starts_with("```") => "",
        _ => body.trim(),
    }
}

/// Decode the first JSON value at the start of `text`, ignoring whatever
/// follows it.
fn decode_prefix(text: &str) -> Option<Value> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some(value),
        _ => None,
    }
}

/// Decode the first JSON object or array in model output.
///
/// Tries position 0 (after fence stripping) first, then the first `{`.
pub fn decode_first_json(raw: &str) -> Option<Value> {
    let text = strip_code_fence(raw);
    if let Some(value) = decode_prefix(text)
        && (value.is_object() || value.is_array())
    {
        return Some(value);
    }
    let start = text.find('{')?;
    decode_prefix(&text[start..])
}

fn snippet(raw: &str) -> String {
    raw.trim().chars().take(SNIPPET_CHARS).collect()
}

// ── Translation path ──

/// The shapes a decoded translation response can take.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTranslation {
    /// Both `english_instructions` and `structured` present.
    Complete {
        english_instructions: Value,
        structured: Value,
    },
    /// Only the structured part, as a top-level `sigs` array.
    Partial { sigs: Value },
    /// Anything else; carries the top-level keys seen.
    Unrecognized { keys: Vec<String> },
}

impl RawTranslation {
    pub fn classify(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::Unrecognized { keys: Vec::new() };
        };
        if map.contains_key("english_instructions") && map.contains_key("structured") {
            return Self::Complete {
                english_instructions: map.remove("english_instructions").unwrap_or(Value::Null),
                structured: map.remove("structured").unwrap_or(Value::Null),
            };
        }
        if let Some(sigs) = map.remove("sigs") {
            return Self::Partial { sigs };
        }
        Self::Unrecognized {
            keys: map.keys().cloned().collect(),
        }
    }
}

/// A translation response that passed schema validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationShape {
    Complete(TranslationResult),
    /// Structured part only; the English paraphrase still has to be produced.
    NeedsEnglish(StructuredSig),
}

impl TranslationShape {
    /// Flatten into a [`TranslationResult`]; `NeedsEnglish` yields an empty
    /// `english_instructions`.
    pub fn into_result(self) -> TranslationResult {
        match self {
            Self::Complete(result) => result,
            Self::NeedsEnglish(structured) => TranslationResult {
                english_instructions: String::new(),
                structured,
            },
        }
    }
}

/// `structured` is normally `{"sigs": [...]}`; some models drop the wrapper.
#[derive(Deserialize)]
#[serde(untagged)]
enum StructuredWire {
    Wrapped(StructuredSig),
    Bare(Vec<IntakeInstruction>),
}

fn decode_structured(value: Value) -> Result<StructuredSig, RecoveryError> {
    let wire: StructuredWire = serde_json::from_value(value)
        .map_err(|e| RecoveryError::SchemaViolation(format!("structured: {e}")))?;
    let sig = match wire {
        StructuredWire::Wrapped(sig) => sig,
        StructuredWire::Bare(sigs) => StructuredSig::new(sigs),
    };
    sig.validate()
        .map_err(|e| RecoveryError::SchemaViolation(e.to_string()))?;
    Ok(sig)
}

fn decode_sigs(value: Value) -> Result<StructuredSig, RecoveryError> {
    let sigs: Vec<IntakeInstruction> = serde_json::from_value(value)
        .map_err(|e| RecoveryError::SchemaViolation(format!("sigs: {e}")))?;
    let sig = StructuredSig::new(sigs);
    sig.validate()
        .map_err(|e| RecoveryError::SchemaViolation(e.to_string()))?;
    Ok(sig)
}

/// Recover a validated translation shape from raw model output.
pub fn recover_translation_shape(raw: &str) -> Result<TranslationShape, RecoveryError> {
    let value = decode_first_json(raw).ok_or_else(|| RecoveryError::UnparseableOutput {
        snippet: snippet(raw),
    })?;

    match RawTranslation::classify(value) {
        RawTranslation::Complete {
            english_instructions,
            structured,
        } => {
            let english = match english_instructions {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => {
                    return Err(RecoveryError::SchemaViolation(format!(
                        "english_instructions is not a string: {other}"
                    )));
                }
            };
            let structured = decode_structured(structured)?;
            Ok(TranslationShape::Complete(TranslationResult {
                english_instructions: english,
                structured,
            }))
        }
        RawTranslation::Partial { sigs } => Ok(TranslationShape::NeedsEnglish(decode_sigs(sigs)?)),
        RawTranslation::Unrecognized { keys } => Err(RecoveryError::UnexpectedSchema { keys }),
    }
}

/// Recover a [`TranslationResult`] from raw model output.
///
/// An empty `english_instructions` in the result means the model only
/// returned the structured part and the English needs repair.
pub fn recover_translation(raw: &str) -> Result<TranslationResult, RecoveryError> {
    recover_translation_shape(raw).map(TranslationShape::into_result)
}

/// Recover an English paraphrase from the narrower repair prompt.
///
/// Accepts `{"english_instructions": "..."}`, `{"english": "..."}`, or a bare
/// JSON string. Anything else falls back to the raw text itself. Returns
/// `None` only for an empty response.
pub fn recover_english(raw: &str) -> Option<String> {
    let text = strip_code_fence(raw);
    let from_json = match decode_prefix(text).or_else(|| decode_first_json(raw)) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Object(map)) => string_field(&map, &["english_instructions", "english"]),
        _ => None,
    };
    let english = from_json
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| text.trim().to_string());
    (!english.is_empty()).then_some(english)
}

// ── Validation path ──

/// Phrases that signal the model rejected the dosing.
const REJECTION_MARKERS: &[&str] = &[
    "not_ok",
    "not ok",
    "not-ok",
    "unsafe",
    "not safe",
    "too much",
    "too many",
    "too frequent",
    "too often",
    "too high",
    "exceed",
    "unacceptable",
    "not acceptable",
    "unreasonable",
    "not reasonable",
    "inappropriate",
    "not appropriate",
    "not advisable",
    "dangerous",
];

/// Words that signal approval, checked only when no rejection marker hit.
/// Matched as whole words so `unreasonable` never reads as `reasonable`.
const APPROVAL_WORDS: &[&str] = &["ok", "acceptable", "reasonable", "appropriate", "safe"];

/// Where a recovered decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    /// Read from a decision field in decoded JSON.
    Json,
    /// Inferred by keyword scan of the raw text.
    Keywords,
}

/// A decision and reason recovered from a validation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredVerdict {
    pub decision: Decision,
    pub reason: String,
    pub source: VerdictSource,
}

/// Infer a decision from free text.
///
/// Any rejection marker wins; otherwise a standalone approval word such as
/// `ok` or `safe` means [`Decision::Ok`]; silence means [`Decision::NotOk`].
/// This is a parser fallback, not a safety rule.
pub fn infer_decision(text: &str) -> Decision {
    let lower = text.to_lowercase();
    if REJECTION_MARKERS.iter().any(|m| lower.contains(m)) {
        return Decision::NotOk;
    }
    let approved = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|w| APPROVAL_WORDS.contains(&w));
    if approved {
        Decision::Ok
    } else {
        Decision::NotOk
    }
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

/// Recover a verdict from raw validation output. Never fails.
pub fn recover_verdict(raw: &str) -> RecoveredVerdict {
    let raw_reason = strip_code_fence(raw).to_string();

    let Some(Value::Object(map)) = decode_first_json(raw) else {
        debug!("validation output is not JSON, falling back to keyword scan");
        return RecoveredVerdict {
            decision: infer_decision(raw),
            reason: raw_reason,
            source: VerdictSource::Keywords,
        };
    };

    let reason = string_field(&map, &["reason", "explanation"])
        .filter(|r| !r.trim().is_empty())
        .unwrap_or(raw_reason);

    match string_field(&map, &["decision", "verdict", "status"]) {
        Some(decision) => RecoveredVerdict {
            decision: Decision::normalize(&decision),
            reason,
            source: VerdictSource::Json,
        },
        None => {
            debug!("validation JSON has no decision field, falling back to keyword scan");
            RecoveredVerdict {
                decision: infer_decision(raw),
                reason,
                source: VerdictSource::Keywords,
            }
        }
    }
}
