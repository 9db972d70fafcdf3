//! Prompt rendering for the translation, English-repair and validation calls.

use medsig_core::StructuredSig;
use medsig_store::{Document, Metadata};
use serde_json::json;

use crate::client::Message;

const TRANSLATION_SYSTEM: &str = "You are an expert clinical pharmacist. You translate compact, \
messy prescription instructions (sigs) into clear English and a structured JSON format.\n\n\
Return ONLY JSON. Do not include any extra text.";

/// Output contract appended to the translation system prompt.
pub const TRANSLATION_CONTRACT: &str = r#"The output must be one JSON object with exactly two top-level keys:
- "english_instructions": clear English instructions for the patient (string)
- "structured": {"sigs": [{"intakes": <integer, at least 1>, "intake_period": <ISO 8601 duration such as "P1D">, "intake_type": <dosage form such as "tablet">, "duration": <ISO 8601 duration such as "P5D">}]}
Use one entry in "sigs" per phase of the regimen, in order."#;

const REPAIR_SYSTEM: &str = "You are an expert clinical pharmacist. You rewrite prescription \
instructions (sigs) as one or two clear English sentences for a patient.";

const VALIDATION_SYSTEM: &str = "You are a cautious clinical pharmacist. You check whether dosing \
instructions (sigs) are reasonable for a specific drug, using given reference information.\n\n\
You must answer in JSON ONLY.";

/// Decision contract appended to the validation system prompt.
pub const VALIDATION_CONTRACT: &str = r#"Respond with one JSON object: {"decision": "OK" or "NOT_OK", "reason": "<one short sentence>"}"#;

fn sig_examples(docs: &[Document]) -> impl Iterator<Item = (&str, &str, &StructuredSig)> {
    docs.iter().filter_map(|d| match &d.metadata {
        Metadata::SigExample {
            english_instructions,
            structured,
        } => Some((d.content.as_str(), english_instructions.as_str(), structured)),
        Metadata::MedicalFact { .. } => None,
    })
}

/// Examples as input/output JSON pairs, in retrieval order.
pub fn examples_block(docs: &[Document]) -> String {
    let parts: Vec<String> = sig_examples(docs)
        .enumerate()
        .map(|(i, (sig, english, structured))| {
            let output = json!({
                "english_instructions": english,
                "structured": structured,
            });
            format!("Example {}:\nInput: {sig}\nOutput: {output}", i + 1)
        })
        .collect();
    if parts.is_empty() {
        "(No prior examples available.)".to_string()
    } else {
        parts.join("\n\n")
    }
}

pub fn translation(examples: &[Document], sig_text: &str) -> Vec<Message> {
    vec![
        Message::system(format!("{TRANSLATION_SYSTEM}\n\n{TRANSLATION_CONTRACT}")),
        Message::user(format!(
            "Here are similar past examples to guide you:\n\n{}\n\n\
             Now translate this new sig.\n\nInput: {sig_text}\nOutput:",
            examples_block(examples)
        )),
    ]
}

/// Narrow follow-up asking only for the English paraphrase of an already
/// structured sig.
pub fn english_repair(
    examples: &[Document],
    sig_text: &str,
    structured: &StructuredSig,
) -> Vec<Message> {
    let context: Vec<String> = sig_examples(examples)
        .map(|(sig, english, _)| format!("Raw sig: {sig}\nEnglish: {english}"))
        .collect();
    let context = if context.is_empty() {
        String::new()
    } else {
        format!("Examples:\n\n{}\n\n", context.join("\n\n"))
    };
    vec![
        Message::system(REPAIR_SYSTEM),
        Message::user(format!(
            "{context}Raw sig: {sig_text}\nStructured: {}\n\n\
             Reply with the English instructions only.",
            structured.to_json()
        )),
    ]
}

/// The retrieval query used to find references for a validation.
pub fn validation_query(drug_name: &str, english_instructions: &str) -> String {
    format!("The instructions: {english_instructions}, were given for this drug {drug_name}.")
}

pub fn references_block(docs: &[Document]) -> String {
    let parts: Vec<String> = docs
        .iter()
        .enumerate()
        .map(|(i, d)| format!("Reference {}: {}", i + 1, d.content))
        .collect();
    if parts.is_empty() {
        "(No reference information available.)".to_string()
    } else {
        parts.join("\n\n")
    }
}

pub fn validation(references: &[Document], drug_name: &str, english_instructions: &str) -> Vec<Message> {
    vec![
        Message::system(format!("{VALIDATION_SYSTEM}\n\n{VALIDATION_CONTRACT}")),
        Message::user(format!(
            "Drug name: {drug_name}\n\
             New case instructions: {english_instructions}\n\n\
             Here is reference information about this and similar drugs:\n\n{}\n\n\
             Based ONLY on the reference information and basic pharmacologic safety, \
             decide whether the dosing instructions are acceptable. \
             Set decision to 'OK' if clearly acceptable, otherwise 'NOT_OK'. \
             Give a short, clear reason.",
            references_block(references)
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Role;
    use medsig_core::IntakeInstruction;

    fn example() -> Document {
        Document::sig_example(
            "1 tab po qd x5d",
            "Take one tablet by mouth once a day for 5 days.",
            StructuredSig::new(vec![IntakeInstruction {
                intakes: 1,
                intake_period: "P1D".into(),
                intake_type: "tablet".into(),
                duration: "P5D".into(),
            }]),
        )
    }

    #[test]
    fn translation_prompt_embeds_examples_verbatim() {
        let messages = translation(&[example()], "2 tabs po bid x3d");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("\"english_instructions\""));
        let user = &messages[1].content;
        assert!(user.contains("Input: 1 tab po qd x5d"));
        assert!(user.contains(r#""intake_period":"P1D""#));
        assert!(user.ends_with("Input: 2 tabs po bid x3d\nOutput:"));
    }

    #[test]
    fn empty_blocks_have_placeholders() {
        assert_eq!(examples_block(&[]), "(No prior examples available.)");
        assert_eq!(references_block(&[]), "(No reference information available.)");
    }

    #[test]
    fn repair_prompt_carries_structured_json() {
        let structured = StructuredSig::default();
        let messages = english_repair(&[example()], "1 tab qd", &structured);
        assert!(messages[1].content.contains("Structured: {\"sigs\":[]}"));
        assert!(messages[1].content.contains("English: Take one tablet"));
    }

    #[test]
    fn validation_prompt_lists_numbered_references() {
        let refs = vec![
            Document::medical_fact("Paracetamol 500mg", "tablet", 4, 4.0, "Max 4g/day."),
            Document::medical_fact("Ibuprofen 200mg", "tablet", 6, 4.0, "With food."),
        ];
        let messages = validation(&refs, "Paracetamol 500mg", "Take one tablet every 2 hours.");
        assert!(messages[0].content.contains("NOT_OK"));
        let user = &messages[1].content;
        assert!(user.contains("Reference 1: Drug: Paracetamol 500mg"));
        assert!(user.contains("Reference 2: Drug: Ibuprofen 200mg"));
        assert!(user.contains("New case instructions: Take one tablet every 2 hours."));
    }

    #[test]
    fn validation_query_format() {
        assert_eq!(
            validation_query("Amoxicillin 500mg", "Take one capsule three times a day"),
            "The instructions: Take one capsule three times a day, were given for this drug Amoxicillin 500mg."
        );
    }
}
