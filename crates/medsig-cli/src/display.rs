//! Console rendering: per-record pipeline report and the output table.
//!
//! Everything here writes to stdout; logs go to stderr.

use std::fmt::Write as _;

use medsig_ai::RecordOutcome;
use medsig_core::{IntakeInstruction, IsoDuration, OutputRow, TranslationResult, ValidationResult};
use medsig_store::{BuildStats, Document, Metadata};

const RULE_WIDTH: usize = 80;

// ── Public API ──

pub fn print_header(title: &str) {
    println!("\n{}", "=".repeat(RULE_WIDTH));
    println!("{title}");
    println!("{}", "=".repeat(RULE_WIDTH));
}

/// Full report for one processed prescription.
pub fn print_record(outcome: &RecordOutcome, total: usize) {
    let rx = &outcome.prescription;
    print_header(&format!(
        "Prescription {}/{} - {} - {} ({})",
        outcome.index + 1,
        total,
        rx.patient_name,
        rx.drug_name,
        rx.drug_code
    ));
    println!("Raw sig text: {}\n", rx.sig_text);

    println!("[Translation] Similar sig examples:\n");
    print!("{}", render_examples(&outcome.examples));
    print!("{}", render_translation(&outcome.translation));

    println!("[Validation] Reference information:\n");
    print!("{}", render_references(&outcome.references));
    print!("{}", render_validation(&outcome.validation));
}

pub fn print_translation(examples: &[Document], result: &TranslationResult) {
    print!("{}", render_examples(examples));
    print!("{}", render_translation(result));
}

pub fn print_validation(references: &[Document], result: &ValidationResult) {
    print!("{}", render_references(references));
    print!("{}", render_validation(result));
}

pub fn print_build_stats(stats: &BuildStats) {
    println!("{}", stats.collection);
    println!("  {:<26} {}", "documents loaded", stats.loaded);
    println!("  {:<26} {}", "entries added", stats.added);
    println!("  {:<26} {}", "entries total", stats.total);
    println!("  {:<26} {:.2}s", "elapsed", stats.elapsed_secs);
    println!();
}

/// Fixed-width table of persisted rows.
pub fn print_output_table(rows: &[OutputRow]) {
    print!("{}", render_output_table(rows));
}

// ── Rendering ──

fn render_examples(docs: &[Document]) -> String {
    let mut out = String::new();
    if docs.is_empty() {
        out.push_str("  (no examples retrieved)\n\n");
        return out;
    }
    for (i, doc) in docs.iter().enumerate() {
        let _ = writeln!(out, "Example {} sig: {}", i + 1, doc.content);
        if let Metadata::SigExample {
            english_instructions,
            structured,
        } = &doc.metadata
        {
            let _ = writeln!(out, "  English: {english_instructions}");
            let _ = writeln!(out, "  Structured:");
            out.push_str(&indent(&pretty(structured), 4));
        }
        out.push('\n');
    }
    out
}

fn render_translation(result: &TranslationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[Translation] English instructions:");
    let _ = writeln!(out, "  {}\n", result.english_instructions);
    let _ = writeln!(out, "[Translation] Structured instructions:");
    out.push_str(&indent(&pretty(&result.structured), 2));
    for (i, step) in result.structured.sigs.iter().enumerate() {
        let _ = writeln!(out, "  step {}: {}", i + 1, describe_step(step));
    }
    out.push('\n');
    out
}

fn describe_step(step: &IntakeInstruction) -> String {
    format!(
        "{} x {} every {} for {}",
        step.intakes,
        step.intake_type,
        approx(&step.intake_period),
        approx(&step.duration)
    )
}

/// `P1D (~24h)`, or the raw text if it does not parse.
fn approx(iso: &str) -> String {
    match IsoDuration::parse(iso) {
        Ok(d) => format!("{iso} (~{}h)", d.approx_hours()),
        Err(_) => iso.to_string(),
    }
}

fn render_references(docs: &[Document]) -> String {
    let mut out = String::new();
    if docs.is_empty() {
        out.push_str("  (no reference information retrieved)\n\n");
        return out;
    }
    for (i, doc) in docs.iter().enumerate() {
        let _ = writeln!(out, "Reference {}: {}", i + 1, doc.content);
    }
    out.push('\n');
    out
}

fn render_validation(result: &ValidationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[Validation] {} {}", result.emoji, result.decision);
    let _ = writeln!(out, "  Reason: {}", result.reason);
    out
}

const TABLE_COLUMNS: &[(&str, usize)] = &[
    ("patient", 16),
    ("drug", 20),
    ("sig", 24),
    ("english", 40),
    ("decision", 8),
    ("", 2),
];

fn render_output_table(rows: &[OutputRow]) -> String {
    let mut out = String::new();
    let header: Vec<String> = TABLE_COLUMNS
        .iter()
        .map(|(name, w)| format!("{:<w$}", name, w = *w))
        .collect();
    let _ = writeln!(out, "{}", header.join(" ").trim_end());
    let width = TABLE_COLUMNS.iter().map(|(_, w)| w + 1).sum::<usize>();
    let _ = writeln!(out, "{}", "-".repeat(width));

    for row in rows {
        let cells = [
            &row.patient_name,
            &row.drug_name,
            &row.sig_text,
            &row.english_instructions,
            &row.validation_decision,
            &row.ai_validated_emoji,
        ];
        let line: Vec<String> = cells
            .iter()
            .zip(TABLE_COLUMNS)
            .map(|(cell, (_, w))| format!("{:<w$}", truncate(cell, *w), w = *w))
            .collect();
        let _ = writeln!(out, "{}", line.join(" ").trim_end());
    }
    let _ = writeln!(out, "\n{} row(s)", rows.len());
    out
}

// ── Helpers ──

fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn indent(text: &str, by: usize) -> String {
    let pad = " ".repeat(by);
    text.lines().map(|l| format!("{pad}{l}\n")).collect()
}

/// Cut to `max` chars, marking the cut with an ellipsis.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut cut: String = s.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsig_core::{Decision, StructuredSig};

    #[test]
    fn examples_show_english_and_structured() {
        let doc = Document::sig_example(
            "1 tab po qd x5d",
            "Take one tablet once a day for 5 days.",
            StructuredSig::new(vec![IntakeInstruction {
                intakes: 1,
                intake_period: "P1D".into(),
                intake_type: "tablet".into(),
                duration: "P5D".into(),
            }]),
        );
        let text = render_examples(&[doc]);
        assert!(text.starts_with("Example 1 sig: 1 tab po qd x5d\n"));
        assert!(text.contains("  English: Take one tablet"));
        assert!(text.contains("\"intake_period\": \"P1D\""));
    }

    #[test]
    fn validation_line_has_emoji() {
        let text = render_validation(&ValidationResult::new(Decision::NotOk, "Too frequent."));
        assert_eq!(text, "[Validation] ❌ NOT_OK\n  Reason: Too frequent.\n");
    }

    #[test]
    fn translation_lists_steps_with_hours() {
        let result = TranslationResult {
            english_instructions: "Take 5 ml every 8 hours for 3 days.".into(),
            structured: StructuredSig::new(vec![IntakeInstruction {
                intakes: 1,
                intake_period: "PT8H".into(),
                intake_type: "milliliter".into(),
                duration: "P3D".into(),
            }]),
        };
        let text = render_translation(&result);
        assert!(text.contains("  step 1: 1 x milliliter every PT8H (~8h) for P3D (~72h)\n"));
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn table_counts_rows() {
        let row = OutputRow {
            patient_name: "Alice Smith".into(),
            drug_name: "Paracetamol 500mg".into(),
            drug_code: "PARA500".into(),
            sig_text: "1 tab po qd x5d".into(),
            english_instructions: "Take one tablet by mouth once a day for 5 days.".into(),
            structured_instructions_json: "{\"sigs\":[]}".into(),
            validation_decision: "OK".into(),
            validation_reason: "Fine.".into(),
            ai_validated_emoji: "✅".into(),
            processed_at: "2026-01-01T00:00:00Z".into(),
        };
        let text = render_output_table(&[row]);
        assert!(text.lines().next().unwrap().starts_with("patient"));
        assert!(text.contains("Alice Smith"));
        assert!(text.trim_end().ends_with("1 row(s)"));
    }
}
