/// Arrow schemas for the tabular records exchanged with the outside world.
pub mod tables {
    use arrow::datatypes::{DataType, Field, Schema};

    /// Medical knowledge corpus: one drug-fact row per drug/form.
    pub fn medical_knowledge_schema() -> Schema {
        Schema::new(vec![
            Field::new("drug_name", DataType::Utf8, false),
            Field::new("form", DataType::Utf8, true),
            Field::new("max_daily_intakes", DataType::Int64, true),
            Field::new("min_interval_hours", DataType::Float64, true),
            Field::new("notes", DataType::Utf8, true),
        ])
    }

    /// Pipeline input: semi-structured prescriptions.
    pub fn prescription_schema() -> Schema {
        Schema::new(vec![
            Field::new("patient_name", DataType::Utf8, true),
            Field::new("drug_name", DataType::Utf8, true),
            Field::new("drug_code", DataType::Utf8, true),
            Field::new("sig_text", DataType::Utf8, true),
        ])
    }

    /// Column order of the pipeline output table.
    pub const OUTPUT_COLUMNS: &[&str] = &[
        "patient_name",
        "drug_name",
        "drug_code",
        "sig_text",
        "english_instructions",
        "structured_instructions_json",
        "validation_decision",
        "validation_reason",
        "ai_validated_emoji",
        "processed_at",
    ];

    /// Pipeline output: every column is text.
    pub fn output_schema() -> Schema {
        Schema::new(
            OUTPUT_COLUMNS
                .iter()
                .map(|name| Field::new(*name, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::tables;

    #[test]
    fn medical_knowledge_schema_has_expected_fields() {
        let schema = tables::medical_knowledge_schema();
        assert_eq!(schema.fields().len(), 5);
        assert!(schema.field_with_name("max_daily_intakes").is_ok());
        assert!(schema.field_with_name("min_interval_hours").is_ok());
    }

    #[test]
    fn prescription_schema_has_expected_fields() {
        let schema = tables::prescription_schema();
        assert_eq!(schema.fields().len(), 4);
        assert!(schema.field_with_name("sig_text").is_ok());
    }

    #[test]
    fn output_schema_matches_column_order() {
        let schema = tables::output_schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, tables::OUTPUT_COLUMNS);
        assert_eq!(names[5], "structured_instructions_json");
        assert_eq!(names[8], "ai_validated_emoji");
    }
}
