//! Prompts for table extraction, fallback and analysis.
//!
//! Every prompt lives here so a behaviour change touches one file and tests
//! can inspect prompts without calling a model. Callers can replace the
//! template prompt with [`crate::config::ExtractionConfig::system_prompt`];
//! the fallback and analysis prompts are fixed.
//!
//! All prompts ask for bare JSON. The client strips a markdown code fence if
//! the model adds one anyway.

use crate::config::TableTemplate;
use crate::guidance::Guidance;

/// Base prompt for extracting tables from one page image.
pub const TABLE_EXTRACTION_PROMPT: &str = r#"You are an expert at reading tables from document images. Extract every table visible on this page.

Follow these rules precisely:

1. TABLES
   - Each visually distinct table becomes one entry in "tables"
   - "headers" holds the column titles, left to right
   - Each row in "rows" holds exactly one value per header, in header order
   - Use null for a cell that is visibly empty

2. MERGED CELLS
   - A value spanning several rows is written once in the first row it covers;
     leave the cells below it null
   - A value spanning several columns goes in the leftmost column it covers

3. VALUES
   - Copy text exactly as printed, including currency symbols and units
   - Do not compute, total, or reformat numbers
   - Do not invent values for unreadable cells; mark them in "uncertainCells"

4. SHEET NAMES
   - "sheetName" is a short title for the table (the caption, or what it lists)

5. WARNINGS
   - Report problems with "type" from: low_resolution, merged_cells, handwriting,
     skewed, partial_table, mixed_languages, inconsistent_format, skipped_content,
     special_chars_uncertain, structure_ambiguous

6. OUTPUT FORMAT
   Respond with ONLY this JSON object, no commentary:
   {
     "tables": [
       {
         "sheetName": "string",
         "headers": ["string"],
         "rows": [["string or null"]],
         "confidence": {
           "overall": 0.0,
           "breakdown": {"textClarity": 0.0, "structureClarity": 0.0, "specialChars": 0.0, "completeness": 0.0},
           "uncertainCells": [{"row": 0, "col": 0, "value": "string", "confidence": 0.0, "reason": "string"}]
         }
       }
     ],
     "warnings": [{"type": "string", "message": "string", "suggestion": "string"}],
     "overallConfidence": 0.0
   }
   If the page has no table, return {"tables": [], "warnings": [], "overallConfidence": 0.0}"#;

/// Prompt for pages where no table was found: a generic field/value reading.
pub const FALLBACK_PROMPT: &str = r#"This page has no clear table. Read every structured datum on it (labels with values, form fields, key figures, dates, totals, identifiers) and return them as one two-column table.

Rules:
- Headers are exactly ["Field", "Value"]
- One row per datum, in reading order
- Copy values exactly as printed
- Skip decorative text, page numbers, and running headers or footers

Respond with ONLY this JSON object:
{
  "tables": [{"sheetName": "string", "headers": ["Field", "Value"], "rows": [["string", "string"]], "confidence": 0.0}],
  "warnings": [],
  "overallConfidence": 0.0
}
If the page carries no data at all, return {"tables": [], "warnings": [], "overallConfidence": 0.0}"#;

/// Prompt for the analysis pass over sampled pages.
pub const ANALYSIS_PROMPT: &str = r#"Examine this page of a larger document before its tables are extracted. Do not extract the data. Characterise it instead.

Respond with ONLY this JSON object:
{
  "documentType": "invoice | bank_statement | receipt | schedule | inventory | financial | report | form | other",
  "tablesDetected": 0,
  "languages": ["ISO 639-1 code"],
  "complexity": "low | medium | high",
  "questions": [{"id": "string", "question": "string", "options": ["string"], "defaultAnswer": "string"}],
  "suggestions": [{"id": "string", "description": "string", "recommended": true}],
  "warnings": ["string"]
}

Ask a question only when the answer changes how the tables should be extracted
(e.g. whether to split a multi-section table, how to read an ambiguous symbol,
which date format is used). Use stable snake_case ids."#;

/// Document-type hint appended to the base prompt for a template.
pub fn template_hint(template: TableTemplate) -> Option<&'static str> {
    match template {
        TableTemplate::Auto => None,
        TableTemplate::Invoice => Some(
            "This is an invoice. Extract line items (description, quantity, unit price, amount) as one table and header fields (invoice number, dates, parties, totals) as a second table.",
        ),
        TableTemplate::BankStatement => Some(
            "This is a bank statement. Extract transactions (date, description, debit, credit, balance) as one table, keeping debits and credits in separate columns.",
        ),
        TableTemplate::Receipt => Some(
            "This is a receipt. Extract purchased items with quantity and price, then totals, taxes and payment method.",
        ),
        TableTemplate::Schedule => Some(
            "This is a schedule or timeline. Keep one row per task or slot; grouping labels (phase, team, day) that span several rows are merged cells.",
        ),
        TableTemplate::Inventory => Some(
            "This is an inventory or stock list. Keep item codes exactly as printed, including leading zeros.",
        ),
        TableTemplate::Financial => Some(
            "This is a financial statement. Keep line-item labels in the first column and one column per period; keep parentheses for negative figures.",
        ),
    }
}

/// Extraction prompt for a template.
pub fn template_prompt(template: TableTemplate) -> String {
    match template_hint(template) {
        Some(hint) => format!("{TABLE_EXTRACTION_PROMPT}\n\n7. DOCUMENT TYPE\n   {hint}"),
        None => TABLE_EXTRACTION_PROMPT.to_string(),
    }
}

/// Assemble the extraction prompt for a guided pass.
///
/// The base prompt is kept; the user's answers, accepted suggestions,
/// free-form instructions and output preferences are appended as an extra
/// section that takes precedence over the generic rules.
pub fn guided_prompt(guidance: &Guidance) -> String {
    let mut prompt = String::from(TABLE_EXTRACTION_PROMPT);
    if guidance.is_empty() {
        return prompt;
    }

    prompt.push_str("\n\n7. USER GUIDANCE (takes precedence over the rules above)");

    if !guidance.answers.is_empty() {
        prompt.push_str("\n   Answers to clarifying questions:");
        for (id, answer) in &guidance.answers {
            prompt.push_str(&format!("\n   - {id}: {answer}"));
        }
    }

    if !guidance.accepted_suggestions.is_empty() {
        prompt.push_str("\n   Apply these accepted suggestions:");
        for id in &guidance.accepted_suggestions {
            match guidance
                .suggestion_descriptions
                .get(id)
                .map(|d| d.trim())
                .filter(|d| !d.is_empty())
            {
                Some(description) => prompt.push_str(&format!("\n   - {id}: {description}")),
                None => prompt.push_str(&format!("\n   - {id}")),
            }
        }
    }

    if let Some(text) = guidance
        .freeform_instructions
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        prompt.push_str(&format!("\n   Additional instructions: {text}"));
    }

    let prefs = &guidance.output_preferences;
    if prefs.combine_related_tables {
        prompt.push_str(
            "\n   - Combine tables that continue one another or share the same columns into a single table",
        );
    }
    if let Some(lang) = prefs.output_language.as_deref().filter(|l| !l.is_empty()) {
        prompt.push_str(&format!(
            "\n   - Write headers and sheet names in {lang}; keep cell values as printed"
        ));
    }
    if prefs.skip_diagrams {
        prompt.push_str("\n   - Ignore diagrams and charts");
    }
    if prefs.skip_images {
        prompt.push_str("\n   - Ignore photos, logos and other images");
    }
    if !prefs.symbol_mapping.is_empty() {
        prompt.push_str("\n   - Replace symbols in cells:");
        for (symbol, text) in &prefs.symbol_mapping {
            prompt.push_str(&format!("\n     \"{symbol}\" → \"{text}\""));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guidance::Suggestion;

    #[test]
    fn auto_template_is_base_prompt() {
        assert_eq!(template_prompt(TableTemplate::Auto), TABLE_EXTRACTION_PROMPT);
    }

    #[test]
    fn template_prompt_appends_hint() {
        let p = template_prompt(TableTemplate::BankStatement);
        assert!(p.starts_with(TABLE_EXTRACTION_PROMPT));
        assert!(p.contains("bank statement"));
    }

    #[test]
    fn fallback_prompt_asks_for_field_value() {
        assert!(FALLBACK_PROMPT.contains(r#"["Field", "Value"]"#));
    }

    #[test]
    fn empty_guidance_keeps_base_prompt() {
        assert_eq!(guided_prompt(&Guidance::default()), TABLE_EXTRACTION_PROMPT);
    }

    #[test]
    fn guided_prompt_includes_everything() {
        let mut g = Guidance::default();
        g.answers.insert("date_format".into(), "DD/MM".into());
        g.accepted_suggestions.insert("split_sections".into());
        g.freeform_instructions = Some("Ignore the totals row".into());
        g.output_preferences.combine_related_tables = true;
        g.output_preferences.output_language = Some("French".into());
        g.output_preferences.skip_diagrams = true;
        g.output_preferences
            .symbol_mapping
            .insert("✓".into(), "Yes".into());

        let p = guided_prompt(&g);
        assert!(p.contains("USER GUIDANCE"));
        assert!(p.contains("date_format: DD/MM"));
        assert!(p.contains("split_sections"));
        assert!(p.contains("Ignore the totals row"));
        assert!(p.contains("Combine tables"));
        assert!(p.contains("French"));
        assert!(p.contains("Ignore diagrams"));
        assert!(!p.contains("Ignore photos"));
        assert!(p.contains("\"✓\" → \"Yes\""));
    }

    #[test]
    fn accepted_suggestions_carry_their_description() {
        let mut g = Guidance::default();
        g.accept(&Suggestion {
            id: "split_sections".into(),
            description: "One table per account section".into(),
            recommended: false,
        });
        g.accepted_suggestions.insert("merge_continuations".into());

        let p = guided_prompt(&g);
        assert!(p.contains("- split_sections: One table per account section"));
        assert!(p.contains("- merge_continuations"));
    }
}
