//! ExtractionClient: one page, one prompt, one parsed payload.
//!
//! The client makes exactly one call to the [`StructuredExtractionService`]
//! and classifies the outcome. It never retries; retry and fallback policy
//! belong to the orchestrator.
//!
//! Model output is treated as untrusted text. Parsing is lenient about shape
//! (a bare array of tables, a single table object, warnings as plain strings)
//! and strict about syntax: anything that is not JSON after stripping a
//! markdown code fence is `AI_PARSE_ERROR`.

use crate::error::ServiceError;
use crate::guidance::{Complexity, Question, Suggestion};
use crate::output::{ConfidenceBreakdown, ConfidenceWire, Warning, WarningKind};
use crate::pipeline::render::PageImage;
use crate::pipeline::service::StructuredExtractionService;
use crate::prompts::ANALYSIS_PROMPT;
use crate::table::RawTable;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Parsed answer for one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagePayload {
    pub tables: Vec<RawTable>,
    /// Warnings the service reported; page numbers are not yet assigned.
    pub warnings: Vec<Warning>,
    /// Page-level confidence, normalised to `[0, 1]`.
    pub confidence: Option<f64>,
    pub confidence_details: Option<ConfidenceBreakdown>,
}

/// Parsed answer to the analysis prompt for one sampled page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisPayload {
    pub document_type: Option<String>,
    pub tables_detected: usize,
    pub languages: Vec<String>,
    pub complexity: Complexity,
    pub questions: Vec<Question>,
    pub suggestions: Vec<Suggestion>,
    pub warnings: Vec<String>,
}

/// Thin wrapper over a [`StructuredExtractionService`].
#[derive(Clone)]
pub struct ExtractionClient {
    service: Arc<dyn StructuredExtractionService>,
}

impl std::fmt::Debug for ExtractionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionClient").finish_non_exhaustive()
    }
}

impl ExtractionClient {
    pub fn new(service: Arc<dyn StructuredExtractionService>) -> Self {
        Self { service }
    }

    /// Run `prompt` against one page and parse the table payload.
    pub async fn extract(
        &self,
        page: &PageImage,
        prompt: &str,
    ) -> Result<PagePayload, ServiceError> {
        let text = self.service.run_structured_extraction(page, prompt).await?;
        let payload = parse_page_payload(&text)?;
        debug!(
            "Page {}: service reported {} table(s), {} warning(s)",
            page.page_number,
            payload.tables.len(),
            payload.warnings.len()
        );
        Ok(payload)
    }

    /// Run the analysis prompt against one sampled page.
    pub async fn analyze(&self, page: &PageImage) -> Result<AnalysisPayload, ServiceError> {
        let text = self
            .service
            .run_structured_extraction(page, ANALYSIS_PROMPT)
            .await?;
        parse_analysis_payload(&text)
    }
}

// ── Fence stripping ──────────────────────────────────────────────────────

static RE_CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\n?(.*?)\n?\s*```\s*$").unwrap());

/// Remove a markdown code fence wrapping the whole response, if any.
pub fn strip_code_fences(input: &str) -> &str {
    match RE_CODE_FENCE.captures(input).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => input.trim(),
    }
}

/// Parse the response as JSON. When the whole text does not parse, retry on
/// the span from the first `{`/`[` to the last `}`/`]`, which recovers a
/// payload wrapped in a sentence of prose.
fn parse_json(text: &str) -> Result<Value, ServiceError> {
    let body = strip_code_fences(text);
    if body.is_empty() {
        return Err(ServiceError::NoResponse);
    }

    match serde_json::from_str::<Value>(body) {
        Ok(v) => Ok(v),
        Err(first) => {
            let start = body.find(['{', '[']);
            let end = body.rfind(['}', ']']);
            if let (Some(s), Some(e)) = (start, end) {
                if s < e {
                    if let Ok(v) = serde_json::from_str::<Value>(&body[s..=e]) {
                        return Ok(v);
                    }
                }
            }
            Err(ServiceError::Parse {
                detail: first.to_string(),
            })
        }
    }
}

// ── Page payload ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PagePayloadWire {
    tables: Option<Value>,
    warnings: Option<Value>,
    #[serde(alias = "confidence")]
    overall_confidence: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WarningWire {
    Text(String),
    Detailed(DetailedWarningWire),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DetailedWarningWire {
    #[serde(rename = "type", alias = "kind")]
    kind: Option<String>,
    message: Option<String>,
    suggestion: Option<String>,
}

impl WarningWire {
    fn into_warning(self) -> Option<Warning> {
        match self {
            WarningWire::Text(s) if s.trim().is_empty() => None,
            WarningWire::Text(s) => Some(Warning::new(WarningKind::StructureAmbiguous, s)),
            WarningWire::Detailed(d) => {
                let kind = d
                    .kind
                    .as_deref()
                    .map(WarningKind::from_wire)
                    .unwrap_or(WarningKind::StructureAmbiguous);
                let message = d.message.unwrap_or_else(|| kind.as_str().replace('_', " "));
                Some(Warning::new(kind, message).with_suggestion(d.suggestion.unwrap_or_default()))
            }
        }
    }
}

/// Looks like one table rather than a page envelope.
fn is_table_object(v: &Value) -> bool {
    v.as_object().is_some_and(|o| {
        !o.contains_key("tables")
            && (o.contains_key("headers") || o.contains_key("rows") || o.contains_key("columns"))
    })
}

/// Decode each list entry on its own. A lone value counts as a one-entry
/// list; entries that do not decode are logged and dropped.
fn lenient_list<T: DeserializeOwned>(value: Option<Value>, what: &str) -> Vec<T> {
    let items = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(v) => vec![v],
    };
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| match serde_json::from_value::<T>(v) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!("Ignoring {} #{} in payload: {}", what, i + 1, e);
                None
            }
        })
        .collect()
}

fn parse_warnings(value: Option<Value>) -> Vec<Warning> {
    lenient_list::<WarningWire>(value, "warning")
        .into_iter()
        .filter_map(WarningWire::into_warning)
        .collect()
}

/// Parse a table-extraction response.
pub fn parse_page_payload(text: &str) -> Result<PagePayload, ServiceError> {
    let value = parse_json(text)?;

    let wire = match value {
        v @ Value::Array(_) => PagePayloadWire {
            tables: Some(v),
            ..Default::default()
        },
        v if is_table_object(&v) => PagePayloadWire {
            tables: Some(v),
            ..Default::default()
        },
        v @ Value::Object(_) => {
            serde_json::from_value::<PagePayloadWire>(v).map_err(|e| ServiceError::Parse {
                detail: e.to_string(),
            })?
        }
        other => {
            return Err(ServiceError::Parse {
                detail: format!("expected a JSON object, got `{other}`"),
            })
        }
    };

    let (confidence, confidence_details) = wire
        .overall_confidence
        .filter(|v| !v.is_null())
        .and_then(|v| match serde_json::from_value::<ConfidenceWire>(v) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("Ignoring page confidence in payload: {}", e);
                None
            }
        })
        .map(ConfidenceWire::resolve)
        .unwrap_or((None, None));

    Ok(PagePayload {
        tables: lenient_list(wire.tables, "table"),
        warnings: parse_warnings(wire.warnings),
        confidence,
        confidence_details,
    })
}

// ── Analysis payload ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AnalysisWire {
    document_type: Option<String>,
    tables_detected: Option<Value>,
    languages: Option<Value>,
    complexity: Option<String>,
    questions: Option<Value>,
    suggestions: Option<Value>,
    warnings: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct QuestionWire {
    id: Option<String>,
    question: Option<String>,
    options: Option<Vec<String>>,
    default_answer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SuggestionWire {
    id: Option<String>,
    description: Option<String>,
    recommended: Option<bool>,
}

/// Parse an analysis response. Entries without an id or text are dropped.
pub fn parse_analysis_payload(text: &str) -> Result<AnalysisPayload, ServiceError> {
    let value = parse_json(text)?;
    if !value.is_object() {
        return Err(ServiceError::Parse {
            detail: "analysis response is not a JSON object".into(),
        });
    }
    let wire: AnalysisWire = serde_json::from_value(value).map_err(|e| ServiceError::Parse {
        detail: e.to_string(),
    })?;

    let tables_detected = match wire.tables_detected {
        Some(Value::Number(n)) => n.as_f64().map(|f| f.max(0.0) as usize).unwrap_or(0),
        Some(Value::Array(a)) => a.len(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };

    Ok(AnalysisPayload {
        document_type: wire
            .document_type
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        tables_detected,
        languages: lenient_list::<String>(wire.languages, "language")
            .into_iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect(),
        complexity: wire
            .complexity
            .as_deref()
            .map(Complexity::from_wire)
            .unwrap_or_default(),
        questions: lenient_list::<QuestionWire>(wire.questions, "question")
            .into_iter()
            .filter_map(|q| {
                Some(Question {
                    id: q.id.filter(|s| !s.trim().is_empty())?,
                    question: q.question.filter(|s| !s.trim().is_empty())?,
                    options: q.options.unwrap_or_default(),
                    default_answer: q.default_answer,
                })
            })
            .collect(),
        suggestions: lenient_list::<SuggestionWire>(wire.suggestions, "suggestion")
            .into_iter()
            .filter_map(|s| {
                Some(Suggestion {
                    id: s.id.filter(|v| !v.trim().is_empty())?,
                    description: s.description.unwrap_or_default(),
                    recommended: s.recommended.unwrap_or(false),
                })
            })
            .collect(),
        warnings: parse_warnings(wire.warnings)
            .into_iter()
            .map(|w| w.message)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[]\n```\n"), "[]");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn parses_full_envelope() {
        let p = parse_page_payload(
            r#"```json
            {"tables": [{"sheetName": "Items", "headers": ["A", "B"], "rows": [["1", "2"]], "confidence": 0.9}],
             "warnings": [{"type": "skewed", "message": "Page is tilted", "suggestion": "Rescan"}, "faint ink"],
             "overallConfidence": 85}
            ```"#,
        )
        .unwrap();
        assert_eq!(p.tables.len(), 1);
        assert_eq!(p.tables[0].confidence, Some(0.9));
        assert_eq!(p.confidence, Some(0.85));
        assert_eq!(p.warnings.len(), 2);
        assert_eq!(p.warnings[0].kind, WarningKind::Skewed);
        assert_eq!(p.warnings[0].suggestion, "Rescan");
        assert_eq!(p.warnings[1].kind, WarningKind::StructureAmbiguous);
    }

    #[test]
    fn accepts_bare_array_and_single_table() {
        let p = parse_page_payload(r#"[{"headers": ["A"], "rows": [["x"]]}]"#).unwrap();
        assert_eq!(p.tables.len(), 1);

        let p = parse_page_payload(r#"{"headers": ["A"], "rows": [["x"]]}"#).unwrap();
        assert_eq!(p.tables.len(), 1);
        assert_eq!(p.confidence, None);
    }

    #[test]
    fn recovers_json_inside_prose() {
        let p = parse_page_payload("Here you go: {\"tables\": []} Hope it helps.").unwrap();
        assert!(p.tables.is_empty());
    }

    #[test]
    fn garbage_is_parse_error() {
        let err = parse_page_payload("I could not read this page.").unwrap_err();
        assert!(matches!(err, ServiceError::Parse { .. }));
        let err = parse_page_payload("42").unwrap_err();
        assert!(matches!(err, ServiceError::Parse { .. }));
    }

    #[test]
    fn empty_fence_is_no_response() {
        assert!(matches!(
            parse_page_payload("```json\n```").unwrap_err(),
            ServiceError::NoResponse
        ));
    }

    #[test]
    fn malformed_table_entry_skipped() {
        let p = parse_page_payload(r#"{"tables": ["not a table", {"headers": ["A"], "rows": []}]}"#)
            .unwrap();
        assert_eq!(p.tables.len(), 1);
    }

    #[test]
    fn odd_warnings_do_not_sink_the_tables() {
        let p = parse_page_payload(
            r#"{"tables": [{"headers": ["A"], "rows": [["x"]]}],
                "warnings": [{"type": 3, "message": "x"}, "faint ink", 42],
                "overallConfidence": [0.9]}"#,
        )
        .unwrap();
        assert_eq!(p.tables.len(), 1);
        assert_eq!(p.warnings.len(), 1);
        assert_eq!(p.warnings[0].message, "faint ink");
        assert_eq!(p.confidence, None);

        let p = parse_page_payload(
            r#"{"tables": [{"headers": ["A"], "rows": [["x"]]}], "warnings": "Totals row is cut off"}"#,
        )
        .unwrap();
        assert_eq!(p.tables.len(), 1);
        assert_eq!(p.warnings.len(), 1);
        assert_eq!(p.warnings[0].message, "Totals row is cut off");
    }

    #[test]
    fn odd_analysis_lists_keep_the_rest() {
        let a = parse_analysis_payload(
            r#"{"documentType": "ledger", "languages": "EN",
                "questions": [{"id": "q1", "question": "Which?"}, "stray"],
                "suggestions": {"id": "split", "description": "Split sections"},
                "warnings": [{"type": 3}]}"#,
        )
        .unwrap();
        assert_eq!(a.document_type.as_deref(), Some("ledger"));
        assert_eq!(a.languages, vec!["en"]);
        assert_eq!(a.questions.len(), 1);
        assert_eq!(a.suggestions.len(), 1);
        assert!(a.warnings.is_empty());
    }

    #[test]
    fn parses_analysis() {
        let a = parse_analysis_payload(
            r#"{"documentType": "invoice", "tablesDetected": 2, "languages": ["EN", "fr"],
                "complexity": "medium",
                "questions": [{"id": "date_format", "question": "Which date format?", "options": ["DD/MM", "MM/DD"]},
                              {"question": "no id"}],
                "suggestions": [{"id": "split", "description": "Split sections", "recommended": true}],
                "warnings": ["handwritten notes"]}"#,
        )
        .unwrap();
        assert_eq!(a.document_type.as_deref(), Some("invoice"));
        assert_eq!(a.tables_detected, 2);
        assert_eq!(a.languages, vec!["en", "fr"]);
        assert_eq!(a.complexity, Complexity::Medium);
        assert_eq!(a.questions.len(), 1);
        assert!(a.suggestions[0].recommended);
        assert_eq!(a.warnings, vec!["handwritten notes"]);
    }

    #[test]
    fn analysis_array_rejected() {
        assert!(parse_analysis_payload("[]").is_err());
    }
}
