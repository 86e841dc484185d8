//! Result types produced by an extraction run.
//!
//! [`ExtractionResult`] is the only artifact handed to external persistence;
//! everything it contains serialises to camelCase JSON so a conversion record
//! can store it verbatim.

use crate::error::{ErrorCode, Pdf2TableError};
use crate::guidance::DocumentAnalysis;
use crate::table::RepairedTable;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence assumed when neither a table nor its page reports one.
pub const UNKNOWN_CONFIDENCE: f64 = 0.5;

/// Bring a service-reported confidence onto the `[0, 1]` scale.
///
/// Services answer on either a 0–1 or a 0–100 scale. Values above 1 are
/// read as percentages; the result is clamped. Non-finite input maps to 0.
pub fn normalize_confidence(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let v = if value > 1.0 { value / 100.0 } else { value };
    v.clamp(0.0, 1.0)
}

// ── Warnings ─────────────────────────────────────────────────────────────

/// Closed set of warning categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    LowResolution,
    MergedCells,
    Handwriting,
    Skewed,
    PartialTable,
    MixedLanguages,
    InconsistentFormat,
    SkippedContent,
    SpecialCharsUncertain,
    StructureAmbiguous,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::LowResolution => "low_resolution",
            WarningKind::MergedCells => "merged_cells",
            WarningKind::Handwriting => "handwriting",
            WarningKind::Skewed => "skewed",
            WarningKind::PartialTable => "partial_table",
            WarningKind::MixedLanguages => "mixed_languages",
            WarningKind::InconsistentFormat => "inconsistent_format",
            WarningKind::SkippedContent => "skipped_content",
            WarningKind::SpecialCharsUncertain => "special_chars_uncertain",
            WarningKind::StructureAmbiguous => "structure_ambiguous",
        }
    }

    /// Map a service-reported type string onto the closed set.
    ///
    /// Unknown strings become [`WarningKind::StructureAmbiguous`].
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "low_resolution" => WarningKind::LowResolution,
            "merged_cells" => WarningKind::MergedCells,
            "handwriting" => WarningKind::Handwriting,
            "skewed" => WarningKind::Skewed,
            "partial_table" => WarningKind::PartialTable,
            "mixed_languages" => WarningKind::MixedLanguages,
            "inconsistent_format" => WarningKind::InconsistentFormat,
            "skipped_content" => WarningKind::SkippedContent,
            "special_chars_uncertain" => WarningKind::SpecialCharsUncertain,
            _ => WarningKind::StructureAmbiguous,
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal observation about the document or the extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<usize>,
    #[serde(default)]
    pub suggestion: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            page_number: None,
            suggestion: String::new(),
        }
    }

    pub fn on_page(mut self, page: usize) -> Self {
        self.page_number = Some(page);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }
}

// ── Confidence ───────────────────────────────────────────────────────────

/// Per-factor confidence scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceFactors {
    pub text_clarity: f64,
    pub structure_clarity: f64,
    pub special_chars: f64,
    pub completeness: f64,
}

/// A cell the service flagged as uncertain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertainCell {
    pub row: usize,
    pub col: usize,
    pub value: String,
    pub confidence: f64,
    pub reason: String,
}

/// Detailed confidence, the optional refinement of a plain score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceBreakdown {
    pub overall: f64,
    pub breakdown: ConfidenceFactors,
    pub uncertain_cells: Vec<UncertainCell>,
}

/// Confidence as a service may send it: a number, a percentage string, or
/// a breakdown object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ConfidenceWire {
    Score(f64),
    Text(String),
    Detailed(DetailedConfidenceWire),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct DetailedConfidenceWire {
    overall: Option<f64>,
    breakdown: Option<FactorsWire>,
    uncertain_cells: Option<Vec<UncertainCellWire>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FactorsWire {
    text_clarity: Option<f64>,
    structure_clarity: Option<f64>,
    special_chars: Option<f64>,
    completeness: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UncertainCellWire {
    row: Option<usize>,
    col: Option<usize>,
    value: Option<serde_json::Value>,
    confidence: Option<f64>,
    reason: Option<String>,
}

impl ConfidenceWire {
    /// Normalised overall score plus the breakdown, when one was sent.
    pub(crate) fn resolve(self) -> (Option<f64>, Option<ConfidenceBreakdown>) {
        match self {
            ConfidenceWire::Score(v) => (Some(normalize_confidence(v)), None),
            ConfidenceWire::Text(s) => {
                let parsed = s.trim().trim_end_matches('%').trim().parse::<f64>().ok();
                (parsed.map(normalize_confidence), None)
            }
            ConfidenceWire::Detailed(d) => {
                let Some(overall) = d.overall.map(normalize_confidence) else {
                    return (None, None);
                };
                let f = d.breakdown.unwrap_or_default();
                let factor = |v: Option<f64>| v.map(normalize_confidence).unwrap_or(overall);
                let breakdown = ConfidenceFactors {
                    text_clarity: factor(f.text_clarity),
                    structure_clarity: factor(f.structure_clarity),
                    special_chars: factor(f.special_chars),
                    completeness: factor(f.completeness),
                };
                let uncertain_cells = d
                    .uncertain_cells
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|c| {
                        Some(UncertainCell {
                            row: c.row?,
                            col: c.col?,
                            value: match c.value {
                                Some(serde_json::Value::String(s)) => s,
                                Some(serde_json::Value::Null) | None => String::new(),
                                Some(other) => other.to_string(),
                            },
                            confidence: c.confidence.map(normalize_confidence).unwrap_or(0.0),
                            reason: c.reason.unwrap_or_default(),
                        })
                    })
                    .collect();
                (
                    Some(overall),
                    Some(ConfidenceBreakdown {
                        overall,
                        breakdown,
                        uncertain_cells,
                    }),
                )
            }
        }
    }
}

// ── Result ───────────────────────────────────────────────────────────────

/// Per-run counters and timings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStats {
    /// Pages in the source document.
    pub total_pages: usize,
    /// Pages rasterised and sent for extraction (≤ `total_pages`).
    pub processed_pages: usize,
    /// Pages whose extraction call failed or timed out.
    pub failed_pages: usize,
    /// Pages that went through the field/value fallback.
    pub fallback_pages: usize,
    /// Pages that succeeded but contributed no table.
    pub empty_pages: usize,
    pub render_duration_ms: u64,
    pub extraction_duration_ms: u64,
}

/// The terminal artifact of an extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub success: bool,
    pub tables: Vec<RepairedTable>,
    pub warnings: Vec<Warning>,
    pub confidence: f64,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub stats: ExtractionStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<DocumentAnalysis>,
}

impl ExtractionResult {
    /// Fold a fatal error into the `success: false` form.
    pub fn failure(err: &Pdf2TableError, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            tables: Vec::new(),
            warnings: Vec::new(),
            confidence: 0.0,
            processing_time_ms,
            error: Some(err.to_string()),
            error_code: Some(err.code()),
            stats: ExtractionStats::default(),
            analysis: None,
        }
    }

    /// Status for the external conversion record.
    ///
    /// A successful run whose confidence is under `review_threshold`, or that
    /// carries warnings, needs a human look before it is final.
    pub fn status(&self, review_threshold: f64) -> ConversionStatus {
        if !self.success {
            ConversionStatus::Failed
        } else if self.confidence < review_threshold || !self.warnings.is_empty() {
            ConversionStatus::Review
        } else {
            ConversionStatus::Completed
        }
    }
}

/// Lifecycle of a conversion record owned by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Pending,
    Processing,
    Review,
    Completed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_percent_and_fraction() {
        assert_eq!(normalize_confidence(95.0), 0.95);
        assert_eq!(normalize_confidence(0.92), 0.92);
        assert_eq!(normalize_confidence(150.0), 1.0);
        assert_eq!(normalize_confidence(-3.0), 0.0);
        assert_eq!(normalize_confidence(f64::NAN), 0.0);
        assert_eq!(normalize_confidence(1.0), 1.0);
    }

    #[test]
    fn normalize_always_in_unit_range() {
        for v in [-1e9, -0.5, 0.0, 0.3, 1.0, 1.01, 42.0, 100.0, 1e9, f64::INFINITY] {
            let n = normalize_confidence(v);
            assert!((0.0..=1.0).contains(&n), "{v} → {n}");
        }
    }

    #[test]
    fn warning_kind_from_wire() {
        assert_eq!(WarningKind::from_wire("merged_cells"), WarningKind::MergedCells);
        assert_eq!(WarningKind::from_wire("Low Resolution"), WarningKind::LowResolution);
        assert_eq!(WarningKind::from_wire("blurry"), WarningKind::StructureAmbiguous);
    }

    #[test]
    fn warning_serialises_type_field() {
        let w = Warning::new(WarningKind::PartialTable, "Page 2 failed")
            .on_page(2)
            .with_suggestion("Re-scan page 2");
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["type"], "partial_table");
        assert_eq!(json["pageNumber"], 2);
        assert_eq!(json["suggestion"], "Re-scan page 2");
    }

    #[test]
    fn confidence_wire_variants() {
        let c: ConfidenceWire = serde_json::from_str("87").unwrap();
        assert_eq!(c.resolve().0, Some(0.87));

        let c: ConfidenceWire = serde_json::from_str("\"92%\"").unwrap();
        assert_eq!(c.resolve().0, Some(0.92));

        let c: ConfidenceWire = serde_json::from_str(
            r#"{"overall": 90, "breakdown": {"textClarity": 0.8},
                "uncertainCells": [{"row": 1, "col": 2, "value": 12.5, "confidence": 40, "reason": "smudge"}]}"#,
        )
        .unwrap();
        let (overall, details) = c.resolve();
        assert_eq!(overall, Some(0.9));
        let details = details.unwrap();
        assert_eq!(details.breakdown.text_clarity, 0.8);
        assert_eq!(details.breakdown.completeness, 0.9);
        assert_eq!(details.uncertain_cells[0].value, "12.5");
        assert_eq!(details.uncertain_cells[0].confidence, 0.4);
    }

    #[test]
    fn failure_result_carries_code() {
        let r = ExtractionResult::failure(
            &Pdf2TableError::NoTablesFound {
                pages: 1,
                first_error: None,
            },
            12,
        );
        assert!(!r.success);
        assert_eq!(r.error_code, Some(ErrorCode::NoTablesFound));
        assert_eq!(r.status(0.7), ConversionStatus::Failed);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["errorCode"], "NO_TABLES_FOUND");
        assert_eq!(json["processingTimeMs"], 12);
    }

    #[test]
    fn status_review_on_low_confidence_or_warnings() {
        let mut r = ExtractionResult {
            success: true,
            tables: Vec::new(),
            warnings: Vec::new(),
            confidence: 0.95,
            processing_time_ms: 0,
            error: None,
            error_code: None,
            stats: ExtractionStats::default(),
            analysis: None,
        };
        assert_eq!(r.status(0.7), ConversionStatus::Completed);
        r.confidence = 0.5;
        assert_eq!(r.status(0.7), ConversionStatus::Review);
        r.confidence = 0.95;
        r.warnings.push(Warning::new(WarningKind::Skewed, "tilted scan"));
        assert_eq!(r.status(0.7), ConversionStatus::Review);
    }
}
