//! Document analysis and user guidance.
//!
//! An analysis pass characterises a document from a few sampled pages and
//! proposes clarifying questions and suggestions. The caller shows them to a
//! user and turns the answers into a [`Guidance`], which biases the prompt of
//! a later extraction pass.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Rough difficulty of a document's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Low,
    Medium,
    High,
}

impl Complexity {
    pub(crate) fn from_wire(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" | "complex" => Complexity::High,
            "medium" | "moderate" => Complexity::Medium,
            _ => Complexity::Low,
        }
    }
}

/// A clarifying question for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_answer: Option<String>,
}

/// An optional processing step the user may accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub recommended: bool,
}

/// Document-level characterisation produced by the analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAnalysis {
    pub document_type: String,
    pub page_count: usize,
    /// Tables seen across the sampled pages.
    pub tables_detected: usize,
    pub languages: BTreeSet<String>,
    pub complexity: Complexity,
    pub questions: Vec<Question>,
    pub suggestions: Vec<Suggestion>,
    pub warnings: Vec<String>,
    /// The 1-based pages the characterisation was drawn from.
    pub sampled_pages: Vec<usize>,
}

/// Outcome of an analysis request.
///
/// `Unavailable` is not an error: the caller should proceed with direct
/// extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Ready(DocumentAnalysis),
    Unavailable { page_count: usize, reason: String },
}

impl AnalysisOutcome {
    pub fn analysis(&self) -> Option<&DocumentAnalysis> {
        match self {
            AnalysisOutcome::Ready(a) => Some(a),
            AnalysisOutcome::Unavailable { .. } => None,
        }
    }

    pub fn into_analysis(self) -> Option<DocumentAnalysis> {
        match self {
            AnalysisOutcome::Ready(a) => Some(a),
            AnalysisOutcome::Unavailable { .. } => None,
        }
    }
}

/// Output preferences a user chose after the analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputPreferences {
    pub combine_related_tables: bool,
    /// Language for headers and sheet names; `None` keeps the source language.
    pub output_language: Option<String>,
    pub skip_diagrams: bool,
    pub skip_images: bool,
    /// Symbol → replacement text, e.g. `"✓" → "Yes"`.
    pub symbol_mapping: BTreeMap<String, String>,
}

/// User-approved answers that bias a guided extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Guidance {
    /// Question id → answer.
    pub answers: BTreeMap<String, String>,
    pub accepted_suggestions: BTreeSet<String>,
    /// Suggestion id → description, so the prompt can say what each
    /// accepted suggestion means.
    pub suggestion_descriptions: BTreeMap<String, String>,
    pub freeform_instructions: Option<String>,
    pub output_preferences: OutputPreferences,
}

impl Guidance {
    /// Accept an analysis suggestion, keeping its description.
    pub fn accept(&mut self, suggestion: &Suggestion) {
        self.accepted_suggestions.insert(suggestion.id.clone());
        if !suggestion.description.trim().is_empty() {
            self.suggestion_descriptions
                .insert(suggestion.id.clone(), suggestion.description.clone());
        }
    }

    /// True when nothing in the guidance would change the prompt.
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
            && self.accepted_suggestions.is_empty()
            && self
                .freeform_instructions
                .as_deref()
                .is_none_or(|s| s.trim().is_empty())
            && self.output_preferences == OutputPreferences::default()
    }
}
