//! AnalysisEngine: characterise a document from a handful of sampled pages.
//!
//! The engine never shows the service the whole document. It picks at most
//! [`MAX_SAMPLE_PAGES`] pages with [`sample_pages`], rasterises just those,
//! asks the analysis prompt about each and merges the answers into one
//! [`DocumentAnalysis`].
//!
//! Failure to rasterise is fatal (`Err`). Failure of every analysis call is
//! not: the outcome is [`AnalysisOutcome::Unavailable`] and the caller is
//! expected to go ahead with direct extraction.

use crate::cancel::CancelToken;
use crate::error::Pdf2TableError;
use crate::guidance::{AnalysisOutcome, Complexity, DocumentAnalysis};
use crate::pipeline::client::{AnalysisPayload, ExtractionClient};
use crate::pipeline::policy::{CallError, CallPolicy};
use crate::pipeline::render::{PageImage, Rasterizer};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on the pages sent to the analysis prompt.
pub const MAX_SAMPLE_PAGES: usize = 5;

/// Choose the 1-based pages to analyse for a document of `total_pages`.
///
/// Page 1 always; for two pages both; from three pages the middle
/// (`ceil(n/2)`) and the last; from ten pages also the 25% and 75%
/// positions. Sorted, de-duplicated, capped at [`MAX_SAMPLE_PAGES`] from the
/// tail so page 1 always stays.
pub fn sample_pages(total_pages: usize) -> Vec<usize> {
    if total_pages == 0 {
        return Vec::new();
    }

    let mut pages = vec![1];
    if total_pages == 2 {
        pages.push(2);
    }
    if total_pages >= 3 {
        pages.push(total_pages.div_ceil(2));
        pages.push(total_pages);
    }
    if total_pages >= 10 {
        pages.push((total_pages as f64 * 0.25).ceil() as usize);
        pages.push((total_pages as f64 * 0.75).ceil() as usize);
    }

    pages.sort_unstable();
    pages.dedup();
    pages.truncate(MAX_SAMPLE_PAGES);
    pages
}

pub struct AnalysisEngine {
    rasterizer: Arc<dyn Rasterizer>,
    client: ExtractionClient,
    policy: CallPolicy,
}

impl AnalysisEngine {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, client: ExtractionClient, policy: CallPolicy) -> Self {
        Self {
            rasterizer,
            client,
            policy,
        }
    }

    /// Count pages, rasterise the sample, analyse it.
    pub async fn analyze(
        &self,
        document: &[u8],
        cancel: &CancelToken,
    ) -> Result<AnalysisOutcome, Pdf2TableError> {
        let total_pages = cancel.guard(self.rasterizer.page_count(document)).await??;
        let sample = sample_pages(total_pages);
        info!("Analysing pages {:?} of {}", sample, total_pages);

        let raster = cancel
            .guard(self.rasterizer.rasterize_pages(document, &sample))
            .await??;
        if raster.pages.is_empty() {
            return Err(Pdf2TableError::PdfConversionFailed {
                detail: "no sampled page could be rendered".into(),
            });
        }

        self.analyze_sampled(raster.pages.iter().collect(), total_pages, cancel)
            .await
    }

    /// Analyse already-rasterised pages. The sample is drawn over the pages
    /// provided, so a run capped at N pages samples within those N.
    pub async fn analyze_pages(
        &self,
        pages: &[PageImage],
        total_pages: usize,
        cancel: &CancelToken,
    ) -> Result<AnalysisOutcome, Pdf2TableError> {
        let picked: Vec<&PageImage> = sample_pages(pages.len())
            .into_iter()
            .filter_map(|i| pages.get(i - 1))
            .collect();
        self.analyze_sampled(picked, total_pages, cancel).await
    }

    async fn analyze_sampled(
        &self,
        picked: Vec<&PageImage>,
        total_pages: usize,
        cancel: &CancelToken,
    ) -> Result<AnalysisOutcome, Pdf2TableError> {
        let mut answers = Vec::with_capacity(picked.len());
        let mut last_error = None;

        for page in picked {
            let result = self
                .policy
                .run(page.page_number, cancel, || self.client.analyze(page))
                .await;
            match result {
                Ok(payload) => {
                    debug!("Page {}: analysis received", page.page_number);
                    answers.push((page.page_number, payload));
                }
                Err(CallError::Cancelled) => return Err(Pdf2TableError::Cancelled),
                Err(CallError::Failed(e)) => {
                    warn!("Analysis of page {} failed: {}", page.page_number, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        if answers.is_empty() {
            let reason = last_error.unwrap_or_else(|| "no page to analyse".to_string());
            warn!("Analysis unavailable: {}", reason);
            return Ok(AnalysisOutcome::Unavailable {
                page_count: total_pages,
                reason,
            });
        }

        Ok(AnalysisOutcome::Ready(merge_analyses(answers, total_pages)))
    }
}

/// Fold per-page answers into one document characterisation.
///
/// The first non-empty document type wins; table counts add up; languages,
/// warnings, questions and suggestions are unioned (by id for the last two);
/// the highest complexity wins.
pub fn merge_analyses(answers: Vec<(usize, AnalysisPayload)>, page_count: usize) -> DocumentAnalysis {
    let mut analysis = DocumentAnalysis {
        document_type: String::new(),
        page_count,
        tables_detected: 0,
        languages: BTreeSet::new(),
        complexity: Complexity::Low,
        questions: Vec::new(),
        suggestions: Vec::new(),
        warnings: Vec::new(),
        sampled_pages: Vec::with_capacity(answers.len()),
    };
    let mut question_ids = HashSet::new();
    let mut suggestion_ids = HashSet::new();

    for (page, a) in answers {
        analysis.sampled_pages.push(page);
        if analysis.document_type.is_empty() {
            if let Some(t) = a.document_type {
                analysis.document_type = t;
            }
        }
        analysis.tables_detected += a.tables_detected;
        analysis.languages.extend(a.languages);
        analysis.complexity = analysis.complexity.max(a.complexity);
        for q in a.questions {
            if question_ids.insert(q.id.clone()) {
                analysis.questions.push(q);
            }
        }
        for s in a.suggestions {
            if suggestion_ids.insert(s.id.clone()) {
                analysis.suggestions.push(s);
            }
        }
        for w in a.warnings {
            if !analysis.warnings.contains(&w) {
                analysis.warnings.push(w);
            }
        }
    }

    if analysis.document_type.is_empty() {
        analysis.document_type = "unknown".to_string();
    }
    analysis.sampled_pages.sort_unstable();
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guidance::{Question, Suggestion};

    #[test]
    fn sampling_small_documents() {
        assert_eq!(sample_pages(0), Vec::<usize>::new());
        assert_eq!(sample_pages(1), vec![1]);
        assert_eq!(sample_pages(2), vec![1, 2]);
        assert_eq!(sample_pages(3), vec![1, 2, 3]);
        assert_eq!(sample_pages(7), vec![1, 4, 7]);
    }

    #[test]
    fn sampling_large_documents() {
        assert_eq!(sample_pages(10), vec![1, 3, 5, 8, 10]);
        assert_eq!(sample_pages(20), vec![1, 5, 10, 15, 20]);
        for n in 1..500 {
            let s = sample_pages(n);
            assert!(s.len() <= MAX_SAMPLE_PAGES, "{n}: {s:?}");
            assert_eq!(s[0], 1);
            assert!(s.windows(2).all(|w| w[0] < w[1]), "{n}: {s:?}");
            assert!(*s.last().unwrap() <= n);
        }
    }

    fn payload(doc: Option<&str>, lang: &[&str], complexity: Complexity, q: &[&str]) -> AnalysisPayload {
        AnalysisPayload {
            document_type: doc.map(str::to_string),
            tables_detected: 1,
            languages: lang.iter().map(|s| s.to_string()).collect(),
            complexity,
            questions: q
                .iter()
                .map(|id| Question {
                    id: id.to_string(),
                    question: format!("{id}?"),
                    options: Vec::new(),
                    default_answer: None,
                })
                .collect(),
            suggestions: vec![Suggestion {
                id: "split".into(),
                description: "Split sections".into(),
                recommended: true,
            }],
            warnings: vec!["faint".into()],
        }
    }

    #[test]
    fn merge_unions_and_maxes() {
        let a = merge_analyses(
            vec![
                (4, payload(None, &["en"], Complexity::Low, &["q1"])),
                (1, payload(Some("invoice"), &["fr"], Complexity::High, &["q1", "q2"])),
            ],
            9,
        );
        assert_eq!(a.document_type, "invoice");
        assert_eq!(a.page_count, 9);
        assert_eq!(a.tables_detected, 2);
        assert_eq!(a.languages.iter().collect::<Vec<_>>(), ["en", "fr"]);
        assert_eq!(a.complexity, Complexity::High);
        assert_eq!(a.questions.len(), 2);
        assert_eq!(a.suggestions.len(), 1);
        assert_eq!(a.warnings, vec!["faint"]);
        assert_eq!(a.sampled_pages, vec![1, 4]);
    }

    #[test]
    fn merge_defaults_document_type() {
        let a = merge_analyses(vec![(1, payload(None, &[], Complexity::Low, &[]))], 1);
        assert_eq!(a.document_type, "unknown");
    }
}
