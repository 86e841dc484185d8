//! ExtractionOrchestrator and the top-level entry points.
//!
//! An [`Extractor`] drives one document through the stages of
//! [`PipelineStage`]:
//!
//! ```text
//! Rasterizing ─▶ (Analyzing) ─▶ ExtractingPerPage ─▶ Repairing ─▶ (FallingBack) ─▶ Aggregating ─▶ Ready
//!      │                               │
//!      └──────────────▶ Failed ◀───────┘ (no table survived)
//! ```
//!
//! Pages are extracted one at a time in page order: sheet naming depends on
//! it and progress is reported per page. A page whose call fails or times
//! out becomes a `partial_table` warning and the loop moves on; the run only
//! fails when no table survives across all pages.
//!
//! ## Fatal vs. folded failures
//!
//! Errors before extraction starts (input, configuration, rasterisation)
//! and cancellation come back as `Err`. A run that extracted every page but
//! found nothing comes back as `Ok` with `success: false` and
//! `NO_TABLES_FOUND`, so its warnings and stats are kept. Callers that need
//! a single shape fold an `Err` with [`ExtractionResult::failure`].

use crate::analyze::AnalysisEngine;
use crate::cancel::CancelToken;
use crate::config::{ExtractionConfig, TableTemplate};
use crate::error::{PageError, Pdf2TableError};
use crate::guidance::{AnalysisOutcome, Guidance};
use crate::output::{ExtractionResult, ExtractionStats, Warning, WarningKind};
use crate::pipeline::aggregate::{mean_confidence, Aggregator, PageTables};
use crate::pipeline::client::{ExtractionClient, PagePayload};
use crate::pipeline::fallback::FallbackExtractor;
use crate::pipeline::input;
use crate::pipeline::policy::{CallError, CallPolicy};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::repair::{RepairReport, TableRepairer};
use crate::pipeline::service::{StructuredExtractionService, VisionLlmService};
use crate::prompts::{guided_prompt, template_prompt};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How the extraction prompt is chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionMode {
    /// The prompt for `config.template` (or `config.system_prompt` when set).
    Configured,
    /// The prompt for this template, overriding `config.template`.
    /// `config.system_prompt` still wins when set.
    Template(TableTemplate),
    /// A prompt assembled from user guidance; replaces the template prompt.
    Guided(Guidance),
}

impl Default for ExtractionMode {
    fn default() -> Self {
        ExtractionMode::Configured
    }
}

impl From<TableTemplate> for ExtractionMode {
    fn from(t: TableTemplate) -> Self {
        ExtractionMode::Template(t)
    }
}

impl From<Guidance> for ExtractionMode {
    fn from(g: Guidance) -> Self {
        ExtractionMode::Guided(g)
    }
}

impl ExtractionMode {
    /// The primary extraction prompt for this mode.
    pub fn prompt(&self, config: &ExtractionConfig) -> String {
        match self {
            ExtractionMode::Configured => config
                .system_prompt
                .clone()
                .unwrap_or_else(|| template_prompt(config.template)),
            ExtractionMode::Template(t) => config
                .system_prompt
                .clone()
                .unwrap_or_else(|| template_prompt(*t)),
            ExtractionMode::Guided(g) => guided_prompt(g),
        }
    }
}

/// States of an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Rasterizing,
    Analyzing,
    ExtractingPerPage,
    Repairing,
    FallingBack,
    Aggregating,
    Ready,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Rasterizing => "rasterizing",
            PipelineStage::Analyzing => "analyzing",
            PipelineStage::ExtractingPerPage => "extracting",
            PipelineStage::Repairing => "repairing",
            PipelineStage::FallingBack => "falling_back",
            PipelineStage::Aggregating => "aggregating",
            PipelineStage::Ready => "ready",
            PipelineStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Ready | PipelineStage::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(stage: PipelineStage, page: Option<usize>) {
    match page {
        Some(p) => debug!("Page {}: stage → {}", p, stage),
        None => debug!("Stage → {}", stage),
    }
}

/// The document-level orchestrator.
///
/// Holds no per-run state: one `Extractor` can serve many documents, one
/// after another or concurrently.
pub struct Extractor {
    rasterizer: Arc<dyn Rasterizer>,
    client: ExtractionClient,
    repairer: TableRepairer,
    fallback: FallbackExtractor,
    policy: CallPolicy,
    config: ExtractionConfig,
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("policy", &self.policy)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Extractor {
    /// Build from explicit collaborators.
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        service: Arc<dyn StructuredExtractionService>,
        config: ExtractionConfig,
    ) -> Self {
        let client = ExtractionClient::new(service);
        Self {
            rasterizer,
            fallback: FallbackExtractor::new(client.clone()),
            client,
            repairer: TableRepairer::new(config.merge_fill_columns),
            policy: CallPolicy::from_config(&config),
            config,
        }
    }

    /// pdfium rasteriser plus the LLM provider resolved from `config`.
    ///
    /// # Errors
    /// [`Pdf2TableError::ProviderNotConfigured`] when no provider can be
    /// resolved.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, Pdf2TableError> {
        let service = VisionLlmService::from_config(&config)?;
        let rasterizer = PdfiumRasterizer::from_config(&config);
        Ok(Self::new(Arc::new(rasterizer), Arc::new(service), config))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn analysis_engine(&self) -> AnalysisEngine {
        AnalysisEngine::new(Arc::clone(&self.rasterizer), self.client.clone(), self.policy)
    }

    /// Characterise `document` from a sample of its pages.
    pub async fn analyze(&self, document: &[u8]) -> Result<AnalysisOutcome, Pdf2TableError> {
        self.analyze_with_cancel(document, &CancelToken::new()).await
    }

    pub async fn analyze_with_cancel(
        &self,
        document: &[u8],
        cancel: &CancelToken,
    ) -> Result<AnalysisOutcome, Pdf2TableError> {
        input::check_size(document.len() as u64, self.config.file_size_limit())?;
        self.analysis_engine().analyze(document, cancel).await
    }

    /// Extract every table from `document`.
    pub async fn extract(
        &self,
        document: &[u8],
        mode: &ExtractionMode,
    ) -> Result<ExtractionResult, Pdf2TableError> {
        self.extract_with_cancel(document, mode, &CancelToken::new())
            .await
    }

    /// [`extract`](Self::extract), abortable through `cancel`.
    ///
    /// A cancelled run returns `Err(Cancelled)`; no partial result is
    /// produced.
    pub async fn extract_with_cancel(
        &self,
        document: &[u8],
        mode: &ExtractionMode,
        cancel: &CancelToken,
    ) -> Result<ExtractionResult, Pdf2TableError> {
        let outcome = self.run(document, mode, cancel).await;
        match &outcome {
            Ok(r) if r.success => enter(PipelineStage::Ready, None),
            Ok(r) => {
                enter(PipelineStage::Failed, None);
                warn!("Extraction failed: {}", r.error.as_deref().unwrap_or("unknown"));
            }
            Err(e) => {
                enter(PipelineStage::Failed, None);
                warn!("Extraction failed: {}", e);
            }
        }
        outcome
    }

    async fn run(
        &self,
        document: &[u8],
        mode: &ExtractionMode,
        cancel: &CancelToken,
    ) -> Result<ExtractionResult, Pdf2TableError> {
        let start = Instant::now();
        let cb = self.config.progress_callback.as_ref();
        input::check_size(document.len() as u64, self.config.file_size_limit())?;

        // ── Rasterise ────────────────────────────────────────────────────
        enter(PipelineStage::Rasterizing, None);
        let render_start = Instant::now();
        let raster = cancel
            .guard(self.rasterizer.rasterize(document, self.config.page_limit()))
            .await??;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;
        let processed = raster.pages.len() + raster.skipped.len();
        info!(
            "Rendered {} of {} pages in {}ms",
            processed, raster.total_pages, render_duration_ms
        );
        if raster.total_pages > processed {
            info!(
                "Pages {}–{} are beyond the page limit and were not extracted",
                processed + 1,
                raster.total_pages
            );
        }

        // ── Analyse (optional) ───────────────────────────────────────────
        let analysis = if self.config.analyze_first {
            enter(PipelineStage::Analyzing, None);
            self.analysis_engine()
                .analyze_pages(&raster.pages, raster.total_pages, cancel)
                .await?
                .into_analysis()
        } else {
            None
        };

        // ── Extract page by page ─────────────────────────────────────────
        let prompt = mode.prompt(&self.config);
        if let Some(cb) = cb {
            cb.on_extraction_start(processed);
        }

        let extract_start = Instant::now();
        let mut stats = ExtractionStats {
            total_pages: raster.total_pages,
            processed_pages: processed,
            render_duration_ms,
            ..Default::default()
        };
        let mut warnings: Vec<Warning> = Vec::new();
        let mut page_errors: Vec<PageError> = Vec::new();
        let mut pages: Vec<PageTables> = Vec::with_capacity(processed);

        for skipped in &raster.skipped {
            let e = PageError::RenderFailed {
                page: skipped.page_number,
                detail: skipped.reason.clone(),
            };
            if let Some(cb) = cb {
                cb.on_page_error(skipped.page_number, processed, &e.to_string());
            }
            warnings.push(page_failed_warning(&e));
            stats.failed_pages += 1;
            page_errors.push(e);
            pages.push(PageTables {
                page_number: skipped.page_number,
                ..Default::default()
            });
        }

        for page in &raster.pages {
            let n = page.page_number;
            enter(PipelineStage::ExtractingPerPage, Some(n));
            if let Some(cb) = cb {
                cb.on_page_start(n, processed);
            }

            let payload = match self
                .policy
                .run(n, cancel, || self.client.extract(page, &prompt))
                .await
            {
                Ok(p) => p,
                Err(CallError::Cancelled) => return Err(Pdf2TableError::Cancelled),
                Err(CallError::Failed(e)) => {
                    warn!("{}", e);
                    if let Some(cb) = cb {
                        cb.on_page_error(n, processed, &e.to_string());
                    }
                    warnings.push(page_failed_warning(&e));
                    stats.failed_pages += 1;
                    page_errors.push(e);
                    pages.push(PageTables {
                        page_number: n,
                        ..Default::default()
                    });
                    continue;
                }
            };

            enter(PipelineStage::Repairing, Some(n));
            let (mut page_tables, page_warnings) = self.repair_page(n, payload);
            warnings.extend(page_warnings);

            if page_tables.tables.is_empty() && self.config.fallback_enabled {
                enter(PipelineStage::FallingBack, Some(n));
                if let Some(cb) = cb {
                    cb.on_page_fallback(n, processed);
                }
                stats.fallback_pages += 1;
                match self
                    .policy
                    .run(n, cancel, || self.fallback.extract(page))
                    .await
                {
                    Ok(p) => {
                        let (fb_tables, fb_warnings) = self.repair_page(n, p);
                        if !fb_tables.tables.is_empty() {
                            warnings.extend(fb_warnings);
                            warnings.push(FallbackExtractor::substitution_warning(n));
                            page_tables = fb_tables;
                        } else {
                            debug!("Page {}: fallback found nothing either", n);
                        }
                    }
                    Err(CallError::Cancelled) => return Err(Pdf2TableError::Cancelled),
                    Err(CallError::Failed(e)) => {
                        warn!("Page {}: fallback failed: {}", n, e);
                    }
                }
            }

            if page_tables.tables.is_empty() {
                stats.empty_pages += 1;
                page_tables.confidence = None;
            }
            if let Some(cb) = cb {
                cb.on_page_complete(n, processed, page_tables.tables.len());
            }
            pages.push(page_tables);
        }

        stats.extraction_duration_ms = extract_start.elapsed().as_millis() as u64;
        if let Some(cb) = cb {
            cb.on_extraction_complete(processed, processed - stats.failed_pages);
        }

        // ── Aggregate ────────────────────────────────────────────────────
        enter(PipelineStage::Aggregating, None);
        let aggregated = Aggregator::new(raster.total_pages).aggregate(pages);
        let processing_time_ms = start.elapsed().as_millis() as u64;

        if aggregated.tables.is_empty() {
            let err = Pdf2TableError::NoTablesFound {
                pages: processed,
                first_error: page_errors.first().map(|e| e.to_string()),
            };
            return Ok(ExtractionResult {
                warnings,
                stats,
                analysis,
                ..ExtractionResult::failure(&err, processing_time_ms)
            });
        }

        info!(
            "Extraction complete: {} table(s) from {}/{} pages, confidence {:.2}, {}ms",
            aggregated.tables.len(),
            processed - stats.failed_pages,
            processed,
            aggregated.confidence,
            processing_time_ms
        );

        Ok(ExtractionResult {
            success: true,
            tables: aggregated.tables,
            warnings,
            confidence: aggregated.confidence,
            processing_time_ms,
            error: None,
            error_code: None,
            stats,
            analysis,
        })
    }

    /// Repair one page's payload: assign the page number, fix every table,
    /// drop tables left without rows, and turn the repair report into
    /// warnings.
    fn repair_page(&self, page: usize, payload: PagePayload) -> (PageTables, Vec<Warning>) {
        let PagePayload {
            tables: raw_tables,
            warnings: service_warnings,
            confidence,
            confidence_details,
        } = payload;

        let page_confidence =
            confidence.or_else(|| mean_present(raw_tables.iter().map(|t| t.confidence)));

        let mut report = RepairReport::default();
        let mut tables = Vec::with_capacity(raw_tables.len());
        for mut raw in raw_tables {
            raw.page_number = page;
            if raw.confidence.is_none() && raw.confidence_details.is_none() {
                raw.confidence_details = confidence_details.clone();
            }
            let (table, r) = self.repairer.repair(raw, page_confidence);
            report.merge(r);
            if table.rows.is_empty() {
                debug!("Page {}: dropping table '{}' with no rows", page, table.sheet_name);
                continue;
            }
            tables.push(table);
        }

        let mut warnings: Vec<Warning> = service_warnings
            .into_iter()
            .map(|w| w.on_page(page))
            .collect();
        if report.backfilled_cells > 0 {
            warnings.push(
                Warning::new(
                    WarningKind::MergedCells,
                    format!(
                        "Filled {} cell(s) on page {} from merged cells spanning several rows",
                        report.backfilled_cells, page
                    ),
                )
                .on_page(page)
                .with_suggestion("Check grouped values in the leading columns"),
            );
        }
        if report.truncated_rows > 0 {
            warnings.push(
                Warning::new(
                    WarningKind::SkippedContent,
                    format!(
                        "{} row(s) on page {} had more cells than headers; extra cells were dropped",
                        report.truncated_rows, page
                    ),
                )
                .on_page(page)
                .with_suggestion("Compare the rightmost columns with the source"),
            );
        }

        let confidence = if tables.is_empty() {
            None
        } else {
            Some(page_confidence.unwrap_or_else(|| {
                mean_confidence(tables.iter().map(|t| Some(t.confidence)))
            }))
        };

        (
            PageTables {
                page_number: page,
                tables,
                confidence,
            },
            warnings,
        )
    }
}

fn mean_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let present: Vec<f64> = values.flatten().collect();
    (!present.is_empty()).then(|| mean_confidence(present.into_iter().map(Some)))
}

fn page_failed_warning(e: &PageError) -> Warning {
    Warning::new(
        WarningKind::PartialTable,
        format!("Page {} could not be extracted: {}", e.page(), e),
    )
    .on_page(e.page())
    .with_suggestion(format!(
        "Retry the document or check page {} for legibility ({})",
        e.page(),
        e.code()
    ))
}

// ── Top-level entry points ───────────────────────────────────────────────

/// Extract tables from a file path or URL.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2table::{extract, ExtractionConfig, ExtractionMode, TableTemplate};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::default();
/// let result = extract("statement.pdf", &TableTemplate::BankStatement.into(), &config).await?;
/// for table in &result.tables {
///     println!("{}: {} rows", table.sheet_name, table.rows.len());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    input_str: impl AsRef<str>,
    mode: &ExtractionMode,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, Pdf2TableError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let bytes = input::load_document(
        input_str,
        config.download_timeout_secs,
        config.file_size_limit(),
    )
    .await?;
    Extractor::from_config(config.clone())?
        .extract(&bytes, mode)
        .await
}

/// Extract tables from an in-memory document.
pub async fn extract_from_bytes(
    bytes: &[u8],
    mode: &ExtractionMode,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, Pdf2TableError> {
    Extractor::from_config(config.clone())?
        .extract(bytes, mode)
        .await
}

/// Analyse a file path or URL.
pub async fn analyze(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<AnalysisOutcome, Pdf2TableError> {
    let input_str = input_str.as_ref();
    info!("Starting analysis: {}", input_str);
    let bytes = input::load_document(
        input_str,
        config.download_timeout_secs,
        config.file_size_limit(),
    )
    .await?;
    Extractor::from_config(config.clone())?.analyze(&bytes).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    mode: &ExtractionMode,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, Pdf2TableError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2TableError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, mode, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_mode_honours_system_prompt() {
        let config = ExtractionConfig::builder()
            .system_prompt("custom")
            .build()
            .unwrap();
        assert_eq!(
            ExtractionMode::Template(TableTemplate::Invoice).prompt(&config),
            "custom"
        );
        assert_eq!(
            ExtractionMode::default().prompt(&ExtractionConfig::default()),
            template_prompt(TableTemplate::Auto)
        );
    }

    #[test]
    fn default_mode_uses_configured_template() {
        let config = ExtractionConfig::builder()
            .template(TableTemplate::Invoice)
            .build()
            .unwrap();
        assert_eq!(
            ExtractionMode::default().prompt(&config),
            template_prompt(TableTemplate::Invoice)
        );
        assert_eq!(
            ExtractionMode::Template(TableTemplate::BankStatement).prompt(&config),
            template_prompt(TableTemplate::BankStatement)
        );
    }

    #[test]
    fn guided_mode_replaces_template_prompt() {
        let mut g = Guidance::default();
        g.freeform_instructions = Some("Keep the totals row".into());
        let config = ExtractionConfig::builder()
            .system_prompt("custom")
            .build()
            .unwrap();
        let p = ExtractionMode::Guided(g).prompt(&config);
        assert!(p.contains("Keep the totals row"));
        assert_ne!(p, "custom");
    }

    #[test]
    fn stage_names() {
        assert_eq!(PipelineStage::FallingBack.to_string(), "falling_back");
        assert!(PipelineStage::Failed.is_terminal());
        assert!(!PipelineStage::Repairing.is_terminal());
    }

    #[test]
    fn mean_present_ignores_missing() {
        assert_eq!(mean_present([None, None].into_iter()), None);
        let m = mean_present([Some(0.6), None, Some(0.8)].into_iter()).unwrap();
        assert!((m - 0.7).abs() < 1e-9);
    }

    #[test]
    fn failed_page_warning_is_partial_table() {
        let w = page_failed_warning(&PageError::Timeout { page: 3, secs: 90 });
        assert_eq!(w.kind, WarningKind::PartialTable);
        assert_eq!(w.page_number, Some(3));
        assert!(w.message.contains("Page 3"));
    }
}
