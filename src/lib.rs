//! # edgequake-pdf2table
//!
//! Extract structured tables from scanned or digital documents using Vision
//! Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Text-layer extractors lose table structure on scans, photos and PDFs
//! whose "tables" are just positioned text. This crate rasterises each page
//! and lets a VLM read the tables as a human would, then treats the model's
//! answer as untrusted data: every table is repaired into a rectangular grid,
//! merged cells that the model wrote only once are filled back in, and sheet
//! names are made safe for spreadsheet output.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Render     rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Analyse    optional: characterise a sample of ≤5 pages
//!  ├─ 4. Extract    one VLM call per page, in page order
//!  ├─ 5. Repair     row-length reconciliation + merged-cell back-fill
//!  ├─ 6. Fallback   field/value re-query for pages without tables
//!  └─ 7. Aggregate  sheet naming (≤31 chars) + document confidence
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2table::{extract, ExtractionConfig, ExtractionMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let result = extract("invoice.pdf", &ExtractionMode::default(), &config).await?;
//!     for table in &result.tables {
//!         println!("{} ({} rows)", table.sheet_name, table.rows.len());
//!     }
//!     eprintln!("confidence: {:.2}", result.confidence);
//!     Ok(())
//! }
//! ```
//!
//! ## Analyse, then extract with guidance
//!
//! ```rust,no_run
//! use edgequake_pdf2table::{analyze, extract, ExtractionConfig, ExtractionMode, Guidance};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExtractionConfig::default();
//! let mut guidance = Guidance::default();
//! if let Some(analysis) = analyze("ledger.pdf", &config).await?.into_analysis() {
//!     for q in &analysis.questions {
//!         if let Some(answer) = &q.default_answer {
//!             guidance.answers.insert(q.id.clone(), answer.clone());
//!         }
//!     }
//! }
//! let result = extract("ledger.pdf", &ExtractionMode::Guided(guidance), &config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2table` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-pdf2table = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod cancel;
pub mod config;
pub mod error;
pub mod extract;
pub mod guidance;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod table;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{sample_pages, AnalysisEngine};
pub use cancel::CancelToken;
pub use config::{ExtractionConfig, ExtractionConfigBuilder, TableTemplate};
pub use error::{ErrorCode, PageError, Pdf2TableError, ServiceError};
pub use extract::{
    analyze, extract, extract_from_bytes, extract_sync, ExtractionMode, Extractor, PipelineStage,
};
pub use guidance::{
    AnalysisOutcome, Complexity, DocumentAnalysis, Guidance, OutputPreferences, Question,
    Suggestion,
};
pub use output::{
    normalize_confidence, ConfidenceBreakdown, ConfidenceFactors, ConversionStatus,
    ExtractionResult, ExtractionStats, UncertainCell, Warning, WarningKind,
};
pub use pipeline::render::{
    PageImage, PageMime, PdfiumRasterizer, RasterOutput, Rasterizer, SkippedPage,
};
pub use pipeline::repair::{repair_table, TableRepairer};
pub use pipeline::service::{StructuredExtractionService, VisionLlmService};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use table::{Cell, RawTable, RepairedTable};
