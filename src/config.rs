//! Configuration types for table extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. One struct holds every knob so a run
//! can be logged, cloned into a task, or diffed against another run.
//!
//! Usage limits are explicit here (`max_pages`, `max_file_bytes`,
//! `unlimited`). Nothing in the library reads process-wide switches to bypass
//! them; the caller that owns subscription state decides and sets `unlimited`.

use crate::error::Pdf2TableError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Number of leading columns eligible for merged-cell back-fill.
///
/// Group-header style merged cells (department, project, category) sit in
/// the first columns of most tables seen in practice. This is a tuned
/// heuristic, not a rule; override it with
/// [`ExtractionConfigBuilder::merge_fill_columns`].
pub const DEFAULT_MERGE_FILL_COLUMNS: usize = 3;

/// Configuration for a table extraction run.
///
/// # Example
/// ```rust
/// use edgequake_pdf2table::{ExtractionConfig, TableTemplate};
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .max_pages(10)
///     .template(TableTemplate::Invoice)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Caps either dimension independently of DPI so an oversized page cannot
    /// produce an image larger than the vision APIs accept.
    pub max_rendered_pixels: u32,

    /// Maximum number of pages rasterised and extracted. Default: 20.
    ///
    /// Ignored when `unlimited` is set. The true page count is still
    /// reported in the result.
    pub max_pages: usize,

    /// Maximum document size in bytes. Default: 20 MiB.
    pub max_file_bytes: u64,

    /// Lift `max_pages` and `max_file_bytes`. Default: false.
    pub unlimited: bool,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per page. Default: 8192.
    ///
    /// Tables serialised as JSON are verbose; a dense ledger page easily
    /// exceeds 4 000 output tokens and a truncated payload fails to parse.
    pub max_tokens: usize,

    /// Retries on a transient service failure (`AI_API_ERROR`). Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for the extraction service in seconds. Default: 90.
    ///
    /// A timeout fails only the page being extracted.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Template used when no guidance is supplied. Default: [`TableTemplate::Auto`].
    pub template: TableTemplate,

    /// Custom extraction prompt. Replaces the template prompt when set.
    pub system_prompt: Option<String>,

    /// Leading columns eligible for merged-cell back-fill. Default: 3.
    pub merge_fill_columns: usize,

    /// Re-query a table-less page with the field/value prompt. Default: true.
    pub fallback_enabled: bool,

    /// Characterise the document on the rendered pages before extracting. Default: false.
    pub analyze_first: bool,

    /// Confidence below which a successful run is flagged for review. Default: 0.7.
    pub review_threshold: f64,

    /// Path to libpdfium (file or directory). Falls back to `PDFIUM_LIB_PATH`,
    /// then to the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            max_pages: 20,
            max_file_bytes: 20 * 1024 * 1024,
            unlimited: false,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 90,
            download_timeout_secs: 120,
            password: None,
            template: TableTemplate::default(),
            system_prompt: None,
            merge_fill_columns: DEFAULT_MERGE_FILL_COLUMNS,
            fallback_enabled: true,
            analyze_first: false,
            review_threshold: 0.7,
            pdfium_library_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_pages", &self.max_pages)
            .field("max_file_bytes", &self.max_file_bytes)
            .field("unlimited", &self.unlimited)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("template", &self.template)
            .field("merge_fill_columns", &self.merge_fill_columns)
            .field("fallback_enabled", &self.fallback_enabled)
            .field("analyze_first", &self.analyze_first)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Page cap handed to the rasteriser.
    pub fn page_limit(&self) -> usize {
        if self.unlimited {
            usize::MAX
        } else {
            self.max_pages
        }
    }

    /// Size cap for input documents, `None` when unlimited.
    pub fn file_size_limit(&self) -> Option<u64> {
        (!self.unlimited).then_some(self.max_file_bytes)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn max_file_bytes(mut self, n: u64) -> Self {
        self.config.max_file_bytes = n;
        self
    }

    pub fn unlimited(mut self, v: bool) -> Self {
        self.config.unlimited = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn template(mut self, template: TableTemplate) -> Self {
        self.config.template = template;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn merge_fill_columns(mut self, n: usize) -> Self {
        self.config.merge_fill_columns = n;
        self
    }

    pub fn fallback_enabled(mut self, v: bool) -> Self {
        self.config.fallback_enabled = v;
        self
    }

    pub fn analyze_first(mut self, v: bool) -> Self {
        self.config.analyze_first = v;
        self
    }

    pub fn review_threshold(mut self, t: f64) -> Self {
        self.config.review_threshold = t;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Pdf2TableError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Pdf2TableError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_pages == 0 && !c.unlimited {
            return Err(Pdf2TableError::InvalidConfig(
                "max_pages must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(Pdf2TableError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.review_threshold) {
            return Err(Pdf2TableError::InvalidConfig(format!(
                "review_threshold must be within 0–1, got {}",
                c.review_threshold
            )));
        }
        Ok(self.config)
    }
}

// ── Templates ────────────────────────────────────────────────────────────

/// Document-type template steering the default extraction prompt.
///
/// The template only adds a hint about what tables to expect; repair,
/// fallback and aggregation are identical for every template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableTemplate {
    /// Let the model decide what is tabular. (default)
    #[default]
    Auto,
    Invoice,
    BankStatement,
    Receipt,
    Schedule,
    Inventory,
    Financial,
}

impl TableTemplate {
    /// Stable template id, as accepted by [`FromStr`].
    pub fn id(&self) -> &'static str {
        match self {
            TableTemplate::Auto => "auto",
            TableTemplate::Invoice => "invoice",
            TableTemplate::BankStatement => "bank_statement",
            TableTemplate::Receipt => "receipt",
            TableTemplate::Schedule => "schedule",
            TableTemplate::Inventory => "inventory",
            TableTemplate::Financial => "financial",
        }
    }
}

impl FromStr for TableTemplate {
    type Err = Pdf2TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "" | "auto" | "generic" => Ok(TableTemplate::Auto),
            "invoice" => Ok(TableTemplate::Invoice),
            "bank_statement" | "bank" => Ok(TableTemplate::BankStatement),
            "receipt" => Ok(TableTemplate::Receipt),
            "schedule" | "timetable" => Ok(TableTemplate::Schedule),
            "inventory" => Ok(TableTemplate::Inventory),
            "financial" | "financial_statement" => Ok(TableTemplate::Financial),
            other => Err(Pdf2TableError::InvalidConfig(format!(
                "unknown template '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.dpi, 150);
        assert_eq!(c.max_pages, 20);
        assert_eq!(c.merge_fill_columns, DEFAULT_MERGE_FILL_COLUMNS);
        assert!(c.fallback_enabled);
        assert!(!c.unlimited);
    }

    #[test]
    fn builder_clamps_dpi() {
        let c = ExtractionConfig::builder().dpi(1000).build().unwrap();
        assert_eq!(c.dpi, 400);
    }

    #[test]
    fn unlimited_lifts_caps() {
        let c = ExtractionConfig::builder()
            .max_pages(3)
            .unlimited(true)
            .build()
            .unwrap();
        assert_eq!(c.page_limit(), usize::MAX);
        assert_eq!(c.file_size_limit(), None);

        let c = ExtractionConfig::builder().max_pages(3).build().unwrap();
        assert_eq!(c.page_limit(), 3);
        assert_eq!(c.file_size_limit(), Some(20 * 1024 * 1024));
    }

    #[test]
    fn zero_pages_rejected() {
        assert!(ExtractionConfig::builder().max_pages(0).build().is_err());
    }

    #[test]
    fn review_threshold_out_of_range_rejected() {
        assert!(ExtractionConfig::builder()
            .review_threshold(1.5)
            .build()
            .is_err());
    }

    #[test]
    fn template_ids_round_trip() {
        for t in [
            TableTemplate::Auto,
            TableTemplate::Invoice,
            TableTemplate::BankStatement,
            TableTemplate::Receipt,
            TableTemplate::Schedule,
            TableTemplate::Inventory,
            TableTemplate::Financial,
        ] {
            assert_eq!(t.id().parse::<TableTemplate>().unwrap(), t);
        }
        assert_eq!(
            "Bank-Statement".parse::<TableTemplate>().unwrap(),
            TableTemplate::BankStatement
        );
        assert!("spaceship".parse::<TableTemplate>().is_err());
    }
}
