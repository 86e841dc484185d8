//! CLI binary for edgequake-pdf2table.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs one analysis or extraction, and prints the JSON
//! result.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2table::pipeline::input::load_document;
use edgequake_pdf2table::{
    CancelToken, ExtractionConfig, ExtractionMode, ExtractionProgressCallback, ExtractionResult,
    Extractor, Guidance, ProgressCallback, TableTemplate,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    tables: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_extraction_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            tables: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed(&self, page_num: usize) -> String {
        let ms = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting tables from {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_fallback(&self, page_num: usize, _total: usize) {
        self.bar
            .set_message(format!("page {page_num}: no table, trying field/value"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, tables: usize) {
        self.tables.fetch_add(tables, Ordering::SeqCst);
        let mark = if tables == 0 { yellow("∅") } else { green("✓") };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            mark,
            page_num,
            total,
            dim(&format!("{tables} table(s)")),
            self.elapsed(page_num),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            self.elapsed(page_num),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        let tables = self.tables.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} table(s) from {} pages",
                green("✔"),
                bold(&tables.to_string()),
                success_count
            );
        } else {
            eprintln!(
                "{} {} table(s) from {}/{} pages  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&tables.to_string()),
                success_count,
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every table (JSON on stdout)
  pdf2table statement.pdf

  # Write the result atomically to a file
  pdf2table invoice.pdf -o invoice.json

  # Steer the prompt with a document template
  pdf2table --template bank_statement statement.pdf

  # Two-pass: analyse, edit the guidance, extract
  pdf2table --analyze-only ledger.pdf > analysis.json
  pdf2table --guidance guidance.json ledger.pdf -o ledger.json

  # Scanned image input, no page cap
  pdf2table --unlimited scan.png

TEMPLATES:
  auto (default), invoice, bank_statement, receipt, schedule, inventory, financial

GUIDANCE FILE (all fields optional):
  {
    "answers": {"date_format": "DD/MM/YYYY"},
    "acceptedSuggestions": ["split_sections"],
    "suggestionDescriptions": {"split_sections": "One table per account"},
    "freeformInstructions": "Ignore the running totals column",
    "outputPreferences": {
      "combineRelatedTables": true,
      "outputLanguage": "English",
      "skipDiagrams": true,
      "skipImages": true,
      "symbolMapping": {"✓": "Yes"}
    }
  }

EXIT STATUS:
  0  at least one table extracted
  1  the run failed (see errorCode in the JSON output)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Override the log filter
"#;

/// Extract tables from PDFs and scans using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2table",
    version,
    about = "Extract tables from PDFs and scanned images using Vision LLMs",
    long_about = "Extract every table from a document (local file or URL; PDF, PNG, JPEG, \
TIFF or WebP) with a Vision Language Model, repair the grids, and print the result as JSON. \
Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file path or HTTP/HTTPS URL.
    input: String,

    /// Write the JSON result to this file instead of stdout.
    #[arg(short, long, env = "PDF2TABLE_OUTPUT")]
    output: Option<PathBuf>,

    /// Only analyse a sample of pages and print the analysis.
    #[arg(long)]
    analyze_only: bool,

    /// Document template steering the extraction prompt.
    #[arg(short, long, env = "PDF2TABLE_TEMPLATE", default_value = "auto")]
    template: String,

    /// JSON file with guidance answers from a prior analysis.
    #[arg(short, long, env = "PDF2TABLE_GUIDANCE", conflicts_with = "template")]
    guidance: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Maximum pages to extract.
    #[arg(long, env = "PDF2TABLE_PAGES_LIMIT", default_value_t = 20,
          value_parser = clap::value_parser!(u64).range(1..))]
    pages_limit: u64,

    /// Lift the page and file-size limits.
    #[arg(long, env = "PDF2TABLE_UNLIMITED")]
    unlimited: bool,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2TABLE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2TABLE_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "PDF2TABLE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF2TABLE_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2TABLE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per call on transient LLM failures.
    #[arg(long, env = "PDF2TABLE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Leading columns eligible for merged-cell back-fill.
    #[arg(long, env = "PDF2TABLE_MERGE_COLUMNS", default_value_t = 3)]
    merge_columns: usize,

    /// Do not re-query table-less pages with the field/value prompt.
    #[arg(long, env = "PDF2TABLE_NO_FALLBACK")]
    no_fallback: bool,

    /// Analyse the rendered pages before extracting; the analysis is included in the result.
    #[arg(long, env = "PDF2TABLE_ANALYZE_FIRST")]
    analyze_first: bool,

    /// Print compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2TABLE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2TABLE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2TABLE_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2TABLE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF2TABLE_API_TIMEOUT", default_value_t = 90)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives all the feedback that matters; keep library
    // logs to errors while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.analyze_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new_dynamic);
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn ExtractionProgressCallback>),
    )
    .await?;
    let mode = build_mode(&cli).await?;

    // Ctrl-C cancels the run instead of killing the process mid-write.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let started = Instant::now();

    // ── Analyse-only mode ────────────────────────────────────────────────
    if cli.analyze_only {
        let bytes = load_document(&cli.input, config.download_timeout_secs, config.file_size_limit())
            .await
            .context("Failed to load document")?;
        let outcome = Extractor::from_config(config)
            .context("Failed to set up the extraction service")?
            .analyze_with_cancel(&bytes, &cancel)
            .await
            .context("Analysis failed")?;
        emit(&cli, &outcome).await?;
        return Ok(ExitCode::SUCCESS);
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let review_threshold = config.review_threshold;
    let result = run_extraction(&cli, config, &mode, &cancel).await;
    if let Some(ref cb) = progress {
        cb.finish();
    }
    let result = match result {
        Ok(r) => r,
        Err(e) => ExtractionResult::failure(&e, started.elapsed().as_millis() as u64),
    };

    emit(&cli, &result).await?;

    if !cli.quiet {
        print_summary(&cli, &result, review_threshold);
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_extraction(
    cli: &Cli,
    config: ExtractionConfig,
    mode: &ExtractionMode,
    cancel: &CancelToken,
) -> Result<ExtractionResult, edgequake_pdf2table::Pdf2TableError> {
    let bytes = load_document(&cli.input, config.download_timeout_secs, config.file_size_limit())
        .await?;
    Extractor::from_config(config)?
        .extract_with_cancel(&bytes, mode, cancel)
        .await
}

fn print_summary(cli: &Cli, result: &ExtractionResult, review_threshold: f64) {
    if !result.success {
        eprintln!(
            "{} {}  {}",
            red("✘"),
            bold(
                result
                    .error_code
                    .map(|c| c.as_str())
                    .unwrap_or("INTERNAL_ERROR")
            ),
            result.error.as_deref().unwrap_or_default()
        );
        return;
    }

    let status = result.status(review_threshold);
    eprintln!(
        "{}  {} table(s)  confidence {:.2}  status {:?}  {}ms{}",
        if result.warnings.is_empty() {
            green("✔")
        } else {
            cyan("⚠")
        },
        result.tables.len(),
        result.confidence,
        status,
        result.processing_time_ms,
        cli.output
            .as_ref()
            .map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default(),
    );
    for w in &result.warnings {
        eprintln!(
            "   {} {} {}",
            yellow(w.kind.as_str()),
            w.page_number
                .map(|p| dim(&format!("[p{p}]")))
                .unwrap_or_default(),
            w.message
        );
    }
}

/// Print JSON to stdout, or write it atomically to `--output`.
async fn emit<T: Serialize>(cli: &Cli, value: &T) -> Result<()> {
    let json = if cli.compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
    .context("Failed to serialise output")?;

    match cli.output {
        Some(ref path) => write_atomic(path, &json).await,
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

/// Atomic write: temp file next to the target, then rename.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move output into {}", path.display()))?;
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let template: TableTemplate = cli.template.parse().context("Invalid --template")?;

    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .max_pages(cli.pages_limit as usize)
        .unlimited(cli.unlimited)
        .template(template)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .merge_fill_columns(cli.merge_columns)
        .fallback_enabled(!cli.no_fallback)
        .analyze_first(cli.analyze_first)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `--guidance` wins over `--template`.
async fn build_mode(cli: &Cli) -> Result<ExtractionMode> {
    match cli.guidance {
        Some(ref path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read guidance from {:?}", path))?;
            let guidance: Guidance = serde_json::from_str(&text)
                .with_context(|| format!("Invalid guidance JSON in {:?}", path))?;
            Ok(ExtractionMode::Guided(guidance))
        }
        // `--template` is already on the config.
        None => Ok(ExtractionMode::Configured),
    }
}
