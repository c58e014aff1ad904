//! CLI binary for edgequake-repurpose.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` / `ProcessingOptions` and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_repurpose::{
    CostModel, Document, LlmBackend, ModelCatalog, Pipeline, PipelineConfig, ProcessedResult,
    ProcessingOptions, ProgressCallback, ProgressObserver, TargetFormat,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
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

// ── CLI progress observer using indicatif ────────────────────────────────────

/// Terminal progress observer: one bar shared by every document in the run.
///
/// The bar grows as documents are segmented, so batch runs with several
/// documents in flight still show a single accurate counter.
struct CliProgress {
    bar: ProgressBar,
    /// Per-fragment wall-clock start times, keyed by (fragment index, total).
    start_times: Mutex<HashMap<(usize, usize), Instant>>,
    errors: AtomicUsize,
    skipped: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} fragments  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Repurposing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, index: usize, total: usize) -> String {
        let ms = self
            .start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(index, total))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        format!("{:.1}s", ms as f64 / 1000.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        let skipped = self.skipped.load(Ordering::SeqCst);
        if errors + skipped > 0 {
            eprintln!(
                "{} {} failed, {} over budget",
                cyan("⚠"),
                red(&errors.to_string()),
                skipped
            );
        }
    }
}

impl ProgressObserver for CliProgress {
    fn on_document_start(&self, title: &str, total_fragments: usize) {
        self.bar.inc_length(total_fragments as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{title}: {total_fragments} fragments"))
        ));
    }

    fn on_fragment_start(&self, index: usize, total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((index, total), Instant::now());
    }

    fn on_fragment_complete(&self, index: usize, total: usize, output_len: usize, cached: bool) {
        let timing = if cached {
            "cached".to_string()
        } else {
            self.elapsed(index, total)
        };
        self.bar.println(format!(
            "  {} Fragment {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{output_len:>5} chars")),
            dim(&timing),
        ));
        self.bar.inc(1);
    }

    fn on_fragment_error(&self, index: usize, total: usize, error: &str) {
        let timing = self.elapsed(index, total);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Fragment {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&timing),
        ));
        self.bar.inc(1);
    }

    fn on_fragment_skipped(&self, index: usize, total: usize) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Fragment {:>3}/{:<3}  {}",
            cyan("–"),
            index + 1,
            total,
            dim("over budget, not processed"),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, title: &str, succeeded: usize, total: usize) {
        let mark = if succeeded == total {
            green("✔")
        } else if succeeded == 0 {
            red("✘")
        } else {
            cyan("⚠")
        };
        self.bar.println(format!(
            "{mark} {}  {}/{} fragments",
            bold(title),
            succeeded,
            total
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Podcast script on stdout
  repurpose essay.md --format podcast

  # Translation capped at 10 cents, written to a file
  repurpose guide.md --format translation --language French --budget 0.10 -o guide.fr.md

  # Several documents at once, one output file each
  repurpose ch1.md ch2.md ch3.md --format course -o out/

  # What would it cost? (no API key needed)
  repurpose --estimate --format short-video book.md

  # Custom model catalog
  repurpose --catalog models.json --format podcast essay.md

DEFAULT MODEL CATALOG:
  Provider     Model                     Input $/1M  Output $/1M  Capabilities
  ─────────    ────────────────────────  ──────────  ───────────  ──────────────────────────────
  openai       gpt-4.1-nano              $0.10       $0.40        summarize translate creative
  openai       gpt-4.1-mini              $0.40       $1.60        all
  openai       gpt-4.1                   $2.00       $8.00        all
  anthropic    claude-3-5-haiku-latest   $0.80       $4.00        summarize translate creative
  anthropic    claude-sonnet-4-20250514  $3.00       $15.00       all
  gemini       gemini-2.0-flash          $0.10       $0.40        summarize translate reason
  mistral      mistral-small-latest      $0.20       $0.60        summarize translate

  Only models whose provider can be created from the environment are used.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  MISTRAL_API_KEY         Mistral API key
  RUST_LOG                Override log filter (e.g. edgequake_repurpose=debug)
"#;

/// Repurpose long-form text into podcasts, courses, short videos and translations.
#[derive(Parser, Debug)]
#[command(
    name = "repurpose",
    version,
    about = "Repurpose long-form text into podcasts, courses, short videos and translations",
    long_about = "Split documents into format-aware fragments, route each fragment to the most \
cost-efficient capable LLM within a budget, and assemble podcast scripts, course modules, \
short-video scripts or translations. Fragment results are cached for the lifetime of the run.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Plain-text or Markdown files to repurpose.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Target format.
    #[arg(short, long, env = "REPURPOSE_FORMAT", value_enum, default_value = "podcast")]
    format: FormatArg,

    /// Maximum estimated spend per document, in USD.
    #[arg(short, long, env = "REPURPOSE_BUDGET")]
    budget: Option<f64>,

    /// Target language (required for --format translation).
    #[arg(short, long, env = "REPURPOSE_LANGUAGE")]
    language: Option<String>,

    /// Tone of voice, e.g. "friendly", "formal".
    #[arg(long, env = "REPURPOSE_TONE")]
    tone: Option<String>,

    /// Intended audience, e.g. "beginners".
    #[arg(long, env = "REPURPOSE_AUDIENCE")]
    audience: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "REPURPOSE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// JSON model catalog replacing the built-in one.
    #[arg(long, env = "REPURPOSE_CATALOG")]
    catalog: Option<PathBuf>,

    /// Fragments dispatched concurrently per batch.
    #[arg(long, env = "REPURPOSE_BATCH_SIZE", default_value_t = 5)]
    batch_size: usize,

    /// Documents processed concurrently.
    #[arg(short, long, env = "REPURPOSE_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// Retries per fragment on transient backend failure.
    #[arg(long, env = "REPURPOSE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-fragment backend call timeout in seconds.
    #[arg(long, env = "REPURPOSE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "REPURPOSE_TEMPERATURE")]
    temperature: Option<f32>,

    /// Max output units per fragment.
    #[arg(long, env = "REPURPOSE_MAX_OUTPUT")]
    max_output: Option<usize>,

    /// Output file (single input) or directory (several inputs).
    #[arg(short, long, env = "REPURPOSE_OUTPUT")]
    output: Option<PathBuf>,

    /// Print structured JSON results instead of the assembled text.
    #[arg(long, env = "REPURPOSE_JSON")]
    json: bool,

    /// Print a cost estimate and exit without calling any model.
    #[arg(long)]
    estimate: bool,

    /// Treat any failed or unplanned fragment as an error (non-zero exit).
    #[arg(long)]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "REPURPOSE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "REPURPOSE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "REPURPOSE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Podcast,
    Course,
    ShortVideo,
    Translation,
}

impl From<FormatArg> for TargetFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Podcast => TargetFormat::Podcast,
            FormatArg::Course => TargetFormat::Course,
            FormatArg::ShortVideo => TargetFormat::ShortVideo,
            FormatArg::Translation => TargetFormat::Translation,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.estimate;
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

    let format = TargetFormat::from(cli.format);
    let catalog = load_catalog(cli.catalog.as_deref())?;
    let documents = load_documents(&cli.inputs)?;
    let options = build_options(&cli)?;

    let progress = if show_progress {
        Some(CliProgress::new())
    } else {
        None
    };
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback))?;

    // ── Estimate-only mode ───────────────────────────────────────────────
    if cli.estimate {
        return print_estimates(&cli, config, catalog, &documents, format, &options);
    }

    // ── Backend ──────────────────────────────────────────────────────────
    let mut catalog = catalog;
    let backend = LlmBackend::from_catalog(&catalog);
    if backend.is_empty() {
        bail!(
            "No model provider could be created. Set OPENAI_API_KEY, ANTHROPIC_API_KEY or \
             GEMINI_API_KEY, or pass --catalog with models you can reach."
        );
    }
    catalog.retain(|m| backend.supports(&m.name));
    let pipeline = Pipeline::new(config, catalog, Arc::new(backend));

    // ── Run ──────────────────────────────────────────────────────────────
    let results: Vec<Result<ProcessedResult, _>> = match (&cli.output, documents.as_slice()) {
        (Some(path), [doc]) => vec![pipeline.process_to_file(doc, format, &options, path).await],
        (Some(dir), _) => {
            let results = pipeline.process_batch(&documents, format, &options).await;
            for (input, result) in cli.inputs.iter().zip(&results) {
                if let Ok(r) = result {
                    let path = output_path(dir, input, format);
                    write_atomic(&path, &r.output)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                }
            }
            results
        }
        (None, _) => pipeline.process_batch(&documents, format, &options).await,
    };
    if let Some(p) = &progress {
        p.finish();
    }

    // ── Report ───────────────────────────────────────────────────────────
    let mut failures = 0usize;
    let mut json_results = Vec::new();
    for (input, result) in cli.inputs.iter().zip(results) {
        let result = match result {
            Ok(r) if cli.strict => r.into_result(),
            other => other,
        };
        match result {
            Ok(r) => {
                if !cli.quiet {
                    print_summary(input, &r);
                }
                if cli.json {
                    json_results.push(r);
                } else if cli.output.is_none() {
                    let stdout = io::stdout();
                    let mut handle = stdout.lock();
                    handle
                        .write_all(r.output.as_bytes())
                        .context("Failed to write to stdout")?;
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{} {}: {e}", red("✘"), input.display());
            }
        }
    }

    if cli.json {
        let json =
            serde_json::to_string_pretty(&json_results).context("Failed to serialise output")?;
        println!("{json}");
    }

    if !cli.quiet && documents.len() > 1 {
        let stats = pipeline.get_stats();
        eprintln!(
            "   {} documents  /  {} cached  /  {} dispatched  /  est ${:.4}  actual ${:.4}",
            stats.documents_processed(),
            stats.served_from_cache,
            stats.dispatched,
            stats.estimated_cost,
            stats.actual_cost,
        );
    }

    if failures > 0 {
        bail!("{failures}/{} document(s) failed", documents.len());
    }
    Ok(())
}

fn load_catalog(path: Option<&Path>) -> Result<ModelCatalog> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read catalog {}", path.display()))?;
            ModelCatalog::from_json_str(&json).context("Failed to parse catalog")
        }
        None => Ok(ModelCatalog::with_defaults()),
    }
}

fn load_documents(inputs: &[PathBuf]) -> Result<Vec<Document>> {
    inputs
        .iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(Document::new(title, content))
        })
        .collect()
}

fn build_options(cli: &Cli) -> Result<ProcessingOptions> {
    let mut options = ProcessingOptions::default();
    if let Some(b) = cli.budget {
        options = options.budget(b);
    }
    if let Some(ref l) = cli.language {
        options = options.target_language(l);
    }
    if let Some(ref t) = cli.tone {
        options = options.tone(t);
    }
    if let Some(ref a) = cli.audience {
        options = options.audience(a);
    }
    if let Some(t) = cli.temperature {
        options = options.temperature(t);
    }
    if let Some(n) = cli.max_output {
        options = options.max_output_units(n);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt {}", path.display()))?;
        options = options.system_prompt(prompt);
    }
    Ok(options)
}

fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .batch_size(cli.batch_size)
        .document_concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn print_estimates(
    cli: &Cli,
    config: PipelineConfig,
    catalog: ModelCatalog,
    documents: &[Document],
    format: TargetFormat,
    options: &ProcessingOptions,
) -> Result<()> {
    let lower_bounds = {
        let cost = CostModel::new(&catalog);
        documents
            .iter()
            .map(|doc| cost.estimate_document(doc, format, &config, options))
            .collect::<Result<Vec<_>, _>>()
            .context("Estimate failed")?
    };
    // No backend calls happen in estimate mode, so no provider is needed.
    let pipeline = Pipeline::new(config, catalog, Arc::new(LlmBackend::new()));
    let mut previews = Vec::with_capacity(documents.len());
    for doc in documents {
        previews.push(
            pipeline
                .estimate(doc, format, options)
                .with_context(|| format!("Estimate failed for '{}'", doc.title()))?,
        );
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&previews).context("Failed to serialise plan")?;
        println!("{json}");
        return Ok(());
    }

    for ((doc, preview), floor) in documents.iter().zip(&previews).zip(&lower_bounds) {
        println!("{}", bold(doc.title()));
        println!("  Words:        {}", doc.word_count());
        println!("  Fragments:    {}", preview.total_fragments);
        println!("  Cheapest:     ${:.4}", floor.total);
        println!("  Planned:      ${:.4}", preview.estimated_cost);
        if let Some(b) = preview.budget {
            println!("  Budget:       ${b:.4}");
        }
        if !preview.unplanned.is_empty() {
            println!(
                "  Unplanned:    {}",
                red(&format!("{} fragment(s) over budget", preview.unplanned.len()))
            );
        }
        let mut by_model: Vec<(String, usize, f64)> = Vec::new();
        for entry in &preview.entries {
            match by_model.iter_mut().find(|(m, _, _)| *m == entry.model) {
                Some((_, n, c)) => {
                    *n += 1;
                    *c += entry.estimated_cost;
                }
                None => by_model.push((entry.model.clone(), 1, entry.estimated_cost)),
            }
        }
        for (model, n, c) in by_model {
            println!("    {:<24} {:>4} fragments  ${:.4}", model, n, c);
        }
    }
    Ok(())
}

fn print_summary(input: &Path, r: &ProcessedResult) {
    let s = &r.stats;
    eprintln!(
        "{}  {}  {}/{} fragments  {}ms",
        if r.is_complete() { green("✔") } else { cyan("⚠") },
        bold(&input.display().to_string()),
        s.succeeded,
        s.requested,
        s.total_duration_ms,
    );
    eprintln!(
        "   {} cached  /  {} units in  /  {} units out  /  est ${:.4}  actual ${:.4}",
        dim(&s.served_from_cache.to_string()),
        dim(&s.input_units.to_string()),
        dim(&s.output_units.to_string()),
        s.estimated_cost,
        s.actual_cost,
    );
}

fn output_path(dir: &Path, input: &Path, format: TargetFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    dir.join(format!("{stem}.{}.md", format.label()))
}

fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("repurpose.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}
