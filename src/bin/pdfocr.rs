//! CLI binary for edgequake-pdf-ocr.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` / `ExtractionOptions` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf_ocr::{
    extract, inspect, ExtractionConfig, ExtractionOptions, ExtractionProgressCallback, GateConfig,
    JobConfig, JobManager, JobStatus, PageStatus, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
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

/// Live progress bar over OCR pages. Pages finish out of order, so every line
/// carries its page number.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner);
        bar.set_prefix("Preparing");
        bar.set_message("Reading text layer…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize, ocr_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} OCR pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(ocr_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{total_pages} pages, {} native, {ocr_pages} to OCR",
                total_pages - ocr_pages
            ))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_retry(&self, page_num: usize, attempt: u32) {
        self.bar.println(format!(
            "  {} Page {:>3}  retry {}",
            yellow("↻"),
            page_num,
            attempt
        ));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, status: PageStatus) {
        let mark = match status {
            PageStatus::Approved => green("✓"),
            PageStatus::NeedsReview => yellow("⚠"),
        };
        let label = match status {
            PageStatus::Approved => dim("approved"),
            PageStatus::NeedsReview => yellow("needs review"),
        };
        self.bar
            .println(format!("  {mark} Page {page_num:>3}/{total_pages:<3}  {label}"));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, approved: usize) {
        self.bar.finish_and_clear();
        let review = total_pages.saturating_sub(approved);
        if review == 0 {
            eprintln!("{} {} pages approved", green("✔"), bold(&approved.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages approved  ({} need review)",
                yellow("⚠"),
                bold(&approved.to_string()),
                total_pages,
                yellow(&review.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract text (stdout)
  pdfocr extract scan.pdf

  # Full JSON result with per-page quality, stricter target
  pdfocr extract --json --target 90 scan.pdf -o scan.json

  # Kannada document, OCR every page, low-memory batches
  pdfocr extract --lang kannada --force-ocr --batch-pages 3 exam.pdf

  # Background job with a durable store
  pdfocr submit scan.pdf --store ./jobs
  pdfocr status 3f2a9c... --store ./jobs
  pdfocr jobs --store ./jobs --status failed

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH       Path to libpdfium (else the system library is used)
  OCR_WORKERS           Page workers (1–32, default 4)
  SAFE_MODE             Low-memory profile (batching, 5-page limit)
  SAFE_DPI              Render DPI in safe mode
  SAFE_BATCH_PAGES      Batch size in safe mode
  SYNC_MAX_PAGES        Page limit for extract
  ASYNC_MAX_PAGES       Page limit for submit
  MAX_FILE_SIZE_BYTES   Upload limit
  NATIVE_TEXT           0 to ignore the PDF text layer
  JOB_STORE_DIR         Default --store directory
  RUST_LOG              Log filter, overrides --verbose/--quiet
"#;

/// Quality-gated PDF text extraction.
#[derive(Parser, Debug)]
#[command(
    name = "pdfocr",
    version,
    about = "Quality-gated PDF text extraction (native text + multi-pass OCR)",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFOCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFOCR_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a PDF and print its text or JSON result.
    Extract {
        input: PathBuf,

        /// Write output to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output the full JSON document result.
        #[arg(long)]
        json: bool,

        /// Disable the progress bar.
        #[arg(long)]
        no_progress: bool,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Show page count and which pages need OCR, without running it.
    Inspect {
        input: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Run a PDF as a background job against a job store and print its id.
    Submit {
        input: PathBuf,

        #[arg(long, env = "JOB_STORE_DIR")]
        store: PathBuf,

        /// Abort the job after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Print a job's status (and result once completed) as JSON.
    Status {
        job_id: String,

        #[arg(long, env = "JOB_STORE_DIR")]
        store: PathBuf,
    },

    /// List jobs, newest first.
    Jobs {
        #[arg(long, env = "JOB_STORE_DIR")]
        store: PathBuf,

        /// Only jobs in this status: pending, processing, completed, failed.
        #[arg(long)]
        status: Option<JobStatus>,

        /// Mark jobs left unfinished by a crashed process as failed first.
        #[arg(long)]
        recover: bool,
    },
}

/// Flags shared by `extract` and `submit`.
#[derive(Args, Debug)]
struct Tuning {
    /// Quality target selecting a gate profile (e.g. 90).
    #[arg(long)]
    target: Option<u8>,

    /// Retries per failing page.
    #[arg(long)]
    retries: Option<u32>,

    /// OCR every page even when the text layer is sufficient.
    #[arg(long)]
    force_ocr: bool,

    /// Record strict mode in the quality summary.
    #[arg(long)]
    strict: bool,

    /// Concurrent page workers (1–32).
    #[arg(short, long)]
    workers: Option<usize>,

    /// Base render DPI (72–1200).
    #[arg(long, value_parser = clap::value_parser!(u32).range(72..=1200))]
    dpi: Option<u32>,

    /// Render and OCR this many pages at a time.
    #[arg(long)]
    batch_pages: Option<usize>,

    /// OCR language: english, kannada, hindi, tamil, telugu, or codes like kan+eng.
    #[arg(long)]
    lang: Option<String>,

    /// JSON file with gate thresholds.
    #[arg(long)]
    gates: Option<PathBuf>,

    /// Skip the per-cell OCR pass on table pages.
    #[arg(long)]
    no_table_cells: bool,
}

impl Tuning {
    fn options(&self) -> ExtractionOptions {
        ExtractionOptions {
            quality_target: self.target,
            max_retries: self.retries,
            force_ocr: self.force_ocr,
            strict: self.strict,
            dpi: self.dpi,
            language: self.lang.clone(),
            ..ExtractionOptions::default()
        }
    }

    /// Environment defaults overridden by flags.
    fn config(&self, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
        let base = ExtractionConfig::from_env().context("Invalid environment configuration")?;
        let mut builder = ExtractionConfig::builder()
            .dpi(base.dpi)
            .workers(self.workers.unwrap_or(base.workers))
            .batch_pages(self.batch_pages.or(base.batch_pages))
            .max_pages(base.max_pages)
            .max_file_size(base.max_file_size)
            .native_text(base.native_text)
            .table_cells(!self.no_table_cells)
            .language(base.language.clone());
        if let Some(dir) = base.tessdata_dir {
            builder = builder.tessdata_dir(dir);
        }
        if let Some(path) = &self.gates {
            let gates = GateConfig::from_json_file(path)
                .with_context(|| format!("Failed to load gate thresholds from {}", path.display()))?;
            builder = builder.gates(gates);
        }
        if let Some(cb) = progress {
            builder = builder.progress_callback(cb);
        }
        builder.build().context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during extract.
    let show_progress = !cli.quiet
        && matches!(&cli.command, Command::Extract { json, no_progress, .. } if !*json && !*no_progress);
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

    match cli.command {
        Command::Extract {
            input,
            output,
            json,
            tuning,
            ..
        } => {
            let progress = show_progress
                .then(|| CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>);
            let config = tuning.config(progress)?;
            let result = extract(&input, &config, &tuning.options())
                .await
                .context("Extraction failed")?;

            let body = if json {
                serde_json::to_string_pretty(&result).context("Failed to serialise result")?
            } else {
                result.full_text.clone()
            };
            write_output(output.as_deref(), &body)?;

            if !cli.quiet && !show_progress {
                eprintln!(
                    "{} {}/{} pages approved  {}  {}ms",
                    if result.is_approved() { green("✔") } else { yellow("⚠") },
                    result.quality.approved_count,
                    result.extraction.pages_total,
                    dim(&format!("{:?}", result.extraction.method).to_lowercase()),
                    result.stats.total_duration_ms,
                );
            }
            for page in &result.quality.needs_review {
                if !cli.quiet {
                    let gates: Vec<&str> = page.failed_gates.iter().map(|g| g.as_str()).collect();
                    eprintln!(
                        "  {} page {} needs review: {}",
                        yellow("•"),
                        page.page_number,
                        gates.join(", ")
                    );
                }
            }
        }

        Command::Inspect { input, json } => {
            let config = ExtractionConfig::from_env().context("Invalid environment configuration")?;
            let info = inspect(&input, &config).await.context("Failed to inspect PDF")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&info).context("Failed to serialise info")?
                );
            } else {
                println!("File:          {}", info.filename);
                println!("Pages:         {}", info.pages_total);
                println!("Native pages:  {}", format_pages(&info.native_pages));
                println!("OCR pages:     {}", format_pages(&info.ocr_pages));
            }
        }

        Command::Submit {
            input,
            store,
            timeout,
            tuning,
        } => {
            let manager = job_manager(&store, timeout, Some(&tuning)).await?;
            let handle = manager
                .submit(&input, tuning.options())
                .await
                .context("Submission failed")?;
            let job_id = handle.job_id().to_string();
            if !cli.quiet {
                eprintln!("{} job {}", cyan("◆"), bold(&job_id));
            }
            let job = handle.wait().await.context("Job did not finish")?;
            println!("{job_id}");
            if !cli.quiet {
                match job.status {
                    JobStatus::Completed => eprintln!("{} completed", green("✔")),
                    other => eprintln!(
                        "{} {}: {}",
                        yellow("⚠"),
                        other,
                        job.error.as_deref().unwrap_or("")
                    ),
                }
            }
        }

        Command::Status { job_id, store } => {
            let manager = job_manager(&store, None, None).await?;
            let view = manager.poll(&job_id).await.context("Poll failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&view).context("Failed to serialise job")?
            );
        }

        Command::Jobs {
            store,
            status,
            recover,
        } => {
            let manager = job_manager(&store, None, None).await?;
            if recover {
                let ids = manager.recover_interrupted().await.context("Recovery failed")?;
                if !cli.quiet && !ids.is_empty() {
                    eprintln!("{} marked {} interrupted jobs failed", yellow("⚠"), ids.len());
                }
            }
            for job in manager.list(status).await.context("Listing failed")? {
                println!(
                    "{}  {:<10}  {}  {}",
                    job.job_id,
                    job.status,
                    job.created_at.format("%Y-%m-%d %H:%M:%S"),
                    job.filename
                );
            }
        }
    }

    Ok(())
}

async fn job_manager(store: &Path, timeout: Option<u64>, tuning: Option<&Tuning>) -> Result<JobManager> {
    let extraction = match tuning {
        Some(t) => t.config(None)?,
        None => ExtractionConfig::from_env().context("Invalid environment configuration")?,
    };
    let mut jobs = JobConfig::from_env();
    jobs.store_dir = Some(store.to_path_buf());
    if let Some(secs) = timeout {
        jobs.timeout = Some(Duration::from_secs(secs));
    }
    JobManager::new(extraction, jobs)
        .await
        .with_context(|| format!("Failed to open job store at {}", store.display()))
}

/// Write to a file atomically (temp + rename), or to stdout.
fn write_output(path: Option<&Path>, body: &str) -> Result<()> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, body)
                .and_then(|_| std::fs::rename(&tmp, path))
                .with_context(|| format!("Failed to write {}", path.display()))
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(body.as_bytes())
                .context("Failed to write to stdout")?;
            if !body.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}

fn format_pages(pages: &[usize]) -> String {
    if pages.is_empty() {
        return "-".to_string();
    }
    pages
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
