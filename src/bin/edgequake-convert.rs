//! CLI binary for edgequake-convert.
//!
//! A thin shim over the library crate: maps flags onto `ServiceConfig`,
//! starts a `ConversionService`, and either serves HTTP or runs one command.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use edgequake_convert::journal::JOURNAL_TARGET;
use edgequake_convert::validate::all_supported_conversions;
use edgequake_convert::{ConversionService, Parameters, ServiceConfig, Upload};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on the configured address
  edgequake-convert serve --bind 0.0.0.0:5000

  # Convert a PDF to plain text
  edgequake-convert convert report.pdf --to pdf_to_txt

  # Resize several images, four at a time
  edgequake-convert convert *.png --to image_resize -p width=640 -p height=480 -c 4

  # Inspect a file without converting it
  edgequake-convert info song.flac --json

  # Show every allowed conversion and whether a converter backs it
  edgequake-convert conversions

ENVIRONMENT VARIABLES:
  CONVERT_UPLOAD_DIR        Upload area (default static/uploads)
  CONVERT_DOWNLOAD_DIR      Artifact directory (default downloads)
  CONVERT_TEMP_DIR          Scratch directory (default: system temp)
  CONVERT_ALLOWED_EXTENSIONS Comma-separated extension allow-list
  CONVERT_MAX_<CATEGORY>_MB Per-category size ceiling (PDF, DOCUMENT, IMAGE, AUDIO, VIDEO)
  CONVERT_MAX_UPLOAD_MB     HTTP body limit
  CONVERT_RETENTION_SECS    Age after which sweeps remove files
  CONVERT_BIND              HTTP listen address (default 127.0.0.1:5000)
  CONVERT_JOURNAL           Journal file (default conversion.log; "off" disables)
  CONVERT_STRICT_ROUTING    Refuse to start when an allowed conversion is unwired
  CONVERT_FFMPEG, CONVERT_TESSERACT, CONVERT_ESPEAK, CONVERT_WHISPER
                            External tool binaries
  CONVERT_WHISPER_MODEL     ggml model for audio_to_text
  PDFIUM_LIB_PATH           Directory containing libpdfium
  CONVERT_OCR_LANG, CONVERT_TTS_LANG, CONVERT_TTS_ENDPOINT
                            OCR and speech settings
"#;

/// Classify, validate and convert files, from the command line or over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "edgequake-convert",
    version,
    about = "Convert PDFs, documents, images, audio and video",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// HTTP listen address.
    #[arg(long, global = true, env = "CONVERT_BIND")]
    bind: Option<SocketAddr>,

    /// Directory for stored uploads.
    #[arg(long, global = true, env = "CONVERT_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Directory for conversion artifacts.
    #[arg(long, global = true, env = "CONVERT_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// Append journal lines to this file.
    #[arg(long, global = true, conflicts_with = "no_journal")]
    journal: Option<PathBuf>,

    /// Do not write a journal file.
    #[arg(long, global = true)]
    no_journal: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CONVERT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CONVERT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service until Ctrl-C or SIGTERM.
    Serve,

    /// Convert one or more files.
    Convert {
        /// Input files. Originals are copied, never consumed.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Conversion type, e.g. pdf_to_txt or image_resize.
        #[arg(long = "to", short = 't')]
        conversion_type: String,

        /// Operation parameter as key=value. Repeatable.
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Number of files converted at once.
        #[arg(short, long, default_value_t = 2)]
        concurrency: usize,

        /// Disable the progress bar.
        #[arg(long)]
        no_progress: bool,
    },

    /// Probe a file: category, size, validity, SHA-256.
    Info {
        file: PathBuf,

        /// Print the probe as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List allowed conversions per category and whether each is wired.
    Conversions {
        /// Print the allow-list as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove expired uploads, scratch files and artifacts.
    Sweep,
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level chatter during `convert`.
    let show_progress = matches!(
        &cli.command,
        Command::Convert { no_progress: false, .. }
    ) && !cli.quiet;
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let _guard = init_logging(level, config.journal_path.as_deref())?;

    let service = Arc::new(ConversionService::start(config).context("Failed to start service")?);

    let outcome = match cli.command {
        Command::Serve => edgequake_convert::server::serve(Arc::clone(&service))
            .await
            .context("HTTP server failed"),
        Command::Convert {
            files,
            conversion_type,
            params,
            concurrency,
            ..
        } => {
            let parameters: Parameters = params
                .into_iter()
                .map(|(k, v)| (k, v.into()))
                .collect();
            convert_files(
                &service,
                files,
                &conversion_type,
                parameters,
                concurrency.max(1),
                show_progress,
                cli.quiet,
            )
            .await
        }
        Command::Info { file, json } => info(&service, &file, json).await,
        Command::Conversions { json } => conversions(&service, json),
        Command::Sweep => {
            let report = service.sweep().await;
            if !cli.quiet {
                eprintln!(
                    "{} removed {} temp files and {} downloads",
                    green("✔"),
                    bold(&report.cleaned_temp_files.to_string()),
                    bold(&report.cleaned_downloads.to_string()),
                );
            }
            Ok(())
        }
    };

    service.shutdown();
    outcome
}

/// Environment first, then explicit flags.
fn build_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = ServiceConfig::from_env().context("Invalid configuration")?;
    if let Some(addr) = cli.bind {
        config.bind_addr = addr;
    }
    if let Some(dir) = &cli.upload_dir {
        config.upload_dir = dir.clone();
    }
    if let Some(dir) = &cli.download_dir {
        config.download_dir = dir.clone();
    }
    if let Some(path) = &cli.journal {
        config.journal_path = Some(path.clone());
    }
    if cli.no_journal {
        config.journal_path = None;
    }
    Ok(config)
}

/// Console layer on stderr, plus the journal target appended to `journal`.
fn init_logging(level: &str, journal: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(console_filter);

    let (journal_layer, guard) = match journal {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create journal directory: {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open journal file: {}", path.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_filter(Targets::new().with_target(JOURNAL_TARGET, Level::INFO));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(journal_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

// ── Commands ─────────────────────────────────────────────────────────────────

async fn convert_files(
    service: &ConversionService,
    files: Vec<PathBuf>,
    conversion_type: &str,
    parameters: Parameters,
    concurrency: usize,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let total = files.len();
    let bar = if show_progress {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };
    let report = |line: String| match &bar {
        Some(bar) => bar.println(line),
        None if !quiet => eprintln!("{line}"),
        None => {}
    };

    let outcomes: Vec<(PathBuf, Result<_, _>)> = stream::iter(files)
        .map(|file| {
            let parameters = parameters.clone();
            async move {
                let result = service
                    .submit(Upload::from_file(&file), conversion_type, parameters)
                    .await;
                (file, result)
            }
        })
        .buffer_unordered(concurrency)
        .inspect(|(file, result)| {
            let name = file.display().to_string();
            match result {
                Ok(r) if r.success => {
                    let output = r
                        .output_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    report(format!(
                        "  {} {}  →  {}  {}",
                        green("✓"),
                        name,
                        bold(&output),
                        dim(&format!("{:.1}s", r.duration_ms as f64 / 1000.0)),
                    ));
                }
                Ok(r) => report(format!(
                    "  {} {}  {}",
                    red("✗"),
                    name,
                    red(r.error.as_deref().unwrap_or("conversion failed")),
                )),
                Err(e) => report(format!("  {} {}  {}", red("✗"), name, red(&e.to_string()))),
            }
            if let Some(bar) = &bar {
                bar.inc(1);
            }
        })
        .collect()
        .await;

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let failed = outcomes
        .iter()
        .filter(|(_, r)| !matches!(r, Ok(result) if result.success))
        .count();
    if !quiet {
        if failed == 0 {
            eprintln!(
                "{} {} files converted successfully",
                green("✔"),
                bold(&total.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files converted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&(total - failed).to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {total} conversions failed");
    }
    Ok(())
}

async fn info(service: &ConversionService, file: &Path, json: bool) -> Result<()> {
    let info = service
        .file_info(Upload::from_file(file))
        .await
        .with_context(|| format!("Failed to probe {}", file.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialize file info")?
        );
        return Ok(());
    }
    println!("File:         {}", info.filename);
    println!("Type:         {}", info.file_type);
    println!("Size:         {} ({} bytes)", info.file_size_human, info.file_size);
    println!(
        "Valid:        {}",
        if info.is_valid {
            green("yes")
        } else {
            red(&info.validation_message)
        }
    );
    println!("SHA-256:      {}", info.sha256);
    if !info.supported_conversions.is_empty() {
        println!("Conversions:  {}", info.supported_conversions.join(", "));
    }
    Ok(())
}

fn conversions(service: &ConversionService, json: bool) -> Result<()> {
    let allowed = all_supported_conversions();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&allowed).context("Failed to serialize conversions")?
        );
        return Ok(());
    }
    for (category, types) in allowed {
        println!("{}", bold(category.as_str()));
        for conversion_type in types {
            let status = if service.operations().is_wired(category, conversion_type) {
                green("wired")
            } else {
                red("not wired")
            };
            println!("  {conversion_type:<24} {status}");
        }
    }
    Ok(())
}
