//! # edgequake-convert
//!
//! Classify, validate and convert uploaded files: PDFs, Word documents,
//! images, audio and video.
//!
//! ## Why this crate?
//!
//! A conversion front end is mostly bookkeeping: decide what a file is, refuse
//! what it cannot be turned into, run the right converter, and make sure
//! nothing is left behind on disk. The converters themselves are thin wrappers
//! over pdfium, `image`, and a few external tools (ffmpeg, tesseract, espeak,
//! whisper). This crate keeps the bookkeeping in one place so the HTTP server,
//! the CLI, and library callers share the same rules.
//!
//! ## Request Lifecycle
//!
//! ```text
//! Upload
//!  │
//!  ├─ 1. Store     {uuid}_{secure name} in the upload directory
//!  ├─ 2. Validate  exists, non-empty, known category, under its size limit
//!  ├─ 3. Allow     conversion type legal for the category
//!  ├─ 4. Route     (category, conversion type) → converter operation
//!  ├─ 5. Convert   on the blocking pool; input removed afterwards
//!  └─ 6. Result    artifact in the download directory + stats + journal line
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_convert::{ConversionService, Parameters, ServiceConfig, Upload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ConversionService::start(ServiceConfig::from_env()?)?;
//!     let params = Parameters::new().with("width", "640").with("height", "480");
//!     let result = service
//!         .submit(Upload::from_file("photo.png"), "image_resize", params)
//!         .await?;
//!     println!("{:?} ({:?} bytes)", result.output_path, result.file_size);
//!     service.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | via cli | axum HTTP surface ([`server::router`], [`server::serve`]) |
//! | `cli`    | on      | The `edgequake-convert` binary (clap + anyhow + tracing-subscriber) |
//!
//! Library-only users can drop both:
//! ```toml
//! edgequake-convert = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod category;
pub mod config;
pub mod convert;
pub mod converters;
pub mod error;
pub mod journal;
pub mod registry;
#[cfg(feature = "server")]
pub mod server;
pub mod service;
pub mod stats;
pub mod temp;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use category::{classify, FileCategory};
pub use config::{ServiceConfig, ServiceConfigBuilder, ToolConfig};
pub use convert::{dispatch_sync, ConversionDispatcher, ConversionRequest, ConversionResult};
pub use converters::{ConverterOperation, ParamValue, Parameters};
pub use error::{ConvertError, ErrorKind, OperationError, ValidationError};
pub use journal::{ConversionObserver, NoopObserver, Observer, ObserverChain, OperationLogger};
pub use registry::{OperationTable, OutputNaming};
pub use service::{ConversionService, FileInfo, SweepReport, Upload};
pub use stats::{ConversionStats, StatsRecorder, StatsSummary};
pub use temp::TempResourceManager;
pub use validate::{FileValidator, SizeLimits};
