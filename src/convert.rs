//! The conversion dispatcher.
//!
//! [`ConversionDispatcher::dispatch`] takes one validated upload through a
//! single conversion:
//!
//! ```text
//!  resolve route ──► record start ──► name output ──► run operation
//!        │                                               (blocking pool)
//!        ▼                                                    │
//!   RoutingGap                           input removed ◄──────┘
//!                                              │
//!                                  verify artifact on disk
//!                                              │
//!                               record outcome, notify observer
//! ```
//!
//! ## Why an RAII guard for the input?
//!
//! The input must be gone after every dispatch: routing gap, bad parameter,
//! operation error, missing artifact, or a panic inside a converter. Tying the
//! deletion to [`InputGuard`]'s `Drop` covers all of them without a cleanup
//! call on each exit path.
//!
//! ## Cancellation
//!
//! Each dispatch runs on its own tokio task. Dropping the future returned by
//! [`ConversionDispatcher::dispatch`], as hyper does when a client
//! disconnects, detaches that task: the operation still finishes with its
//! input in place, and the outcome is still counted and journaled.

use crate::category::FileCategory;
use crate::converters::Parameters;
use crate::error::{ConvertError, ErrorKind};
use crate::journal::{NoopObserver, Observer};
use crate::registry::{OperationTable, Route};
use crate::stats::StatsRecorder;
use crate::temp::{remove_path, TempResourceManager};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

// ── Request / result ─────────────────────────────────────────────────────

/// One validated upload and the conversion requested for it.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input_path: PathBuf,
    pub category: FileCategory,
    pub conversion_type: String,
    pub parameters: Parameters,
}

impl ConversionRequest {
    pub fn new(
        input_path: impl Into<PathBuf>,
        category: FileCategory,
        conversion_type: impl Into<String>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            category,
            conversion_type: conversion_type.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Uniform outcome of a dispatched conversion.
///
/// `success == true` implies `output_path` exists and `file_size` is its
/// length; `success == false` implies `output_path` is `None` and `error` is
/// set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub conversion_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
}

impl ConversionResult {
    fn succeeded(conversion_type: &str, output: PathBuf, file_size: u64, elapsed: Duration) -> Self {
        let output_filename = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Self {
            conversion_type: conversion_type.to_string(),
            success: true,
            output_path: Some(output),
            output_filename,
            file_size: Some(file_size),
            error: None,
            error_kind: None,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    fn failed(conversion_type: &str, error: &ConvertError, elapsed: Duration) -> Self {
        Self {
            conversion_type: conversion_type.to_string(),
            success: false,
            output_path: None,
            output_filename: None,
            file_size: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

// ── Input guard ──────────────────────────────────────────────────────────

/// Deletes the dispatched input when dropped.
///
/// Paths owned by the [`TempResourceManager`] are released through it so the
/// owned set stays accurate; anything else is removed directly. A missing
/// file counts as already cleaned.
pub struct InputGuard {
    path: PathBuf,
    temp: Arc<TempResourceManager>,
}

impl InputGuard {
    pub fn new(path: impl Into<PathBuf>, temp: Arc<TempResourceManager>) -> Self {
        Self {
            path: path.into(),
            temp,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InputGuard {
    fn drop(&mut self) {
        if self.temp.is_owned(&self.path) {
            if !self.temp.cleanup(&self.path) {
                warn!("Failed to remove input {}", self.path.display());
            }
            return;
        }
        if let Err(e) = remove_path(&self.path) {
            warn!("Failed to remove input {}: {}", self.path.display(), e);
        }
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────

/// Routes a [`ConversionRequest`] to its operation and normalises the outcome.
///
/// Holds no lock while an operation runs; only the stats update and the
/// temp-set bookkeeping are serialised.
#[derive(Clone)]
pub struct ConversionDispatcher {
    table: Arc<OperationTable>,
    output_dir: PathBuf,
    stats: Arc<StatsRecorder>,
    observer: Observer,
    temp: Arc<TempResourceManager>,
}

impl ConversionDispatcher {
    /// A dispatcher writing artifacts into `output_dir`, with fresh stats, no
    /// observer, and a temp manager in the system temp directory.
    pub fn new(table: OperationTable, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            table: Arc::new(table),
            output_dir: output_dir.into(),
            stats: Arc::new(StatsRecorder::new()),
            observer: Arc::new(NoopObserver),
            temp: Arc::new(TempResourceManager::in_system_temp()),
        }
    }

    pub fn with_stats(mut self, stats: Arc<StatsRecorder>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_temp(mut self, temp: Arc<TempResourceManager>) -> Self {
        self.temp = temp;
        self
    }

    pub fn table(&self) -> &OperationTable {
        &self.table
    }

    pub fn stats(&self) -> &Arc<StatsRecorder> {
        &self.stats
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run `request` to completion.
    ///
    /// Returns `Err(RoutingGap)` when no operation is wired for the pair:
    /// nothing ran and stats are untouched. Every other outcome, including
    /// operation failures and a missing artifact, is an `Ok` result with
    /// `success` set accordingly and counted in the stats. The input file is
    /// removed in all cases, including when the returned future is dropped
    /// before completion.
    pub async fn dispatch(&self, request: ConversionRequest) -> Result<ConversionResult, ConvertError> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run(request).await }.in_current_span())
            .await
            .map_err(|e| ConvertError::Internal(format!("Dispatch task failed: {e}")))?
    }

    async fn run(&self, request: ConversionRequest) -> Result<ConversionResult, ConvertError> {
        let ConversionRequest {
            input_path,
            category,
            conversion_type,
            parameters,
        } = request;
        let guard = InputGuard::new(input_path.clone(), Arc::clone(&self.temp));
        let input_name = display_name(&input_path);

        let Some(route) = self.table.resolve(category, &conversion_type) else {
            warn!(
                category = %category,
                conversion_type = %conversion_type,
                "No converter wired for allowed conversion"
            );
            drop(guard);
            return Err(ConvertError::RoutingGap {
                category,
                conversion_type,
            });
        };

        let input_bytes = std::fs::metadata(&input_path).map(|m| m.len()).unwrap_or(0);
        self.stats.record_start(category, &conversion_type, input_bytes);
        self.observer.on_start(&input_name, &conversion_type);
        debug!(
            input = %input_path.display(),
            category = %category,
            conversion_type = %conversion_type,
            bytes = input_bytes,
            "dispatching"
        );

        let started = Instant::now();
        let outcome = self
            .run_route(route, guard, &conversion_type, parameters)
            .await;
        let elapsed = started.elapsed();

        match outcome {
            Ok((output, size)) => {
                self.stats.record_success(category, &conversion_type);
                let output_name = display_name(&output);
                self.observer
                    .on_success(&input_name, &output_name, &conversion_type, elapsed);
                info!(
                    conversion_type = %conversion_type,
                    output = %output_name,
                    bytes = size,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "conversion complete"
                );
                Ok(ConversionResult::succeeded(&conversion_type, output, size, elapsed))
            }
            Err(err) => {
                self.stats.record_failure();
                self.observer
                    .on_error(&input_name, &conversion_type, &err.to_string());
                Ok(ConversionResult::failed(&conversion_type, &err, elapsed))
            }
        }
    }

    /// Name the output, run the operation, drop the input, check the artifact.
    async fn run_route(
        &self,
        route: Route,
        guard: InputGuard,
        conversion_type: &str,
        parameters: Parameters,
    ) -> Result<(PathBuf, u64), ConvertError> {
        let input = guard.path().to_path_buf();
        let base = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let file_name = route
            .naming
            .file_name(&base, &parameters)
            .map_err(|e| ConvertError::from_operation(conversion_type, e))?;
        let output = self.output_dir.join(file_name);

        let operation = Arc::clone(&route.operation);
        let op_output = output.clone();
        let joined = tokio::task::spawn_blocking(move || {
            operation.run(&input, &op_output, &parameters)
        })
        .await;
        drop(guard);

        match joined {
            Ok(Ok(reported)) => {
                if reported != output {
                    debug!(
                        "Operation reported {} but the predicted artifact is {}",
                        reported.display(),
                        output.display()
                    );
                }
            }
            Ok(Err(e)) => {
                discard_partial(&output);
                return Err(ConvertError::from_operation(conversion_type, e));
            }
            Err(join_err) => {
                discard_partial(&output);
                warn!("Converter task for {conversion_type} aborted: {join_err}");
                return Err(ConvertError::OperationFailure {
                    conversion_type: conversion_type.to_string(),
                    message: format!("{conversion_type} failed: converter panicked"),
                });
            }
        }

        match std::fs::metadata(&output) {
            Ok(meta) if meta.is_file() => {
                if meta.len() == 0 {
                    warn!("Conversion produced an empty file: {}", output.display());
                }
                Ok((output, meta.len()))
            }
            _ => Err(ConvertError::OutputMissing { path: output }),
        }
    }
}

/// Synchronous wrapper around [`ConversionDispatcher::dispatch`].
///
/// Creates a temporary tokio runtime internally; do not call from inside an
/// async context.
pub fn dispatch_sync(
    dispatcher: &ConversionDispatcher,
    request: ConversionRequest,
) -> Result<ConversionResult, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(dispatcher.dispatch(request))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Remove whatever a failed operation left at the output path.
fn discard_partial(output: &Path) {
    match remove_path(output) {
        Ok(true) => debug!("Removed partial output {}", output.display()),
        Ok(false) => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", output.display(), e),
    }
}
