//! The conversion service: validation, dispatch, and lifecycle in one value.
//!
//! [`ConversionService`] owns every piece of shared state (stats, the upload
//! and scratch temp managers, the operation table) and is constructed
//! explicitly by [`ConversionService::start`]. Hosts (the HTTP server, the
//! CLI) hold it in an `Arc` and call [`ConversionService::shutdown`] when they
//! stop, which performs the final sweep.
//!
//! ```text
//!  Upload ─► name gate ─► store {uuid}_{name} ─► validate ─► allow-list ─► dispatch
//!               │                                   │            │
//!               └────────── rejection (upload removed, stats untouched) ──┘
//! ```

use crate::category::{classify, extension_of, FileCategory};
use crate::config::ServiceConfig;
use crate::convert::{ConversionDispatcher, ConversionRequest, ConversionResult};
use crate::converters::Parameters;
use crate::error::{ConvertError, ValidationError};
use crate::journal::{Observer, OperationLogger};
use crate::registry::OperationTable;
use crate::stats::{format_file_size, ConversionStats, StatsRecorder, StatsSummary};
use crate::temp::{sweep_directory, TempResourceManager};
use crate::validate::{all_supported_conversions, supported_conversions, FileValidator};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ── Uploads ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Payload {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// A file handed to the service: a client-supplied name plus its content.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    payload: Payload,
}

impl Upload {
    /// Content received in memory, e.g. a multipart field.
    pub fn from_bytes(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            payload: Payload::Bytes(bytes.into()),
        }
    }

    /// Content on disk. The service copies it, so the original survives the
    /// conversion.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            file_name,
            payload: Payload::File(path),
        }
    }

    async fn write_to(&self, dest: &Path) -> std::io::Result<()> {
        match &self.payload {
            Payload::Bytes(bytes) => tokio::fs::write(dest, bytes).await,
            Payload::File(src) => tokio::fs::copy(src, dest).await.map(|_| ()),
        }
    }
}

/// Result of probing an upload without converting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub file_type: FileCategory,
    pub file_size: u64,
    pub file_size_human: String,
    pub is_valid: bool,
    pub validation_message: String,
    pub supported_conversions: Vec<String>,
    pub sha256: String,
}

/// Counts removed by [`ConversionService::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub cleaned_temp_files: usize,
    pub cleaned_downloads: usize,
    pub total_cleaned: usize,
}

// ── Service ──────────────────────────────────────────────────────────────

/// The conversion service.
pub struct ConversionService {
    config: ServiceConfig,
    validator: FileValidator,
    dispatcher: ConversionDispatcher,
    stats: Arc<StatsRecorder>,
    uploads: Arc<TempResourceManager>,
    scratch: Arc<TempResourceManager>,
    observer: Observer,
}

impl std::fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionService")
            .field("config", &self.config)
            .field("operations", &self.dispatcher.table().len())
            .field("owned_uploads", &self.uploads.owned_count())
            .finish()
    }
}

impl ConversionService {
    /// Build the standard operation table for `config` and start.
    pub fn start(config: ServiceConfig) -> Result<Self, ConvertError> {
        let table = OperationTable::standard(&config);
        Self::with_operations(config, table)
    }

    /// Start with a caller-supplied operation table.
    ///
    /// Creates the upload and download directories, reports routing gaps
    /// (fatal with `strict_routing`), and journals through [`OperationLogger`].
    pub fn with_operations(config: ServiceConfig, table: OperationTable) -> Result<Self, ConvertError> {
        let gaps = table.routing_gaps();
        for (category, conversion_type) in &gaps {
            warn!(
                category = %category,
                conversion_type = %conversion_type,
                "Allowed conversion has no converter wired; requests for it will fail"
            );
        }
        if config.strict_routing && !gaps.is_empty() {
            let list = gaps
                .iter()
                .map(|(c, t)| format!("{c}/{t}"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConvertError::InvalidConfig(format!(
                "strict_routing is enabled but these allowed conversions have no converter: {list}"
            )));
        }

        let mut dirs = vec![&config.upload_dir, &config.download_dir];
        if let Some(temp) = &config.temp_dir {
            dirs.push(temp);
        }
        for dir in dirs {
            std::fs::create_dir_all(dir).map_err(|e| ConvertError::Io {
                context: "Failed to create directory",
                path: dir.clone(),
                source: e,
            })?;
        }

        let stats = Arc::new(StatsRecorder::new());
        let uploads = Arc::new(TempResourceManager::new(&config.upload_dir));
        let scratch = Arc::new(match &config.temp_dir {
            Some(dir) => TempResourceManager::new(dir),
            None => TempResourceManager::in_system_temp(),
        });
        let observer: Observer = Arc::new(OperationLogger);
        let dispatcher = ConversionDispatcher::new(table, &config.download_dir)
            .with_stats(Arc::clone(&stats))
            .with_temp(Arc::clone(&uploads))
            .with_observer(Arc::clone(&observer));

        info!(
            "Conversion service ready: {} operations, uploads in {}, downloads in {}",
            dispatcher.table().len(),
            config.upload_dir.display(),
            config.download_dir.display()
        );

        Ok(Self {
            validator: FileValidator::new(config.size_limits),
            config,
            dispatcher,
            stats,
            uploads,
            scratch,
            observer,
        })
    }

    /// Replace the lifecycle observer (default: [`OperationLogger`]).
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.dispatcher = self.dispatcher.with_observer(Arc::clone(&observer));
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn operations(&self) -> &OperationTable {
        self.dispatcher.table()
    }

    /// Store, validate and convert `upload`.
    ///
    /// `Err` is a rejection: nothing ran, the stored upload is gone, and stats
    /// are untouched. `Ok` carries the conversion outcome, successful or not.
    pub async fn submit(
        &self,
        upload: Upload,
        conversion_type: &str,
        parameters: Parameters,
    ) -> Result<ConversionResult, ConvertError> {
        let original = upload.file_name.trim().to_string();
        if original.is_empty() {
            return Err(self.reject(&original, ValidationError::MissingFileName));
        }
        let extension = extension_of(&original);
        if !self.config.allowed_extensions.contains(&extension) {
            return Err(self.reject(&original, ValidationError::UnsupportedType { extension }));
        }

        let stored = self
            .config
            .upload_dir
            .join(format!("{}_{}", Uuid::new_v4(), upload_name(&original, &extension)));
        self.uploads.adopt(&stored);
        if let Err(e) = upload.write_to(&stored).await {
            self.uploads.cleanup(&stored);
            return Err(ConvertError::Io {
                context: "Failed to store upload",
                path: stored,
                source: e,
            });
        }
        debug!("Stored upload {} as {}", original, stored.display());

        let validated = match self.validator.validate(&stored) {
            Ok(v) => v,
            Err(e) => {
                self.uploads.cleanup(&stored);
                return Err(self.reject(&original, e));
            }
        };
        if let Err(e) = self.validator.check_conversion(validated.category, conversion_type) {
            self.uploads.cleanup(&stored);
            return Err(self.reject(&original, e));
        }

        let request = ConversionRequest::new(stored, validated.category, conversion_type)
            .with_parameters(parameters);
        self.dispatcher.dispatch(request).await
    }

    fn reject(&self, file_name: &str, error: ValidationError) -> ConvertError {
        self.observer.on_validation_error(file_name, &error.to_string());
        ConvertError::Validation(error)
    }

    /// Probe `upload` without converting it. The throwaway copy is removed
    /// before returning.
    pub async fn file_info(&self, upload: Upload) -> Result<FileInfo, ConvertError> {
        let filename = upload.file_name.trim().to_string();
        if filename.is_empty() {
            return Err(ConvertError::Validation(ValidationError::MissingFileName));
        }
        let extension = extension_of(&filename);
        let suffix = if extension.is_empty() {
            String::new()
        } else {
            format!(".{extension}")
        };

        let probe = self.scratch.create_file(&suffix).map_err(|e| ConvertError::Io {
            context: "Failed to create probe file",
            path: self.scratch.root().to_path_buf(),
            source: e,
        })?;
        let written = upload.write_to(&probe).await;
        let outcome = match written {
            Ok(()) => {
                let path = probe.clone();
                let validator = self.validator.clone();
                tokio::task::spawn_blocking(move || probe_file(&validator, &path))
                    .await
                    .map_err(|e| ConvertError::Internal(format!("File probe task panicked: {e}")))
            }
            Err(e) => Err(ConvertError::Io {
                context: "Failed to store upload",
                path: probe.clone(),
                source: e,
            }),
        };
        self.scratch.cleanup(&probe);
        let (size, sha256, validation) = outcome??;

        let file_type = classify(&extension);
        let validation = validation.and_then(|_| {
            if self.config.allowed_extensions.contains(&extension) {
                Ok(())
            } else {
                Err(ValidationError::UnsupportedType {
                    extension: extension.clone(),
                })
            }
        });
        Ok(FileInfo {
            filename,
            file_type,
            file_size: size,
            file_size_human: format_file_size(size),
            is_valid: validation.is_ok(),
            validation_message: match validation {
                Ok(()) => "File is valid".to_string(),
                Err(e) => e.to_string(),
            },
            supported_conversions: supported_conversions(file_type)
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sha256,
        })
    }

    /// Path of the artifact `filename` in the download directory, if present.
    ///
    /// Names containing separators, `..`, or a leading dot are refused.
    pub fn artifact_path(&self, filename: &str) -> Option<PathBuf> {
        if filename.is_empty()
            || filename.starts_with('.')
            || filename.contains(['/', '\\', '\0'])
        {
            return None;
        }
        let path = self.config.download_dir.join(filename);
        path.is_file().then_some(path)
    }

    /// Category → allowed conversion types.
    pub fn supported_conversions(&self) -> BTreeMap<FileCategory, Vec<&'static str>> {
        all_supported_conversions()
    }

    pub fn stats(&self) -> ConversionStats {
        self.stats.snapshot()
    }

    pub fn stats_summary(&self) -> StatsSummary {
        self.stats.summary()
    }

    /// Remove expired uploads, scratch files and artifacts.
    ///
    /// The owned-path sweeps and the download-directory sweep run
    /// concurrently on the blocking pool.
    pub async fn sweep(&self) -> SweepReport {
        let retention = self.config.retention;
        let uploads = Arc::clone(&self.uploads);
        let scratch = Arc::clone(&self.scratch);
        let download_dir = self.config.download_dir.clone();

        let (owned, downloads) = tokio::join!(
            tokio::task::spawn_blocking(move || {
                uploads.sweep_expired(retention) + scratch.sweep_expired(retention)
            }),
            tokio::task::spawn_blocking(move || sweep_directory(&download_dir, retention)),
        );
        let cleaned_temp_files = owned.unwrap_or_else(|e| {
            warn!("Temp sweep task failed: {e}");
            0
        });
        let cleaned_downloads = downloads.unwrap_or_else(|e| {
            warn!("Download sweep task failed: {e}");
            0
        });
        let report = SweepReport {
            cleaned_temp_files,
            cleaned_downloads,
            total_cleaned: cleaned_temp_files + cleaned_downloads,
        };
        info!(
            "Sweep removed {} temp files and {} downloads",
            report.cleaned_temp_files, report.cleaned_downloads
        );
        report
    }

    /// Final sweep of everything still owned. Errors are logged, not raised.
    pub fn shutdown(&self) -> usize {
        let removed = self.uploads.sweep_all() + self.scratch.sweep_all();
        info!("Shutdown sweep removed {} entries", removed);
        removed
    }
}

/// Size, SHA-256 and validation outcome of the file at `path`.
fn probe_file(
    validator: &FileValidator,
    path: &Path,
) -> Result<(u64, String, Result<(), ValidationError>), ConvertError> {
    let io_err = |e| ConvertError::Io {
        context: "Failed to read probe file",
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    let validation = validator.validate(path).map(|_| ());
    Ok((size, format!("{:x}", hasher.finalize()), validation))
}

// ── File names ───────────────────────────────────────────────────────────

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").unwrap());

/// Reduce a client-supplied name to ASCII alphanumerics, `.`, `-` and `_`.
///
/// Path separators become underscores, so no directory component survives;
/// leading and trailing dots and underscores are stripped.
pub fn secure_filename(name: &str) -> String {
    let flattened = name
        .replace(['/', '\\'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    UNSAFE_CHARS
        .replace_all(&flattened, "")
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// Sanitised name that still carries `extension`.
fn upload_name(original: &str, extension: &str) -> String {
    let name = secure_filename(original);
    if extension_of(&name) == extension && name.len() > extension.len() + 1 {
        name
    } else {
        format!("upload.{extension}")
    }
}
