//! Error types for the edgequake-convert library.
//!
//! Three error types reflect three layers of the request lifecycle:
//!
//! * **Rejection** ([`ValidationError`]): the upload is missing, empty, of an
//!   unsupported type, too large, or the requested conversion is not legal for
//!   its category. Raised before any converter runs; stats are untouched.
//!
//! * **Converter fault** ([`OperationError`]): what a single converter
//!   operation returns when its library or external tool fails. The message is
//!   preserved verbatim for diagnostics.
//!
//! * **Crate-level** ([`ConvertError`]): everything the service surfaces to a
//!   caller, including routing gaps and the missing-artifact post-condition.
//!   [`ConvertError::kind`] gives callers a stable [`ErrorKind`] to branch on
//!   instead of string-matching messages.

use crate::category::FileCategory;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

const MB: u64 = 1024 * 1024;

/// Why an upload was rejected before dispatch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The upload carried no file name.
    #[error("No file selected")]
    MissingFileName,

    /// Nothing exists at the given path.
    #[error("File does not exist: '{path}'")]
    NotFound { path: PathBuf },

    /// The path exists but is a directory, socket, or similar.
    #[error("Path is not a file: '{path}'")]
    NotAFile { path: PathBuf },

    /// The file has zero bytes.
    #[error("File is empty")]
    Empty { path: PathBuf },

    /// The extension does not map to any known category, or is not in the
    /// configured allowed-extension set.
    #[error("Unsupported file type: .{extension}")]
    UnsupportedType { extension: String },

    /// The file exceeds its category's size ceiling.
    #[error(
        "File too large. Maximum size for {category}: {}MB ({size} bytes given, limit {limit} bytes)",
        .limit / MB
    )]
    TooLarge {
        category: FileCategory,
        size: u64,
        limit: u64,
    },

    /// The conversion is not on the category's allow-list.
    #[error("Conversion type '{conversion_type}' not supported for {category} files")]
    ConversionNotAllowed {
        category: FileCategory,
        conversion_type: String,
    },
}

/// A converter operation's failure.
///
/// Converters wrap their causes with the operation name so the message reads
/// like "Image resize failed: ...".
#[derive(Debug, Error)]
pub enum OperationError {
    /// Generic, already-formatted failure.
    #[error("{0}")]
    Failed(String),

    /// A parameter was present but unusable.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// File-system error while reading input or writing output.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Image decode or encode failure.
    #[error("{context}: {source}")]
    Image {
        context: String,
        #[source]
        source: image::ImageError,
    },

    /// pdfium failed to bind, open, or write a document.
    #[error("{context}: {detail}")]
    Pdf { context: String, detail: String },

    /// An external tool could not be spawned.
    #[error(
        "{tool} is required for {purpose} but could not be started: {detail}\n\
Install {tool} or point the matching CONVERT_* variable at its binary."
    )]
    ToolMissing {
        tool: String,
        purpose: String,
        detail: String,
    },

    /// An external tool exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    /// A network-backed engine failed.
    #[error("{context}: {detail}")]
    Http { context: String, detail: String },
}

impl OperationError {
    /// Shorthand for [`OperationError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        OperationError::Failed(msg.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        OperationError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn image(context: impl Into<String>, source: image::ImageError) -> Self {
        OperationError::Image {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        OperationError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Stable failure classes, serialised into results and API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    RoutingGap,
    InvalidParameter,
    OperationFailure,
    OutputMissing,
    Internal,
}

/// All errors surfaced by the edgequake-convert library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Rejections ────────────────────────────────────────────────────────
    /// The upload failed validation; no conversion was attempted.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The conversion is allowed for the category but no operation is wired.
    #[error(
        "Conversion '{conversion_type}' is allowed for {category} files but no converter is wired for it.\n\
The operation table and the allow-list are out of sync."
    )]
    RoutingGap {
        category: FileCategory,
        conversion_type: String,
    },

    // ── Conversion failures ───────────────────────────────────────────────
    /// A parameter could not be used to build the output or run the operation.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The converter operation failed; the underlying message is kept verbatim.
    #[error("{message}")]
    OperationFailure {
        conversion_type: String,
        message: String,
    },

    /// The operation reported success but its artifact is not on disk.
    #[error("Conversion completed but output file not found: '{path}'")]
    OutputMissing { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not store an upload or prepare a service directory.
    #[error("{context} '{path}': {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::Validation(_) => ErrorKind::Validation,
            ConvertError::RoutingGap { .. } => ErrorKind::RoutingGap,
            ConvertError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            ConvertError::OperationFailure { .. } => ErrorKind::OperationFailure,
            ConvertError::OutputMissing { .. } => ErrorKind::OutputMissing,
            ConvertError::Io { .. } | ConvertError::InvalidConfig(_) | ConvertError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Wrap a converter fault for `conversion_type`.
    ///
    /// Parameter problems keep their own class so clients can tell a bad form
    /// field from a broken converter.
    pub fn from_operation(conversion_type: &str, err: OperationError) -> Self {
        match err {
            OperationError::InvalidParameter { name, reason } => {
                ConvertError::InvalidParameter { name, reason }
            }
            other => ConvertError::OperationFailure {
                conversion_type: conversion_type.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_display_carries_limit() {
        let e = ValidationError::TooLarge {
            category: FileCategory::Pdf,
            size: 50 * MB + 1,
            limit: 50 * MB,
        };
        let msg = e.to_string();
        assert!(msg.contains("50MB"), "got: {msg}");
        assert!(msg.contains(&(50 * MB).to_string()), "got: {msg}");
        assert!(msg.contains("pdf"), "got: {msg}");
    }

    #[test]
    fn unsupported_type_display() {
        let e = ValidationError::UnsupportedType {
            extension: "exe".into(),
        };
        assert_eq!(e.to_string(), "Unsupported file type: .exe");
    }

    #[test]
    fn not_allowed_display() {
        let e = ValidationError::ConversionNotAllowed {
            category: FileCategory::Video,
            conversion_type: "audio_to_text".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("audio_to_text"));
        assert!(msg.contains("video"));
    }

    #[test]
    fn routing_gap_display_and_kind() {
        let e = ConvertError::RoutingGap {
            category: FileCategory::Audio,
            conversion_type: "audio_merge".into(),
        };
        assert!(e.to_string().contains("audio_merge"));
        assert_eq!(e.kind(), ErrorKind::RoutingGap);
    }

    #[test]
    fn operation_failure_keeps_message_verbatim() {
        let e = ConvertError::from_operation(
            "image_resize",
            OperationError::failed("Image resize failed: corrupt header"),
        );
        assert_eq!(e.to_string(), "Image resize failed: corrupt header");
        assert_eq!(e.kind(), ErrorKind::OperationFailure);
    }

    #[test]
    fn invalid_parameter_keeps_its_class() {
        let e = ConvertError::from_operation(
            "image_compress",
            OperationError::invalid_parameter("quality", "must be 1-100"),
        );
        assert_eq!(e.kind(), ErrorKind::InvalidParameter);
        assert!(e.to_string().contains("quality"));
    }

    #[test]
    fn tool_missing_display() {
        let e = OperationError::ToolMissing {
            tool: "ffmpeg".into(),
            purpose: "audio conversion".into(),
            detail: "No such file or directory".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("ffmpeg is required for audio conversion"), "got: {msg}");
    }
}
