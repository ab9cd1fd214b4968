//! Upload validation and the conversion allow-list.
//!
//! [`FileValidator::validate`] runs the checks in a fixed order (exists,
//! regular file, non-empty, known category, within the category's size
//! ceiling) and stops at the first failure, so an empty `.exe` reports
//! `Empty` rather than `UnsupportedType`.
//!
//! [`ALLOW_LIST`] is the single table of legal conversions. Introspection
//! endpoints, the validator, and the operation table's completeness check all
//! read it; nothing else defines which conversions exist.

use crate::category::{self, FileCategory};
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const MB: u64 = 1024 * 1024;

/// Legal conversion types per category.
pub const ALLOW_LIST: &[(FileCategory, &[&str])] = &[
    (FileCategory::Pdf, &["pdf_to_docx", "pdf_to_txt", "pdf_to_audio"]),
    (
        FileCategory::Document,
        &["text_to_audio", "txt_to_docx", "docx_to_txt"],
    ),
    (
        FileCategory::Image,
        &[
            "image_to_pdf",
            "image_to_text",
            "image_resize",
            "image_format",
            "image_compress",
            "image_filter",
            "image_rotate",
            "image_collage",
        ],
    ),
    (
        FileCategory::Audio,
        &[
            "audio_to_text",
            "audio_format",
            "audio_compress",
            "audio_merge",
            "audio_trim",
            "audio_speed",
            "audio_normalize",
        ],
    ),
    (FileCategory::Video, &["video_to_audio"]),
];

/// Conversion types legal for `category`. Empty for [`FileCategory::Unknown`].
pub fn supported_conversions(category: FileCategory) -> &'static [&'static str] {
    ALLOW_LIST
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, list)| *list)
        .unwrap_or(&[])
}

/// The whole allow-list keyed by category name, for introspection.
pub fn all_supported_conversions() -> BTreeMap<FileCategory, Vec<&'static str>> {
    ALLOW_LIST
        .iter()
        .map(|(c, list)| (*c, list.to_vec()))
        .collect()
}

/// True iff `conversion_type` is on `category`'s allow-list.
pub fn is_conversion_allowed(category: FileCategory, conversion_type: &str) -> bool {
    supported_conversions(category).contains(&conversion_type)
}

// ── Size ceilings ────────────────────────────────────────────────────────

/// Per-category size ceilings in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    pub pdf: u64,
    pub document: u64,
    pub image: u64,
    pub audio: u64,
    pub video: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            pdf: 50 * MB,
            document: 10 * MB,
            image: 20 * MB,
            audio: 100 * MB,
            video: 200 * MB,
        }
    }
}

impl SizeLimits {
    /// Ceiling for `category`; `None` for [`FileCategory::Unknown`].
    pub fn limit_for(&self, category: FileCategory) -> Option<u64> {
        match category {
            FileCategory::Pdf => Some(self.pdf),
            FileCategory::Document => Some(self.document),
            FileCategory::Image => Some(self.image),
            FileCategory::Audio => Some(self.audio),
            FileCategory::Video => Some(self.video),
            FileCategory::Unknown => None,
        }
    }

    pub fn set_limit(&mut self, category: FileCategory, bytes: u64) {
        match category {
            FileCategory::Pdf => self.pdf = bytes,
            FileCategory::Document => self.document = bytes,
            FileCategory::Image => self.image = bytes,
            FileCategory::Audio => self.audio = bytes,
            FileCategory::Video => self.video = bytes,
            FileCategory::Unknown => {}
        }
    }
}

// ── Validator ────────────────────────────────────────────────────────────

/// A file that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedFile {
    pub category: FileCategory,
    pub size: u64,
}

/// Checks files against existence, type and size policy.
#[derive(Debug, Clone, Default)]
pub struct FileValidator {
    limits: SizeLimits,
}

impl FileValidator {
    pub fn new(limits: SizeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SizeLimits {
        &self.limits
    }

    /// Validate the file at `path`, classifying it by its own extension.
    pub fn validate(&self, path: &Path) -> Result<ValidatedFile, ValidationError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.validate_as(path, extension)
    }

    /// Validate the file at `path`, classifying it by `extension`.
    ///
    /// Used when the stored name differs from the name the client sent.
    pub fn validate_as(
        &self,
        path: &Path,
        extension: &str,
    ) -> Result<ValidatedFile, ValidationError> {
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => {
                return Err(ValidationError::NotFound {
                    path: path.to_path_buf(),
                })
            }
        };
        if !meta.is_file() {
            return Err(ValidationError::NotAFile {
                path: path.to_path_buf(),
            });
        }
        let size = meta.len();
        if size == 0 {
            return Err(ValidationError::Empty {
                path: path.to_path_buf(),
            });
        }

        let category = category::classify(extension);
        let Some(limit) = self.limits.limit_for(category) else {
            return Err(ValidationError::UnsupportedType {
                extension: category::normalize_extension(extension),
            });
        };
        if size > limit {
            return Err(ValidationError::TooLarge {
                category,
                size,
                limit,
            });
        }

        debug!("Validated {} as {} ({} bytes)", path.display(), category, size);
        Ok(ValidatedFile { category, size })
    }

    /// Reject conversions that are not on the category's allow-list.
    pub fn check_conversion(
        &self,
        category: FileCategory,
        conversion_type: &str,
    ) -> Result<(), ValidationError> {
        if is_conversion_allowed(category, conversion_type) {
            Ok(())
        } else {
            Err(ValidationError::ConversionNotAllowed {
                category,
                conversion_type: conversion_type.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, len: u64) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let f = File::create(&path).unwrap();
        // Sparse: set_len does not write the bytes.
        f.set_len(len).unwrap();
        path
    }

    #[test]
    fn missing_path_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = FileValidator::default()
            .validate(&dir.path().join("ghost.pdf"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::NotFound { .. }));
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("folder.pdf");
        std::fs::create_dir(&sub).unwrap();
        let err = FileValidator::default().validate(&sub).unwrap_err();
        assert!(matches!(err, ValidationError::NotAFile { .. }));
    }

    #[test]
    fn empty_file_rejected_before_type_check() {
        let dir = TempDir::new().unwrap();
        let note = write(&dir, "note.txt", 0);
        assert!(matches!(
            FileValidator::default().validate(&note).unwrap_err(),
            ValidationError::Empty { .. }
        ));
        // An empty file of an unknown type still reports Empty.
        let blob = write(&dir, "blob.exe", 0);
        assert!(matches!(
            FileValidator::default().validate(&blob).unwrap_err(),
            ValidationError::Empty { .. }
        ));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let blob = write(&dir, "blob.EXE", 10);
        let err = FileValidator::default().validate(&blob).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedType {
                extension: "exe".into()
            }
        );
    }

    #[test]
    fn one_byte_over_each_ceiling_is_too_large() {
        let dir = TempDir::new().unwrap();
        let limits = SizeLimits::default();
        let cases = [
            ("a.pdf", FileCategory::Pdf),
            ("a.txt", FileCategory::Document),
            ("a.png", FileCategory::Image),
            ("a.mp3", FileCategory::Audio),
            ("a.mp4", FileCategory::Video),
        ];
        for (name, category) in cases {
            let limit = limits.limit_for(category).unwrap();
            let at_limit = write(&dir, name, limit);
            assert!(FileValidator::default().validate(&at_limit).is_ok(), "{name}");

            let over = write(&dir, name, limit + 1);
            let err = FileValidator::default().validate(&over).unwrap_err();
            let msg = err.to_string();
            assert_eq!(
                err,
                ValidationError::TooLarge {
                    category,
                    size: limit + 1,
                    limit
                }
            );
            assert!(msg.contains(&format!("{}MB", limit / MB)), "got: {msg}");
        }
    }

    #[test]
    fn custom_limits_apply() {
        let dir = TempDir::new().unwrap();
        let mut limits = SizeLimits::default();
        limits.set_limit(FileCategory::Image, 4);
        let img = write(&dir, "tiny.png", 5);
        let err = FileValidator::new(limits).validate(&img).unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { limit: 4, .. }));
    }

    #[test]
    fn validate_as_uses_given_extension() {
        let dir = TempDir::new().unwrap();
        let stored = write(&dir, "upload.bin", 10);
        let ok = FileValidator::default().validate_as(&stored, "PDF").unwrap();
        assert_eq!(ok.category, FileCategory::Pdf);
        assert_eq!(ok.size, 10);
    }

    #[test]
    fn allow_list_membership() {
        assert!(is_conversion_allowed(FileCategory::Pdf, "pdf_to_txt"));
        assert!(is_conversion_allowed(FileCategory::Audio, "audio_merge"));
        assert!(!is_conversion_allowed(FileCategory::Video, "audio_to_text"));
        assert!(!is_conversion_allowed(FileCategory::Pdf, "image_resize"));
        assert!(!is_conversion_allowed(FileCategory::Unknown, "pdf_to_txt"));
        assert!(!is_conversion_allowed(FileCategory::Image, ""));
    }

    #[test]
    fn every_pair_outside_the_list_is_rejected() {
        let every_type: Vec<&str> = ALLOW_LIST.iter().flat_map(|(_, l)| l.iter().copied()).collect();
        let categories = FileCategory::SUPPORTED
            .iter()
            .copied()
            .chain([FileCategory::Unknown]);
        for category in categories {
            for ty in &every_type {
                let listed = supported_conversions(category).contains(ty);
                assert_eq!(is_conversion_allowed(category, ty), listed);
                let check = FileValidator::default().check_conversion(category, ty);
                assert_eq!(check.is_ok(), listed, "{category} / {ty}");
            }
        }
    }

    #[test]
    fn introspection_reads_the_allow_list() {
        let all = all_supported_conversions();
        assert_eq!(all.len(), 5);
        assert_eq!(all[&FileCategory::Video], vec!["video_to_audio"]);
        assert!(!all.contains_key(&FileCategory::Unknown));
    }
}
