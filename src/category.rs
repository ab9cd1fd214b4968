//! File classification: map an extension to a semantic [`FileCategory`].
//!
//! Classification is a pure, total function over a static table. Anything the
//! table does not know becomes [`FileCategory::Unknown`], which never gets
//! past validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Semantic file category derived from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Pdf,
    Document,
    Image,
    Audio,
    Video,
    Unknown,
}

/// Extension → category table. Extensions are lowercase, without the dot.
const EXTENSION_TABLE: &[(&str, FileCategory)] = &[
    ("pdf", FileCategory::Pdf),
    ("docx", FileCategory::Document),
    ("txt", FileCategory::Document),
    ("jpg", FileCategory::Image),
    ("jpeg", FileCategory::Image),
    ("png", FileCategory::Image),
    ("gif", FileCategory::Image),
    ("bmp", FileCategory::Image),
    ("tiff", FileCategory::Image),
    ("mp3", FileCategory::Audio),
    ("wav", FileCategory::Audio),
    ("ogg", FileCategory::Audio),
    ("flac", FileCategory::Audio),
    ("m4a", FileCategory::Audio),
    ("aac", FileCategory::Audio),
    ("mp4", FileCategory::Video),
    ("avi", FileCategory::Video),
    ("mov", FileCategory::Video),
    ("wmv", FileCategory::Video),
    ("flv", FileCategory::Video),
    ("webm", FileCategory::Video),
];

impl FileCategory {
    /// Every category a file can be accepted under, in display order.
    pub const SUPPORTED: [FileCategory; 5] = [
        FileCategory::Pdf,
        FileCategory::Document,
        FileCategory::Image,
        FileCategory::Audio,
        FileCategory::Video,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Pdf => "pdf",
            FileCategory::Document => "document",
            FileCategory::Image => "image",
            FileCategory::Audio => "audio",
            FileCategory::Video => "video",
            FileCategory::Unknown => "unknown",
        }
    }

    /// Extensions (without dot) that classify as this category.
    pub fn extensions(&self) -> Vec<&'static str> {
        EXTENSION_TABLE
            .iter()
            .filter(|(_, c)| c == self)
            .map(|(ext, _)| *ext)
            .collect()
    }

    /// Classify a path by its extension.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(classify)
            .unwrap_or(FileCategory::Unknown)
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(FileCategory::Pdf),
            "document" => Ok(FileCategory::Document),
            "image" => Ok(FileCategory::Image),
            "audio" => Ok(FileCategory::Audio),
            "video" => Ok(FileCategory::Video),
            "unknown" => Ok(FileCategory::Unknown),
            other => Err(format!("unknown file category '{other}'")),
        }
    }
}

/// Lowercase an extension and strip one leading dot.
pub fn normalize_extension(extension: &str) -> String {
    let trimmed = extension.trim();
    trimmed
        .strip_prefix('.')
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

/// Extension of a file name, normalised. Empty when there is none.
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
        .unwrap_or_default()
}

/// Map an extension (with or without a leading dot, any case) to its category.
///
/// Never fails: unmatched input yields [`FileCategory::Unknown`].
pub fn classify(extension: &str) -> FileCategory {
    let ext = normalize_extension(extension);
    EXTENSION_TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, c)| *c)
        .unwrap_or(FileCategory::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_extensions_classify() {
        let cases = [
            ("pdf", FileCategory::Pdf),
            ("docx", FileCategory::Document),
            ("txt", FileCategory::Document),
            ("jpg", FileCategory::Image),
            ("jpeg", FileCategory::Image),
            ("png", FileCategory::Image),
            ("gif", FileCategory::Image),
            ("bmp", FileCategory::Image),
            ("tiff", FileCategory::Image),
            ("mp3", FileCategory::Audio),
            ("wav", FileCategory::Audio),
            ("ogg", FileCategory::Audio),
            ("flac", FileCategory::Audio),
            ("m4a", FileCategory::Audio),
            ("aac", FileCategory::Audio),
            ("mp4", FileCategory::Video),
            ("avi", FileCategory::Video),
            ("mov", FileCategory::Video),
            ("wmv", FileCategory::Video),
            ("flv", FileCategory::Video),
            ("webm", FileCategory::Video),
        ];
        for (ext, expected) in cases {
            assert_eq!(classify(ext), expected, "extension {ext}");
        }
    }

    #[test]
    fn case_and_leading_dot_are_ignored() {
        assert_eq!(classify(".PDF"), FileCategory::Pdf);
        assert_eq!(classify("Mp3"), FileCategory::Audio);
        assert_eq!(classify(" .JpEg "), FileCategory::Image);
    }

    #[test]
    fn unmapped_extensions_are_unknown() {
        for ext in ["", ".", "exe", "doc", "tar.gz", "mkv", "..pdf", "pdfx"] {
            assert_eq!(classify(ext), FileCategory::Unknown, "extension {ext:?}");
        }
    }

    #[test]
    fn from_path_uses_last_extension() {
        assert_eq!(
            FileCategory::from_path(Path::new("/tmp/report.final.PDF")),
            FileCategory::Pdf
        );
        assert_eq!(
            FileCategory::from_path(Path::new("/tmp/README")),
            FileCategory::Unknown
        );
    }

    #[test]
    fn extensions_round_trip_through_classify() {
        for category in FileCategory::SUPPORTED {
            for ext in category.extensions() {
                assert_eq!(classify(ext), category);
            }
        }
        assert!(FileCategory::Unknown.extensions().is_empty());
    }

    #[test]
    fn display_and_parse() {
        assert_eq!(FileCategory::Document.to_string(), "document");
        assert_eq!("AUDIO".parse::<FileCategory>(), Ok(FileCategory::Audio));
        assert!("spreadsheet".parse::<FileCategory>().is_err());
    }

    #[test]
    fn extension_of_file_name() {
        assert_eq!(extension_of("clip.MP4"), "mp4");
        assert_eq!(extension_of("noext"), "");
    }
}
