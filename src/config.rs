//! Configuration for the conversion service.
//!
//! Everything the service needs to start is carried by [`ServiceConfig`],
//! built via [`ServiceConfig::builder()`] or loaded with
//! [`ServiceConfig::from_env()`]. External tool locations live in the nested
//! [`ToolConfig`] so the operation table can be built from a single value.
//!
//! # Design choice: builder over constructor
//! Most deployments change two or three fields (directories, bind address).
//! The builder lets callers set only those and rely on documented defaults
//! for the rest, and `build()` is the single place invariants are checked.

use crate::category::{classify, normalize_extension, FileCategory};
use crate::error::ConvertError;
use crate::validate::SizeLimits;
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const MB: u64 = 1024 * 1024;

/// Extensions accepted at upload time by default. wmv, flv and webm classify
/// as video but are not accepted unless configured.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "txt", "jpg", "jpeg", "png", "gif", "bmp", "tiff", "mp3", "wav", "ogg", "flac",
    "m4a", "aac", "mp4", "avi", "mov",
];

/// Tesseract language packs the OCR operation may be pointed at.
pub const SUPPORTED_OCR_LANGUAGES: &[&str] = &[
    "eng", "fra", "deu", "spa", "ita", "por", "rus", "chi_sim", "chi_tra", "jpn", "kor",
];

/// Languages accepted by the speech engines.
pub const SUPPORTED_TTS_LANGUAGES: &[&str] =
    &["en", "fr", "de", "es", "it", "pt", "ru", "zh", "ja", "ko"];

/// Google translate TTS endpoint used by the `gtts` engine.
pub const DEFAULT_TTS_ENDPOINT: &str = "https://translate.google.com/translate_tts";

// ── Tools ────────────────────────────────────────────────────────────────

/// Locations of external binaries and engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    /// ffmpeg binary. Default: `ffmpeg` on PATH.
    pub ffmpeg: PathBuf,
    /// tesseract binary. Default: `tesseract` on PATH.
    pub tesseract: PathBuf,
    /// espeak-ng binary for the offline speech engine. Default: `espeak-ng`.
    pub espeak: PathBuf,
    /// whisper.cpp CLI. Default: `whisper-cli`.
    pub whisper: PathBuf,
    /// ggml model passed to whisper. `audio_to_text` fails clearly without one.
    pub whisper_model: Option<PathBuf>,
    /// Directory holding libpdfium. `None` binds the system library.
    pub pdfium_lib_dir: Option<PathBuf>,
    /// Default OCR language. Default: `eng`.
    pub ocr_language: String,
    /// Speech language. Default: `en`.
    pub tts_language: String,
    /// Online TTS endpoint.
    pub tts_endpoint: String,
    /// Per-request timeout for the online TTS engine. Default: 30 s.
    pub tts_timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            tesseract: "tesseract".into(),
            espeak: "espeak-ng".into(),
            whisper: "whisper-cli".into(),
            whisper_model: None,
            pdfium_lib_dir: None,
            ocr_language: "eng".into(),
            tts_language: "en".into(),
            tts_endpoint: DEFAULT_TTS_ENDPOINT.into(),
            tts_timeout: Duration::from_secs(30),
        }
    }
}

// ── Service ──────────────────────────────────────────────────────────────

/// Configuration for a [`crate::ConversionService`].
///
/// # Example
/// ```rust
/// use edgequake_convert::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .upload_dir("/tmp/convert/uploads")
///     .download_dir("/tmp/convert/downloads")
///     .retention(Duration::from_secs(600))
///     .build()
///     .unwrap();
/// assert_eq!(config.retention, Duration::from_secs(600));
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Where uploads are stored while they wait for conversion. Default: `static/uploads`.
    pub upload_dir: PathBuf,

    /// Where artifacts are written and served from. Default: `downloads`.
    pub download_dir: PathBuf,

    /// Root for scratch files (probes, intermediate WAVs). Default: system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Extensions accepted at upload time, lowercase without dot.
    ///
    /// This is a narrower gate than the classifier: an extension must be both
    /// listed here and classifiable to be accepted.
    pub allowed_extensions: BTreeSet<String>,

    /// Per-category size ceilings.
    pub size_limits: SizeLimits,

    /// Upper bound on an HTTP request body. Default: 200 MB.
    pub max_upload_bytes: u64,

    /// Age after which uploads, scratch files and artifacts are swept. Default: 1 hour.
    pub retention: Duration,

    /// HTTP listen address. Default: `127.0.0.1:5000`.
    pub bind_addr: SocketAddr,

    /// Append-only journal file. `None` keeps the journal on the console only.
    pub journal_path: Option<PathBuf>,

    /// Refuse to start when an allowed conversion has no operation wired.
    /// Default: false (routing gaps are logged and reported per request).
    pub strict_routing: bool,

    /// External tools and engine settings.
    pub tools: ToolConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("static/uploads"),
            download_dir: PathBuf::from("downloads"),
            temp_dir: None,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            size_limits: SizeLimits::default(),
            max_upload_bytes: 200 * MB,
            retention: Duration::from_secs(3600),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            journal_path: Some(PathBuf::from("conversion.log")),
            strict_routing: false,
            tools: ToolConfig::default(),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("upload_dir", &self.upload_dir)
            .field("download_dir", &self.download_dir)
            .field("temp_dir", &self.temp_dir)
            .field("allowed_extensions", &self.allowed_extensions.len())
            .field("size_limits", &self.size_limits)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("retention", &self.retention)
            .field("bind_addr", &self.bind_addr)
            .field("journal_path", &self.journal_path)
            .field("strict_routing", &self.strict_routing)
            .field("ocr_language", &self.tools.ocr_language)
            .field("tts_language", &self.tools.tts_language)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overridden by `CONVERT_*` environment variables.
    pub fn from_env() -> Result<Self, ConvertError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConvertError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut b = Self::builder();

        if let Some(v) = get("CONVERT_UPLOAD_DIR") {
            b = b.upload_dir(v);
        }
        if let Some(v) = get("CONVERT_DOWNLOAD_DIR") {
            b = b.download_dir(v);
        }
        if let Some(v) = get("CONVERT_TEMP_DIR") {
            b = b.temp_dir(v);
        }
        if let Some(v) = get("CONVERT_ALLOWED_EXTENSIONS") {
            b = b.allowed_extensions(v.split(','));
        }
        for category in FileCategory::SUPPORTED {
            let key = format!("CONVERT_MAX_{}_MB", category.as_str().to_ascii_uppercase());
            if let Some(v) = get(&key) {
                b = b.size_limit(category, parse_megabytes(&key, &v)?);
            }
        }
        if let Some(v) = get("CONVERT_MAX_UPLOAD_MB") {
            b = b.max_upload_bytes(parse_megabytes("CONVERT_MAX_UPLOAD_MB", &v)?);
        }
        if let Some(v) = get("CONVERT_RETENTION_SECS") {
            b = b.retention(Duration::from_secs(parse_env("CONVERT_RETENTION_SECS", &v)?));
        }
        if let Some(v) = get("CONVERT_BIND") {
            b = b.bind_addr(parse_env("CONVERT_BIND", &v)?);
        }
        if let Some(v) = get("CONVERT_JOURNAL") {
            b = match v.trim().to_ascii_lowercase().as_str() {
                "off" | "none" | "-" => b.no_journal(),
                _ => b.journal_path(v),
            };
        }
        if let Some(v) = get("CONVERT_STRICT_ROUTING") {
            b = b.strict_routing(parse_bool("CONVERT_STRICT_ROUTING", &v)?);
        }

        let mut tools = ToolConfig::default();
        if let Some(v) = get("CONVERT_FFMPEG") {
            tools.ffmpeg = v.into();
        }
        if let Some(v) = get("CONVERT_TESSERACT") {
            tools.tesseract = v.into();
        }
        if let Some(v) = get("CONVERT_ESPEAK") {
            tools.espeak = v.into();
        }
        if let Some(v) = get("CONVERT_WHISPER") {
            tools.whisper = v.into();
        }
        tools.whisper_model = get("CONVERT_WHISPER_MODEL").map(PathBuf::from);
        tools.pdfium_lib_dir = get("PDFIUM_LIB_PATH").map(PathBuf::from);
        if let Some(v) = get("CONVERT_OCR_LANG") {
            tools.ocr_language = v.trim().to_string();
        }
        if let Some(v) = get("CONVERT_TTS_LANG") {
            tools.tts_language = v.trim().to_string();
        }
        if let Some(v) = get("CONVERT_TTS_ENDPOINT") {
            tools.tts_endpoint = v.trim().to_string();
        }

        b.tools(tools).build()
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConvertError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConvertError::InvalidConfig(format!("{key}='{value}': {e}")))
}

/// Parse a megabyte count and convert it to bytes.
fn parse_megabytes(key: &str, value: &str) -> Result<u64, ConvertError> {
    parse_env::<u64>(key, value)?
        .checked_mul(MB)
        .ok_or_else(|| ConvertError::InvalidConfig(format!("{key}='{value}': too large")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConvertError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConvertError::InvalidConfig(format!(
            "{key}='{value}' is not a boolean"
        ))),
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_dir = dir.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    /// Replace the allowed extension set. Entries are normalised
    /// (lowercase, leading dot stripped); blanks are ignored.
    pub fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn size_limits(mut self, limits: SizeLimits) -> Self {
        self.config.size_limits = limits;
        self
    }

    pub fn size_limit(mut self, category: FileCategory, bytes: u64) -> Self {
        self.config.size_limits.set_limit(category, bytes);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.journal_path = Some(path.into());
        self
    }

    pub fn no_journal(mut self) -> Self {
        self.config.journal_path = None;
        self
    }

    pub fn strict_routing(mut self, strict: bool) -> Self {
        self.config.strict_routing = strict;
        self
    }

    pub fn tools(mut self, tools: ToolConfig) -> Self {
        self.config.tools = tools;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ConvertError> {
        let c = &self.config;

        for category in FileCategory::SUPPORTED {
            if c.size_limits.limit_for(category) == Some(0) {
                return Err(ConvertError::InvalidConfig(format!(
                    "Size limit for {category} must be greater than zero"
                )));
            }
        }
        if c.max_upload_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_upload_bytes must be greater than zero".into(),
            ));
        }
        if c.retention.is_zero() {
            return Err(ConvertError::InvalidConfig(
                "Retention must be greater than zero".into(),
            ));
        }
        if c.allowed_extensions.is_empty() {
            return Err(ConvertError::InvalidConfig(
                "At least one allowed extension is required".into(),
            ));
        }
        if let Some(ext) = c
            .allowed_extensions
            .iter()
            .find(|e| classify(e) == FileCategory::Unknown)
        {
            return Err(ConvertError::InvalidConfig(format!(
                "Allowed extension '.{ext}' does not map to any file category"
            )));
        }
        if !SUPPORTED_OCR_LANGUAGES.contains(&c.tools.ocr_language.as_str()) {
            return Err(ConvertError::InvalidConfig(format!(
                "OCR language '{}' is not one of: {}",
                c.tools.ocr_language,
                SUPPORTED_OCR_LANGUAGES.join(", ")
            )));
        }
        if !SUPPORTED_TTS_LANGUAGES.contains(&c.tools.tts_language.as_str()) {
            return Err(ConvertError::InvalidConfig(format!(
                "TTS language '{}' is not one of: {}",
                c.tools.tts_language,
                SUPPORTED_TTS_LANGUAGES.join(", ")
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_build() {
        let config = ServiceConfig::builder().build().unwrap();
        assert_eq!(config.upload_dir, PathBuf::from("static/uploads"));
        assert_eq!(config.bind_addr.port(), 5000);
        assert!(config.allowed_extensions.contains("mp4"));
        assert!(!config.allowed_extensions.contains("webm"));
        assert_eq!(config.size_limits.pdf, 50 * MB);
    }

    #[test]
    fn extensions_are_normalised() {
        let config = ServiceConfig::builder()
            .allowed_extensions([".PDF", " txt ", ""])
            .build()
            .unwrap();
        assert_eq!(
            config.allowed_extensions.iter().collect::<Vec<_>>(),
            vec!["pdf", "txt"]
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = ServiceConfig::builder()
            .allowed_extensions(["pdf", "exe"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains(".exe"), "got: {err}");
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(ServiceConfig::builder()
            .size_limit(FileCategory::Image, 0)
            .build()
            .is_err());
        assert!(ServiceConfig::builder()
            .retention(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn unsupported_languages_are_rejected() {
        let tools = ToolConfig {
            ocr_language: "klingon".into(),
            ..ToolConfig::default()
        };
        let err = ServiceConfig::builder().tools(tools).build().unwrap_err();
        assert!(err.to_string().contains("OCR language"), "got: {err}");
    }

    #[test]
    fn environment_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("CONVERT_UPLOAD_DIR", "/srv/up"),
            ("CONVERT_MAX_IMAGE_MB", "5"),
            ("CONVERT_RETENTION_SECS", "120"),
            ("CONVERT_BIND", "0.0.0.0:8080"),
            ("CONVERT_JOURNAL", "off"),
            ("CONVERT_STRICT_ROUTING", "yes"),
            ("CONVERT_WHISPER_MODEL", "/models/base.bin"),
            ("CONVERT_OCR_LANG", "fra"),
        ]))
        .unwrap();
        assert_eq!(config.upload_dir, PathBuf::from("/srv/up"));
        assert_eq!(config.size_limits.image, 5 * MB);
        assert_eq!(config.retention, Duration::from_secs(120));
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.journal_path, None);
        assert!(config.strict_routing);
        assert_eq!(config.tools.whisper_model, Some(PathBuf::from("/models/base.bin")));
        assert_eq!(config.tools.ocr_language, "fra");
    }

    #[test]
    fn malformed_environment_names_the_variable() {
        let err = ServiceConfig::from_lookup(lookup(&[("CONVERT_MAX_PDF_MB", "lots")])).unwrap_err();
        assert!(err.to_string().contains("CONVERT_MAX_PDF_MB"), "got: {err}");
    }

    #[test]
    fn megabyte_overflow_is_invalid_config() {
        for key in ["CONVERT_MAX_IMAGE_MB", "CONVERT_MAX_UPLOAD_MB"] {
            let err = ServiceConfig::from_lookup(lookup(&[(key, "18446744073709551615")]))
                .unwrap_err();
            assert!(matches!(err, ConvertError::InvalidConfig(_)), "{key}: {err:?}");
            assert!(err.to_string().contains(key), "got: {err}");
        }
    }
}
