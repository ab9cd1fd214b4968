//! The operation table: (category, conversion type) → operation + output name.
//!
//! The allow-list in [`crate::validate`] says which conversions are legal; this
//! table says which ones are wired. The two are kept separate on purpose so a
//! drift between them is observable: [`OperationTable::routing_gaps`] lists
//! every allowed conversion with no operation, and the dispatcher reports a
//! [`crate::ConvertError::RoutingGap`] for it instead of doing nothing.

use crate::category::{normalize_extension, FileCategory};
use crate::config::ServiceConfig;
use crate::converters::audio::AudioConverter;
use crate::converters::image::ImageConverter;
use crate::converters::pdf::{PdfConverter, PdfiumBinding};
use crate::converters::speech::SpeechSynth;
use crate::converters::text::TextConverter;
use crate::converters::{ConverterOperation, Parameters};
use crate::error::OperationError;
use crate::validate::ALLOW_LIST;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const IMAGE_TARGET_FORMATS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff"];
pub const AUDIO_TARGET_FORMATS: &[&str] = &["mp3", "wav", "ogg", "flac", "m4a", "aac"];

// ── Output naming ────────────────────────────────────────────────────────

/// How a conversion names its artifact from the upload's base name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputNaming {
    /// `{base}{suffix}.{extension}`.
    Fixed {
        suffix: &'static str,
        extension: &'static str,
    },
    /// `{base}{suffix}.{fmt}` where `fmt` is the first of `params` present,
    /// else `default`, and must be one of `allowed`.
    TargetFormat {
        suffix: &'static str,
        params: &'static [&'static str],
        default: &'static str,
        allowed: &'static [&'static str],
    },
}

impl OutputNaming {
    pub const fn fixed(suffix: &'static str, extension: &'static str) -> Self {
        OutputNaming::Fixed { suffix, extension }
    }

    /// Artifact file name for an upload whose stem is `base`.
    ///
    /// A target format outside the allowed set is an
    /// [`OperationError::InvalidParameter`]; nothing from `params` ever reaches
    /// the file name unchecked.
    pub fn file_name(&self, base: &str, params: &Parameters) -> Result<String, OperationError> {
        match *self {
            OutputNaming::Fixed { suffix, extension } => Ok(format!("{base}{suffix}.{extension}")),
            OutputNaming::TargetFormat {
                suffix,
                params: names,
                default,
                allowed,
            } => {
                let format = params
                    .text_any(names)
                    .map(|f| normalize_extension(&f))
                    .unwrap_or_else(|| default.to_string());
                if !allowed.contains(&format.as_str()) {
                    return Err(OperationError::invalid_parameter(
                        names.first().copied().unwrap_or("target_format"),
                        format!("'{format}' is not one of {}", allowed.join(", ")),
                    ));
                }
                Ok(format!("{base}{suffix}.{format}"))
            }
        }
    }
}

// ── Table ────────────────────────────────────────────────────────────────

/// A wired conversion.
#[derive(Clone)]
pub struct Route {
    pub operation: Arc<dyn ConverterOperation>,
    pub naming: OutputNaming,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("operation", &"<dyn ConverterOperation>")
            .field("naming", &self.naming)
            .finish()
    }
}

/// Lookup table from (category, conversion type) to [`Route`].
#[derive(Debug, Clone, Default)]
pub struct OperationTable {
    routes: HashMap<FileCategory, HashMap<String, Route>>,
}

impl OperationTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire `operation` for (`category`, `conversion_type`), replacing any
    /// previous route.
    pub fn register<O>(
        &mut self,
        category: FileCategory,
        conversion_type: impl Into<String>,
        naming: OutputNaming,
        operation: O,
    ) -> &mut Self
    where
        O: ConverterOperation + 'static,
    {
        self.register_arc(category, conversion_type, naming, Arc::new(operation))
    }

    pub fn register_arc(
        &mut self,
        category: FileCategory,
        conversion_type: impl Into<String>,
        naming: OutputNaming,
        operation: Arc<dyn ConverterOperation>,
    ) -> &mut Self {
        self.routes
            .entry(category)
            .or_default()
            .insert(conversion_type.into(), Route { operation, naming });
        self
    }

    pub fn resolve(&self, category: FileCategory, conversion_type: &str) -> Option<Route> {
        self.routes
            .get(&category)
            .and_then(|m| m.get(conversion_type))
            .cloned()
    }

    pub fn is_wired(&self, category: FileCategory, conversion_type: &str) -> bool {
        self.routes
            .get(&category)
            .is_some_and(|m| m.contains_key(conversion_type))
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allowed conversions with no operation wired, in allow-list order.
    pub fn routing_gaps(&self) -> Vec<(FileCategory, &'static str)> {
        ALLOW_LIST
            .iter()
            .flat_map(|(category, types)| types.iter().map(move |t| (*category, *t)))
            .filter(|(category, t)| !self.is_wired(*category, t))
            .collect()
    }

    /// Every converter operation, wired to the tools in `config`.
    pub fn standard(config: &ServiceConfig) -> Self {
        let tools = &config.tools;
        let pdfium = PdfiumBinding::new(tools.pdfium_lib_dir.clone());
        let speech = SpeechSynth {
            language: tools.tts_language.clone(),
            endpoint: tools.tts_endpoint.clone(),
            timeout: tools.tts_timeout,
            espeak: tools.espeak.clone(),
            ffmpeg: tools.ffmpeg.clone(),
        };

        let pdf = Arc::new(PdfConverter::new(pdfium.clone(), speech.clone()));
        let text = Arc::new(TextConverter::new(speech));
        let image = Arc::new(ImageConverter::new(
            pdfium,
            tools.tesseract.clone(),
            tools.ocr_language.clone(),
        ));
        let audio = Arc::new(AudioConverter::new(
            tools.ffmpeg.clone(),
            tools.whisper.clone(),
            tools.whisper_model.clone(),
        ));

        use FileCategory::*;
        use OutputNaming as N;
        let mut t = Self::new();

        t.register(Pdf, "pdf_to_docx", N::fixed("", "docx"), bind(&pdf, |c, i, o, _| c.to_docx(i, o)))
            .register(Pdf, "pdf_to_txt", N::fixed("", "txt"), bind(&pdf, |c, i, o, _| c.to_txt(i, o)))
            .register(Pdf, "pdf_to_audio", N::fixed("", "mp3"), bind(&pdf, |c, i, o, p| c.to_audio(i, o, p)));

        t.register(Document, "text_to_audio", N::fixed("", "mp3"), bind(&text, |c, i, o, p| c.to_audio(i, o, p)))
            .register(Document, "txt_to_docx", N::fixed("", "docx"), bind(&text, |c, i, o, _| c.txt_to_docx(i, o)))
            .register(Document, "docx_to_txt", N::fixed("", "txt"), bind(&text, |c, i, o, _| c.docx_to_txt(i, o)));

        t.register(Image, "image_to_pdf", N::fixed("", "pdf"), bind(&image, |c, i, o, _| c.to_pdf(i, o)))
            .register(Image, "image_to_text", N::fixed("", "txt"), bind(&image, |c, i, o, p| c.to_text(i, o, p)))
            .register(Image, "image_resize", N::fixed("_resized", "jpg"), bind(&image, |c, i, o, p| c.resize(i, o, p)))
            .register(
                Image,
                "image_format",
                N::TargetFormat {
                    suffix: "",
                    params: &["target_format"],
                    default: "jpg",
                    allowed: IMAGE_TARGET_FORMATS,
                },
                bind(&image, |c, i, o, _| c.convert_format(i, o)),
            )
            .register(Image, "image_compress", N::fixed("_compressed", "jpg"), bind(&image, |c, i, o, p| c.compress(i, o, p)))
            .register(Image, "image_filter", N::fixed("_filtered", "jpg"), bind(&image, |c, i, o, p| c.filter(i, o, p)))
            .register(Image, "image_rotate", N::fixed("_rotated", "jpg"), bind(&image, |c, i, o, p| c.rotate(i, o, p)));

        t.register(Audio, "audio_to_text", N::fixed("", "txt"), bind(&audio, |c, i, o, _| c.to_text(i, o)))
            .register(
                Audio,
                "audio_format",
                N::TargetFormat {
                    suffix: "",
                    params: &["target_format"],
                    default: "mp3",
                    allowed: AUDIO_TARGET_FORMATS,
                },
                bind(&audio, |c, i, o, _| c.convert_format(i, o)),
            )
            .register(Audio, "audio_compress", N::fixed("_compressed", "mp3"), bind(&audio, |c, i, o, p| c.compress(i, o, p)))
            .register(Audio, "audio_normalize", N::fixed("_normalized", "mp3"), bind(&audio, |c, i, o, _| c.normalize(i, o)))
            .register(Audio, "audio_trim", N::fixed("_trimmed", "mp3"), bind(&audio, |c, i, o, p| c.trim(i, o, p)))
            .register(Audio, "audio_speed", N::fixed("_speed", "mp3"), bind(&audio, |c, i, o, p| c.change_speed(i, o, p)));

        t.register(
            Video,
            "video_to_audio",
            N::TargetFormat {
                suffix: "",
                params: &["target_format", "audio_format"],
                default: "mp3",
                allowed: AUDIO_TARGET_FORMATS,
            },
            bind(&audio, |c, i, o, _| c.extract_from_video(i, o)),
        );

        t
    }
}

type Method<C> = fn(&C, &Path, &Path, &Parameters) -> Result<PathBuf, OperationError>;

/// Adapt a converter method into a standalone operation sharing `converter`.
fn bind<C>(converter: &Arc<C>, method: Method<C>) -> impl ConverterOperation + 'static
where
    C: Send + Sync + 'static,
{
    let converter = Arc::clone(converter);
    move |input: &Path, output: &Path, params: &Parameters| method(&converter, input, output, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::supported_conversions;

    #[test]
    fn fixed_names() {
        let p = Parameters::new();
        assert_eq!(N::fixed("", "docx").file_name("report", &p).unwrap(), "report.docx");
        assert_eq!(
            N::fixed("_compressed", "mp3").file_name("song", &p).unwrap(),
            "song_compressed.mp3"
        );
    }

    use OutputNaming as N;

    fn video_naming() -> OutputNaming {
        N::TargetFormat {
            suffix: "",
            params: &["target_format", "audio_format"],
            default: "mp3",
            allowed: AUDIO_TARGET_FORMATS,
        }
    }

    #[test]
    fn target_format_names() {
        let naming = video_naming();
        assert_eq!(naming.file_name("clip", &Parameters::new()).unwrap(), "clip.mp3");
        assert_eq!(
            naming
                .file_name("clip", &Parameters::new().with("audio_format", "WAV"))
                .unwrap(),
            "clip.wav"
        );
        assert_eq!(
            naming
                .file_name(
                    "clip",
                    &Parameters::new()
                        .with("target_format", ".ogg")
                        .with("audio_format", "wav")
                )
                .unwrap(),
            "clip.ogg"
        );
    }

    #[test]
    fn target_format_cannot_escape() {
        let err = video_naming()
            .file_name("clip", &Parameters::new().with("target_format", "../../etc/passwd"))
            .unwrap_err();
        assert!(matches!(err, OperationError::InvalidParameter { .. }));
    }

    #[test]
    fn standard_table_leaves_exactly_two_gaps() {
        let table = OperationTable::standard(&ServiceConfig::default());
        assert_eq!(
            table.routing_gaps(),
            vec![
                (FileCategory::Image, "image_collage"),
                (FileCategory::Audio, "audio_merge"),
            ]
        );
    }

    #[test]
    fn every_wired_route_is_allowed() {
        let table = OperationTable::standard(&ServiceConfig::default());
        for (category, routes) in &table.routes {
            for name in routes.keys() {
                assert!(
                    supported_conversions(*category).contains(&name.as_str()),
                    "{category}/{name} wired but not allowed"
                );
            }
        }
        assert_eq!(table.len(), 20);
    }

    #[test]
    fn register_replaces_and_resolves() {
        let mut table = OperationTable::new();
        assert!(table.is_empty());
        table.register(
            FileCategory::Document,
            "txt_to_docx",
            N::fixed("", "docx"),
            |_: &Path, out: &Path, _: &Parameters| -> Result<PathBuf, OperationError> {
                Ok(out.to_path_buf())
            },
        );
        let route = table.resolve(FileCategory::Document, "txt_to_docx").unwrap();
        assert_eq!(route.naming, N::fixed("", "docx"));
        assert!(table.resolve(FileCategory::Pdf, "txt_to_docx").is_none());
    }
}
