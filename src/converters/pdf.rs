//! PDF conversions via pdfium: text extraction feeding txt, docx and speech.
//!
//! ## Why bind per operation?
//!
//! pdfium keeps global state and is only safe behind the `thread_safe`
//! feature's global lock. Binding inside each blocking call (as opposed to a
//! long-lived `Pdfium` in shared state) keeps the handle on the thread that
//! uses it and lets a missing library surface as an ordinary operation error
//! instead of failing service start-up for conversions that never touch PDF.

use crate::converters::speech::{SpeechSynth, TtsEngine};
use crate::converters::{docx, ensure_parent, failed, Parameters};
use crate::error::OperationError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Characters spoken by `pdf_to_audio` before truncation.
pub const SPEECH_CHAR_LIMIT: usize = 4500;

/// Locates and binds the pdfium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBinding {
    /// Directory holding libpdfium; `None` binds the system library.
    pub lib_dir: Option<PathBuf>,
}

impl PdfiumBinding {
    pub fn new(lib_dir: Option<PathBuf>) -> Self {
        Self { lib_dir }
    }

    pub fn bind(&self) -> Result<Pdfium, OperationError> {
        let bindings = match &self.lib_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| OperationError::Pdf {
            context: "Failed to bind to pdfium library (set PDFIUM_LIB_PATH to the directory containing libpdfium)".into(),
            detail: format!("{e:?}"),
        })?;
        Ok(Pdfium::new(bindings))
    }
}

/// PDF → text, docx and audio.
#[derive(Debug, Clone)]
pub struct PdfConverter {
    pdfium: PdfiumBinding,
    speech: SpeechSynth,
}

impl PdfConverter {
    pub fn new(pdfium: PdfiumBinding, speech: SpeechSynth) -> Self {
        Self { pdfium, speech }
    }

    /// Text of every page, in order.
    pub fn extract_pages(&self, pdf_path: &Path) -> Result<Vec<String>, OperationError> {
        let pdfium = self.pdfium.bind()?;
        let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
            let detail = format!("{e:?}");
            let context = if detail.to_ascii_lowercase().contains("password") {
                "PDF is encrypted and requires a password"
            } else {
                "PDF could not be opened"
            };
            OperationError::Pdf {
                context: context.into(),
                detail,
            }
        })?;

        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let mut texts = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let text = page
                .text()
                .map_err(|e| OperationError::Pdf {
                    context: format!("Text extraction failed for page {}", idx + 1),
                    detail: format!("{e:?}"),
                })?
                .all();
            debug!("Page {} → {} chars", idx + 1, text.len());
            texts.push(text);
        }
        Ok(texts)
    }

    /// `pdf_to_txt`: pages separated by a blank line.
    pub fn to_txt(&self, input: &Path, output: &Path) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            let text = join_pages(&self.extract_pages(input)?, "\n\n");
            ensure_parent(output)?;
            std::fs::write(output, text)
                .map_err(|e| OperationError::io(format!("write {}", output.display()), e))?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("PDF to text conversion", e))
    }

    /// `pdf_to_docx`: blank-line separated blocks become paragraphs.
    pub fn to_docx(&self, input: &Path, output: &Path) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            let text = join_pages(&self.extract_pages(input)?, "\n\n");
            let paragraphs = split_paragraphs(&text);
            ensure_parent(output)?;
            docx::write_paragraphs(output, &paragraphs)?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("PDF to DOCX conversion", e))
    }

    /// `pdf_to_audio`: text joined with spaces, truncated, spoken.
    pub fn to_audio(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        let engine: TtsEngine = params.text_or("tts_engine", "gtts").parse()?;
        let run = || -> Result<PathBuf, OperationError> {
            let text = join_pages(&self.extract_pages(input)?, " ");
            if text.trim().is_empty() {
                return Err(OperationError::failed("No text found in PDF"));
            }
            let text = truncate_for_speech(&text, SPEECH_CHAR_LIMIT);
            ensure_parent(output)?;
            self.speech.synthesize(&text, output, engine)?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("PDF to audio conversion", e))
    }
}

/// Join non-empty page texts with `separator`.
fn join_pages(pages: &[String], separator: &str) -> String {
    pages
        .iter()
        .map(|p| p.trim_end())
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Split on blank lines, trimming each block and dropping empty ones.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep the first `limit` characters, marking the cut with "...".
pub fn truncate_for_speech(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
