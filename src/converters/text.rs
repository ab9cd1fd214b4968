//! Plain-text and DOCX conversions, and text-to-speech.

use crate::converters::pdf::{split_paragraphs, truncate_for_speech, SPEECH_CHAR_LIMIT};
use crate::converters::speech::{SpeechSynth, TtsEngine};
use crate::converters::{docx, ensure_parent, failed, Parameters};
use crate::error::OperationError;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TextConverter {
    speech: SpeechSynth,
}

impl TextConverter {
    pub fn new(speech: SpeechSynth) -> Self {
        Self { speech }
    }

    /// `text_to_audio`.
    pub fn to_audio(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            let text = read_utf8(input)?;
            if text.trim().is_empty() {
                return Err(OperationError::failed("No text content found in file"));
            }
            let engine: TtsEngine = params.text_or("tts_engine", "gtts").parse()?;
            let text = truncate_for_speech(&text, SPEECH_CHAR_LIMIT);
            ensure_parent(output)?;
            self.speech.synthesize(&text, output, engine)?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Text to audio conversion", e))
    }

    /// `txt_to_docx`: one paragraph per blank-line separated block.
    pub fn txt_to_docx(&self, input: &Path, output: &Path) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            let text = read_utf8(input)?;
            ensure_parent(output)?;
            docx::write_paragraphs(output, &split_paragraphs(&text))?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("TXT to DOCX conversion", e))
    }

    /// `docx_to_txt`.
    pub fn docx_to_txt(&self, input: &Path, output: &Path) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            let text = docx::read_text(input)?;
            ensure_parent(output)?;
            std::fs::write(output, text)
                .map_err(|e| OperationError::io(format!("write {}", output.display()), e))?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("DOCX to TXT conversion", e))
    }
}

/// Read a text file, replacing invalid UTF-8 rather than failing.
fn read_utf8(path: &Path) -> Result<String, OperationError> {
    let bytes =
        std::fs::read(path).map_err(|e| OperationError::io(format!("read {}", path.display()), e))?;
    Ok(String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn converter() -> TextConverter {
        TextConverter::new(SpeechSynth {
            language: "en".into(),
            endpoint: "http://127.0.0.1:9/unreachable".into(),
            timeout: Duration::from_millis(200),
            espeak: "/definitely/not/here/espeak-ng".into(),
            ffmpeg: "/definitely/not/here/ffmpeg".into(),
        })
    }

    #[test]
    fn txt_round_trips_through_docx() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "  Heading  \n\n\nBody one\nline two\n\n   \n\nLast").unwrap();

        let docx_path = dir.path().join("notes.docx");
        converter().txt_to_docx(&txt, &docx_path).unwrap();

        let back = dir.path().join("back.txt");
        converter().docx_to_txt(&docx_path, &back).unwrap();
        assert_eq!(
            std::fs::read_to_string(back).unwrap(),
            "Heading\nBody one\nline two\nLast\n"
        );
    }

    #[test]
    fn empty_text_is_rejected_before_speaking() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("blank.txt");
        std::fs::write(&txt, " \n\t").unwrap();
        let err = converter()
            .to_audio(&txt, &dir.path().join("blank.mp3"), &Parameters::new())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Text to audio conversion failed: No text content found in file"
        );
    }

    #[test]
    fn unknown_engine_is_reported() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("t.txt");
        std::fs::write(&txt, "hello").unwrap();
        let err = converter()
            .to_audio(
                &txt,
                &dir.path().join("t.mp3"),
                &Parameters::new().with("tts_engine", "festival"),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Text to audio conversion failed: Unsupported TTS engine: festival"
        );
    }

    #[test]
    fn offline_engine_without_espeak_is_tool_missing() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("t.txt");
        std::fs::write(&txt, "hello").unwrap();
        let err = converter()
            .to_audio(
                &txt,
                &dir.path().join("t.mp3"),
                &Parameters::new().with("tts_engine", "pyttsx3"),
            )
            .unwrap_err();
        assert!(err.to_string().contains("espeak-ng"), "got: {err}");
    }

    #[test]
    fn docx_to_txt_rejects_plain_text() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join("fake.docx");
        std::fs::write(&fake, "not a zip").unwrap();
        let err = converter()
            .docx_to_txt(&fake, &dir.path().join("fake.txt"))
            .unwrap_err();
        assert!(err.to_string().starts_with("DOCX to TXT conversion failed"));
    }
}
