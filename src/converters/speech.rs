//! Text-to-speech engines.
//!
//! * **gtts**: the Google Translate TTS endpoint. It accepts at most ~100
//!   characters per request, so text is split on whitespace into chunks and
//!   the returned MP3 segments are concatenated (MP3 frames are
//!   self-delimiting, so plain concatenation plays back as one stream).
//! * **espeak** (alias `pyttsx3`, the offline engine name clients already
//!   send): `espeak-ng` renders WAV, `ffmpeg` encodes MP3.

use crate::converters::tools::Tool;
use crate::error::OperationError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Longest chunk sent to the online engine.
const GTTS_CHUNK_CHARS: usize = 100;

/// Words per minute for the offline engine.
const ESPEAK_RATE: u32 = 150;

/// Available speech engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsEngine {
    /// Network-backed Google TTS.
    Gtts,
    /// Offline espeak-ng.
    Espeak,
}

impl FromStr for TtsEngine {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gtts" | "google" => Ok(TtsEngine::Gtts),
            "espeak" | "espeak-ng" | "pyttsx3" | "offline" => Ok(TtsEngine::Espeak),
            other => Err(OperationError::failed(format!(
                "Unsupported TTS engine: {other}"
            ))),
        }
    }
}

/// Speech synthesis settings shared by the PDF and text converters.
#[derive(Debug, Clone)]
pub struct SpeechSynth {
    pub language: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub espeak: PathBuf,
    pub ffmpeg: PathBuf,
}

impl SpeechSynth {
    /// Speak `text` into an MP3 at `output`.
    pub fn synthesize(
        &self,
        text: &str,
        output: &Path,
        engine: TtsEngine,
    ) -> Result<(), OperationError> {
        match engine {
            TtsEngine::Gtts => self.gtts(text, output),
            TtsEngine::Espeak => self.espeak(text, output),
        }
    }

    fn gtts(&self, text: &str, output: &Path) -> Result<(), OperationError> {
        let chunks = chunk_text(text, GTTS_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(OperationError::failed("No text to speak"));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("edgequake-convert/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OperationError::Http {
                context: "TTS client".into(),
                detail: e.to_string(),
            })?;

        let mut audio = Vec::new();
        let total = chunks.len().to_string();
        for (idx, chunk) in chunks.iter().enumerate() {
            let idx_s = idx.to_string();
            let len_s = chunk.chars().count().to_string();
            let response = client
                .get(&self.endpoint)
                .query(&[
                    ("ie", "UTF-8"),
                    ("client", "tw-ob"),
                    ("tl", self.language.as_str()),
                    ("q", chunk.as_str()),
                    ("total", total.as_str()),
                    ("idx", idx_s.as_str()),
                    ("textlen", len_s.as_str()),
                ])
                .send()
                .map_err(|e| OperationError::Http {
                    context: "TTS request".into(),
                    detail: e.to_string(),
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(OperationError::Http {
                    context: "TTS request".into(),
                    detail: format!("HTTP {status}"),
                });
            }
            let bytes = response.bytes().map_err(|e| OperationError::Http {
                context: "TTS response".into(),
                detail: e.to_string(),
            })?;
            audio.extend_from_slice(&bytes);
        }
        debug!("gTTS produced {} bytes from {} chunks", audio.len(), chunks.len());

        std::fs::write(output, audio)
            .map_err(|e| OperationError::io(format!("write {}", output.display()), e))
    }

    fn espeak(&self, text: &str, output: &Path) -> Result<(), OperationError> {
        let wav = tempfile::Builder::new()
            .prefix("converter_tts_")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| OperationError::io("create temp wav", e))?;

        let mut text_file = tempfile::NamedTempFile::new()
            .map_err(|e| OperationError::io("create temp text", e))?;
        text_file
            .write_all(text.as_bytes())
            .map_err(|e| OperationError::io("write temp text", e))?;

        Tool::new(&self.espeak, "offline speech synthesis")
            .arg("-v")
            .arg(&self.language)
            .arg("-s")
            .arg(ESPEAK_RATE.to_string())
            .arg("-w")
            .arg(wav.path())
            .arg("-f")
            .arg(text_file.path())
            .run()?;

        Tool::new(&self.ffmpeg, "MP3 encoding")
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(wav.path())
            .args(["-codec:a", "libmp3lame", "-b:a", "128k"])
            .arg(output)
            .run()?;
        // `wav` and `text_file` are deleted here.
        Ok(())
    }
}

/// Split `text` into chunks of at most `max_chars` characters, breaking on
/// whitespace. Words longer than `max_chars` are split hard.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word = word;
        loop {
            let word_len = word.chars().count();
            let needed = if current_len == 0 { word_len } else { current_len + 1 + word_len };
            if needed <= max_chars {
                if current_len > 0 {
                    current.push(' ');
                    current_len += 1;
                }
                current.push_str(word);
                current_len += word_len;
                break;
            }
            if current_len > 0 {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
                continue;
            }
            // Single word longer than a chunk.
            let split_at = word
                .char_indices()
                .nth(max_chars)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            chunks.push(word[..split_at].to_string());
            word = &word[split_at..];
            if word.is_empty() {
                break;
            }
        }
    }
    if current_len > 0 {
        chunks.push(current);
    }
    chunks
}
