//! Audio and video operations on top of `ffmpeg`, transcription via
//! `whisper-cli`.
//!
//! ## Why shell out?
//!
//! The corpus of formats we accept (mp3, m4a, aac, mp4, mov, ...) needs a full
//! demuxer/decoder/encoder stack. ffmpeg already is one, and every operation
//! here maps onto a single ffmpeg invocation with a filter or codec flag.

use crate::converters::tools::Tool;
use crate::converters::{ensure_parent, failed, Parameters};
use crate::error::OperationError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// ffmpeg's `atempo` accepts factors in this range per filter instance.
const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

/// EBU R128 target used by `audio_normalize`.
const LOUDNORM_FILTER: &str = "loudnorm=I=-16:TP=-1.5:LRA=11";

static BITRATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+k$").unwrap());

/// ffmpeg-backed audio operations.
#[derive(Debug, Clone)]
pub struct AudioConverter {
    ffmpeg: PathBuf,
    whisper: PathBuf,
    whisper_model: Option<PathBuf>,
}

impl AudioConverter {
    pub fn new(ffmpeg: PathBuf, whisper: PathBuf, whisper_model: Option<PathBuf>) -> Self {
        Self {
            ffmpeg,
            whisper,
            whisper_model,
        }
    }

    fn ffmpeg(&self, purpose: &str) -> Tool {
        Tool::new(&self.ffmpeg, purpose).args(["-y", "-hide_banner", "-loglevel", "error"])
    }

    /// `audio_format`: the container/codec follows the output extension.
    pub fn convert_format(&self, input: &Path, output: &Path) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            ensure_parent(output)?;
            self.ffmpeg("audio conversion")
                .arg("-i")
                .arg(input)
                .args(["-vn"])
                .args(codec_args(output))
                .arg(output)
                .run()?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Audio format conversion", e))
    }

    /// `audio_compress`: MP3 at `bitrate` (e.g. "64k").
    pub fn compress(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        let bitrate = params.text_or("bitrate", "64k").to_ascii_lowercase();
        if !BITRATE.is_match(&bitrate) {
            return Err(OperationError::invalid_parameter(
                "bitrate",
                format!("'{bitrate}' must look like 64k"),
            ));
        }
        let run = || -> Result<PathBuf, OperationError> {
            ensure_parent(output)?;
            self.ffmpeg("audio compression")
                .arg("-i")
                .arg(input)
                .args(["-vn", "-codec:a", "libmp3lame", "-b:a", bitrate.as_str()])
                .arg(output)
                .run()?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Audio compression", e))
    }

    /// `audio_normalize`: single-pass EBU R128 loudness normalisation.
    pub fn normalize(&self, input: &Path, output: &Path) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            ensure_parent(output)?;
            self.ffmpeg("audio normalization")
                .arg("-i")
                .arg(input)
                .args(["-vn", "-af", LOUDNORM_FILTER])
                .args(codec_args(output))
                .arg(output)
                .run()?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Audio normalization", e))
    }

    /// `audio_trim`: keep `[start_time, end_time)` seconds.
    pub fn trim(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        let start: f64 = params.parse_or("start_time", 0.0)?;
        let end: Option<f64> = params.parse_opt("end_time")?;
        if !start.is_finite() || start < 0.0 {
            return Err(OperationError::invalid_parameter(
                "start_time",
                format!("{start} must be a non-negative number of seconds"),
            ));
        }
        if let Some(end) = end {
            if !end.is_finite() || end <= start {
                return Err(OperationError::invalid_parameter(
                    "end_time",
                    format!("{end} must be after start_time ({start})"),
                ));
            }
        }
        let run = || -> Result<PathBuf, OperationError> {
            ensure_parent(output)?;
            let mut tool = self
                .ffmpeg("audio trimming")
                .arg("-i")
                .arg(input)
                .arg("-ss")
                .arg(seconds(start));
            if let Some(end) = end {
                tool = tool.arg("-to").arg(seconds(end));
            }
            tool.arg("-vn").args(codec_args(output)).arg(output).run()?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Audio trimming", e))
    }

    /// `audio_speed`: tempo change by `speed_factor` (> 0).
    pub fn change_speed(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        let factor: f64 = params.parse_or("speed_factor", 1.0)?;
        let filter = atempo_chain(factor)?;
        let run = || -> Result<PathBuf, OperationError> {
            ensure_parent(output)?;
            self.ffmpeg("audio speed change")
                .arg("-i")
                .arg(input)
                .args(["-vn", "-filter:a", filter.as_str()])
                .args(codec_args(output))
                .arg(output)
                .run()?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Audio speed change", e))
    }

    /// `video_to_audio`: drop the video stream, encode audio per the output
    /// extension.
    pub fn extract_from_video(&self, input: &Path, output: &Path) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            ensure_parent(output)?;
            self.ffmpeg("video to audio conversion")
                .arg("-i")
                .arg(input)
                .arg("-vn")
                .args(codec_args(output))
                .arg(output)
                .run()?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Audio extraction from video", e))
    }

    /// `audio_to_text`: resample to 16 kHz mono WAV, transcribe with whisper.
    pub fn to_text(&self, input: &Path, output: &Path) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            let model = self.whisper_model.as_ref().ok_or_else(|| {
                OperationError::failed(
                    "no speech recognition model configured (set CONVERT_WHISPER_MODEL to a ggml model file)",
                )
            })?;

            let wav = tempfile::Builder::new()
                .prefix("converter_stt_")
                .suffix(".wav")
                .tempfile()
                .map_err(|e| OperationError::io("create temp wav", e))?;
            self.ffmpeg("speech recognition preprocessing")
                .arg("-i")
                .arg(input)
                .args(["-vn", "-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le"])
                .arg(wav.path())
                .run()?;

            let out = Tool::new(&self.whisper, "speech recognition")
                .arg("-m")
                .arg(model)
                .arg("-f")
                .arg(wav.path())
                .args(["--no-timestamps", "--no-prints"])
                .run()?;
            let text = clean_transcript(&String::from_utf8_lossy(&out.stdout));
            debug!("Transcribed {} chars", text.len());
            let text = if text.is_empty() {
                "Could not understand the audio content.".to_string()
            } else {
                text
            };
            ensure_parent(output)?;
            std::fs::write(output, text)
                .map_err(|e| OperationError::io(format!("write {}", output.display()), e))?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Audio to text conversion", e))
    }
}

/// Encoder flags for the output extension. Formats not listed use ffmpeg's
/// default encoder for the container.
fn codec_args(output: &Path) -> Vec<&'static str> {
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => vec!["-codec:a", "libmp3lame", "-b:a", "128k"],
        "m4a" | "aac" => vec!["-codec:a", "aac", "-b:a", "128k"],
        "ogg" => vec!["-codec:a", "libvorbis"],
        "flac" => vec!["-codec:a", "flac"],
        "wav" => vec!["-codec:a", "pcm_s16le"],
        _ => Vec::new(),
    }
}

fn seconds(value: f64) -> String {
    format!("{value:.3}")
}

/// `atempo` filter chain realising `factor`, splitting it into stages that
/// each stay within ffmpeg's accepted range.
pub fn atempo_chain(factor: f64) -> Result<String, OperationError> {
    if !factor.is_finite() || factor <= 0.0 {
        return Err(OperationError::invalid_parameter(
            "speed_factor",
            format!("{factor} must be greater than zero"),
        ));
    }
    let mut stages = Vec::new();
    let mut remaining = factor;
    while remaining > ATEMPO_MAX {
        stages.push(ATEMPO_MAX);
        remaining /= ATEMPO_MAX;
    }
    while remaining < ATEMPO_MIN {
        stages.push(ATEMPO_MIN);
        remaining /= ATEMPO_MIN;
    }
    stages.push(remaining);
    Ok(stages
        .iter()
        .map(|s| format!("atempo={s:.6}"))
        .collect::<Vec<_>>()
        .join(","))
}

/// Join whisper's output lines, dropping blank lines and bracketed markers
/// such as `[BLANK_AUDIO]`.
fn clean_transcript(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !(l.starts_with('[') && l.ends_with(']')))
        .collect::<Vec<_>>()
        .join(" ")
}
