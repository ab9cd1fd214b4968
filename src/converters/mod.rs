//! Converter operations: the boundary to codec, OCR, TTS and PDF libraries.
//!
//! Every operation has the same shape: read `input`, write `output`, consult
//! optional [`Parameters`], return the output path or an [`OperationError`].
//! The dispatcher decides the output path; operations must write exactly
//! there.
//!
//! ```text
//! converters
//!  ├─ pdf     pdfium text extraction → txt / docx / speech
//!  ├─ text    txt ↔ docx, text → speech
//!  ├─ docx    minimal WordprocessingML reader and writer (zip + quick-xml)
//!  ├─ speech  gTTS over HTTP, espeak-ng offline
//!  ├─ image   resize / format / compress / filter / rotate / pdf / OCR
//!  ├─ audio   ffmpeg transcoding, whisper transcription
//!  └─ tools   external process runner shared by the above
//! ```

pub mod audio;
pub mod docx;
pub mod image;
pub mod pdf;
pub mod speech;
pub mod text;
pub mod tools;

use crate::error::OperationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A single conversion step.
///
/// Operations are blocking and may take seconds; the dispatcher runs them on
/// the blocking thread pool. Plain closures with the same signature implement
/// this trait, which is how the operation table wires converter methods.
pub trait ConverterOperation: Send + Sync {
    fn run(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError>;
}

impl<F> ConverterOperation for F
where
    F: Fn(&Path, &Path, &Parameters) -> Result<PathBuf, OperationError> + Send + Sync,
{
    fn run(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        self(input, output, params)
    }
}

// ── Parameters ───────────────────────────────────────────────────────────

/// A parameter value as supplied by a form, JSON body, or CLI flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Free-form conversion options keyed by name.
///
/// Getters parse lazily, so a form field `"width" = "640"` and a JSON number
/// `640` read the same. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParamValue>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name).filter(|v| !matches!(v, ParamValue::Text(s) if s.trim().is_empty()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// First present value among `names`, as trimmed text.
    pub fn text_any(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|n| self.get(n))
            .map(|v| v.to_string().trim().to_string())
    }

    pub fn text_or(&self, name: &str, default: &str) -> String {
        self.text_any(&[name]).unwrap_or_else(|| default.to_string())
    }

    /// Parse `name` as `T`, falling back to `default` when absent.
    pub fn parse_or<T>(&self, name: &str, default: T) -> Result<T, OperationError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.parse_opt(name)? {
            Some(v) => Ok(v),
            None => Ok(default),
        }
    }

    /// Parse `name` as `T` when present.
    pub fn parse_opt<T>(&self, name: &str) -> Result<Option<T>, OperationError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let raw = match value {
            // "640.0" from a JSON number should still parse as an integer.
            ParamValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            other => other.to_string(),
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| OperationError::invalid_parameter(name, format!("'{raw}': {e}")))
    }

    /// Boolean flag: accepts true/false, yes/no, on/off, 1/0.
    pub fn flag_or(&self, name: &str, default: bool) -> Result<bool, OperationError> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Bool(b)) => Ok(*b),
            Some(other) => match other.to_string().trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                raw => Err(OperationError::invalid_parameter(
                    name,
                    format!("'{raw}' is not a boolean"),
                )),
            },
        }
    }
}

impl FromIterator<(String, ParamValue)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Turn any displayable cause into "{operation} failed: {cause}".
pub(crate) fn failed(operation: &str, cause: impl fmt::Display) -> OperationError {
    OperationError::failed(format!("{operation} failed: {cause}"))
}

/// Create the output's parent directory if needed.
pub(crate) fn ensure_parent(output: &Path) -> Result<(), OperationError> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OperationError::io(format!("create {}", parent.display()), e))?;
        }
    }
    Ok(())
}
