//! Blocking runner for external tools (ffmpeg, tesseract, espeak-ng, whisper).
//!
//! Operations already run on the blocking pool, so a plain
//! `std::process::Command` is enough. Spawn failures become
//! [`OperationError::ToolMissing`]; non-zero exits become
//! [`OperationError::ToolFailed`] carrying the tail of stderr, which is where
//! every one of these tools reports the actual problem.

use crate::error::OperationError;
use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Keep this many trailing stderr bytes in error messages.
const STDERR_TAIL: usize = 600;

/// An external program invocation.
pub struct Tool {
    program: PathBuf,
    name: String,
    purpose: String,
    args: Vec<std::ffi::OsString>,
    stdin: Option<Vec<u8>>,
}

impl Tool {
    /// `program` is the binary (name on PATH or absolute path); `purpose`
    /// appears in the error when it cannot be started.
    pub fn new(program: impl AsRef<Path>, purpose: impl Into<String>) -> Self {
        let program = program.as_ref().to_path_buf();
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| program.display().to_string());
        Self {
            program,
            name,
            purpose: purpose.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Feed `bytes` to the child's stdin.
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    /// Run to completion; `Ok` only on a zero exit status.
    pub fn run(self) -> Result<Output, OperationError> {
        debug!(tool = %self.name, args = ?self.args, "running external tool");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd.spawn().map_err(|e| OperationError::ToolMissing {
            tool: self.name.clone(),
            purpose: self.purpose.clone(),
            detail: e.to_string(),
        })?;

        if let Some(bytes) = self.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(&bytes)
                    .map_err(|e| OperationError::io(format!("{} stdin", self.name), e))?;
                // Dropping the pipe closes stdin so the tool sees EOF.
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| OperationError::io(format!("wait for {}", self.name), e))?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(OperationError::ToolFailed {
                tool: self.name,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            })
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_tool_missing() {
        let err = Tool::new("/definitely/not/here/ffmpeg", "audio conversion")
            .arg("-version")
            .run()
            .unwrap_err();
        match err {
            OperationError::ToolMissing { tool, purpose, .. } => {
                assert_eq!(tool, "ffmpeg");
                assert_eq!(purpose, "audio conversion");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_reports_stderr() {
        let err = Tool::new("sh", "testing")
            .args(["-c", "echo broken pipe >&2; exit 3"])
            .run()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("broken pipe"), "got: {msg}");
        assert!(msg.starts_with("sh exited with"), "got: {msg}");
    }

    #[cfg(unix)]
    #[test]
    fn stdin_is_forwarded() {
        let out = Tool::new("cat", "testing").stdin("hello").run().unwrap();
        assert_eq!(out.stdout, b"hello");
    }

    #[test]
    fn stderr_tail_truncates_on_char_boundary() {
        let long = "é".repeat(STDERR_TAIL);
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.starts_with('…'));
        assert!(tail.len() <= STDERR_TAIL + '…'.len_utf8() + 1);
    }
}
