//! FFmpeg command wrapper utilities
//!
//! Every invocation runs against an explicit binary path handed over by the
//! resolver, never against whatever `ffmpeg` happens to be first on PATH.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use thiserror::Error;
use tracing::debug;

/// Longest stderr excerpt carried inside an error message
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("Encoder binary not found: {}", .0.display())]
    NotInstalled(PathBuf),

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct FfmpegCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl FfmpegCommand {
    /// Start an `ffmpeg` invocation with quiet, non-interactive defaults
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self::bare(program).args(&["-hide_banner", "-nostdin", "-loglevel", "error", "-y"])
    }

    /// Start an invocation with no default arguments (used for `ffprobe`)
    pub fn bare(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".into());
        self.args.push(path.as_ref().as_os_str().to_os_string());
        self
    }

    /// Add a generated `lavfi` source lasting `seconds`
    pub fn lavfi_input(self, source: &str, seconds: f64) -> Self {
        self.args(&["-f", "lavfi", "-t", &format!("{:.3}", seconds), "-i", source])
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().as_os_str().to_os_string());
        self
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(OsString::from));
        self
    }

    /// Render the command line for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    pub fn execute(self) -> Result<Output, FfmpegError> {
        debug!("Running: {}", self.command_line());

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => FfmpegError::NotInstalled(self.program.clone()),
                _ => FfmpegError::ExecutionFailed(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FfmpegError::ExecutionFailed(format!(
                "{} ({})",
                stderr_tail(&stderr),
                output.status
            )));
        }

        Ok(output)
    }
}

/// Last few lines of encoder stderr, trimmed to a bounded size
fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

/// Check that `program -version` runs
pub fn is_runnable(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
