//! Encoder discovery
//!
//! Finds `ffmpeg` (and its `ffprobe` companion) through an ordered search:
//!
//! 1. explicit override (config, then the `FFMPEG_BINARY` variable)
//! 2. directories bundled with the running application
//! 3. well-known install locations for the current OS, plus configured extras
//! 4. the process `PATH`
//!
//! The environment is reached only through [`SearchEnv`], so the search order
//! can be exercised against a fake filesystem.

use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{JoinError, Result};

/// Environment variable honoured as an explicit encoder override
pub const FFMPEG_BINARY_VAR: &str = "FFMPEG_BINARY";

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

/// Where a binary was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedFrom {
    Override,
    Bundled,
    WellKnown,
    SystemPath,
    /// Next to the resolved encoder
    Sibling,
}

/// Resolved encoder binaries, handed to the media backend
#[derive(Debug, Clone, Serialize)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ffmpeg_from: ResolvedFrom,
    pub ffprobe_from: ResolvedFrom,
}

/// Access to the parts of the process environment the search depends on
pub trait SearchEnv {
    fn is_executable(&self, path: &Path) -> bool;
    fn var_os(&self, key: &str) -> Option<OsString>;
    fn current_exe_dir(&self) -> Option<PathBuf>;
}

/// The real process environment
pub struct SystemEnv;

impl SearchEnv for SystemEnv {
    fn is_executable(&self, path: &Path) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        if !meta.is_file() {
            return false;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode() & 0o111 != 0
        }
        #[cfg(not(unix))]
        {
            true
        }
    }

    fn var_os(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }

    fn current_exe_dir(&self) -> Option<PathBuf> {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
    }
}

/// Ordered, configurable encoder search
#[derive(Debug, Clone)]
pub struct EncoderLocator {
    pub override_path: Option<PathBuf>,
    pub honour_env_override: bool,
    pub extra_dirs: Vec<PathBuf>,
    pub search_system_path: bool,
}

impl Default for EncoderLocator {
    fn default() -> Self {
        Self {
            override_path: None,
            honour_env_override: true,
            extra_dirs: Vec::new(),
            search_system_path: true,
        }
    }
}

impl EncoderLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, path: Option<PathBuf>) -> Self {
        self.override_path = path;
        self
    }

    pub fn with_extra_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.extra_dirs = dirs;
        self
    }

    pub fn with_system_path(mut self, enabled: bool) -> Self {
        self.search_system_path = enabled;
        self
    }

    /// Resolve against the real environment
    pub fn resolve(&self) -> Result<Toolchain> {
        self.resolve_in(&SystemEnv)
    }

    /// Resolve both binaries. The probe is looked up next to the encoder first.
    pub fn resolve_in(&self, env: &dyn SearchEnv) -> Result<Toolchain> {
        let (ffmpeg, ffmpeg_from) = self.resolve_encoder(env)?;

        let sibling = ffmpeg
            .parent()
            .map(|dir| dir.join(exe_name(FFPROBE)))
            .filter(|p| env.is_executable(p));

        let (ffprobe, ffprobe_from) = match sibling {
            Some(path) => (path, ResolvedFrom::Sibling),
            None => self
                .search(env, FFPROBE)
                .ok_or_else(|| JoinError::MissingDependency(not_found_message(FFPROBE)))?,
        };

        info!(
            "Encoder resolved: {} ({:?}), probe: {} ({:?})",
            ffmpeg.display(),
            ffmpeg_from,
            ffprobe.display(),
            ffprobe_from
        );

        Ok(Toolchain {
            ffmpeg,
            ffprobe,
            ffmpeg_from,
            ffprobe_from,
        })
    }

    fn resolve_encoder(&self, env: &dyn SearchEnv) -> Result<(PathBuf, ResolvedFrom)> {
        let explicit = self.override_path.clone().or_else(|| {
            self.honour_env_override
                .then(|| env.var_os(FFMPEG_BINARY_VAR))
                .flatten()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        });

        if let Some(path) = explicit {
            if env.is_executable(&path) {
                return Ok((path, ResolvedFrom::Override));
            }
            return Err(JoinError::MissingDependency(format!(
                "configured encoder '{}' does not exist or is not executable",
                path.display()
            )));
        }

        self.search(env, FFMPEG)
            .ok_or_else(|| JoinError::MissingDependency(not_found_message(FFMPEG)))
    }

    /// Ordered candidate list for one binary name
    pub fn candidates(&self, env: &dyn SearchEnv, name: &str) -> Vec<(PathBuf, ResolvedFrom)> {
        let file = exe_name(name);
        let mut out = Vec::new();

        if let Some(dir) = env.current_exe_dir() {
            for bundled in bundled_dirs(&dir) {
                out.push((bundled.join(&file), ResolvedFrom::Bundled));
            }
        }

        for dir in well_known_dirs(env).into_iter().chain(self.extra_dirs.iter().cloned()) {
            out.push((dir.join(&file), ResolvedFrom::WellKnown));
        }

        if self.search_system_path {
            if let Some(path) = env.var_os("PATH") {
                for dir in std::env::split_paths(&path) {
                    if !dir.as_os_str().is_empty() {
                        out.push((dir.join(&file), ResolvedFrom::SystemPath));
                    }
                }
            }
        }

        out
    }

    fn search(&self, env: &dyn SearchEnv, name: &str) -> Option<(PathBuf, ResolvedFrom)> {
        self.candidates(env, name).into_iter().find(|(path, _)| {
            let hit = env.is_executable(path);
            debug!("Probing {} -> {}", path.display(), hit);
            hit
        })
    }
}

fn exe_name(name: &str) -> String {
    format!("{}{}", name, std::env::consts::EXE_SUFFIX)
}

fn not_found_message(name: &str) -> String {
    format!(
        "{} not found next to the application, in well-known install locations, or on PATH. \
         Install it or set {}",
        name, FFMPEG_BINARY_VAR
    )
}

fn bundled_dirs(exe_dir: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![
        exe_dir.to_path_buf(),
        exe_dir.join("bin"),
        exe_dir.join("ffmpeg"),
    ];
    if cfg!(target_os = "macos") {
        dirs.push(exe_dir.join("..").join("Resources"));
    }
    dirs
}

#[cfg(target_os = "macos")]
fn well_known_dirs(_env: &dyn SearchEnv) -> Vec<PathBuf> {
    ["/usr/local/bin", "/opt/homebrew/bin", "/opt/local/bin"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

#[cfg(target_os = "windows")]
fn well_known_dirs(env: &dyn SearchEnv) -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(r"C:\ffmpeg\bin")];
    if let Some(pf) = env.var_os("ProgramFiles") {
        dirs.push(PathBuf::from(pf).join("ffmpeg").join("bin"));
    }
    if let Some(local) = env.var_os("LOCALAPPDATA") {
        dirs.push(
            PathBuf::from(local)
                .join("Microsoft")
                .join("WinGet")
                .join("Links"),
        );
    }
    dirs
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn well_known_dirs(_env: &dyn SearchEnv) -> Vec<PathBuf> {
    ["/usr/local/bin", "/usr/bin", "/snap/bin"]
        .iter()
        .map(PathBuf::from)
        .collect()
}
