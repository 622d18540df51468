//! Chunked joiner
//!
//! Joins an ordered file list in bounded batches:
//!
//! 1. each chunk of at most `chunk_size` files is opened and concatenated into
//!    `chunk_<N>.mp4`
//! 2. a single intermediate is renamed straight to `joined_video.<format>`
//! 3. two or more intermediates are re-opened and concatenated once more into
//!    the final file, then deleted
//!
//! Intermediates live in a per-run scratch directory inside the output
//! directory, so they never clash with files of the folder being joined.
//!
//! Files that cannot be opened are skipped and reported; a chunk with no
//! usable files produces nothing. Encode failures abort the run.

use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{EncodeSettings, MediaBackend};
use crate::error::{JoinError, Result};
use crate::ffmpeg::FfmpegError;
use crate::metrics::{JoinMetrics, MetricsSnapshot, Timer};
use crate::scanner::{scan_directory, MediaFile, ScanFilter};
use crate::sink::LogSink;

pub const DEFAULT_CHUNK_SIZE: usize = 20;
pub const DEFAULT_FORMAT: &str = "mp4";
/// Stem of the final output file
pub const FINAL_STEM: &str = "joined_video";
/// Prefix of the per-run scratch directory
pub const SCRATCH_PREFIX: &str = ".towel_chunks";

/// Name of the `n`th intermediate artifact
pub fn intermediate_name(n: usize) -> String {
    format!("chunk_{}.mp4", n)
}

/// Normalize a user-typed format token: `" .MP4 "` becomes `"mp4"`.
/// Returns `None` when nothing usable remains.
pub fn normalize_format(raw: &str) -> Option<String> {
    let token = raw.trim().trim_matches('.').to_lowercase();
    let valid = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(token)
}

// ============================================================================
// Job and report
// ============================================================================

/// Everything one join needs
#[derive(Debug, Clone)]
pub struct JoinJob {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Normalized container token, e.g. `mp4`
    pub format: String,
    pub chunk_size: usize,
    pub filter: ScanFilter,
}

impl JoinJob {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        format: &str,
    ) -> Result<Self> {
        let format = normalize_format(format)
            .ok_or_else(|| JoinError::InvalidJob(format!("Invalid output format '{}'", format)))?;
        Ok(Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            format,
            chunk_size: DEFAULT_CHUNK_SIZE,
            filter: ScanFilter::Any,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn final_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", FINAL_STEM, self.format))
    }

    /// Name the merge encodes to before moving into place
    fn staging_name(&self) -> String {
        format!(".{}.partial.{}", FINAL_STEM, self.format)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(JoinError::InvalidJob("Chunk size must be at least 1".to_string()));
        }
        if normalize_format(&self.format).as_deref() != Some(self.format.as_str()) {
            return Err(JoinError::InvalidJob(format!("Invalid output format '{}'", self.format)));
        }
        Ok(())
    }
}

/// A file left out of the join
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// An intermediate that could not be deleted
#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// How the final artifact came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Finalize {
    /// The only intermediate was renamed into place
    Renamed,
    /// Intermediates were concatenated once more
    Reencoded,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinReport {
    pub output: PathBuf,
    pub files_joined: usize,
    pub skipped: Vec<SkippedFile>,
    pub intermediates: usize,
    pub finalize: Finalize,
    pub cleanup_failures: Vec<CleanupFailure>,
    pub metrics: MetricsSnapshot,
    pub elapsed_ms: u64,
}

// ============================================================================
// Clip ownership
// ============================================================================

/// A clip owned by the joiner. Released (and counted) on drop.
struct OpenClip<'m, C> {
    clip: C,
    path: PathBuf,
    metrics: &'m JoinMetrics,
}

impl<C> Drop for OpenClip<'_, C> {
    fn drop(&mut self) {
        JoinMetrics::incr(&self.metrics.clips_released);
        debug!("Released {}", self.path.display());
    }
}

// ============================================================================
// Joiner
// ============================================================================

pub struct ChunkedJoiner<'a, B: MediaBackend> {
    backend: &'a B,
    sink: &'a dyn LogSink,
    metrics: Arc<JoinMetrics>,
}

impl<'a, B: MediaBackend> ChunkedJoiner<'a, B> {
    pub fn new(backend: &'a B, sink: &'a dyn LogSink) -> Self {
        Self {
            backend,
            sink,
            metrics: JoinMetrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<JoinMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<JoinMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Scan `job.input_dir` and join everything found
    pub fn join(&self, job: &JoinJob) -> Result<JoinReport> {
        job.validate()?;

        std::fs::create_dir_all(&job.output_dir).map_err(|source| {
            JoinError::DirectoryUnreadable {
                path: job.output_dir.clone(),
                source,
            }
        })?;

        self.sink.log(format!("Scanning {}", job.input_dir.display()));
        let files = scan_directory(&job.input_dir, &job.filter)?;
        JoinMetrics::add(&self.metrics.files_scanned, files.len() as u64);
        self.sink.log(format!("Found {} candidate file(s)", files.len()));

        self.join_files(&files, job)
    }

    /// Join an already ordered file list
    pub fn join_files(&self, files: &[MediaFile], job: &JoinJob) -> Result<JoinReport> {
        job.validate()?;
        let timer = Timer::new();

        if files.is_empty() {
            return Err(JoinError::NoValidInput);
        }

        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&job.output_dir)
            .map_err(|source| JoinError::OutputWrite {
                path: job.output_dir.clone(),
                source,
            })?;
        debug!("Scratch directory {}", scratch.path().display());

        let outcome = self.join_in(files, job, scratch.path(), &timer);
        if let Err(e) = scratch.close() {
            warn!("Could not remove scratch directory: {}", e);
        }
        outcome
    }

    fn join_in(
        &self,
        files: &[MediaFile],
        job: &JoinJob,
        scratch: &Path,
        timer: &Timer,
    ) -> Result<JoinReport> {
        let chunk_size = job.chunk_size;
        let chunk_count = files.len().div_ceil(chunk_size);
        let mut skipped = Vec::new();
        // (artifact, number of input files it holds)
        let mut intermediates: Vec<(PathBuf, usize)> = Vec::new();

        for (chunk_index, chunk) in files.chunks(chunk_size).enumerate() {
            self.sink.log(format!(
                "Chunk {}/{}: opening {} file(s)",
                chunk_index + 1,
                chunk_count,
                chunk.len()
            ));

            let clips = self.open_clips(chunk.iter().map(|f| f.path.as_path()), &mut skipped);
            if clips.is_empty() {
                self.sink.log(format!(
                    "Chunk {}/{}: no usable clips, skipping",
                    chunk_index + 1,
                    chunk_count
                ));
                continue;
            }

            let target = scratch.join(intermediate_name(intermediates.len()));
            if let Err(source) = self.encode(&clips, &target, &EncodeSettings::intermediate()) {
                drop(clips);
                let mut leftovers: Vec<PathBuf> =
                    intermediates.iter().map(|(p, _)| p.clone()).collect();
                leftovers.push(target);
                self.cleanup(&leftovers);
                self.sink.log(format!("Error while processing chunk: {}", source));
                return Err(JoinError::EncodeFailure {
                    stage: format!("joining chunk {}", chunk_index + 1),
                    source,
                });
            }

            JoinMetrics::incr(&self.metrics.intermediates_written);
            intermediates.push((target, clips.len()));
        }

        let final_path = job.final_path();
        let (files_joined, finalize, cleanup_failures) = match intermediates.len() {
            0 => {
                self.sink.log("No chunks produced; possibly no valid videos.".to_string());
                return Err(JoinError::NoOutputProduced);
            }
            1 => {
                let (only, count) = &intermediates[0];
                if let Err(e) = replace_file(only, &final_path) {
                    self.sink.log(format!("Could not move chunk into place: {}", e));
                    self.cleanup(std::slice::from_ref(only));
                    return Err(e);
                }
                self.sink.log(format!(
                    "Single chunk renamed to {}",
                    final_path.display()
                ));
                (*count, Finalize::Renamed, Vec::new())
            }
            _ => {
                let staging = scratch.join(job.staging_name());
                let (joined, failures) =
                    self.merge(&intermediates, job, &staging, &final_path, &mut skipped)?;
                (joined, Finalize::Reencoded, failures)
            }
        };

        self.sink.log(format!("Joined video saved as: {}", final_path.display()));

        Ok(JoinReport {
            output: final_path,
            files_joined,
            skipped,
            intermediates: intermediates.len(),
            finalize,
            cleanup_failures,
            metrics: self.metrics.snapshot(),
            elapsed_ms: timer.elapsed_ms(),
        })
    }

    /// Re-open every intermediate and encode them into the final file.
    /// Intermediates are deleted whatever the outcome; ones that cannot be
    /// re-opened are added to `skipped`.
    fn merge(
        &self,
        intermediates: &[(PathBuf, usize)],
        job: &JoinJob,
        staging: &Path,
        final_path: &Path,
        skipped: &mut Vec<SkippedFile>,
    ) -> Result<(usize, Vec<CleanupFailure>)> {
        self.sink.log(format!("Merging {} chunks", intermediates.len()));

        let result = {
            let mut unusable = Vec::new();
            let clips = self.open_clips(intermediates.iter().map(|(p, _)| p.as_path()), &mut unusable);
            let joined: usize = intermediates
                .iter()
                .filter(|(p, _)| !unusable.iter().any(|s: &SkippedFile| &s.path == p))
                .map(|(_, n)| n)
                .sum();
            skipped.extend(unusable);

            if clips.is_empty() {
                self.sink.log("No chunk files to merge. Possibly no valid videos.".to_string());
                Err(JoinError::NoOutputProduced)
            } else {
                let settings = EncodeSettings::for_container(&job.format);
                self.encode(&clips, staging, &settings)
                    .map_err(|source| {
                        self.sink.log(format!("Failed to join final chunks: {}", source));
                        JoinError::EncodeFailure {
                            stage: "merging chunks".to_string(),
                            source,
                        }
                    })
                    .and_then(|_| replace_file(staging, final_path))
                    .map(|_| joined)
            }
            // merge clips released here
        };

        let paths: Vec<PathBuf> = intermediates.iter().map(|(p, _)| p.clone()).collect();
        let cleanup_failures = self.cleanup(&paths);

        match result {
            Ok(joined) => Ok((joined, cleanup_failures)),
            Err(e) => {
                self.cleanup(&[staging.to_path_buf()]);
                Err(e)
            }
        }
    }

    /// Open every path; failures are logged, recorded and left out
    fn open_clips<'p>(
        &self,
        paths: impl Iterator<Item = &'p Path>,
        skipped: &mut Vec<SkippedFile>,
    ) -> Vec<OpenClip<'_, B::Clip>> {
        let mut clips = Vec::new();
        for path in paths {
            match self.backend.open_clip(path) {
                Ok(clip) => {
                    JoinMetrics::incr(&self.metrics.clips_opened);
                    clips.push(OpenClip {
                        clip,
                        path: path.to_path_buf(),
                        metrics: &self.metrics,
                    });
                }
                Err(e) => {
                    JoinMetrics::incr(&self.metrics.files_skipped);
                    self.sink.log(format!("Skipping {}: {}", path.display(), e));
                    skipped.push(SkippedFile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        clips
    }

    fn encode(
        &self,
        clips: &[OpenClip<'_, B::Clip>],
        target: &Path,
        settings: &EncodeSettings,
    ) -> std::result::Result<(), FfmpegError> {
        self.sink.log(format!(
            "Writing {} ({} clip(s))",
            target.display(),
            clips.len()
        ));
        let refs: Vec<&B::Clip> = clips.iter().map(|c| &c.clip).collect();
        self.backend.concatenate(&refs, target, settings)?;
        JoinMetrics::incr(&self.metrics.encode_passes);
        Ok(())
    }

    /// Best-effort delete. Every path is attempted; failures are returned.
    fn cleanup(&self, paths: &[PathBuf]) -> Vec<CleanupFailure> {
        let mut failures = Vec::new();
        for path in paths {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    JoinMetrics::incr(&self.metrics.intermediates_deleted);
                    debug!("Removed {}", path.display());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    JoinMetrics::incr(&self.metrics.cleanup_failures);
                    warn!("Could not remove {}: {}", path.display(), e);
                    self.sink.log(format!("Could not remove {}: {}", path.display(), e));
                    failures.push(CleanupFailure {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        failures
    }
}

/// Move `from` onto `to` in one step. An existing file at `to` is replaced
/// only when the move succeeds.
fn replace_file(from: &Path, to: &Path) -> Result<()> {
    std::fs::rename(from, to).map_err(|source| JoinError::OutputWrite {
        path: to.to_path_buf(),
        source,
    })
}
