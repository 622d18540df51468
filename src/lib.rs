//! towel_joiner - join a folder of videos into one file
//!
//! Files are joined in name order, in bounded chunks, by an external
//! `ffmpeg`. The crate locates the encoder, scans the folder, runs the
//! chunked join and reports progress to a log sink.

pub mod backend;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod joiner;
pub mod metrics;
pub mod resolver;
pub mod scanner;
pub mod shell;
pub mod sink;

pub use backend::{EncodeSettings, FfmpegBackend, FfmpegClip, MediaBackend, ProbeInfo};
pub use config::JoinerConfig;
pub use error::{JoinError, Result};
pub use ffmpeg::{FfmpegCommand, FfmpegError};
pub use joiner::{ChunkedJoiner, CleanupFailure, Finalize, JoinJob, JoinReport, SkippedFile};
pub use resolver::{EncoderLocator, Toolchain};
pub use scanner::{scan_directory, MediaFile, ScanFilter};
pub use shell::{JoinController, JoinForm, Notification, ShellEvent};
pub use sink::{LogConsole, LogEntry, LogSink, MemorySink, TracingSink};
