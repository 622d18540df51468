use std::path::PathBuf;
use thiserror::Error;

use crate::ffmpeg::FfmpegError;

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("Dependency not found: {0}")]
    MissingDependency(String),

    #[error("Cannot list directory '{}': {source}", path.display())]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No valid video files found.")]
    NoValidInput,

    #[error("No chunks produced; possibly no valid videos.")]
    NoOutputProduced,

    #[error("Encoding failed while {stage}: {source}")]
    EncodeFailure {
        stage: String,
        #[source]
        source: FfmpegError,
    },

    #[error("Cannot write output '{}': {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    InvalidJob(String),

    #[error("A join is already in progress")]
    JobInProgress,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not start background join: {0}")]
    Worker(String),
}

impl JoinError {
    /// Title used by the front end when surfacing the error as a notification
    pub fn title(&self) -> &'static str {
        match self {
            JoinError::MissingDependency(_) => "Missing dependency",
            JoinError::JobInProgress => "Busy",
            _ => "Error",
        }
    }
}

pub type Result<T> = std::result::Result<T, JoinError>;
