//! Error taxonomy for the capture/playback pipeline and memo persistence.

use std::path::PathBuf;

use thiserror::Error;

use crate::audio::Direction;

/// Errors surfaced by audio sessions, the WAV codec and the memo store.
///
/// None of these are fatal to the process: start failures leave the session
/// idle, persistence failures leave the in-memory change in place.
#[derive(Debug, Error)]
pub enum Error {
    /// No device supporting the requested direction was found.
    #[error("no usable {0} device")]
    DeviceUnavailable(Direction),

    /// WAV header magic mismatch or header too short.
    #[error("invalid WAV data: {0}")]
    InvalidFormat(&'static str),

    /// I/O failure on an audio file, or a payload shorter than declared.
    #[error("unreadable audio file {}: {reason}", path.display())]
    UnreadableFile { path: PathBuf, reason: String },

    /// The backend failed to open, start or stop a stream.
    #[error("audio stream failure: {0}")]
    StreamFailure(String),

    /// Writing the memo metadata failed. The in-memory state is kept.
    #[error("failed to persist memo metadata: {0}")]
    PersistenceFailure(String),

    /// Writing an exported copy failed.
    #[error("cannot export to {}: {reason}", path.display())]
    ExportFailure { path: PathBuf, reason: String },

    /// A session of this kind is already open.
    #[error("a {0} session is already open")]
    SessionActive(&'static str),

    /// No memo with the given id.
    #[error("no memo with id '{0}'")]
    MemoNotFound(String),
}

impl Error {
    /// Build an `UnreadableFile` error from any displayable cause.
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::UnreadableFile { path: path.into(), reason: reason.to_string() }
    }

    /// Build an `ExportFailure` error for a destination path.
    pub fn export(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::ExportFailure { path: path.into(), reason: reason.to_string() }
    }

    /// Build a `StreamFailure` error from any displayable cause.
    pub fn stream(reason: impl std::fmt::Display) -> Self {
        Error::StreamFailure(reason.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
