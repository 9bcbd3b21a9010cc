//! Error types for the log follower.

use thiserror::Error;

/// The main error type for log follower operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors when reading the target, writing the sink or touching the position record.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory watching errors from the notify crate.
    #[error("File watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// A session task panicked or was cancelled before it could report.
    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// File path errors.
    #[error("Invalid file path: {message}")]
    InvalidPath { message: String },

    /// The target file does not exist when a session is constructed.
    #[error("source[{path}] does not exist")]
    TargetMissing { path: String },

    /// The position record is locked by another reader.
    #[error("another program holds an overlapping lock.[{path}]")]
    LockUnavailable { path: String },

    /// The charset label is not known to the encoding tables.
    #[error("Unsupported charset: {label}")]
    UnsupportedCharset { label: String },

    /// The output sink went away; nothing written from here on can be delivered.
    #[error("Output sink closed")]
    SinkClosed,
}

/// A convenient Result type for log follower operations.
pub type Result<T> = std::result::Result<T, Error>;
