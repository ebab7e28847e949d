//! Error types for ReelBot
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by where they originate so that presentation layers
//! can decide what (if anything) to tell the user.
//!
//! ## Error Categories
//!
//! ### Start-time errors (returned synchronously from `start_download`)
//! - Downloader metadata failures → `Metadata`
//! - Downloader refused to start → `StartFailed`
//! - Persistence insert failures → `SqlxError`, `DatabaseError`
//!
//! ### In-flight errors (delivered on the caller's result channel)
//! - Downloader reported a manual stop → `StoppedManually` (translated by the monitor)
//! - User stop → `StoppedByUser`
//! - Deletion-triggered stop → `StoppedByDeletion` (silent)
//! - No forward progress for too long → `Stagnated`
//! - Absolute timeout → `DownloadTimeout`
//! - Timed out while waiting in the queue → `QueueTimeout`
//! - Anything else the downloader reported → `DownloadFailed`

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our ReelError type
pub type Result<T> = std::result::Result<T, ReelError>;

/// Main error type for ReelBot
#[derive(Error, Debug)]
pub enum ReelError {
    // ===== Downloader Errors =====

    /// Title, file list or size could not be read from the downloader
    #[error("Failed to read download metadata: {0}")]
    Metadata(String),

    /// The downloader refused to start its transfer
    #[error("Failed to start download for movie {movie_id}: {message}")]
    StartFailed { movie_id: i64, message: String },

    /// Reported by a downloader whose transfer ended because `stop_download` was called
    #[error("Download stopped manually")]
    StoppedManually,

    /// Opaque failure reported by the downloader (torrent, qBittorrent, yt-dlp...)
    #[error("Downloader error: {0}")]
    Downloader(String),

    // ===== In-flight Terminal Errors =====

    /// Download was stopped on user request
    #[error("Download of movie {movie_id} stopped by user")]
    StoppedByUser { movie_id: i64 },

    /// Download was stopped because the movie is being deleted
    #[error("Download of movie {movie_id} stopped because the movie was deleted")]
    StoppedByDeletion { movie_id: i64 },

    /// Progress did not move for longer than the stagnation ceiling
    #[error("Download of movie {movie_id} stalled: no progress for {} minutes", .stalled_for.as_secs() / 60)]
    Stagnated { movie_id: i64, stalled_for: Duration },

    /// Absolute download timeout expired
    #[error("Download of movie {movie_id} timed out after {timeout:?}")]
    DownloadTimeout { movie_id: i64, timeout: Duration },

    /// Download waited in the queue longer than the configured timeout
    #[error("Movie {movie_id} timed out after {timeout:?} waiting in the download queue")]
    QueueTimeout { movie_id: i64, timeout: Duration },

    /// Downloader failure wrapped with the movie it belongs to
    #[error("Download of movie {movie_id} failed: {source}")]
    DownloadFailed {
        movie_id: i64,
        #[source]
        source: Box<ReelError>,
    },

    // ===== Conversion Errors =====

    /// Codec probe could not classify the content
    #[error("Media probe failed: {0}")]
    ProbeFailed(String),

    /// TV-compatibility remux failed
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    // ===== Database Errors =====

    /// Generic database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Database schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database record not found
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    // ===== Configuration/State Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Application state is invalid for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The download manager has been shut down
    #[error("Download manager is shut down")]
    Shutdown,

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<std::num::ParseIntError> for ReelError {
    fn from(err: std::num::ParseIntError) -> Self {
        ReelError::InvalidConfiguration(format!("Failed to parse integer: {}", err))
    }
}

// Helper methods for creating common errors
impl ReelError {
    /// Create a RecordNotFound error with a resource name
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        ReelError::RecordNotFound(resource.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        ReelError::InternalError(message.into())
    }

    /// Create a Downloader error with a message
    pub fn downloader<S: Into<String>>(message: S) -> Self {
        ReelError::Downloader(message.into())
    }

    /// Wrap a downloader failure with the movie it belongs to
    pub fn for_movie(self, movie_id: i64) -> Self {
        ReelError::DownloadFailed {
            movie_id,
            source: Box::new(self),
        }
    }

    /// Check if the download ended because someone asked it to stop
    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            ReelError::StoppedByUser { .. }
                | ReelError::StoppedByDeletion { .. }
                | ReelError::StoppedManually
        )
    }

    /// Check if the error must not be shown to the user
    ///
    /// Deletion-triggered stops are reported by whoever deleted the movie.
    pub fn is_silent(&self) -> bool {
        matches!(self, ReelError::StoppedByDeletion { .. })
    }

    /// Check if error is one of the timeout kinds
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ReelError::Stagnated { .. }
                | ReelError::DownloadTimeout { .. }
                | ReelError::QueueTimeout { .. }
        )
    }

    /// Movie id attached to an in-flight error, if any
    pub fn movie_id(&self) -> Option<i64> {
        match self {
            ReelError::StartFailed { movie_id, .. }
            | ReelError::StoppedByUser { movie_id }
            | ReelError::StoppedByDeletion { movie_id }
            | ReelError::Stagnated { movie_id, .. }
            | ReelError::DownloadTimeout { movie_id, .. }
            | ReelError::QueueTimeout { movie_id, .. }
            | ReelError::DownloadFailed { movie_id, .. } => Some(*movie_id),
            _ => None,
        }
    }

    /// Get user-friendly error message suitable for a chat reply
    pub fn user_message(&self) -> String {
        match self {
            ReelError::StoppedByUser { .. } | ReelError::StoppedManually => {
                "Download stopped.".to_string()
            }
            ReelError::Stagnated { stalled_for, .. } => format!(
                "Download made no progress for {} minutes and was cancelled. The source may have no peers.",
                stalled_for.as_secs() / 60
            ),
            ReelError::DownloadTimeout { .. } => {
                "Download took too long and was cancelled.".to_string()
            }
            ReelError::QueueTimeout { .. } => {
                "Download waited in the queue for too long and was cancelled.".to_string()
            }
            ReelError::DownloadFailed { source, .. } => {
                format!("Download failed: {}", source)
            }
            ReelError::Metadata(_) => {
                "Could not read the torrent or video information. Check the link and try again.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
