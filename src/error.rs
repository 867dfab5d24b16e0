//! Error taxonomy for file open, seek, read and format negotiation.

use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by file-level operations.
///
/// [`AudioFileError::OperationSkipped`] is not a true failure: it reports
/// that the cursor lock was held by a concurrent caller and the operation
/// was silently skipped. Callers should treat it as transient and retry at
/// their own pace; nothing in the engine retries automatically.
#[derive(Debug, Error)]
pub enum AudioFileError {
    /// Read access requested on a location that does not exist.
    #[error("Audio file not found: {path}")]
    FileNotFound {
        /// Location that was requested.
        path: PathBuf,
    },
    /// The backend could not open or create the file.
    #[error("Failed to open {path}: {message}")]
    OpenFailed {
        /// Location that was requested.
        path: PathBuf,
        /// Backend-reported reason.
        message: String,
    },
    /// The requested format failed validation or the backend rejected it.
    #[error("Unsupported format: {message}")]
    UnsupportedFormat {
        /// What was wrong with the format.
        message: String,
    },
    /// The backend failed to reposition its cursor.
    #[error("Seek to frame {frame} failed: {message}")]
    SeekFailed {
        /// Frame index that was requested.
        frame: u64,
        /// Backend-reported reason.
        message: String,
    },
    /// The backend failed to produce decoded frames.
    #[error("Read failed: {message}")]
    ReadFailed {
        /// Backend-reported reason.
        message: String,
    },
    /// The cursor lock was held by a concurrent caller; nothing happened.
    #[error("Operation skipped: cursor is busy")]
    OperationSkipped,
}
