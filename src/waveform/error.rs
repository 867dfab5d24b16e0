use thiserror::Error;

use crate::error::AudioFileError;

/// Failures surfaced by envelope computation and scheduling.
#[derive(Debug, Error)]
pub enum WaveformError {
    /// The cursor lock was held by a concurrent caller; nothing was computed.
    ///
    /// Transient: retry at the caller's own pace.
    #[error("Waveform computation skipped: cursor is busy")]
    Skipped,
    /// The computation was cancelled before it finished.
    #[error("Waveform computation cancelled")]
    Cancelled,
    /// An envelope needs at least one output point.
    #[error("Waveform point count must be greater than zero")]
    InvalidPointCount,
    /// The backend failed while scanning the file.
    #[error(transparent)]
    Scan(#[from] AudioFileError),
}
