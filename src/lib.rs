//! Audio frame access and waveform-envelope extraction.
//!
//! Open an audio file, stream decoded float frames from any position, and
//! compute cached, cancellable RMS amplitude envelopes for visualization —
//! without blocking callers or corrupting the shared cursor when streaming
//! reads and background scans race.

/// Application directory helpers.
pub mod app_dirs;
/// Decoding backends behind the codec/container boundary.
pub mod backend;
/// Planar float buffer abstraction.
pub mod buffers;
/// Engine configuration.
pub mod config;
/// Raw-to-client sample conversion.
mod convert;
/// Exclusive cursor guard and change observers.
pub mod cursor;
/// Error taxonomy for file operations.
pub mod error;
/// Caller-facing audio file handles.
pub mod file;
/// PCM layout descriptors.
pub mod format;
/// Logging setup.
pub mod logging;
/// Waveform envelope computation, caching and scheduling.
pub mod waveform;

pub use backend::{Permission, SUPPORTED_EXTENSIONS, is_supported_extension};
pub use buffers::FloatChannelBuffers;
pub use config::EngineConfig;
pub use cursor::{CursorObserver, ReadOutcome};
pub use error::AudioFileError;
pub use file::{AudioFileHandle, FileKey};
pub use format::{PcmFormat, SampleEncoding};
pub use waveform::{
    CancellationToken, WaveformEnvelope, WaveformError, WaveformService, WaveformTaskHandle,
};
