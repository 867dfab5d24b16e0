//! Decoding backends and the trait boundary the engine drives them through.

mod decoder;
mod wav;

use std::collections::HashMap;
use std::path::Path;

use crate::error::AudioFileError;
use crate::format::PcmFormat;

pub use decoder::SymphoniaBackend;
pub use wav::WavWriteBackend;

/// File access mode requested at open time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    /// Open an existing file for decoding; missing files are an error.
    Read,
    /// Create (or truncate) a file and append frames to it.
    ReadWriteCreate,
}

/// Advisory list of container/codec extensions callers may filter by.
///
/// Actual decodability is delegated entirely to the backend probe.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "aac", "caf", "aif", "aiff", "aifc", "mp3", "mp4", "m4a", "snd", "au", "sd2", "wav",
];

/// Case-insensitive membership test against [`SUPPORTED_EXTENSIONS`].
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext))
}

/// Decoded planar frames handed back by a backend read.
#[derive(Debug)]
pub struct BackendRead {
    /// Planar buffers, one per native channel.
    pub channels: Vec<Vec<f32>>,
    /// Frames decoded into each channel buffer.
    pub frames: usize,
    /// Whether the backend has no further frames after this read.
    pub end_of_stream: bool,
}

/// Boundary to the codec/container engine that parses file bytes into PCM.
///
/// The engine owns exactly one backend per handle and serializes every call
/// through the cursor guard, so implementations never see concurrent calls.
pub trait DecodingBackend: Send {
    /// Native PCM layout reported by the container.
    fn native_format(&self) -> PcmFormat;

    /// Total native frames, zero when the container does not report one.
    fn total_frames(&self) -> u64;

    /// Reposition the cursor so the next read starts at `frame`.
    fn seek(&mut self, frame: u64) -> Result<(), AudioFileError>;

    /// Decode up to `max_frames` native frames into planar float buffers.
    fn read(&mut self, max_frames: usize) -> Result<BackendRead, AudioFileError>;

    /// Embedded tag/info entries from the container.
    fn metadata(&self) -> &HashMap<String, String>;

    /// Append planar frames; only meaningful for write-capable backends.
    fn append(&mut self, channels: &[Vec<f32>]) -> Result<usize, AudioFileError> {
        let _ = channels;
        Err(AudioFileError::UnsupportedFormat {
            message: "backend is read-only".to_string(),
        })
    }
}

impl std::fmt::Debug for dyn DecodingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodingBackend")
            .field("native_format", &self.native_format())
            .field("total_frames", &self.total_frames())
            .finish_non_exhaustive()
    }
}

/// Open a decoding backend for `path` under the requested permission.
///
/// Read permission on a missing path fails with
/// [`AudioFileError::FileNotFound`]; create permission instead writes a new
/// file with `requested_native` (or the standard client layout) and erases
/// any existing content.
pub fn open(
    path: &Path,
    permission: Permission,
    requested_native: Option<PcmFormat>,
) -> Result<Box<dyn DecodingBackend>, AudioFileError> {
    match permission {
        Permission::Read => Ok(Box::new(SymphoniaBackend::open(path)?)),
        Permission::ReadWriteCreate => {
            let format = requested_native.unwrap_or_else(PcmFormat::default_client);
            Ok(Box::new(WavWriteBackend::create(path, format)?))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{BackendRead, DecodingBackend};
    use crate::error::AudioFileError;
    use crate::format::PcmFormat;

    /// In-memory backend over fixed planar samples, with read accounting.
    pub(crate) struct SynthBackend {
        channels: Vec<Vec<f32>>,
        native: PcmFormat,
        position: u64,
        reads: Arc<AtomicUsize>,
        metadata: HashMap<String, String>,
        pub(crate) fail_reads: bool,
    }

    impl SynthBackend {
        pub(crate) fn new(native: PcmFormat, channels: Vec<Vec<f32>>) -> Self {
            Self {
                channels,
                native,
                position: 0,
                reads: Arc::new(AtomicUsize::new(0)),
                metadata: HashMap::new(),
                fail_reads: false,
            }
        }

        /// Constant-value stereo-or-more content of `frames` frames.
        pub(crate) fn constant(native: PcmFormat, frames: usize, value: f32) -> Self {
            let channels = vec![vec![value; frames]; native.channel_count()];
            Self::new(native, channels)
        }

        pub(crate) fn read_counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.reads)
        }

        fn frame_len(&self) -> u64 {
            self.channels.first().map(Vec::len).unwrap_or(0) as u64
        }
    }

    impl DecodingBackend for SynthBackend {
        fn native_format(&self) -> PcmFormat {
            self.native
        }

        fn total_frames(&self) -> u64 {
            self.frame_len()
        }

        fn seek(&mut self, frame: u64) -> Result<(), AudioFileError> {
            if frame > self.frame_len() {
                return Err(AudioFileError::SeekFailed {
                    frame,
                    message: "beyond end of synthetic stream".to_string(),
                });
            }
            self.position = frame;
            Ok(())
        }

        fn read(&mut self, max_frames: usize) -> Result<BackendRead, AudioFileError> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            if self.fail_reads {
                return Err(AudioFileError::ReadFailed {
                    message: "synthetic read failure".to_string(),
                });
            }
            let start = self.position.min(self.frame_len()) as usize;
            let end = (start + max_frames).min(self.frame_len() as usize);
            let out: Vec<Vec<f32>> = self
                .channels
                .iter()
                .map(|channel| channel[start..end].to_vec())
                .collect();
            self.position = end as u64;
            Ok(BackendRead {
                frames: end - start,
                end_of_stream: end as u64 == self.frame_len(),
                channels: out,
            })
        }

        fn metadata(&self) -> &HashMap<String, String> {
            &self.metadata
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_supported_extension("wav"));
        assert!(is_supported_extension("AIFF"));
        assert!(is_supported_extension("M4a"));
        assert!(!is_supported_extension("flac"));
        assert!(!is_supported_extension(""));
    }

    #[test]
    fn read_permission_on_missing_path_is_file_not_found() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let missing = dir.path().join("nope.wav");
        let err = open(&missing, Permission::Read, None).unwrap_err();
        assert!(matches!(err, AudioFileError::FileNotFound { .. }));
    }
}
