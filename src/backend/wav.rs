//! Create-and-append write path backed by `hound`.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{WavSpec, WavWriter};

use super::{BackendRead, DecodingBackend};
use crate::error::AudioFileError;
use crate::format::{PcmFormat, SampleEncoding};

/// Backend for handles opened with create permission.
///
/// Supports appending planar frames; decoding a file while it is being
/// written is not supported, so reads and seeks fail. The WAV header is
/// finalized when the backend is dropped.
pub struct WavWriteBackend {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    native: PcmFormat,
    frames_written: u64,
    metadata: HashMap<String, String>,
}

impl WavWriteBackend {
    /// Create (or truncate) a WAV file at `path` with the given layout.
    pub fn create(path: &Path, native: PcmFormat) -> Result<Self, AudioFileError> {
        native
            .validate()
            .map_err(|error| AudioFileError::UnsupportedFormat {
                message: error.to_string(),
            })?;
        let spec = wav_spec(&native);
        let writer =
            WavWriter::create(path, spec).map_err(|error| AudioFileError::OpenFailed {
                path: path.to_path_buf(),
                message: error.to_string(),
            })?;
        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            native,
            frames_written: 0,
            metadata: HashMap::new(),
        })
    }
}

fn wav_spec(format: &PcmFormat) -> WavSpec {
    match format.encoding {
        SampleEncoding::Float => WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        },
        SampleEncoding::FixedPoint => WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        },
    }
}

impl DecodingBackend for WavWriteBackend {
    fn native_format(&self) -> PcmFormat {
        self.native
    }

    fn total_frames(&self) -> u64 {
        self.frames_written
    }

    fn seek(&mut self, frame: u64) -> Result<(), AudioFileError> {
        Err(AudioFileError::SeekFailed {
            frame,
            message: format!("{} is open for writing", self.path.display()),
        })
    }

    fn read(&mut self, _max_frames: usize) -> Result<BackendRead, AudioFileError> {
        Err(AudioFileError::ReadFailed {
            message: format!("{} is open for writing", self.path.display()),
        })
    }

    fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    fn append(&mut self, channels: &[Vec<f32>]) -> Result<usize, AudioFileError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| AudioFileError::ReadFailed {
                message: "writer already finalized".to_string(),
            })?;
        let expected = self.native.channel_count();
        if channels.len() != expected {
            return Err(AudioFileError::UnsupportedFormat {
                message: format!(
                    "append expects {expected} channels, got {}",
                    channels.len()
                ),
            });
        }
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for frame in 0..frames {
            for channel in channels {
                let sample = channel[frame];
                let write_result = match self.native.encoding {
                    SampleEncoding::Float => writer.write_sample(sample),
                    SampleEncoding::FixedPoint => {
                        let scaled = (sample.clamp(-1.0, 1.0) * 32_767.0).round() as i16;
                        writer.write_sample(scaled)
                    }
                };
                write_result.map_err(|error| AudioFileError::ReadFailed {
                    message: format!("append failed: {error}"),
                })?;
            }
        }
        self.frames_written += frames as u64;
        Ok(frames)
    }
}

impl Drop for WavWriteBackend {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(error) = writer.finalize() {
                tracing::warn!("failed to finalize {}: {error}", self.path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_append_finalize_round_trip() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("out.wav");
        let format = PcmFormat::new(22_050, 2, false, SampleEncoding::Float).expect("format");

        {
            let mut backend = WavWriteBackend::create(&path, format).expect("create wav");
            let frames = backend
                .append(&[vec![0.5, -0.5, 0.25], vec![-0.5, 0.5, -0.25]])
                .expect("append frames");
            assert_eq!(frames, 3);
            assert_eq!(backend.total_frames(), 3);
        }

        let mut reader = hound::WavReader::open(&path).expect("reopen wav");
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 22_050);
        let samples: Vec<f32> = reader
            .samples::<f32>()
            .map(|s| s.expect("sample"))
            .collect();
        assert_eq!(samples, vec![0.5, -0.5, -0.5, 0.5, 0.25, -0.25]);
    }

    #[test]
    fn create_truncates_existing_content() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("overwrite.wav");
        std::fs::write(&path, b"not a wav at all").expect("seed file");

        let format = PcmFormat::new(8_000, 1, false, SampleEncoding::FixedPoint).expect("format");
        let backend = WavWriteBackend::create(&path, format).expect("create over junk");
        drop(backend);

        let reader = hound::WavReader::open(&path).expect("reopen wav");
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn reads_and_seeks_are_rejected() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("writeonly.wav");
        let format = PcmFormat::default_client();
        let mut backend = WavWriteBackend::create(&path, format).expect("create wav");

        assert!(matches!(
            backend.read(8).unwrap_err(),
            AudioFileError::ReadFailed { .. }
        ));
        assert!(matches!(
            backend.seek(0).unwrap_err(),
            AudioFileError::SeekFailed { .. }
        ));
    }

    #[test]
    fn append_rejects_channel_mismatch() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("mismatch.wav");
        let format = PcmFormat::default_client();
        let mut backend = WavWriteBackend::create(&path, format).expect("create wav");

        let err = backend.append(&[vec![0.0; 4]]).unwrap_err();
        assert!(matches!(err, AudioFileError::UnsupportedFormat { .. }));
    }
}
