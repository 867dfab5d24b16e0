//! PCM layout descriptors shared by the decoding backend and the client API.

use thiserror::Error;

/// Sample encoding class of a linear PCM stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    /// IEEE floating-point samples.
    Float,
    /// Fixed-point (integer) samples of any width.
    FixedPoint,
}

/// Describes a linear PCM layout.
///
/// A descriptor is immutable once assigned to a live handle; the only way to
/// change the client layout is [`crate::file::AudioFileHandle::set_client_format`],
/// which also resets the converter and scratch state derived from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PcmFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Number of audio channels.
    pub channels: u16,
    /// Whether samples are stored frame-major rather than planar.
    pub interleaved: bool,
    /// Sample encoding class.
    pub encoding: SampleEncoding,
}

/// Validation failures for a [`PcmFormat`].
#[derive(Debug, Error)]
pub enum FormatError {
    /// The sample rate was zero.
    #[error("Sample rate must be greater than zero")]
    ZeroSampleRate,
    /// The channel count was zero.
    #[error("Channel count must be at least one")]
    NoChannels,
}

impl PcmFormat {
    /// Build a descriptor, rejecting degenerate rates and channel counts.
    pub fn new(
        sample_rate: u32,
        channels: u16,
        interleaved: bool,
        encoding: SampleEncoding,
    ) -> Result<Self, FormatError> {
        let format = Self {
            sample_rate,
            channels,
            interleaved,
            encoding,
        };
        format.validate()?;
        Ok(format)
    }

    /// Standard client layout: 44.1 kHz stereo float, planar.
    pub fn default_client() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            interleaved: false,
            encoding: SampleEncoding::Float,
        }
    }

    /// Check the descriptor invariants.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.sample_rate == 0 {
            return Err(FormatError::ZeroSampleRate);
        }
        if self.channels == 0 {
            return Err(FormatError::NoChannels);
        }
        Ok(())
    }

    /// Effective channel count, never below one.
    pub fn channel_count(&self) -> usize {
        self.channels.max(1) as usize
    }
}
