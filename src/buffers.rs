//! Owned planar float buffers produced by reads and appends.

/// N channels × M samples, planar regardless of the source layout.
///
/// Each buffer is owned exclusively by the call that produced it: streaming
/// reads hand one to the caller per call, and append paths consume one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FloatChannelBuffers {
    channels: Vec<Vec<f32>>,
}

impl FloatChannelBuffers {
    pub(crate) fn from_channels(channels: Vec<Vec<f32>>) -> Self {
        Self { channels }
    }

    /// Build planar buffers from a frame-major (interleaved) sample slice.
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[f32], channels: usize) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (buffer, &sample) in planar.iter_mut().zip(frame) {
                buffer.push(sample);
            }
        }
        Self { channels: planar }
    }

    /// Number of channel buffers.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames held per channel; the shortest channel bounds the count.
    pub fn frame_count(&self) -> usize {
        self.channels
            .iter()
            .map(Vec::len)
            .min()
            .unwrap_or(0)
    }

    /// Borrow one channel's samples.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Borrow all channel buffers.
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Take ownership of the channel buffers.
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Flatten to a frame-major (interleaved) sample vector.
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frame_count();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for frame in 0..frames {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }
}
