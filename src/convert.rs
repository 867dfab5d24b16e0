//! Conversion of native decoded buffers into client-format planar buffers.
//!
//! Covers channel-count mapping and linear sample-rate interpolation. The
//! converter carries a fractional read phase and the previous tail frame so
//! interpolation stays continuous across read boundaries; both are cleared
//! whenever the cursor seeks or the client format changes.

use crate::backend::BackendRead;
use crate::buffers::FloatChannelBuffers;
use crate::format::PcmFormat;

/// Stateful native-to-client buffer converter owned by the cursor guard.
pub(crate) struct SampleConverter {
    native: PcmFormat,
    client: PcmFormat,
    /// Continuous native-frame position of the next output sample, relative
    /// to the start of the next input buffer. May sit in `[-1, 0)` when the
    /// previous buffer's tail frame is still needed.
    phase: f64,
    /// Last native frame of the previous buffer, one sample per client channel.
    tail: Vec<f32>,
}

impl SampleConverter {
    pub(crate) fn new(native: PcmFormat, client: PcmFormat) -> Self {
        Self {
            native,
            client,
            phase: 0.0,
            tail: Vec::new(),
        }
    }

    pub(crate) fn client_channels(&self) -> usize {
        self.client.channel_count()
    }

    /// Forget interpolation state; required after any cursor reposition.
    pub(crate) fn reset(&mut self) {
        self.phase = 0.0;
        self.tail.clear();
    }

    /// Native frames the backend must produce for `client_frames` of output.
    pub(crate) fn native_frames_for(&self, client_frames: usize) -> usize {
        if self.native.sample_rate == self.client.sample_rate {
            return client_frames;
        }
        let ratio = self.native.sample_rate as f64 / self.client.sample_rate.max(1) as f64;
        (client_frames as f64 * ratio).ceil() as usize + 1
    }

    /// Convert one backend read into client-format planar buffers.
    pub(crate) fn to_client(&mut self, read: BackendRead) -> FloatChannelBuffers {
        let frames = read.frames;
        let end_of_stream = read.end_of_stream;
        let mapped = self.map_channels(read.channels);
        let resampled = self.resample(mapped, frames, end_of_stream);
        FloatChannelBuffers::from_channels(resampled)
    }

    /// Adapt the channel count: extra channels are dropped, missing ones
    /// duplicate the last available channel.
    fn map_channels(&self, mut channels: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
        let target = self.client.channel_count();
        if channels.is_empty() {
            return vec![Vec::new(); target];
        }
        if channels.len() > target {
            channels.truncate(target);
            return channels;
        }
        while channels.len() < target {
            let last = channels.last().cloned().unwrap_or_default();
            channels.push(last);
        }
        channels
    }

    /// Linear interpolation from the native to the client rate.
    fn resample(
        &mut self,
        planar: Vec<Vec<f32>>,
        frames: usize,
        end_of_stream: bool,
    ) -> Vec<Vec<f32>> {
        if self.native.sample_rate == self.client.sample_rate {
            return planar;
        }
        if frames == 0 {
            return vec![Vec::new(); planar.len()];
        }

        let step = self.native.sample_rate as f64 / self.client.sample_rate.max(1) as f64;
        let mut out = vec![Vec::new(); planar.len()];
        let mut t = self.phase;
        loop {
            let idx = t.floor();
            let i = idx as i64;
            if i >= frames as i64 {
                break;
            }
            let next = i + 1;
            if next >= frames as i64 && !end_of_stream {
                // The interpolation partner lives in the next buffer.
                break;
            }
            let frac = (t - idx) as f32;
            for (ch, channel_out) in out.iter_mut().enumerate() {
                let samples = &planar[ch];
                let s0 = if i < 0 {
                    self.tail
                        .get(ch)
                        .copied()
                        .unwrap_or_else(|| samples.first().copied().unwrap_or(0.0))
                } else {
                    samples[i as usize]
                };
                let s1 = if (next as usize) < samples.len() {
                    samples[next as usize]
                } else {
                    s0
                };
                channel_out.push(s0 + (s1 - s0) * frac);
            }
            t += step;
        }

        self.tail = planar
            .iter()
            .map(|channel| channel.last().copied().unwrap_or(0.0))
            .collect();
        self.phase = t - frames as f64;
        out
    }
}
