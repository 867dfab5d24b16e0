//! Symphonia-backed read path for the decoding boundary.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision};
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat;
use symphonia::core::units::Time;

use super::{BackendRead, DecodingBackend};
use crate::error::AudioFileError;
use crate::format::{PcmFormat, SampleEncoding};

/// Decoder that exposes an arbitrary container/codec as seekable PCM frames.
pub struct SymphoniaBackend {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    path: PathBuf,
    native: PcmFormat,
    total_frames: u64,
    metadata: HashMap<String, String>,
    /// Frames to drop because the container seek landed before the target.
    skip_frames: u64,
    pending: Vec<Vec<f32>>,
    pending_offset: usize,
    ended: bool,
}

impl SymphoniaBackend {
    /// Probe and open `path` for decoding.
    pub fn open(path: &Path) -> Result<Self, AudioFileError> {
        let file = File::open(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                AudioFileError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                AudioFileError::OpenFailed {
                    path: path.to_path_buf(),
                    message: source.to_string(),
                }
            }
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|error| AudioFileError::OpenFailed {
                path: path.to_path_buf(),
                message: format!("probe failed: {error}"),
            })?;

        let mut metadata = HashMap::new();
        if let Some(revision) = probed.format.metadata().current() {
            collect_tags(&mut metadata, revision);
        } else if let Some(revision) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            collect_tags(&mut metadata, revision);
        }

        let reader = probed.format;
        let track = reader
            .default_track()
            .ok_or_else(|| AudioFileError::OpenFailed {
                path: path.to_path_buf(),
                message: "no default track".to_string(),
            })?;
        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params.sample_rate.unwrap_or(44_100);
        let channels = params
            .channels
            .map(|channels| channels.count() as u16)
            .unwrap_or(2);
        let encoding = match params.sample_format {
            Some(SampleFormat::F32 | SampleFormat::F64) => SampleEncoding::Float,
            _ => SampleEncoding::FixedPoint,
        };
        let total_frames = params.n_frames.unwrap_or(0);

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|error| AudioFileError::OpenFailed {
                path: path.to_path_buf(),
                message: format!("decoder creation failed: {error}"),
            })?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            path: path.to_path_buf(),
            native: PcmFormat {
                sample_rate,
                channels,
                // Containers store frame-major data; decoded access is planar.
                interleaved: true,
                encoding,
            },
            total_frames,
            metadata,
            skip_frames: 0,
            pending: Vec::new(),
            pending_offset: 0,
            ended: false,
        })
    }

    fn pending_frames(&self) -> usize {
        self.pending.first().map(Vec::len).unwrap_or(0)
    }

    fn pending_exhausted(&self) -> bool {
        self.pending_offset >= self.pending_frames()
    }

    /// Decode packets until planar frames are pending or the stream ends.
    fn decode_next_packet(&mut self) -> Result<(), AudioFileError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref error))
                    if error.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.ended = true;
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.ended = true;
                    return Ok(());
                }
                Err(error) => {
                    return Err(AudioFileError::ReadFailed {
                        message: error.to_string(),
                    });
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(error)) => {
                    tracing::warn!("recoverable decode error in {}: {error}", self.path.display());
                    continue;
                }
                Err(error) => {
                    return Err(AudioFileError::ReadFailed {
                        message: error.to_string(),
                    });
                }
            };
            Self::stash_planar(
                &mut self.pending,
                &mut self.pending_offset,
                &mut self.skip_frames,
                &mut self.ended,
                &self.path,
                decoded,
            );
            if self.ended || self.pending_frames() > 0 {
                return Ok(());
            }
        }
    }

    /// Convert a decoded buffer to planar f32, honoring the post-seek skip.
    fn stash_planar(
        pending_out: &mut Vec<Vec<f32>>,
        pending_offset: &mut usize,
        skip_frames: &mut u64,
        ended: &mut bool,
        path: &Path,
        decoded: AudioBufferRef<'_>,
    ) {
        let channels = decoded.spec().channels.count().max(1);
        let frames = decoded.frames();
        let skip = (*skip_frames).min(frames as u64) as usize;
        *skip_frames -= skip as u64;

        *pending_out = vec![Vec::with_capacity(frames - skip); channels];
        *pending_offset = 0;

        match decoded {
            AudioBufferRef::F32(buf) => {
                for (ch, pending) in pending_out.iter_mut().enumerate() {
                    pending.extend(buf.chan(ch)[skip..].iter().copied());
                }
            }
            AudioBufferRef::S8(buf) => {
                for (ch, pending) in pending_out.iter_mut().enumerate() {
                    pending.extend(buf.chan(ch)[skip..].iter().map(|&v| v as f32 / 128.0));
                }
            }
            AudioBufferRef::S16(buf) => {
                for (ch, pending) in pending_out.iter_mut().enumerate() {
                    pending.extend(buf.chan(ch)[skip..].iter().map(|&v| v as f32 / 32_768.0));
                }
            }
            AudioBufferRef::S24(buf) => {
                for (ch, pending) in pending_out.iter_mut().enumerate() {
                    pending.extend(
                        buf.chan(ch)[skip..]
                            .iter()
                            .map(|v| v.0 as f32 / 8_388_608.0),
                    );
                }
            }
            AudioBufferRef::S32(buf) => {
                for (ch, pending) in pending_out.iter_mut().enumerate() {
                    pending.extend(
                        buf.chan(ch)[skip..]
                            .iter()
                            .map(|&v| v as f32 / 2_147_483_648.0),
                    );
                }
            }
            AudioBufferRef::U8(buf) => {
                for (ch, pending) in pending_out.iter_mut().enumerate() {
                    pending.extend(
                        buf.chan(ch)[skip..]
                            .iter()
                            .map(|&v| v as f32 / 128.0 - 1.0),
                    );
                }
            }
            AudioBufferRef::U16(buf) => {
                for (ch, pending) in pending_out.iter_mut().enumerate() {
                    pending.extend(
                        buf.chan(ch)[skip..]
                            .iter()
                            .map(|&v| v as f32 / 32_768.0 - 1.0),
                    );
                }
            }
            AudioBufferRef::U24(buf) => {
                for (ch, pending) in pending_out.iter_mut().enumerate() {
                    pending.extend(
                        buf.chan(ch)[skip..]
                            .iter()
                            .map(|v| v.0 as f32 / 8_388_608.0 - 1.0),
                    );
                }
            }
            AudioBufferRef::U32(buf) => {
                for (ch, pending) in pending_out.iter_mut().enumerate() {
                    pending.extend(
                        buf.chan(ch)[skip..]
                            .iter()
                            .map(|&v| v as f32 / 2_147_483_648.0 - 1.0),
                    );
                }
            }
            _ => {
                tracing::warn!(
                    "unsupported decoded sample layout in {}",
                    path.display()
                );
                pending_out.clear();
                *ended = true;
            }
        }
    }
}

impl DecodingBackend for SymphoniaBackend {
    fn native_format(&self) -> PcmFormat {
        self.native
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn seek(&mut self, frame: u64) -> Result<(), AudioFileError> {
        if frame > self.total_frames {
            return Err(AudioFileError::SeekFailed {
                frame,
                message: "beyond end of file".to_string(),
            });
        }
        // Nothing to rewind through in an empty stream.
        if self.total_frames == 0 {
            self.decoder.reset();
            self.pending.clear();
            self.pending_offset = 0;
            self.skip_frames = 0;
            return Ok(());
        }

        let rate = self.native.sample_rate.max(1) as f64;
        let seconds = frame as f64 / rate;
        let time = Time::new(seconds.trunc() as u64, seconds.fract());
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|error| AudioFileError::SeekFailed {
                frame,
                message: error.to_string(),
            })?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_offset = 0;
        self.ended = false;
        // Container seeks may land on a packet boundary before the target.
        self.skip_frames = frame.saturating_sub(seeked.actual_ts);
        Ok(())
    }

    fn read(&mut self, max_frames: usize) -> Result<BackendRead, AudioFileError> {
        let channels = self.native.channel_count();
        let mut out: Vec<Vec<f32>> = vec![Vec::new(); channels];
        let mut produced = 0usize;

        while produced < max_frames {
            if !self.pending_exhausted() {
                let available = self.pending_frames() - self.pending_offset;
                let take = available.min(max_frames - produced);
                for (ch, buffer) in out.iter_mut().enumerate() {
                    let source = self
                        .pending
                        .get(ch)
                        .or_else(|| self.pending.last())
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    let end = (self.pending_offset + take).min(source.len());
                    buffer.extend_from_slice(&source[self.pending_offset.min(end)..end]);
                }
                self.pending_offset += take;
                produced += take;
                continue;
            }
            if self.ended {
                break;
            }
            self.decode_next_packet()?;
        }

        Ok(BackendRead {
            channels: out,
            frames: produced,
            end_of_stream: self.ended && self.pending_exhausted(),
        })
    }

    fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

fn collect_tags(map: &mut HashMap<String, String>, revision: &MetadataRevision) {
    for tag in revision.tags() {
        let key = tag
            .std_key
            .map(|std| format!("{std:?}"))
            .unwrap_or_else(|| tag.key.clone());
        map.insert(key, tag.value.to_string());
    }
}
