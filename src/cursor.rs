//! Exclusive frame-cursor guard shared by streaming reads and waveform scans.
//!
//! The backend's cursor is a single mutable resource. Every operation that
//! touches it goes through a non-blocking try-lock: a contended call is a
//! silent no-op surfaced as [`AudioFileError::OperationSkipped`], never a
//! queued wait. This trades missed reads for freedom from deadlock between
//! a caller's own read loop and a background waveform scan.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use crate::backend::DecodingBackend;
use crate::buffers::FloatChannelBuffers;
use crate::convert::SampleConverter;
use crate::error::AudioFileError;
use crate::format::PcmFormat;

/// Observer invoked synchronously inside the cursor critical section.
pub trait CursorObserver: Send {
    /// Called after the cursor lands on a new frame position.
    fn on_position_changed(&mut self, _frame: u64) {}

    /// Called after a read produced client-format buffers.
    fn on_frames_read(&mut self, _buffers: &FloatChannelBuffers, _frames: usize, _channels: u16) {}
}

/// Outcome of one streaming read.
#[derive(Debug)]
pub struct ReadOutcome {
    /// Planar client-format buffers for this read.
    pub buffers: FloatChannelBuffers,
    /// Client frames delivered.
    pub frames: usize,
    /// Whether the file has no further frames.
    pub end_of_file: bool,
}

/// Everything living behind the cursor lock.
pub(crate) struct CursorState {
    pub(crate) backend: Box<dyn DecodingBackend>,
    pub(crate) converter: SampleConverter,
    /// Native-frame cursor position, kept in `[0, total_frames]`.
    pub(crate) position: u64,
    pub(crate) observer: Option<Box<dyn CursorObserver>>,
}

impl CursorState {
    pub(crate) fn read_frames(&mut self, max_frames: usize) -> Result<ReadOutcome, AudioFileError> {
        let native_needed = self.converter.native_frames_for(max_frames);
        let read = self.backend.read(native_needed)?;
        self.position = self.position.saturating_add(read.frames as u64);
        let end_of_file = read.end_of_stream;

        let buffers = self.converter.to_client(read);
        let frames = buffers.frame_count();
        let channels = buffers.channel_count().min(u16::MAX as usize) as u16;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_frames_read(&buffers, frames, channels);
            observer.on_position_changed(self.position);
        }
        Ok(ReadOutcome {
            buffers,
            frames,
            end_of_file,
        })
    }

    pub(crate) fn seek(&mut self, frame: u64) -> Result<(), AudioFileError> {
        if frame > self.backend.total_frames() {
            return Err(AudioFileError::SeekFailed {
                frame,
                message: "beyond end of file".to_string(),
            });
        }
        self.backend.seek(frame)?;
        self.position = frame;
        self.converter.reset();
        if let Some(observer) = self.observer.as_mut() {
            observer.on_position_changed(frame);
        }
        Ok(())
    }

    pub(crate) fn append(&mut self, channels: &[Vec<f32>]) -> Result<usize, AudioFileError> {
        let frames = self.backend.append(channels)?;
        self.position = self.backend.total_frames();
        Ok(frames)
    }

    /// Swap the client layout, rebuilding the converter and scratch state.
    pub(crate) fn set_client_format(&mut self, client: PcmFormat) {
        self.converter = SampleConverter::new(self.backend.native_format(), client);
    }
}

/// Serializes every cursor-touching operation behind one try-lock.
pub(crate) struct FrameGuard {
    state: Mutex<CursorState>,
    /// Lock-free mirror of the cursor for position queries.
    position: AtomicU64,
}

impl FrameGuard {
    pub(crate) fn new(state: CursorState) -> Self {
        let position = AtomicU64::new(state.position);
        Self {
            state: Mutex::new(state),
            position,
        }
    }

    /// Run `op` with the cursor held, or skip when a concurrent caller has it.
    pub(crate) fn with_state<T>(
        &self,
        op: impl FnOnce(&mut CursorState) -> T,
    ) -> Result<T, AudioFileError> {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(AudioFileError::OperationSkipped),
        };
        let out = op(&mut state);
        self.position.store(state.position, Ordering::Release);
        Ok(out)
    }

    /// Blocking variant for setup paths that never contend with reads.
    pub(crate) fn lock_blocking(&self) -> MutexGuard<'_, CursorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last cursor position published by a completed operation.
    pub(crate) fn current_frame(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::SynthBackend;
    use crate::format::{PcmFormat, SampleEncoding};
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn stereo(rate: u32) -> PcmFormat {
        PcmFormat::new(rate, 2, false, SampleEncoding::Float).expect("valid format")
    }

    fn guard_over(frames: usize, value: f32) -> FrameGuard {
        let native = stereo(44_100);
        let backend = SynthBackend::constant(native, frames, value);
        let converter = SampleConverter::new(native, native);
        FrameGuard::new(CursorState {
            backend: Box::new(backend),
            converter,
            position: 0,
            observer: None,
        })
    }

    #[test]
    fn read_advances_published_position() {
        let guard = guard_over(100, 0.25);
        let outcome = guard
            .with_state(|state| state.read_frames(40))
            .expect("lock free")
            .expect("read ok");
        assert_eq!(outcome.frames, 40);
        assert!(!outcome.end_of_file);
        assert_eq!(guard.current_frame(), 40);
    }

    #[test]
    fn seek_beyond_end_is_rejected() {
        let guard = guard_over(10, 0.0);
        let result = guard
            .with_state(|state| state.seek(11))
            .expect("lock free");
        assert!(matches!(
            result.unwrap_err(),
            AudioFileError::SeekFailed { frame: 11, .. }
        ));
        assert_eq!(guard.current_frame(), 0);
    }

    #[test]
    fn contended_lock_skips_instead_of_blocking() {
        let guard = Arc::new(guard_over(1_000, 0.1));
        let barrier = Arc::new(Barrier::new(2));
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let guard = Arc::clone(&guard);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                guard
                    .with_state(|_state| {
                        barrier.wait();
                        release_rx
                            .recv_timeout(Duration::from_secs(2))
                            .expect("release signal");
                    })
                    .expect("first locker wins");
            })
        };

        barrier.wait();
        let err = guard.with_state(|_state| ()).unwrap_err();
        assert!(matches!(err, AudioFileError::OperationSkipped));

        release_tx.send(()).expect("send release");
        holder.join().expect("join holder");

        // The lock is free again afterwards.
        assert!(guard.with_state(|_state| ()).is_ok());
    }

    #[test]
    fn observer_sees_reads_and_position_changes() {
        struct Recorder {
            events: mpsc::Sender<(u64, usize)>,
            last_read: usize,
        }
        impl CursorObserver for Recorder {
            fn on_position_changed(&mut self, frame: u64) {
                self.events
                    .send((frame, self.last_read))
                    .expect("send event");
            }
            fn on_frames_read(
                &mut self,
                _buffers: &FloatChannelBuffers,
                frames: usize,
                _channels: u16,
            ) {
                self.last_read = frames;
            }
        }

        let guard = guard_over(50, 0.5);
        let (events, seen) = mpsc::channel();
        guard.lock_blocking().observer = Some(Box::new(Recorder {
            events,
            last_read: 0,
        }));

        guard
            .with_state(|state| state.read_frames(20))
            .expect("lock free")
            .expect("read ok");
        guard
            .with_state(|state| state.seek(5))
            .expect("lock free")
            .expect("seek ok");

        assert_eq!(seen.try_recv().expect("read event"), (20, 20));
        assert_eq!(seen.try_recv().expect("seek event"), (5, 20));
    }

    #[test]
    fn set_client_format_resets_converter_channels() {
        let guard = guard_over(10, 0.5);
        let mono = PcmFormat::new(44_100, 1, false, SampleEncoding::Float).expect("mono");
        let outcome = guard
            .with_state(|state| {
                state.set_client_format(mono);
                state.read_frames(4)
            })
            .expect("lock free")
            .expect("read ok");
        assert_eq!(outcome.buffers.channel_count(), 1);
    }
}
