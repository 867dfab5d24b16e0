//! Caller-facing audio file handles.
//!
//! A handle owns its backend, converter and cursor guard; they are torn
//! down together when the handle drops. The handle itself is owned by the
//! caller that opened it, while its guard is shared internally with the
//! waveform service for background scans.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{self, DecodingBackend, Permission};
use crate::buffers::FloatChannelBuffers;
use crate::convert::SampleConverter;
use crate::cursor::{CursorObserver, CursorState, FrameGuard, ReadOutcome};
use crate::error::AudioFileError;
use crate::format::PcmFormat;
use crate::waveform::{
    CancellationToken, WaveformEnvelope, WaveformError, WaveformService, WaveformTaskHandle,
};

/// File identity used to key the process-wide envelope cache.
///
/// Two handles opened on the same location share one key, so they can share
/// cached envelopes while keeping independent cursors and tasks.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileKey(PathBuf);

impl FileKey {
    /// Canonicalize `path` when possible, falling back to the given form.
    pub fn for_path(path: &Path) -> Self {
        Self(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
    }

    /// The identity path.
    pub fn path(&self) -> &Path {
        &self.0
    }
}

pub(crate) struct FileInner {
    pub(crate) key: FileKey,
    pub(crate) guard: FrameGuard,
}

/// Handle to one audio file: streaming reads, seeks and waveform queries.
pub struct AudioFileHandle {
    inner: Arc<FileInner>,
    path: PathBuf,
    permission: Permission,
    native_format: PcmFormat,
    client_format: Mutex<PcmFormat>,
    metadata: HashMap<String, String>,
    total_frames: AtomicU64,
    pending: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for AudioFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFileHandle")
            .field("path", &self.path)
            .field("permission", &self.permission)
            .field("native_format", &self.native_format)
            .field("total_frames", &self.total_frames)
            .finish_non_exhaustive()
    }
}

impl AudioFileHandle {
    /// Open an existing file for decoding with the standard client layout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AudioFileError> {
        Self::open_with_client_format(path, PcmFormat::default_client())
    }

    /// Open an existing file for decoding with an explicit client layout.
    pub fn open_with_client_format(
        path: impl AsRef<Path>,
        client: PcmFormat,
    ) -> Result<Self, AudioFileError> {
        let path = path.as_ref();
        validate_client(&client)?;
        let backend = backend::open(path, Permission::Read, None)?;
        Ok(Self::from_backend(path, Permission::Read, backend, client))
    }

    /// Create (or truncate) a file for appending with the given native layout.
    pub fn create(
        path: impl AsRef<Path>,
        native: PcmFormat,
    ) -> Result<Self, AudioFileError> {
        let path = path.as_ref();
        let backend = backend::open(path, Permission::ReadWriteCreate, Some(native))?;
        Ok(Self::from_backend(
            path,
            Permission::ReadWriteCreate,
            backend,
            PcmFormat::default_client(),
        ))
    }

    fn from_backend(
        path: &Path,
        permission: Permission,
        backend: Box<dyn DecodingBackend>,
        client: PcmFormat,
    ) -> Self {
        let native_format = backend.native_format();
        let metadata = backend.metadata().clone();
        let total_frames = AtomicU64::new(backend.total_frames());
        let converter = SampleConverter::new(native_format, client);
        let inner = FileInner {
            key: FileKey::for_path(path),
            guard: FrameGuard::new(CursorState {
                backend,
                converter,
                position: 0,
                observer: None,
            }),
        };
        Self {
            inner: Arc::new(inner),
            path: path.to_path_buf(),
            permission,
            native_format,
            client_format: Mutex::new(client),
            metadata,
            total_frames,
            pending: Mutex::new(None),
        }
    }

    /// Location this handle was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cache identity of the underlying file.
    pub fn key(&self) -> &FileKey {
        &self.inner.key
    }

    /// Access mode the handle was opened with.
    pub fn permission(&self) -> Permission {
        self.permission
    }

    /// Native PCM layout reported by the container.
    pub fn native_format(&self) -> PcmFormat {
        self.native_format
    }

    /// Client PCM layout reads are converted into.
    pub fn client_format(&self) -> PcmFormat {
        *self
            .client_format
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap the client layout; resets the converter and its scratch state.
    ///
    /// Skipped (like any cursor-touching operation) when the cursor is busy.
    pub fn set_client_format(&self, client: PcmFormat) -> Result<(), AudioFileError> {
        validate_client(&client)?;
        self.inner
            .guard
            .with_state(|state| state.set_client_format(client))?;
        *self
            .client_format
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = client;
        Ok(())
    }

    /// Total native frames in the file.
    pub fn total_native_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    /// File duration derived from the native frame count.
    pub fn duration_seconds(&self) -> f64 {
        self.total_native_frames() as f64 / self.native_format.sample_rate.max(1) as f64
    }

    /// File length re-expressed in client-rate frames.
    ///
    /// Duration-based rescaling happens only here, never inside the
    /// waveform scan, which walks the file in native frames.
    pub fn client_frame_length(&self) -> u64 {
        let client = self.client_format();
        if client.sample_rate == self.native_format.sample_rate {
            return self.total_native_frames();
        }
        (self.duration_seconds() * client.sample_rate as f64).round() as u64
    }

    /// Cursor position as of the last completed operation.
    pub fn current_frame(&self) -> u64 {
        self.inner.guard.current_frame()
    }

    /// Embedded tag/info entries read at open time.
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Install (or clear) the observer notified inside the critical section.
    pub fn set_observer(&self, observer: Option<Box<dyn CursorObserver>>) {
        self.inner.guard.lock_blocking().observer = observer;
    }

    /// Read up to `max_frames` client-format frames at the cursor.
    ///
    /// Skipped with [`AudioFileError::OperationSkipped`] when a concurrent
    /// caller holds the cursor.
    pub fn read_frames(&self, max_frames: usize) -> Result<ReadOutcome, AudioFileError> {
        self.inner
            .guard
            .with_state(|state| state.read_frames(max_frames))?
    }

    /// Move the cursor so the next read starts at `frame`.
    pub fn seek_to_frame(&self, frame: u64) -> Result<(), AudioFileError> {
        self.inner.guard.with_state(|state| state.seek(frame))?
    }

    /// Append planar frames to a handle opened with create permission.
    pub fn append_frames(&self, buffers: &FloatChannelBuffers) -> Result<usize, AudioFileError> {
        let frames = self
            .inner
            .guard
            .with_state(|state| state.append(buffers.channels()))??;
        self.total_frames
            .fetch_add(frames as u64, Ordering::AcqRel);
        Ok(frames)
    }

    /// Compute an envelope synchronously on the caller's thread.
    ///
    /// Contends for the cursor like any read; yields
    /// [`WaveformError::Skipped`] instead of waiting.
    pub fn waveform(&self, point_count: usize) -> Result<WaveformEnvelope, WaveformError> {
        let token = CancellationToken::new();
        match self
            .inner
            .guard
            .with_state(|state| crate::waveform::compute_envelope(state, point_count, &token))
        {
            Ok(result) => result,
            Err(AudioFileError::OperationSkipped) => Err(WaveformError::Skipped),
            Err(error) => Err(WaveformError::Scan(error)),
        }
    }

    /// Request an envelope asynchronously through the shared service.
    ///
    /// A cache hit invokes `completion` synchronously on the caller's
    /// thread; otherwise the computation is queued on the worker pool and
    /// `completion` runs on a worker. The handle tracks the returned task
    /// so [`AudioFileHandle::cancel_waveform`] can abandon it; a cancelled
    /// task never invokes its completion.
    pub fn request_waveform(
        &self,
        service: &WaveformService,
        point_count: usize,
        completion: impl FnOnce(Result<Arc<WaveformEnvelope>, WaveformError>) + Send + 'static,
    ) -> Result<WaveformTaskHandle, WaveformError> {
        if point_count == 0 {
            return Err(WaveformError::InvalidPointCount);
        }
        if let Some(hit) = service.cache().get(&self.inner.key, point_count) {
            completion(Ok(hit));
            return Ok(WaveformTaskHandle::new(CancellationToken::new()));
        }

        let token = CancellationToken::new();
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        service.submit(crate::waveform::Job {
            file: Arc::clone(&self.inner),
            point_count,
            token: token.clone(),
            completion: Box::new(completion),
        });
        Ok(WaveformTaskHandle::new(token))
    }

    /// Cancel this handle's tracked in-flight envelope request, if any.
    ///
    /// Tasks issued by other handles, even on the same file, are unaffected.
    pub fn cancel_waveform(&self) {
        if let Some(token) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            token.cancel();
        }
    }
}

fn validate_client(client: &PcmFormat) -> Result<(), AudioFileError> {
    client
        .validate()
        .map_err(|error| AudioFileError::UnsupportedFormat {
            message: error.to_string(),
        })
}
