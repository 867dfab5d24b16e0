//! Shared waveform service: a bounded worker pool plus the envelope cache.
//!
//! The service is constructed explicitly (typically once at startup) and
//! passed to whoever needs it; there is no lazily initialized global. Drop
//! tears the pool down after the queued work drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::cache::EnvelopeCache;
use super::{WaveformEnvelope, WaveformError, compute_envelope};
use crate::config::EngineConfig;
use crate::error::AudioFileError;
use crate::file::FileInner;

/// Cooperative cancellation flag polled once per envelope point.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal disinterest; the computation stops at its next poll.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Callback invoked with the outcome of an asynchronous envelope request.
///
/// Runs on the worker thread for computed results and on the caller's
/// thread for cache hits. Never invoked for a cancelled task.
pub type WaveformCompletion =
    Box<dyn FnOnce(Result<Arc<WaveformEnvelope>, WaveformError>) + Send + 'static>;

/// Tracks one in-flight envelope computation so it can be cancelled.
pub struct WaveformTaskHandle {
    token: CancellationToken,
}

impl WaveformTaskHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Mark this task cancelled; other tasks on the same file are unaffected.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether this task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub(crate) struct Job {
    pub(crate) file: Arc<FileInner>,
    pub(crate) point_count: usize,
    pub(crate) token: CancellationToken,
    pub(crate) completion: WaveformCompletion,
}

/// Bounded pool executing envelope scans off the caller's thread.
pub struct WaveformService {
    cache: Arc<EnvelopeCache>,
    queue: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WaveformService {
    /// Spawn workers and size the cache according to `config`.
    pub fn new(config: &EngineConfig) -> Self {
        let config = config.clone().normalized();
        let cache = Arc::new(EnvelopeCache::new(config.cache_entries));
        let (queue, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let receiver = Arc::clone(&receiver);
            let cache = Arc::clone(&cache);
            let spawned = thread::Builder::new()
                .name(format!("waveform-worker-{index}"))
                .spawn(move || worker_loop(receiver, cache));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(error) => tracing::error!("failed to spawn waveform worker: {error}"),
            }
        }

        Self {
            cache,
            queue: Some(queue),
            workers,
        }
    }

    /// The shared envelope cache.
    pub fn cache(&self) -> &EnvelopeCache {
        &self.cache
    }

    /// Drop every cached envelope, e.g. on a memory-pressure signal.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job; degrades to inline execution when no worker is alive so
    /// the completion is still eventually invoked.
    pub(crate) fn submit(&self, job: Job) {
        let Some(queue) = self.queue.as_ref() else {
            run_job(job, &self.cache);
            return;
        };
        if self.workers.is_empty() {
            run_job(job, &self.cache);
            return;
        }
        if let Err(mpsc::SendError(job)) = queue.send(job) {
            run_job(job, &self.cache);
        }
    }
}

impl Drop for WaveformService {
    fn drop(&mut self) {
        drop(self.queue.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("waveform worker panicked");
            }
        }
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>, cache: Arc<EnvelopeCache>) {
    loop {
        let job = {
            let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.recv()
        };
        let Ok(job) = job else {
            break;
        };
        run_job(job, &cache);
    }
}

fn run_job(job: Job, cache: &EnvelopeCache) {
    // A task cancelled before its worker starts must stay completely silent:
    // no completion, no cache write.
    if job.token.is_cancelled() {
        return;
    }
    if let Some(hit) = cache.get(&job.file.key, job.point_count) {
        if !job.token.is_cancelled() {
            (job.completion)(Ok(hit));
        }
        return;
    }

    let scanned = job
        .file
        .guard
        .with_state(|state| compute_envelope(state, job.point_count, &job.token));
    let result = match scanned {
        Ok(result) => result.map(Arc::new),
        Err(AudioFileError::OperationSkipped) => Err(WaveformError::Skipped),
        Err(error) => Err(WaveformError::Scan(error)),
    };

    match result {
        Ok(envelope) => {
            cache.insert(job.file.key.clone(), Arc::clone(&envelope));
            if !job.token.is_cancelled() {
                (job.completion)(Ok(envelope));
            }
        }
        Err(WaveformError::Cancelled) => {}
        Err(error) => {
            if !job.token.is_cancelled() {
                (job.completion)(Err(error));
            }
        }
    }
}
