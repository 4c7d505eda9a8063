//! Worker pool
//!
//! A fixed set of worker threads pulls records from the shared record stream,
//! runs the processor on each one and emits a result. A finalizer thread joins
//! the workers and then drops the last stream senders, which closes the result
//! and error streams.

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, trace, warn};

use super::cancel::{send_or_cancel, CancelToken};
use super::semaphore::Semaphore;
use super::types::{PoolConfig, RecordError};
use crate::error::PipelineError;
use crate::processor::{Outcome, Processor};
use crate::record::{Record, RecordResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    NotStarted,
    Running,
    Draining,
    Stopped,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoolState::NotStarted,
            1 => PoolState::Running,
            2 => PoolState::Draining,
            _ => PoolState::Stopped,
        }
    }
}

/// Per-worker counters, readable while the pool runs.
#[derive(Debug, Default)]
struct WorkerCounters {
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of one worker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub id: usize,
    pub processed: u64,
    pub failed: u64,
}

pub struct WorkerPool {
    config: PoolConfig,
    processor: Arc<dyn Processor>,
    cancel: CancelToken,
    state: Arc<AtomicU8>,
    input: Mutex<Option<Receiver<Record>>>,
    results_rx: Receiver<RecordResult>,
    errors_rx: Receiver<RecordError>,
    /// Senders handed to the workers on start.
    senders: Mutex<Option<(Sender<RecordResult>, Sender<RecordError>)>>,
    counters: Arc<Vec<WorkerCounters>>,
    finalizer: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool that will consume `input` under the `cancel` scope.
    pub fn new(
        config: PoolConfig,
        processor: Arc<dyn Processor>,
        input: Receiver<Record>,
        cancel: CancelToken,
    ) -> Self {
        let workers = config.effective_workers();
        let (results_tx, results_rx) = bounded(config.effective_result_buffer());
        let (errors_tx, errors_rx) = bounded(config.effective_error_buffer());

        Self {
            config,
            processor,
            cancel,
            state: Arc::new(AtomicU8::new(PoolState::NotStarted as u8)),
            input: Mutex::new(Some(input)),
            results_rx,
            errors_rx,
            senders: Mutex::new(Some((results_tx, errors_tx))),
            counters: Arc::new((0..workers).map(|_| WorkerCounters::default()).collect()),
            finalizer: Mutex::new(None),
        }
    }

    /// Spawn the workers and the finalizer. Fails with `AlreadyStarted` on a
    /// second call.
    pub fn start(&self) -> Result<(), PipelineError> {
        if self
            .state
            .compare_exchange(
                PoolState::NotStarted as u8,
                PoolState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(PipelineError::AlreadyStarted);
        }

        let input = lock(&self.input).take();
        let senders = lock(&self.senders).take();
        let (Some(input), Some((results_tx, errors_tx))) = (input, senders) else {
            return Err(PipelineError::AlreadyStarted);
        };

        let semaphore = self.config.active_limit().map(Semaphore::new);
        let workers = self.config.effective_workers();
        debug!(
            workers,
            max_active = ?self.config.active_limit(),
            "starting worker pool"
        );

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    input: input.clone(),
                    results_tx: results_tx.clone(),
                    errors_tx: errors_tx.clone(),
                    processor: Arc::clone(&self.processor),
                    semaphore: semaphore.clone(),
                    cancel: self.cancel.clone(),
                    counters: Arc::clone(&self.counters),
                };
                thread::spawn(move || worker.run())
            })
            .collect();

        drop(results_tx);
        drop(errors_tx);

        let state = Arc::clone(&self.state);
        let finalizer = thread::spawn(move || {
            for handle in handles {
                if handle.join().is_err() {
                    warn!("worker thread panicked");
                }
            }
            state.store(PoolState::Stopped as u8, Ordering::SeqCst);
            debug!("worker pool stopped");
        });
        *lock(&self.finalizer) = Some(finalizer);

        Ok(())
    }

    /// Result stream. Closes once every worker has exited.
    pub fn results(&self) -> Receiver<RecordResult> {
        self.results_rx.clone()
    }

    /// Processor errors, forwarded best-effort: when the stream is full the
    /// error is dropped, since the failed result already carries it.
    pub fn errors(&self) -> Receiver<RecordError> {
        self.errors_rx.clone()
    }

    /// Cancel the pool's scope. Idempotent.
    pub fn stop(&self) {
        if self.cancel.cancel() {
            debug!("worker pool stop requested");
        }
        let _ = self.state.compare_exchange(
            PoolState::Running as u8,
            PoolState::Draining as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Block until every worker has exited. Returns immediately when the
    /// pool was never started or has already been waited on.
    pub fn wait(&self) {
        let finalizer = lock(&self.finalizer).take();
        if let Some(handle) = finalizer {
            if handle.join().is_err() {
                warn!("worker pool finalizer panicked");
            }
        }
    }

    pub fn stop_and_wait(&self) {
        self.stop();
        self.wait();
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn worker_count(&self) -> usize {
        self.config.effective_workers()
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.counters
            .iter()
            .enumerate()
            .map(|(id, c)| WorkerStats {
                id,
                processed: c.processed.load(Ordering::Relaxed),
                failed: c.failed.load(Ordering::Relaxed),
            })
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Worker {
    id: usize,
    input: Receiver<Record>,
    results_tx: Sender<RecordResult>,
    errors_tx: Sender<RecordError>,
    processor: Arc<dyn Processor>,
    semaphore: Option<Semaphore>,
    cancel: CancelToken,
    counters: Arc<Vec<WorkerCounters>>,
}

impl Worker {
    fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let record = select! {
                recv(self.cancel.receiver()) -> _ => break,
                recv(self.input) -> msg => match msg {
                    Ok(record) => record,
                    // Input closed and drained: normal completion
                    Err(_) => break,
                },
            };

            // select! picks at random among ready arms
            if self.cancel.is_cancelled() {
                break;
            }

            if let Some(semaphore) = &self.semaphore {
                if semaphore.acquire_cancellable(&self.cancel).is_err() {
                    break;
                }
            }
            let result = self.process(record);
            if let Some(semaphore) = &self.semaphore {
                semaphore.release();
            }

            if !send_or_cancel(&self.results_tx, result, &self.cancel) {
                break;
            }
        }
        trace!(worker = self.id, "worker exiting");
    }

    fn process(&self, record: Record) -> RecordResult {
        let start = Instant::now();
        let outcome = self.processor.process(&self.cancel, &record);
        let duration = start.elapsed();
        let record = Arc::new(record);

        let counters = &self.counters[self.id];
        counters.processed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(Outcome::Success(payload)) => RecordResult::success(record, payload, duration),
            Ok(Outcome::Skipped) => RecordResult::skipped(record, duration),
            Ok(Outcome::Failed(err)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                RecordResult::failed(record, err, duration)
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                let err = PipelineError::context(
                    "process",
                    record.source.as_str(),
                    record.line_number,
                    err,
                );
                let forwarded = RecordError::for_record(err.clone(), Arc::clone(&record));
                let mut result = RecordResult::failed(record, err, duration);
                match self.errors_tx.try_send(forwarded) {
                    Ok(()) => result.error_forwarded = true,
                    Err(TrySendError::Full(_)) => {
                        trace!(worker = self.id, "error stream full, dropping forwarded error")
                    }
                    Err(TrySendError::Disconnected(_)) => {}
                }
                result
            }
        }
    }
}
