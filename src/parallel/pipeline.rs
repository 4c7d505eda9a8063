//! Pipeline orchestrator
//!
//! Wires the source reader, the worker pool and the three stream consumers
//! together under one cancellation scope, then finalizes and reports.
//!
//! ```text
//! sources -> SourceReader -> records -> WorkerPool -> results ----> tracker/summary/collector/output
//!                 |                          `------> pool errors -> collector
//!                 `---------------------------------> reader errors -> collector
//! ```

use crossbeam_channel::{bounded, select};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::reader::{source_names, SourceReader};
use super::tracker::{MultiTracker, ProgressConfig, Stats};
use super::types::{PoolConfig, ReaderConfig, RecordError};
use super::worker::{WorkerPool, WorkerStats};
use crate::collector::{CollectorConfig, ErrorCollector, ErrorEntry};
use crate::error::PipelineError;
use crate::error_handling::ErrorReporter;
use crate::platform::{ExitCode, OutputSink, ReportSink, SignalHandler};
use crate::processor::Processor;
use crate::record::{Record, RecordResult};
use crate::stats::{Summary, SummarySnapshot};

/// With more errors than this the final report lists the most common
/// messages instead of every entry.
const DETAILED_REPORT_LIMIT: usize = 5;
const TOP_ERRORS: usize = 5;
const DETAILED_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Running,
    Finalized,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Created,
            1 => PipelineState::Running,
            _ => PipelineState::Finalized,
        }
    }
}

/// Everything a [`Pipeline`] needs apart from the processor and output.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub reader: ReaderConfig,
    pub pool: PoolConfig,
    pub collector: CollectorConfig,
    /// Progress reporting is silent when `progress.sink` is `None`.
    pub progress: ProgressConfig,
    /// Destination of the final error report; `None` suppresses it.
    pub report: Option<ReportSink>,
    /// Install SIGINT/SIGTERM handling for the duration of `run`.
    pub handle_signals: bool,
}

pub struct Pipeline {
    options: PipelineOptions,
    processor: Arc<dyn Processor>,
    cancel: CancelToken,
    state: AtomicU8,
    collector: Arc<ErrorCollector>,
    summary: Summary,
    tracker: MultiTracker,
    output: Mutex<Option<OutputSink>>,
    output_error: Mutex<Option<String>>,
    pool: Mutex<Option<Arc<WorkerPool>>>,
    worker_stats: Mutex<Vec<WorkerStats>>,
    signal_exit: Mutex<Option<ExitCode>>,
}

impl Pipeline {
    pub fn new(options: PipelineOptions, processor: Arc<dyn Processor>) -> Self {
        let collector = Arc::new(ErrorCollector::new(options.collector));
        let tracker = MultiTracker::new(options.progress.clone());
        for name in source_names(&options.reader.sources) {
            tracker.add_source(name, 0);
        }

        Self {
            options,
            processor,
            cancel: CancelToken::new(),
            state: AtomicU8::new(PipelineState::Created as u8),
            collector,
            summary: Summary::new(),
            tracker,
            output: Mutex::new(None),
            output_error: Mutex::new(None),
            pool: Mutex::new(None),
            worker_stats: Mutex::new(Vec::new()),
            signal_exit: Mutex::new(None),
        }
    }

    /// Send the JSON payload of every successful record to `sink`.
    pub fn with_output(self, sink: OutputSink) -> Self {
        *lock(&self.output) = Some(sink);
        self
    }

    /// Process every source to completion or cancellation. Single-use: a
    /// second call fails with `AlreadyRan`.
    ///
    /// Returns `Aborted` when the run stopped because the error threshold
    /// was breached. Signal and `stop()` cancellations return `Ok`.
    pub fn run(&self) -> Result<(), PipelineError> {
        if self
            .state
            .compare_exchange(
                PipelineState::Created as u8,
                PipelineState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(PipelineError::AlreadyRan);
        }
        self.summary.start();

        info!(
            sources = self.options.reader.sources.len(),
            workers = self.options.pool.effective_workers(),
            "pipeline starting"
        );

        let signals = if self.options.handle_signals {
            match SignalHandler::install(self.cancel.clone()) {
                Ok(handler) => Some(handler),
                Err(e) => {
                    warn!(error = %e, "could not install signal handler");
                    None
                }
            }
        } else {
            None
        };

        let result = self.execute();

        if let Some(handler) = signals {
            *lock(&self.signal_exit) = handler.exit_code();
        }
        self.finalize();

        result?;

        if let Some(message) = lock(&self.output_error).take() {
            return Err(PipelineError::Io(message));
        }

        if self.collector.threshold_breached() {
            info!("pipeline aborted by error threshold");
            return Err(PipelineError::Aborted);
        }
        Ok(())
    }

    fn execute(&self) -> Result<(), PipelineError> {
        self.tracker.start()?;

        let reader = SourceReader::new(self.options.reader.clone());
        let streams = reader.read(&self.cancel);

        let pool = Arc::new(WorkerPool::new(
            self.options.pool.clone(),
            Arc::clone(&self.processor),
            streams.records,
            self.cancel.clone(),
        ));
        if let Err(e) = pool.start() {
            self.cancel.cancel();
            streams.handle.join();
            return Err(e);
        }
        *lock(&self.pool) = Some(Arc::clone(&pool));

        let results = pool.results();
        let pool_errors = pool.errors();
        let reader_errors = streams.errors;
        let (done_tx, done_rx) = bounded::<()>(0);

        thread::scope(|scope| {
            let escalator = scope.spawn(|| {
                let threshold = self.collector.cancel_token();
                select! {
                    recv(threshold.receiver()) -> _ => {
                        if self.cancel.cancel() {
                            warn!("error threshold breached, cancelling pipeline");
                        }
                    }
                    recv(self.cancel.receiver()) -> _ => {}
                    recv(done_rx) -> _ => {}
                }
            });

            let consumers = [
                scope.spawn(|| {
                    // Drains even after cancellation so workers blocked on
                    // emit can exit.
                    for result in results.iter() {
                        self.account_result(result);
                    }
                    debug!("result stream closed");
                }),
                scope.spawn(|| {
                    for err in reader_errors.iter() {
                        self.account_reader_error(err);
                    }
                    debug!("reader error stream closed");
                }),
                scope.spawn(|| {
                    for err in pool_errors.iter() {
                        self.collect(err.error, err.record);
                    }
                    debug!("pool error stream closed");
                }),
            ];

            for consumer in consumers {
                if consumer.join().is_err() {
                    warn!("stream consumer panicked");
                }
            }
            drop(done_tx);
            let _ = escalator.join();
        });

        streams.handle.join();
        pool.wait();
        *lock(&self.worker_stats) = pool.worker_stats();
        Ok(())
    }

    fn account_result(&self, result: RecordResult) {
        self.tracker.record_result(&result);
        self.summary.add_result(&result);
        self.collector.increment_processed();

        if result.is_failed() && !result.error_forwarded {
            if let Some(error) = result.error.clone() {
                self.collect(error, Some(Arc::clone(&result.record)));
            }
        }

        if let Some(payload) = &result.payload {
            self.write_output(&payload.to_string());
        }
    }

    /// Record-level rejections count as failed results; source-level errors
    /// only reach the collector.
    fn account_reader_error(&self, err: RecordError) {
        match err.record {
            Some(record) => {
                let result = RecordResult::failed(record, err.error, Duration::ZERO);
                self.account_result(result);
            }
            None => self.collect(err.error, None),
        }
    }

    fn collect(&self, error: PipelineError, record: Option<Arc<Record>>) {
        match self.collector.add(error, record) {
            Err(PipelineError::LimitReached(limit)) => {
                if self.cancel.cancel() {
                    warn!(limit, "maximum error count reached, cancelling pipeline");
                }
            }
            // The escalator turns the collector's own cancellation into
            // pipeline cancellation.
            Err(_) | Ok(()) => {}
        }
    }

    fn write_output(&self, line: &str) {
        let mut output = lock(&self.output);
        let Some(sink) = output.as_mut() else {
            return;
        };
        if let Err(e) = sink.writeln(line) {
            warn!(error = %e, "output write failed, cancelling pipeline");
            lock(&self.output_error).get_or_insert_with(|| e.to_string());
            *output = None;
            self.cancel.cancel();
        }
    }

    fn finalize(&self) {
        if let Some(sink) = lock(&self.output).as_mut() {
            if let Err(e) = sink.flush() {
                warn!(error = %e, "output flush failed");
                lock(&self.output_error).get_or_insert_with(|| e.to_string());
            }
        }

        self.tracker.stop_and_print_final();
        self.summary.finalize();

        if let Some(report) = &self.options.report {
            if self.collector.has_errors() {
                let reporter = ErrorReporter::new(Arc::clone(&self.collector), report.clone());
                reporter.print_summary();
                if self.collector.count() > DETAILED_REPORT_LIMIT {
                    reporter.print_top_errors(TOP_ERRORS);
                } else {
                    reporter.print_detailed(DETAILED_ERRORS);
                }
            }
        }

        self.state
            .store(PipelineState::Finalized as u8, Ordering::SeqCst);
        info!(
            processed = self.summary.total(),
            failed = self.summary.failed(),
            errors = self.collector.count(),
            "pipeline finished"
        );
    }

    /// Cancel the run and wait for the workers to drain. Safe to call from
    /// any thread, before, during or after `run`.
    pub fn stop(&self) {
        self.cancel.cancel();
        let pool = lock(&self.pool).clone();
        if let Some(pool) = pool {
            pool.stop_and_wait();
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn summary(&self) -> SummarySnapshot {
        self.summary.snapshot()
    }

    pub fn format_stats(&self) -> String {
        self.summary.format_stats()
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.collector.errors()
    }

    pub fn collector(&self) -> Arc<ErrorCollector> {
        Arc::clone(&self.collector)
    }

    pub fn progress(&self) -> Stats {
        self.tracker.global_stats()
    }

    pub fn source_stats(&self) -> IndexMap<String, Stats> {
        self.tracker.all_source_stats()
    }

    /// Per-worker counters, available after `run` returns.
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        lock(&self.worker_stats).clone()
    }

    /// Exit code for the signal that interrupted the run, if any.
    pub fn signal_exit_code(&self) -> Option<ExitCode> {
        *lock(&self.signal_exit)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
