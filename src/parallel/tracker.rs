//! Progress tracking
//!
//! Lock-free counters updated by the result consumer, plus an optional
//! reporting thread that periodically renders a snapshot of them. The
//! reporter only loads already-published values, so it never slows down or
//! double-counts updates.

use crossbeam_channel::{bounded, select, tick, Sender};
use indexmap::IndexMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::platform::ReportSink;
use crate::record::{RecordResult, ResultStatus};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// `None` keeps the tracker silent; counters still work.
    pub sink: Option<ReportSink>,
    pub interval: Duration,
    pub verbose: bool,
    /// Expected record count, 0 when unknown.
    pub total: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            sink: None,
            interval: DEFAULT_PROGRESS_INTERVAL,
            verbose: false,
            total: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    processed: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    counters: Counters,
    started_at: RwLock<Instant>,
    sink: Option<ReportSink>,
    verbose: bool,
}

struct Reporter {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct ProgressTracker {
    shared: Arc<Shared>,
    interval: Duration,
    reporter: Mutex<Option<Reporter>>,
    started: Mutex<bool>,
}

impl ProgressTracker {
    pub fn new(config: ProgressConfig) -> Self {
        let interval = if config.interval.is_zero() {
            DEFAULT_PROGRESS_INTERVAL
        } else {
            config.interval
        };
        let counters = Counters::default();
        counters.total.store(config.total, Ordering::Relaxed);

        Self {
            shared: Arc::new(Shared {
                counters,
                started_at: RwLock::new(Instant::now()),
                sink: config.sink,
                verbose: config.verbose,
            }),
            interval,
            reporter: Mutex::new(None),
            started: Mutex::new(false),
        }
    }

    /// Reset the clock and start the periodic reporter when a sink is
    /// configured.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut started = self
            .started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *started {
            return Err(PipelineError::AlreadyStarted);
        }
        *started = true;
        *self
            .shared
            .started_at
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();

        if self.shared.sink.is_none() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticker = tick(self.interval);
        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => shared.print_progress(),
            }
        });

        *self
            .reporter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Reporter {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Join the periodic reporter, then render one last snapshot. No-op if
    /// the tracker was never started.
    pub fn stop(&self) {
        let started = *self
            .started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !started {
            return;
        }

        let reporter = self
            .reporter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(reporter) = reporter {
            drop(reporter.stop);
            let _ = reporter.handle.join();
            self.shared.print_progress();
        }
    }

    pub fn stop_and_print_final(&self) {
        self.stop();
        self.print_final();
    }

    /// Count one result. The status counter is bumped before `processed`, so
    /// `success + failed + skipped == processed` holds once both are done.
    pub fn record_result(&self, result: &RecordResult) {
        self.record_status(result.status);
    }

    pub fn record_status(&self, status: ResultStatus) {
        let counters = &self.shared.counters;
        match status {
            ResultStatus::Success => counters.success.fetch_add(1, Ordering::Relaxed),
            ResultStatus::Failed => counters.failed.fetch_add(1, Ordering::Relaxed),
            ResultStatus::Skipped => counters.skipped.fetch_add(1, Ordering::Relaxed),
        };
        counters.processed.fetch_add(1, Ordering::Release);
    }

    pub fn increment_success(&self) {
        self.record_status(ResultStatus::Success);
    }

    pub fn increment_failed(&self) {
        self.record_status(ResultStatus::Failed);
    }

    pub fn increment_skipped(&self) {
        self.record_status(ResultStatus::Skipped);
    }

    pub fn set_total(&self, total: u64) {
        self.shared.counters.total.store(total, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.shared.processed()
    }

    pub fn success(&self) -> u64 {
        self.shared.counters.success.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u64 {
        self.shared.counters.failed.load(Ordering::Acquire)
    }

    pub fn skipped(&self) -> u64 {
        self.shared.counters.skipped.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        self.shared.total()
    }

    pub fn elapsed(&self) -> Duration {
        self.shared.elapsed()
    }

    pub fn throughput(&self) -> f64 {
        self.shared.stats().throughput
    }

    pub fn success_rate(&self) -> f64 {
        self.shared.stats().success_rate
    }

    pub fn failure_rate(&self) -> f64 {
        self.shared.stats().failure_rate
    }

    pub fn percent_complete(&self) -> f64 {
        self.shared.stats().percent_complete
    }

    pub fn eta(&self) -> Duration {
        self.shared.stats().eta
    }

    pub fn stats(&self) -> Stats {
        self.shared.stats()
    }

    pub fn print_final(&self) {
        if let Some(sink) = &self.shared.sink {
            sink.write_str(&render_final(&self.shared.stats()));
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        let reporter = self
            .reporter
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(reporter) = reporter {
            drop(reporter.stop);
            let _ = reporter.handle.join();
        }
    }
}

impl Shared {
    fn processed(&self) -> u64 {
        self.counters.processed.load(Ordering::Acquire)
    }

    fn total(&self) -> u64 {
        self.counters.total.load(Ordering::Relaxed)
    }

    fn elapsed(&self) -> Duration {
        self.started_at
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .elapsed()
    }

    fn stats(&self) -> Stats {
        let processed = self.processed();
        let elapsed = self.elapsed();
        Stats::derive(
            processed,
            self.counters.success.load(Ordering::Acquire),
            self.counters.failed.load(Ordering::Acquire),
            self.counters.skipped.load(Ordering::Acquire),
            self.total(),
            elapsed,
        )
    }

    fn print_progress(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        let stats = self.stats();
        let text = if self.verbose {
            render_verbose(&stats)
        } else {
            render_compact(&stats, sink.is_terminal())
        };
        sink.write_str(&text);
    }
}

/// Point-in-time copy of the tracker's counters and derived metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Stats {
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total: u64,
    pub elapsed: Duration,
    /// Records per second.
    pub throughput: f64,
    /// Percentages of processed.
    pub success_rate: f64,
    pub failure_rate: f64,
    /// 0 when the total is unknown.
    pub percent_complete: f64,
    pub eta: Duration,
}

impl Stats {
    pub fn derive(
        processed: u64,
        success: u64,
        failed: u64,
        skipped: u64,
        total: u64,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            processed as f64 / secs
        } else {
            0.0
        };
        let (success_rate, failure_rate) = if processed > 0 {
            (
                success as f64 / processed as f64 * 100.0,
                failed as f64 / processed as f64 * 100.0,
            )
        } else {
            (0.0, 0.0)
        };
        let percent_complete = if total > 0 {
            processed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let eta = if total == 0 || processed == 0 || processed >= total {
            Duration::ZERO
        } else {
            let per_record = elapsed.as_secs_f64() / processed as f64;
            Duration::from_secs_f64(per_record * (total - processed) as f64)
        };

        Self {
            processed,
            success,
            failed,
            skipped,
            total,
            elapsed,
            throughput,
            success_rate,
            failure_rate,
            percent_complete,
            eta,
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed: {}, Success: {} ({:.1}%), Failed: {} ({:.1}%), Throughput: {:.0} rec/s, Elapsed: {}",
            self.processed,
            self.success,
            self.success_rate,
            self.failed,
            self.failure_rate,
            self.throughput,
            round_secs(self.elapsed)
        )
    }
}

fn round_secs(duration: Duration) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_secs(duration.as_secs_f64().round() as u64))
}

fn round_millis(duration: Duration) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_millis(duration.as_millis() as u64))
}

const RULE: &str = "========================================\n";

fn render_compact(stats: &Stats, redraw: bool) -> String {
    let (lead, tail) = if redraw { ("\r", "") } else { ("", "\n") };
    if stats.total > 0 {
        format!(
            "{}[{}] Progress: {}/{} ({:.1}%) | Success: {} | Failed: {} | {:.0} rec/s | ETA: {}{}",
            lead,
            round_secs(stats.elapsed),
            stats.processed,
            stats.total,
            stats.percent_complete,
            stats.success,
            stats.failed,
            stats.throughput,
            round_secs(stats.eta),
            tail
        )
    } else {
        format!(
            "{}[{}] Processed: {} | Success: {} | Failed: {} | {:.0} rec/s{}",
            lead,
            round_secs(stats.elapsed),
            stats.processed,
            stats.success,
            stats.failed,
            stats.throughput,
            tail
        )
    }
}

fn render_verbose(stats: &Stats) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(RULE);
    out.push_str("Progress Update\n");
    out.push_str(RULE);
    out.push_str(&format!("Elapsed:     {}\n", round_secs(stats.elapsed)));
    out.push_str(&format!("Processed:   {}\n", stats.processed));
    if stats.total > 0 {
        out.push_str(&format!("Total:       {}\n", stats.total));
        out.push_str(&format!("Complete:    {:.1}%\n", stats.percent_complete));
        out.push_str(&format!("ETA:         {}\n", round_secs(stats.eta)));
    }
    out.push_str(&format!(
        "Success:     {} ({:.1}%)\n",
        stats.success, stats.success_rate
    ));
    out.push_str(&format!(
        "Failed:      {} ({:.1}%)\n",
        stats.failed, stats.failure_rate
    ));
    if stats.skipped > 0 {
        out.push_str(&format!("Skipped:     {}\n", stats.skipped));
    }
    out.push_str(&format!("Throughput:  {:.0} records/sec\n", stats.throughput));
    out.push_str(RULE);
    out
}

fn render_final(stats: &Stats) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(RULE);
    out.push_str("Processing Complete\n");
    out.push_str(RULE);
    out.push_str(&format!("Total Time:       {}\n", round_millis(stats.elapsed)));
    out.push_str(&format!("Total Processed:  {}\n", stats.processed));
    out.push_str(&format!(
        "Successful:       {} ({:.1}%)\n",
        stats.success, stats.success_rate
    ));
    out.push_str(&format!(
        "Failed:           {} ({:.1}%)\n",
        stats.failed, stats.failure_rate
    ));
    if stats.skipped > 0 {
        out.push_str(&format!("Skipped:          {}\n", stats.skipped));
    }
    out.push_str(&format!(
        "Avg Throughput:   {:.0} records/sec\n",
        stats.throughput
    ));
    out.push_str(RULE);
    out
}

/// One silent tracker per source plus a global tracker that does the
/// reporting.
pub struct MultiTracker {
    sources: RwLock<IndexMap<String, ProgressTracker>>,
    global: ProgressTracker,
}

impl MultiTracker {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            sources: RwLock::new(IndexMap::new()),
            global: ProgressTracker::new(config),
        }
    }

    /// Register a source. Registering the same name twice keeps the first
    /// tracker.
    pub fn add_source(&self, name: impl Into<String>, expected: u64) {
        let mut sources = self
            .sources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sources.entry(name.into()).or_insert_with(|| {
            ProgressTracker::new(ProgressConfig {
                total: expected,
                ..Default::default()
            })
        });
    }

    /// Count a result against its source (when registered) and globally.
    pub fn record_result(&self, result: &RecordResult) {
        self.record_status(&result.record.source, result.status);
    }

    pub fn record_status(&self, source: &str, status: ResultStatus) {
        {
            let sources = self
                .sources
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(tracker) = sources.get(source) {
                tracker.record_status(status);
            }
        }
        self.global.record_status(status);
    }

    pub fn start(&self) -> Result<(), PipelineError> {
        let sources = self
            .sources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for tracker in sources.values() {
            tracker.start()?;
        }
        self.global.start()
    }

    pub fn stop(&self) {
        self.global.stop();
    }

    pub fn stop_and_print_final(&self) {
        self.global.stop_and_print_final();
    }

    pub fn global(&self) -> &ProgressTracker {
        &self.global
    }

    pub fn global_stats(&self) -> Stats {
        self.global.stats()
    }

    pub fn source_stats(&self, source: &str) -> Option<Stats> {
        let sources = self
            .sources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sources.get(source).map(ProgressTracker::stats)
    }

    /// Per-source snapshots in registration order.
    pub fn all_source_stats(&self) -> IndexMap<String, Stats> {
        let sources = self
            .sources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sources
            .iter()
            .map(|(name, tracker)| (name.clone(), tracker.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemorySink;

    fn sink() -> (ReportSink, MemorySink) {
        let memory = MemorySink::new();
        (ReportSink::new(memory.clone()), memory)
    }

    #[test]
    fn test_zero_guards() {
        let stats = Stats::derive(0, 0, 0, 0, 0, Duration::ZERO);
        assert_eq!(stats.throughput, 0.0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.percent_complete, 0.0);
        assert_eq!(stats.eta, Duration::ZERO);

        let done = Stats::derive(10, 10, 0, 0, 10, Duration::from_secs(2));
        assert_eq!(done.eta, Duration::ZERO);
        assert_eq!(done.percent_complete, 100.0);
        assert_eq!(done.throughput, 5.0);
    }

    #[test]
    fn test_derived_metrics() {
        let stats = Stats::derive(50, 40, 8, 2, 200, Duration::from_secs(10));
        assert_eq!(stats.success_rate, 80.0);
        assert_eq!(stats.failure_rate, 16.0);
        assert_eq!(stats.percent_complete, 25.0);
        assert_eq!(stats.throughput, 5.0);
        // 0.2s per record for 150 remaining records
        assert_eq!(stats.eta.as_secs(), 30);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let tracker = Arc::new(ProgressTracker::new(ProgressConfig::default()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        match i % 3 {
                            0 => tracker.increment_success(),
                            1 => tracker.increment_failed(),
                            _ => tracker.increment_skipped(),
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = tracker.stats();
        assert_eq!(stats.processed, 8000);
        assert_eq!(stats.success + stats.failed + stats.skipped, 8000);
    }

    #[test]
    fn test_periodic_reporting_and_final_snapshot() {
        let (report, memory) = sink();
        let tracker = ProgressTracker::new(ProgressConfig {
            sink: Some(report),
            interval: Duration::from_millis(10),
            verbose: false,
            total: 4,
        });
        tracker.start().unwrap();
        assert_eq!(tracker.start(), Err(PipelineError::AlreadyStarted));
        tracker.increment_success();
        tracker.increment_failed();
        thread::sleep(Duration::from_millis(50));
        tracker.stop();

        let output = memory.contents();
        assert!(output.contains("Progress: 2/4 (50.0%) | Success: 1 | Failed: 1"));
        // Not a terminal: one line per snapshot
        assert!(output.ends_with('\n'));
        assert!(!output.contains('\r'));
    }

    #[test]
    fn test_verbose_and_final_blocks() {
        let (report, memory) = sink();
        let tracker = ProgressTracker::new(ProgressConfig {
            sink: Some(report),
            interval: Duration::from_secs(60),
            verbose: true,
            total: 0,
        });
        tracker.start().unwrap();
        tracker.increment_success();
        tracker.increment_skipped();
        tracker.stop_and_print_final();

        let output = memory.contents();
        assert!(output.contains("Progress Update"));
        assert!(output.contains("Skipped:     1"));
        assert!(output.contains("Processing Complete"));
        assert!(output.contains("Total Processed:  2"));
        assert!(output.contains("Successful:       1 (50.0%)"));
    }

    #[test]
    fn test_stop_without_start_is_silent() {
        let (report, memory) = sink();
        let tracker = ProgressTracker::new(ProgressConfig {
            sink: Some(report),
            ..Default::default()
        });
        tracker.increment_success();
        tracker.stop();
        assert!(memory.contents().is_empty());
    }

    #[test]
    fn test_stats_display() {
        let stats = Stats::derive(10, 9, 1, 0, 0, Duration::from_secs(2));
        assert_eq!(
            stats.to_string(),
            "Processed: 10, Success: 9 (90.0%), Failed: 1 (10.0%), Throughput: 5 rec/s, Elapsed: 2s"
        );
    }

    #[test]
    fn test_multi_tracker_splits_by_source() {
        let multi = MultiTracker::new(ProgressConfig::default());
        multi.add_source("a.csv", 3);
        multi.add_source("b.csv", 0);
        multi.start().unwrap();

        multi.record_status("a.csv", ResultStatus::Success);
        multi.record_status("a.csv", ResultStatus::Failed);
        multi.record_status("b.csv", ResultStatus::Success);
        multi.record_status("unregistered.csv", ResultStatus::Skipped);
        multi.stop();

        let a = multi.source_stats("a.csv").unwrap();
        assert_eq!((a.processed, a.success, a.failed), (2, 1, 1));
        assert!(multi.source_stats("unregistered.csv").is_none());
        assert_eq!(multi.global_stats().processed, 4);

        let names: Vec<String> = multi.all_source_stats().keys().cloned().collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }
}
