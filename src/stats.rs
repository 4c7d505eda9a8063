use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::record::{RecordResult, ResultStatus};

/// Run-wide counters. Counters are atomic and only ever grow; timing is
/// fixed once by [`Summary::finalize`].
#[derive(Debug)]
pub struct Summary {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    timing: RwLock<Timing>,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    started: Instant,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    duration: Duration,
}

/// Copy of a [`Summary`] at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummarySnapshot {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub throughput: f64,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

impl Default for Summary {
    fn default() -> Self {
        Self::new()
    }
}

impl Summary {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            timing: RwLock::new(Timing {
                started: Instant::now(),
                start_time: Utc::now(),
                end_time: None,
                duration: Duration::ZERO,
            }),
        }
    }

    /// Restart the clock. Called when a run begins so time spent between
    /// construction and the run is not counted.
    pub fn start(&self) {
        let mut timing = self
            .timing
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        timing.started = Instant::now();
        timing.start_time = Utc::now();
        timing.end_time = None;
        timing.duration = Duration::ZERO;
    }

    /// Count one result. `total` is bumped last so the per-status counters
    /// never sum to more than it.
    pub fn add_result(&self, result: &RecordResult) {
        self.add_status(result.status);
    }

    pub fn add_status(&self, status: ResultStatus) {
        let counter = match status {
            ResultStatus::Success => &self.success,
            ResultStatus::Failed => &self.failed,
            ResultStatus::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Release);
    }

    /// Freeze the end time, duration and throughput. Later calls keep the
    /// first values.
    pub fn finalize(&self) {
        let mut timing = self
            .timing
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if timing.end_time.is_none() {
            timing.end_time = Some(Utc::now());
            timing.duration = timing.started.elapsed();
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Acquire)
    }

    pub fn success_rate(&self) -> f64 {
        percent(self.success(), self.total())
    }

    pub fn failure_rate(&self) -> f64 {
        percent(self.failed(), self.total())
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        let timing = *self
            .timing
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let total = self.total();
        let secs = timing.duration.as_secs_f64();
        SummarySnapshot {
            total,
            success: self.success(),
            failed: self.failed(),
            skipped: self.skipped(),
            start_time: timing.start_time,
            end_time: timing.end_time,
            duration: timing.duration,
            throughput: if secs > 0.0 { total as f64 / secs } else { 0.0 },
        }
    }

    /// One-line summary for the end of a run. Only meaningful after
    /// [`Summary::finalize`].
    pub fn format_stats(&self) -> String {
        let snap = self.snapshot();
        let mut output = format!(
            "Records processed: {} total, {} succeeded, {} failed",
            snap.total, snap.success, snap.failed
        );
        if snap.skipped > 0 {
            output.push_str(&format!(", {} skipped", snap.skipped));
        }

        let processing_time_ms = snap.duration.as_millis();
        output.push_str(&format!(" in {}ms", processing_time_ms));
        if processing_time_ms > 0 && snap.total > 0 {
            output.push_str(&format!(" ({:.0} records/s)", snap.throughput));
        }
        output
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
