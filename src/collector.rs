//! Thread-safe error collection with a max-errors cap and a rate threshold
//! that cancels the collector's own scope when breached.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::error::{ErrorCategory, ErrorSeverity, PipelineError};
use crate::parallel::CancelToken;
use crate::record::Record;

/// One recorded error. Entries are append-only; readers get copies.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    #[serde(serialize_with = "serialize_error")]
    pub error: PipelineError,
    #[serde(skip)]
    pub record: Option<Arc<Record>>,
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
}

fn serialize_error<S: serde::Serializer>(
    error: &PipelineError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

impl ErrorEntry {
    pub fn new(error: PipelineError, record: Option<Arc<Record>>) -> Self {
        let category = error.category();
        Self::with_category(error, record, category)
    }

    pub fn with_category(
        error: PipelineError,
        record: Option<Arc<Record>>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            severity: error.severity(),
            retryable: error.is_retryable(),
            error,
            record,
            timestamp: Utc::now(),
            category,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectorConfig {
    /// 0 means unlimited.
    pub max_errors: usize,
    /// Fraction of processed records in `[0, 1]`; 0 disables the check.
    pub threshold: f64,
    pub abort_on_threshold: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_errors: 0,
            threshold: 0.0,
            abort_on_threshold: false,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<ErrorEntry>,
    processed: u64,
}

pub struct ErrorCollector {
    config: CollectorConfig,
    state: RwLock<State>,
    cancel: CancelToken,
    /// Set once the threshold fired; later drains never clear it.
    breached: AtomicBool,
}

impl ErrorCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State::default()),
            cancel: CancelToken::new(),
            breached: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Scope cancelled when the threshold is breached. The orchestrator
    /// escalates it to the pipeline scope.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Record an error, classifying it by kind.
    ///
    /// Returns `LimitReached` without appending when the cap is already full.
    /// Returns `ThresholdExceeded` after appending when the error rate now
    /// strictly exceeds the configured threshold; the collector's scope is
    /// cancelled at that point.
    pub fn add(
        &self,
        error: PipelineError,
        record: Option<Arc<Record>>,
    ) -> Result<(), PipelineError> {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.config.max_errors > 0 && state.entries.len() >= self.config.max_errors {
            return Err(PipelineError::LimitReached(self.config.max_errors));
        }

        state.entries.push(ErrorEntry::new(error, record));

        match self.evaluate_threshold(&state) {
            Some(rate) => Err(PipelineError::ThresholdExceeded {
                rate,
                threshold: self.config.threshold,
            }),
            None => Ok(()),
        }
    }

    /// Record an error under an explicit category. Subject to the cap but
    /// does not evaluate the threshold itself.
    pub fn add_with_category(
        &self,
        error: PipelineError,
        record: Option<Arc<Record>>,
        category: ErrorCategory,
    ) -> Result<(), PipelineError> {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.config.max_errors > 0 && state.entries.len() >= self.config.max_errors {
            return Err(PipelineError::LimitReached(self.config.max_errors));
        }
        state
            .entries
            .push(ErrorEntry::with_category(error, record, category));
        Ok(())
    }

    /// Count one processed record. The threshold is evaluated here too, so
    /// an error added before its record was counted still trips it.
    pub fn increment_processed(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.processed += 1;
        if !state.entries.is_empty() {
            self.evaluate_threshold(&state);
        }
    }

    pub fn processed(&self) -> u64 {
        self.read().processed
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.read().entries.clone()
    }

    pub fn errors_by_category(&self, category: ErrorCategory) -> Vec<ErrorEntry> {
        self.read()
            .entries
            .iter()
            .filter(|entry| entry.category == category)
            .cloned()
            .collect()
    }

    pub fn errors_by_severity(&self, severity: ErrorSeverity) -> Vec<ErrorEntry> {
        self.read()
            .entries
            .iter()
            .filter(|entry| entry.severity == severity)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.read().entries.len()
    }

    pub fn has_errors(&self) -> bool {
        self.count() > 0
    }

    /// errors / processed, 0 before anything was processed.
    pub fn error_rate(&self) -> f64 {
        rate_of(&self.read())
    }

    /// Whether the current rate is above the threshold. Always false when no
    /// threshold is configured.
    pub fn threshold_exceeded(&self) -> bool {
        self.config.threshold > 0.0 && self.error_rate() > self.config.threshold
    }

    /// Whether the threshold fired at any point, even if results counted
    /// afterwards brought the rate back down.
    pub fn threshold_breached(&self) -> bool {
        self.breached.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> ErrorSummary {
        let state = self.read();
        let mut by_category = IndexMap::new();
        let mut by_severity = IndexMap::new();
        let mut retryable_errors = 0;
        for entry in &state.entries {
            *by_category.entry(entry.category).or_insert(0) += 1;
            *by_severity.entry(entry.severity).or_insert(0) += 1;
            if entry.retryable {
                retryable_errors += 1;
            }
        }
        ErrorSummary {
            total_errors: state.entries.len(),
            total_processed: state.processed,
            error_rate: rate_of(&state),
            by_category,
            by_severity,
            retryable_errors,
        }
    }

    /// Drop all entries and reset the processed count. The threshold scope
    /// stays cancelled if it already fired.
    pub fn clear(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.entries.clear();
        state.processed = 0;
    }

    /// Returns the rate when it strictly exceeds an enforced threshold,
    /// latching the breach and cancelling the scope the first time.
    fn evaluate_threshold(&self, state: &State) -> Option<f64> {
        if !self.config.abort_on_threshold || self.config.threshold <= 0.0 {
            return None;
        }
        let rate = rate_of(state);
        if rate <= self.config.threshold {
            return None;
        }
        if !self.breached.swap(true, Ordering::SeqCst) {
            warn!(
                rate,
                threshold = self.config.threshold,
                errors = state.entries.len(),
                processed = state.processed,
                "Error threshold exceeded"
            );
        }
        self.cancel.cancel();
        Some(rate)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn rate_of(state: &State) -> f64 {
    if state.processed == 0 {
        0.0
    } else {
        state.entries.len() as f64 / state.processed as f64
    }
}

/// Aggregate view of the collector. Maps keep first-seen order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub total_processed: u64,
    pub error_rate: f64,
    pub by_category: IndexMap<ErrorCategory, usize>,
    pub by_severity: IndexMap<ErrorSeverity, usize>,
    pub retryable_errors: usize,
}

impl fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total Errors:      {}", self.total_errors)?;
        writeln!(f, "Total Processed:   {}", self.total_processed)?;
        writeln!(f, "Error Rate:        {:.2}%", self.error_rate * 100.0)?;
        writeln!(f, "Retryable Errors:  {}", self.retryable_errors)?;
        if !self.by_category.is_empty() {
            writeln!(f, "\nErrors by Category:")?;
            for (category, count) in &self.by_category {
                writeln!(f, "  {:<15}: {}", category.to_string(), count)?;
            }
        }
        if !self.by_severity.is_empty() {
            writeln!(f, "\nErrors by Severity:")?;
            for (severity, count) in &self.by_severity {
                writeln!(f, "  {:<15}: {}", severity.to_string(), count)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn invalid(n: usize) -> PipelineError {
        PipelineError::InvalidRecord(format!("bad record {}", n))
    }

    #[test]
    fn test_max_errors_cap_rejects_without_appending() {
        let collector = ErrorCollector::new(CollectorConfig {
            max_errors: 2,
            ..Default::default()
        });
        assert!(collector.add(invalid(1), None).is_ok());
        assert!(collector.add(invalid(2), None).is_ok());
        assert_eq!(
            collector.add(invalid(3), None),
            Err(PipelineError::LimitReached(2))
        );
        assert_eq!(
            collector.add_with_category(invalid(4), None, ErrorCategory::Unknown),
            Err(PipelineError::LimitReached(2))
        );
        assert_eq!(collector.count(), 2);
    }

    #[test]
    fn test_threshold_breach_cancels_scope_once() {
        let collector = ErrorCollector::new(CollectorConfig {
            threshold: 0.1,
            abort_on_threshold: true,
            ..Default::default()
        });
        for _ in 0..10 {
            collector.increment_processed();
        }
        // 1/10 is not strictly above 0.1
        assert!(collector.add(invalid(1), None).is_ok());
        assert!(!collector.cancel_token().is_cancelled());

        let err = collector.add(invalid(2), None).unwrap_err();
        assert!(matches!(err, PipelineError::ThresholdExceeded { .. }));
        assert!(collector.cancel_token().is_cancelled());
        assert!(collector.threshold_exceeded());

        // Still appended, still reported
        assert!(collector.add(invalid(3), None).is_err());
        assert_eq!(collector.count(), 3);
    }

    #[test]
    fn test_breach_stays_latched_after_rate_recovers() {
        let collector = ErrorCollector::new(CollectorConfig {
            threshold: 0.1,
            abort_on_threshold: true,
            ..Default::default()
        });
        collector.increment_processed();
        assert!(collector.add(invalid(1), None).is_err());
        assert!(collector.threshold_breached());

        for _ in 0..99 {
            collector.increment_processed();
        }
        assert!(!collector.threshold_exceeded());
        assert!(collector.threshold_breached());
        assert!(collector.cancel_token().is_cancelled());
    }

    #[test]
    fn test_error_added_before_its_record_is_counted_still_breaches() {
        let collector = ErrorCollector::new(CollectorConfig {
            threshold: 0.5,
            abort_on_threshold: true,
            ..Default::default()
        });
        // Rate is zero until something has been processed
        assert!(collector.add(invalid(1), None).is_ok());
        assert!(!collector.threshold_breached());

        collector.increment_processed();
        assert!(collector.threshold_breached());
        assert!(collector.cancel_token().is_cancelled());
    }

    #[test]
    fn test_threshold_ignored_without_abort_flag() {
        let collector = ErrorCollector::new(CollectorConfig {
            threshold: 0.1,
            abort_on_threshold: false,
            ..Default::default()
        });
        collector.increment_processed();
        assert!(collector.add(invalid(1), None).is_ok());
        assert!(collector.threshold_exceeded());
        assert!(!collector.threshold_breached());
        assert!(!collector.cancel_token().is_cancelled());
    }

    #[test]
    fn test_zero_threshold_never_exceeded() {
        let collector = ErrorCollector::new(CollectorConfig {
            threshold: 0.0,
            abort_on_threshold: true,
            ..Default::default()
        });
        collector.increment_processed();
        assert!(collector.add(invalid(1), None).is_ok());
        assert!(!collector.threshold_exceeded());
    }

    #[test]
    fn test_add_with_category_skips_threshold() {
        let collector = ErrorCollector::new(CollectorConfig {
            threshold: 0.01,
            abort_on_threshold: true,
            ..Default::default()
        });
        collector.increment_processed();
        assert!(collector
            .add_with_category(invalid(1), None, ErrorCategory::Processing)
            .is_ok());
        assert!(!collector.cancel_token().is_cancelled());
        assert_eq!(
            collector.errors_by_category(ErrorCategory::Processing).len(),
            1
        );
    }

    #[test]
    fn test_classification_and_summary() {
        let collector = ErrorCollector::new(CollectorConfig::default());
        for _ in 0..4 {
            collector.increment_processed();
        }
        collector.add(invalid(1), None).unwrap();
        collector
            .add(
                PipelineError::context("read", "a.csv", 0, PipelineError::FileNotFound),
                None,
            )
            .unwrap();
        collector.add(PipelineError::Timeout, None).unwrap();

        assert_eq!(collector.errors_by_severity(ErrorSeverity::Low).len(), 1);
        assert_eq!(collector.errors_by_category(ErrorCategory::Io).len(), 1);

        let summary = collector.summary();
        assert_eq!(summary.total_errors, 3);
        assert_eq!(summary.total_processed, 4);
        assert_eq!(summary.error_rate, 0.75);
        assert_eq!(summary.retryable_errors, 2);
        assert_eq!(summary.by_category[&ErrorCategory::Validation], 1);
        assert_eq!(summary.by_severity[&ErrorSeverity::Medium], 2);

        let text = summary.to_string();
        assert!(text.contains("Error Rate:        75.00%"));
        assert!(text.contains("  VALIDATION     : 1"));
    }

    #[test]
    fn test_reads_return_copies_and_clear_resets() {
        let collector = ErrorCollector::new(CollectorConfig::default());
        collector.increment_processed();
        collector.add(invalid(1), None).unwrap();

        let mut snapshot = collector.errors();
        snapshot.clear();
        assert_eq!(collector.count(), 1);

        collector.clear();
        assert!(!collector.has_errors());
        assert_eq!(collector.processed(), 0);
        assert_eq!(collector.error_rate(), 0.0);
    }

    #[test]
    fn test_concurrent_adds_respect_cap() {
        let collector = Arc::new(ErrorCollector::new(CollectorConfig {
            max_errors: 50,
            ..Default::default()
        }));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for i in 0..20 {
                        let _ = collector.add(invalid(t * 100 + i), None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(collector.count(), 50);
    }

    proptest! {
        #[test]
        fn prop_count_never_exceeds_cap(cap in 1usize..20, attempts in 0usize..60) {
            let collector = ErrorCollector::new(CollectorConfig {
                max_errors: cap,
                ..Default::default()
            });
            let mut limited = 0;
            for i in 0..attempts {
                if let Err(PipelineError::LimitReached(_)) = collector.add(invalid(i), None) {
                    limited += 1;
                }
            }
            prop_assert_eq!(collector.count(), attempts.min(cap));
            prop_assert_eq!(limited, attempts.saturating_sub(cap));
        }
    }
}
