//! The pluggable per-record processing capability.

use serde_json::Value;

use crate::error::PipelineError;
use crate::parallel::CancelToken;
use crate::record::Record;

/// What a processor decided about one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Skipped,
    /// The record was handled but rejected. Unlike returning `Err`, this is
    /// not forwarded on the worker pool's error stream.
    Failed(PipelineError),
}

/// Transforms or validates a single record.
///
/// Implementations run concurrently on every worker thread and should check
/// `cancel` during long operations so shutdown is not held up.
pub trait Processor: Send + Sync {
    fn process(&self, cancel: &CancelToken, record: &Record) -> Result<Outcome, PipelineError>;
}

impl<F> Processor for F
where
    F: Fn(&CancelToken, &Record) -> Result<Outcome, PipelineError> + Send + Sync,
{
    fn process(&self, cancel: &CancelToken, record: &Record) -> Result<Outcome, PipelineError> {
        self(cancel, record)
    }
}

/// Default processor: fails structurally invalid records and passes the
/// rest through as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordValidator;

impl Processor for RecordValidator {
    fn process(&self, cancel: &CancelToken, record: &Record) -> Result<Outcome, PipelineError> {
        cancel.check()?;

        if !record.is_valid() {
            return Ok(Outcome::Failed(PipelineError::InvalidRecord(format!(
                "expected {} fields, got {} (line {} in {})",
                record.header_len(),
                record.field_count(),
                record.line_number,
                record.source
            ))));
        }

        Ok(Outcome::Success(record.to_json()))
    }
}
