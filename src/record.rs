//! Record and result types that travel through the pipeline.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;

/// One parsed CSV row with its provenance.
///
/// The header is shared between every record read from the same source.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 1-indexed line within the source (the header row counts as line 1).
    pub line_number: usize,
    pub source: String,
    pub fields: Vec<String>,
    pub header: Option<Arc<Vec<String>>>,
    pub read_at: DateTime<Utc>,
}

impl Record {
    pub fn new(
        line_number: usize,
        source: impl Into<String>,
        fields: Vec<String>,
        header: Option<Arc<Vec<String>>>,
    ) -> Self {
        Self {
            line_number,
            source: source.into(),
            fields,
            header,
            read_at: Utc::now(),
        }
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&str> {
        let header = self.header.as_ref()?;
        let index = header.iter().position(|h| h == name)?;
        self.field(index)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn header_len(&self) -> usize {
        self.header.as_ref().map_or(0, |h| h.len())
    }

    /// At least one field, and exactly one per header column when a header
    /// is present.
    pub fn is_valid(&self) -> bool {
        if self.fields.is_empty() {
            return false;
        }
        match &self.header {
            Some(header) if !header.is_empty() => header.len() == self.fields.len(),
            _ => true,
        }
    }

    /// JSON view of the record: an object keyed by header when one exists,
    /// otherwise an array of field values.
    pub fn to_json(&self) -> Value {
        match &self.header {
            Some(header) if !header.is_empty() => {
                let mut map = Map::with_capacity(header.len());
                for (name, value) in header.iter().zip(self.fields.iter()) {
                    map.insert(name.clone(), Value::String(value.clone()));
                }
                Value::Object(map)
            }
            _ => Value::Array(self.fields.iter().cloned().map(Value::String).collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultStatus::Success => f.write_str("SUCCESS"),
            ResultStatus::Failed => f.write_str("FAILED"),
            ResultStatus::Skipped => f.write_str("SKIPPED"),
        }
    }
}

/// Outcome of processing one record. Created once, read-only afterwards.
#[derive(Debug, Clone)]
pub struct RecordResult {
    pub record: Arc<Record>,
    pub status: ResultStatus,
    pub error: Option<PipelineError>,
    /// Only present on success.
    pub payload: Option<Value>,
    pub processed_at: DateTime<Utc>,
    pub duration: Duration,
    /// The error was already delivered on the worker pool's error stream.
    pub(crate) error_forwarded: bool,
}

impl RecordResult {
    pub fn success(record: Arc<Record>, payload: Value, duration: Duration) -> Self {
        Self {
            record,
            status: ResultStatus::Success,
            error: None,
            payload: Some(payload),
            processed_at: Utc::now(),
            duration,
            error_forwarded: false,
        }
    }

    pub fn failed(record: Arc<Record>, error: PipelineError, duration: Duration) -> Self {
        Self {
            record,
            status: ResultStatus::Failed,
            error: Some(error),
            payload: None,
            processed_at: Utc::now(),
            duration,
            error_forwarded: false,
        }
    }

    pub fn skipped(record: Arc<Record>, duration: Duration) -> Self {
        Self {
            record,
            status: ResultStatus::Skipped,
            error: None,
            payload: None,
            processed_at: Utc::now(),
            duration,
            error_forwarded: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == ResultStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == ResultStatus::Skipped
    }
}
