//! Type definitions for parallel processing
//!
//! Configuration for the reader and worker pool, and the item type carried on
//! the error streams.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::record::Record;

pub const DEFAULT_RECORD_BUFFER: usize = 100;
pub const DEFAULT_ERROR_BUFFER: usize = 10;

/// An error travelling on a reader or worker-pool error stream.
///
/// Source-level failures (missing file, header mismatch) carry no record.
/// Record-level rejections carry the record they apply to.
#[derive(Debug, Clone)]
pub struct RecordError {
    pub error: PipelineError,
    pub record: Option<Arc<Record>>,
}

impl RecordError {
    pub fn source_level(error: PipelineError) -> Self {
        Self {
            error,
            record: None,
        }
    }

    pub fn for_record(error: PipelineError, record: Arc<Record>) -> Self {
        Self {
            error,
            record: Some(record),
        }
    }
}

/// Configuration for the multi-source reader
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub sources: Vec<PathBuf>,
    pub has_header: bool,
    /// Require every source to carry the first source's header exactly.
    pub validate_header: bool,
    /// Stop reading a source at its first malformed record instead of
    /// reporting the record and continuing.
    pub strict_records: bool,
    pub delimiter: u8,
    /// Capacity of the shared record stream; the backpressure bound.
    pub buffer_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            has_header: true,
            validate_header: true,
            strict_records: false,
            delimiter: b',',
            buffer_size: DEFAULT_RECORD_BUFFER,
        }
    }
}

impl ReaderConfig {
    pub fn effective_buffer_size(&self) -> usize {
        if self.buffer_size == 0 {
            DEFAULT_RECORD_BUFFER
        } else {
            self.buffer_size
        }
    }
}

/// Configuration for the worker pool
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// 0 means one worker per available CPU.
    pub workers: usize,
    /// 0 means twice the worker count.
    pub result_buffer: usize,
    /// 0 means the default of 10.
    pub error_buffer: usize,
    /// Cap on records processed at the same time. 0 disables the cap.
    pub max_active: usize,
}

impl PoolConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub fn effective_result_buffer(&self) -> usize {
        if self.result_buffer == 0 {
            self.effective_workers() * 2
        } else {
            self.result_buffer
        }
    }

    pub fn effective_error_buffer(&self) -> usize {
        if self.error_buffer == 0 {
            DEFAULT_ERROR_BUFFER
        } else {
            self.error_buffer
        }
    }

    /// The semaphore limit, when the cap is below the worker count.
    pub fn active_limit(&self) -> Option<usize> {
        match self.max_active {
            0 => None,
            n if n >= self.effective_workers() => None,
            n => Some(n),
        }
    }
}
