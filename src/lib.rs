//! Concurrent CSV processing.
//!
//! Records from any number of CSV files are read in parallel, validated by a
//! bounded pool of worker threads and aggregated into progress counters, a
//! run summary and an error report. A single cancellation scope stops every
//! stage on an error-threshold breach, a max-errors cap, an interrupt signal
//! or an explicit [`Pipeline::stop`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use csvflow::{Pipeline, PipelineOptions, ReaderConfig, RecordValidator};
//!
//! let options = PipelineOptions {
//!     reader: ReaderConfig {
//!         sources: vec!["data.csv".into()],
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! let pipeline = Pipeline::new(options, Arc::new(RecordValidator));
//! pipeline.run()?;
//! println!("{}", pipeline.format_stats());
//! # Ok::<(), csvflow::PipelineError>(())
//! ```

pub mod cli;
pub mod collector;
pub mod config;
pub mod config_file;
pub mod decompression;
pub mod error;
pub mod error_handling;
pub mod logging;
pub mod parallel;
pub mod platform;
pub mod processor;
pub mod record;
pub mod stats;

pub use collector::{CollectorConfig, ErrorCollector, ErrorEntry, ErrorSummary};
pub use error::{ErrorCategory, ErrorSeverity, PipelineError};
pub use error_handling::ErrorReporter;
pub use parallel::{
    read_single, CancelToken, MultiTracker, Pipeline, PipelineOptions, PipelineState, PoolConfig,
    PoolState, ProgressConfig, ProgressTracker, ReaderConfig, Semaphore, SourceReader, Stats,
    WorkerPool, WorkerStats,
};
pub use processor::{Outcome, Processor, RecordValidator};
pub use record::{Record, RecordResult, ResultStatus};
pub use stats::{Summary, SummarySnapshot};
