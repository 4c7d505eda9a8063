//! Concurrent CSV pipeline
//!
//! Every stage runs on its own threads and hands work to the next stage over
//! bounded crossbeam channels, so a slow consumer applies backpressure all the
//! way back to the source readers. All blocking handoffs race a shared
//! [`CancelToken`].
//!
//! # Module Structure
//!
//! - `cancel`: Cancellation scope and the cancellable send helper
//! - `semaphore`: Counting semaphore capping concurrently active processing
//! - `types`: Stream items and stage configuration
//! - `validator`: Header and record shape checks
//! - `reader`: One reading thread per source feeding the record stream
//! - `worker`: Bounded worker pool running the processor
//! - `tracker`: Lock-free progress counters and periodic reporting
//! - `pipeline`: Orchestrator tying the stages together

mod cancel;
mod pipeline;
mod reader;
mod semaphore;
mod tracker;
mod types;
pub mod validator;
mod worker;

pub use cancel::{send_or_cancel, CancelToken};
pub use pipeline::{Pipeline, PipelineOptions, PipelineState};
pub use reader::{read_single, source_name, source_names, ReadStreams, ReaderHandle, SourceReader};
pub use semaphore::Semaphore;
pub use tracker::{MultiTracker, ProgressConfig, ProgressTracker, Stats, DEFAULT_PROGRESS_INTERVAL};
pub use types::{
    PoolConfig, ReaderConfig, RecordError, DEFAULT_ERROR_BUFFER, DEFAULT_RECORD_BUFFER,
};
pub use worker::{PoolState, WorkerPool, WorkerStats};
