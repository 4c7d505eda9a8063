//! Multi-source CSV reader
//!
//! One thread per source feeds a shared bounded record stream and a shared
//! error stream. Both streams close once every source thread has finished,
//! since each thread owns the only clones of the senders.

use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::cancel::{send_or_cancel, CancelToken};
use super::types::{ReaderConfig, RecordError};
use super::validator::{validate_headers, validate_record};
use crate::decompression::DecompressionReader;
use crate::error::PipelineError;
use crate::record::Record;

const HEADER_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Streams produced by [`SourceReader::read`].
pub struct ReadStreams {
    pub records: Receiver<Record>,
    pub errors: Receiver<RecordError>,
    pub handle: ReaderHandle,
}

/// Joins every source thread.
pub struct ReaderHandle {
    supervisor: JoinHandle<()>,
}

impl ReaderHandle {
    /// Block until all source threads have exited.
    pub fn join(self) {
        if self.supervisor.join().is_err() {
            warn!("reader supervisor thread panicked");
        }
    }
}

pub struct SourceReader {
    config: ReaderConfig,
}

impl SourceReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Start one reading thread per source.
    pub fn read(&self, cancel: &CancelToken) -> ReadStreams {
        let buffer = self.config.effective_buffer_size();
        let (records_tx, records_rx) = bounded(buffer);
        let (errors_tx, errors_rx) = bounded(buffer.max(self.config.sources.len()));

        let registry = Arc::new(HeaderRegistry::new(self.config.sources.len()));
        let names = source_names(&self.config.sources);

        let handles: Vec<JoinHandle<()>> = self
            .config
            .sources
            .iter()
            .zip(names)
            .enumerate()
            .map(|(index, (path, name))| {
                let task = SourceTask {
                    index,
                    path: path.clone(),
                    name,
                    config: self.config.clone(),
                    registry: Arc::clone(&registry),
                    records_tx: records_tx.clone(),
                    errors_tx: errors_tx.clone(),
                    cancel: cancel.clone(),
                };
                thread::spawn(move || task.run())
            })
            .collect();

        // The tasks now hold the only senders
        drop(records_tx);
        drop(errors_tx);

        let supervisor = thread::spawn(move || {
            for handle in handles {
                if handle.join().is_err() {
                    warn!("source reader thread panicked");
                }
            }
            debug!("all sources finished");
        });

        ReadStreams {
            records: records_rx,
            errors: errors_rx,
            handle: ReaderHandle { supervisor },
        }
    }
}

/// Read one source to completion on the calling thread and collect its
/// records. Fails with the first error the source reported.
pub fn read_single(
    path: impl AsRef<Path>,
    has_header: bool,
    cancel: &CancelToken,
) -> Result<Vec<Record>, PipelineError> {
    let reader = SourceReader::new(ReaderConfig {
        sources: vec![path.as_ref().to_path_buf()],
        has_header,
        ..Default::default()
    });
    let streams = reader.read(cancel);

    let closed_records = never();
    let closed_errors = never();
    let mut records_rx = &streams.records;
    let mut errors_rx = &streams.errors;
    let mut records = Vec::new();
    let mut first_error = None;
    let mut open = 2;

    while open > 0 {
        select! {
            recv(records_rx) -> msg => match msg {
                Ok(record) => records.push(record),
                Err(_) => {
                    records_rx = &closed_records;
                    open -= 1;
                }
            },
            recv(errors_rx) -> msg => match msg {
                Ok(err) => {
                    first_error.get_or_insert(err.error);
                }
                Err(_) => {
                    errors_rx = &closed_errors;
                    open -= 1;
                }
            },
        }
    }
    streams.handle.join();

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(records),
    }
}

/// Identifier used for a source in records and error messages.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Identifiers for a set of sources, index-aligned with `paths`. A source
/// whose file name is shared with another is named by its full path.
pub fn source_names(paths: &[PathBuf]) -> Vec<String> {
    let short: Vec<String> = paths.iter().map(|path| source_name(path)).collect();
    short
        .iter()
        .zip(paths)
        .map(|(name, path)| {
            if short.iter().filter(|other| *other == name).count() > 1 {
                path.display().to_string()
            } else {
                name.clone()
            }
        })
        .collect()
}

struct SourceTask {
    index: usize,
    path: PathBuf,
    name: String,
    config: ReaderConfig,
    registry: Arc<HeaderRegistry>,
    records_tx: Sender<Record>,
    errors_tx: Sender<RecordError>,
    cancel: CancelToken,
}

impl SourceTask {
    fn run(self) {
        debug!(source = %self.name, "reading source");
        let result = self.read_records();
        // A source that failed before publishing its header must not hold up
        // later sources waiting for the canonical one.
        self.registry.publish(self.index, HeaderSlot::Failed);

        match result {
            Ok(emitted) => {
                debug!(source = %self.name, records = emitted, "source finished");
            }
            Err(err) => {
                warn!(source = %self.name, error = %err, "source stopped");
                send_or_cancel(&self.errors_tx, RecordError::source_level(err), &self.cancel);
            }
        }
    }

    fn read_records(&self) -> Result<usize, PipelineError> {
        let input = DecompressionReader::open(&self.path)
            .map_err(|e| PipelineError::context("read", &self.name, 0, e))?;

        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.config.delimiter)
            .from_reader(input);
        let mut rows = csv_reader.records();

        let header = if self.config.has_header {
            let row = match rows.next() {
                Some(row) => row.map_err(|e| {
                    PipelineError::context("read_header", &self.name, 1, e.into())
                })?,
                None => {
                    return Err(PipelineError::context(
                        "read_header",
                        &self.name,
                        0,
                        PipelineError::EmptyFile,
                    ))
                }
            };
            let line = row.position().map_or(1, |p| p.line() as usize);
            let names: Vec<String> = row.iter().map(str::to_string).collect();

            validate_headers(&names)
                .map_err(|e| PipelineError::context("validate_header", &self.name, line, e))?;

            let names = Arc::new(names);
            if self.config.validate_header {
                self.registry
                    .publish(self.index, HeaderSlot::Ready(Arc::clone(&names)));
                if let Some(canonical) = self.registry.canonical_for(self.index, &self.cancel) {
                    if *canonical != *names {
                        return Err(PipelineError::context(
                            "validate_header",
                            &self.name,
                            0,
                            PipelineError::HeaderMismatch {
                                expected: canonical.as_ref().clone(),
                                actual: names.as_ref().clone(),
                            },
                        ));
                    }
                }
            }
            Some(names)
        } else {
            None
        };

        let mut emitted = 0;
        let mut line = if header.is_some() { 1 } else { 0 };

        for row in rows {
            if self.cancel.is_cancelled() {
                debug!(source = %self.name, "cancelled");
                break;
            }

            let row = row
                .map_err(|e| PipelineError::context("read_record", &self.name, line + 1, e.into()))?;
            line = row.position().map_or(line + 1, |p| p.line() as usize);

            let fields = row.iter().map(str::to_string).collect();
            let record = Record::new(line, self.name.as_str(), fields, header.clone());

            if let Err(err) = validate_record(&record) {
                let err = PipelineError::context("read_record", &self.name, line, err);
                if self.config.strict_records {
                    return Err(err);
                }
                let rejected = RecordError::for_record(err, Arc::new(record));
                if !send_or_cancel(&self.errors_tx, rejected, &self.cancel) {
                    break;
                }
                continue;
            }

            if !send_or_cancel(&self.records_tx, record, &self.cancel) {
                break;
            }
            emitted += 1;
        }

        Ok(emitted)
    }
}

enum HeaderSlot {
    Pending,
    Failed,
    Ready(Arc<Vec<String>>),
}

/// Headers published by each source, in configured source order.
///
/// The canonical header is the one from the earliest source (by position in
/// the source list) that produced a valid header, so which source gets the
/// mismatch error does not depend on thread scheduling.
struct HeaderRegistry {
    slots: Mutex<Vec<HeaderSlot>>,
    changed: Condvar,
}

impl HeaderRegistry {
    fn new(count: usize) -> Self {
        Self {
            slots: Mutex::new((0..count).map(|_| HeaderSlot::Pending).collect()),
            changed: Condvar::new(),
        }
    }

    /// Only the first publication for a slot sticks.
    fn publish(&self, index: usize, slot: HeaderSlot) {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(current @ HeaderSlot::Pending) = slots.get_mut(index) {
            *current = slot;
            self.changed.notify_all();
        }
    }

    /// Header that source `index` must match, or `None` when it is the
    /// earliest source with a header (or the scope was cancelled).
    fn canonical_for(&self, index: usize, cancel: &CancelToken) -> Option<Arc<Vec<String>>> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            let mut pending = false;
            for slot in slots.iter().take(index) {
                match slot {
                    HeaderSlot::Ready(header) => return Some(Arc::clone(header)),
                    HeaderSlot::Failed => continue,
                    HeaderSlot::Pending => {
                        pending = true;
                        break;
                    }
                }
            }
            if !pending || cancel.is_cancelled() {
                return None;
            }
            slots = match self.changed.wait_timeout(slots, HEADER_WAIT_SLICE) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn drain(streams: ReadStreams) -> (Vec<Record>, Vec<RecordError>) {
        let ReadStreams {
            records,
            errors,
            handle,
        } = streams;
        let errors_thread = thread::spawn(move || errors.iter().collect::<Vec<_>>());
        let records: Vec<Record> = records.iter().collect();
        let errors = errors_thread.join().unwrap();
        handle.join();
        (records, errors)
    }

    #[test]
    fn test_reads_records_in_order_with_line_numbers() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "people.csv", "id,name\n1,Ada\n2,Grace\n3,Linus\n");

        let records = read_single(&path, true, &CancelToken::new()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].line_number, 2);
        assert_eq!(records[2].line_number, 4);
        assert_eq!(records[1].field_by_name("name"), Some("Grace"));
        assert!(records.iter().all(|r| r.source == "people.csv"));
    }

    #[test]
    fn test_headerless_source() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "raw.csv", "a,b\nc,d\n");

        let records = read_single(&path, false, &CancelToken::new()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line_number, 1);
        assert!(records[0].header.is_none());
    }

    #[test]
    fn test_quoted_fields() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "q.csv", "id,note\n1,\"hello, world\"\n");

        let records = read_single(&path, true, &CancelToken::new()).unwrap();
        assert_eq!(records[0].field(1), Some("hello, world"));
    }

    #[test]
    fn test_missing_and_empty_sources_are_io_errors() {
        let dir = TempDir::new().unwrap();
        let err = read_single(dir.path().join("missing.csv"), true, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.root_cause(), &PipelineError::FileNotFound);
        assert!(err.to_string().starts_with("read: missing.csv: "));

        let empty = write_csv(&dir, "empty.csv", "");
        let err = read_single(&empty, true, &CancelToken::new()).unwrap_err();
        assert_eq!(err.root_cause(), &PipelineError::EmptyFile);
    }

    #[test]
    fn test_header_only_source_yields_no_records() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "h.csv", "id,name\n");
        assert!(read_single(&path, true, &CancelToken::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_header_stops_source() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "bad.csv", "id,ID\n1,2\n");
        let err = read_single(&path, true, &CancelToken::new()).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().starts_with("validate_header: bad.csv:1:"));
    }

    #[test]
    fn test_malformed_records_are_reported_and_reading_continues() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "m.csv", "id,name\n1,Ada\n2\n3,Linus\n");

        let reader = SourceReader::new(ReaderConfig {
            sources: vec![path],
            ..Default::default()
        });
        let (records, errors) = drain(reader.read(&CancelToken::new()));

        assert_eq!(records.len(), 2);
        assert_eq!(errors.len(), 1);
        let rejected = errors[0].record.as_ref().unwrap();
        assert_eq!(rejected.line_number, 3);
        assert!(errors[0]
            .error
            .to_string()
            .starts_with("read_record: m.csv:3: invalid record"));
    }

    #[test]
    fn test_strict_records_stop_the_source() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "s.csv", "id,name\n1,Ada\n2\n3,Linus\n");

        let reader = SourceReader::new(ReaderConfig {
            sources: vec![path],
            strict_records: true,
            ..Default::default()
        });
        let (records, errors) = drain(reader.read(&CancelToken::new()));

        assert_eq!(records.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].record.is_none());
    }

    #[test]
    fn test_header_mismatch_is_attributed_to_later_source() {
        let dir = TempDir::new().unwrap();
        let first = write_csv(&dir, "first.csv", "id,name\n1,a\n2,b\n");
        let second = write_csv(&dir, "second.csv", "name,id\nc,3\n");

        let reader = SourceReader::new(ReaderConfig {
            sources: vec![first, second],
            ..Default::default()
        });
        let (records, errors) = drain(reader.read(&CancelToken::new()));

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source == "first.csv"));
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].error.root_cause(),
            PipelineError::HeaderMismatch { .. }
        ));
        assert!(errors[0]
            .error
            .to_string()
            .starts_with("validate_header: second.csv: "));
    }

    #[test]
    fn test_sources_sharing_a_file_name_keep_distinct_names() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("east")).unwrap();
        std::fs::create_dir(dir.path().join("west")).unwrap();
        let east = write_csv(&dir, "east/data.csv", "id,name\n1,a\n");
        let west = write_csv(&dir, "west/data.csv", "id,name\n2,b\n");
        let other = write_csv(&dir, "other.csv", "id,name\n3,c\n");

        let names = source_names(&[east.clone(), west.clone(), other.clone()]);
        assert_eq!(
            names,
            vec![
                east.display().to_string(),
                west.display().to_string(),
                "other.csv".to_string(),
            ]
        );

        let reader = SourceReader::new(ReaderConfig {
            sources: vec![east.clone(), west.clone()],
            ..Default::default()
        });
        let (records, errors) = drain(reader.read(&CancelToken::new()));
        assert!(errors.is_empty());
        let mut sources: Vec<_> = records.iter().map(|r| r.source.clone()).collect();
        sources.sort();
        let mut expected = vec![east.display().to_string(), west.display().to_string()];
        expected.sort();
        assert_eq!(sources, expected);
    }

    #[test]
    fn test_header_check_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let first = write_csv(&dir, "a.csv", "id,name\n1,a\n");
        let second = write_csv(&dir, "b.csv", "sku,qty\nx,3\n");

        let reader = SourceReader::new(ReaderConfig {
            sources: vec![first, second],
            validate_header: false,
            ..Default::default()
        });
        let (records, errors) = drain(reader.read(&CancelToken::new()));
        assert_eq!(records.len(), 2);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_cancellation_stops_blocked_readers() {
        let dir = TempDir::new().unwrap();
        let mut content = String::from("id,value\n");
        for i in 0..1000 {
            content.push_str(&format!("{},{}\n", i, i * 2));
        }
        let path = write_csv(&dir, "big.csv", &content);

        let reader = SourceReader::new(ReaderConfig {
            sources: vec![path],
            buffer_size: 4,
            ..Default::default()
        });
        let cancel = CancelToken::new();
        let streams = reader.read(&cancel);

        // Take a few records, then leave the reader blocked on a full stream.
        for _ in 0..3 {
            streams.records.recv().unwrap();
        }
        cancel.cancel();

        let ReadStreams {
            records,
            errors,
            handle,
        } = streams;
        handle.join();
        let remaining = records.iter().count();
        assert!(remaining <= 4);
        assert_eq!(errors.iter().count(), 0);
    }
}
