use anyhow::Result;
use is_terminal::IsTerminal;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{info, warn};

use crate::parallel::CancelToken;

#[cfg(unix)]
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::{Handle, Signals},
};

#[cfg(windows)]
use signal_hook::{consts::SIGINT, flag};
#[cfg(windows)]
use std::sync::atomic::AtomicBool;

#[cfg(windows)]
const SIGTERM: i32 = 15;

/// Standard Unix exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidUsage = 2,
    SignalInt = 130,  // 128 + SIGINT (2)
    SignalPipe = 141, // 128 + SIGPIPE (13)
    SignalTerm = 143, // 128 + SIGTERM (15)
}

impl ExitCode {
    pub fn exit(self) -> ! {
        process::exit(self as i32)
    }

    pub fn from_signal(signal: i32) -> Self {
        if signal == SIGTERM {
            ExitCode::SignalTerm
        } else {
            ExitCode::SignalInt
        }
    }
}

fn signal_name(signal: i32) -> &'static str {
    if signal == SIGTERM {
        "SIGTERM"
    } else {
        "SIGINT"
    }
}

/// Turns SIGINT/SIGTERM into cancellation of a pipeline scope.
///
/// The first signal cancels the scope and lets in-flight work drain. A second
/// signal exits the process immediately with 130 or 143. Dropping the handler
/// unregisters the signals and joins its thread.
pub struct SignalHandler {
    received: Arc<AtomicI32>,
    #[cfg(unix)]
    handle: Handle,
    #[cfg(windows)]
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SignalHandler {
    #[cfg(unix)]
    pub fn install(cancel: CancelToken) -> Result<Self> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let handle = signals.handle();
        let received = Arc::new(AtomicI32::new(0));

        let seen = Arc::clone(&received);
        let thread = thread::spawn(move || {
            for sig in signals.forever() {
                on_signal(sig, &seen, &cancel);
            }
        });

        Ok(SignalHandler {
            received,
            handle,
            thread: Some(thread),
        })
    }

    #[cfg(windows)]
    pub fn install(cancel: CancelToken) -> Result<Self> {
        let term_flag = Arc::new(AtomicBool::new(false));
        flag::register(SIGINT, Arc::clone(&term_flag))?;

        let received = Arc::new(AtomicI32::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let seen = Arc::clone(&received);
        let stop_flag = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                thread::sleep(std::time::Duration::from_millis(100));
                if term_flag.swap(false, Ordering::Relaxed) {
                    on_signal(SIGINT, &seen, &cancel);
                }
            }
        });

        Ok(SignalHandler {
            received,
            stop,
            thread: Some(thread),
        })
    }

    /// Exit code matching the first signal received, if any.
    pub fn exit_code(&self) -> Option<ExitCode> {
        match self.received.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(ExitCode::from_signal(sig)),
        }
    }
}

fn on_signal(sig: i32, seen: &AtomicI32, cancel: &CancelToken) {
    let previous = seen.swap(sig, Ordering::SeqCst);
    if previous != 0 {
        warn!(signal = signal_name(sig), "second signal, exiting immediately");
        ExitCode::from_signal(sig).exit();
    }

    info!(signal = signal_name(sig), "shutting down");
    eprintln!(
        "\nReceived {}, shutting down gracefully (send again to force exit)...",
        signal_name(sig)
    );
    cancel.cancel();
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        #[cfg(unix)]
        self.handle.close();
        #[cfg(windows)]
        self.stop.store(true, Ordering::Relaxed);

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Shared text sink for progress and error reports.
#[derive(Clone)]
pub struct ReportSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    terminal: bool,
}

impl ReportSink {
    pub fn stderr() -> Self {
        Self {
            terminal: io::stderr().is_terminal(),
            writer: Arc::new(Mutex::new(Box::new(io::stderr()))),
        }
    }

    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            terminal: false,
        }
    }

    /// Whether the sink is an interactive terminal, so progress lines can be
    /// redrawn in place.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Write `text` as-is. Report output is best-effort, so write failures
    /// are ignored.
    pub fn write_str(&self, text: &str) {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = writer.write_all(text.as_bytes());
        let _ = writer.flush();
    }
}

impl std::fmt::Debug for ReportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportSink")
            .field("terminal", &self.terminal)
            .finish()
    }
}

/// In-memory writer whose contents can be read back, for capturing reports.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buffer = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Safe wrapper for writing to stdout that handles broken pipes and other I/O errors
pub struct SafeStdout {
    stdout: io::Stdout,
}

impl Default for SafeStdout {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeStdout {
    pub fn new() -> Self {
        Self {
            stdout: io::stdout(),
        }
    }

    /// Write a line to stdout, handling broken pipes gracefully (cross-platform)
    pub fn writeln(&mut self, data: &str) -> Result<()> {
        match writeln!(self.stdout, "{}", data) {
            Ok(()) => Ok(()),
            Err(e) if Self::is_broken_pipe(&e) => {
                // Broken pipe is normal in pipelines - exit quietly
                ExitCode::SignalPipe.exit();
            }
            Err(e) => Err(anyhow::anyhow!("Failed to write to stdout: {}", e)),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match self.stdout.flush() {
            Ok(()) => Ok(()),
            Err(e) if Self::is_broken_pipe(&e) => {
                ExitCode::SignalPipe.exit();
            }
            Err(e) => Err(anyhow::anyhow!("Failed to flush stdout: {}", e)),
        }
    }

    /// Cross-platform broken pipe detection
    fn is_broken_pipe(e: &io::Error) -> bool {
        #[cfg(unix)]
        {
            e.kind() == io::ErrorKind::BrokenPipe
        }
        #[cfg(windows)]
        {
            // On Windows, broken pipe manifests as different error codes
            e.kind() == io::ErrorKind::BrokenPipe
                || e.raw_os_error() == Some(232) // ERROR_NO_DATA "The pipe is being closed"
                || e.raw_os_error() == Some(109) // ERROR_BROKEN_PIPE "The pipe has been ended"
        }
    }
}

/// Create a helpful error message for file creation failures
fn create_helpful_error_message(path: &Path, error: &io::Error) -> String {
    let base_msg = format!("Cannot create output file '{}': {}", path.display(), error);

    let suggestion = match error.kind() {
        io::ErrorKind::PermissionDenied => {
            if path.parent().is_some_and(|p| !p.exists()) {
                "Suggestion: Parent directory does not exist, create it first"
            } else {
                "Suggestion: Check file permissions or choose a writable location"
            }
        }
        io::ErrorKind::NotFound => "Suggestion: Parent directory does not exist, create it first",
        io::ErrorKind::AlreadyExists if path.is_dir() => {
            "Suggestion: Path points to a directory, specify a filename instead"
        }
        io::ErrorKind::InvalidInput => "Suggestion: Check for invalid characters in filename",
        _ => return base_msg,
    };

    format!("{}\n{}", base_msg, suggestion)
}

/// Line-oriented file writer with descriptive errors
pub struct SafeFileOut {
    file: io::BufWriter<File>,
    path: String,
}

impl SafeFileOut {
    /// Create the file, truncating it if it exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let path_string = path_ref.to_string_lossy().to_string();

        match File::create(path_ref) {
            Ok(file) => Ok(Self {
                file: io::BufWriter::new(file),
                path: path_string,
            }),
            Err(e) => {
                let error_msg = create_helpful_error_message(path_ref, &e);
                Err(anyhow::anyhow!("{}", error_msg))
            }
        }
    }

    pub fn writeln(&mut self, data: &str) -> Result<()> {
        writeln!(self.file, "{}", data)
            .map_err(|e| anyhow::anyhow!("Output file write failed '{}': {}", self.path, e))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| anyhow::anyhow!("Output file flush failed '{}': {}", self.path, e))
    }
}

/// Destination for the JSON lines of successful records.
pub enum OutputSink {
    Stdout(SafeStdout),
    File(SafeFileOut),
    Writer(Box<dyn Write + Send>),
}

impl OutputSink {
    pub fn writeln(&mut self, line: &str) -> Result<()> {
        match self {
            OutputSink::Stdout(out) => out.writeln(line),
            OutputSink::File(out) => out.writeln(line),
            OutputSink::Writer(out) => {
                writeln!(out, "{}", line).map_err(|e| anyhow::anyhow!("Output write failed: {}", e))
            }
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match self {
            OutputSink::Stdout(out) => out.flush(),
            OutputSink::File(out) => out.flush(),
            OutputSink::Writer(out) => out
                .flush()
                .map_err(|e| anyhow::anyhow!("Output flush failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::InvalidUsage as i32, 2);
        assert_eq!(ExitCode::SignalInt as i32, 130);
        assert_eq!(ExitCode::SignalPipe as i32, 141);
        assert_eq!(ExitCode::SignalTerm as i32, 143);
    }

    #[test]
    fn test_exit_code_from_signal() {
        assert_eq!(ExitCode::from_signal(SIGTERM), ExitCode::SignalTerm);
        assert_eq!(ExitCode::from_signal(SIGINT), ExitCode::SignalInt);
    }

    #[test]
    fn test_memory_sink_through_report_sink() {
        let memory = MemorySink::new();
        let sink = ReportSink::new(memory.clone());
        sink.write_str("hello ");
        sink.write_str("world\n");
        assert_eq!(memory.contents(), "hello world\n");
        assert!(!sink.is_terminal());
    }

    #[test]
    fn test_safe_file_out_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        {
            let mut out = SafeFileOut::new(&path).unwrap();
            out.writeln("{\"a\":1}").unwrap();
            out.writeln("{\"a\":2}").unwrap();
            out.flush().unwrap();
        }
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\"a\":1}\n{\"a\":2}\n"
        );
    }

    #[test]
    fn test_safe_file_out_reports_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/out.jsonl");
        let err = SafeFileOut::new(&path).err().unwrap().to_string();
        assert!(err.contains("Cannot create output file"));
        assert!(err.contains("Parent directory does not exist"));
    }

    #[test]
    fn test_handler_drop_joins_thread() {
        let cancel = CancelToken::new();
        let handler = SignalHandler::install(cancel.clone()).unwrap();
        assert_eq!(handler.exit_code(), None);
        drop(handler);
        assert!(!cancel.is_cancelled());
    }
}
