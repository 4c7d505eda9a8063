//! Error kinds raised by the pipeline stages, plus the fixed rules that
//! classify them into a category, a severity and a retryability flag.

use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;

/// Every error the pipeline core can produce.
///
/// Errors are values constructed per occurrence. `Context` attaches the
/// failing operation, the source and the line to an underlying cause.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("invalid CSV format: {0}")]
    InvalidCsv(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("validation error: field={field}, value={value}, message={message}")]
    Validation {
        field: String,
        value: String,
        message: String,
    },

    #[error("header mismatch: expected [{}], got [{}]", expected.join(","), actual.join(","))]
    HeaderMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("file not found")]
    FileNotFound,

    #[error("empty file")]
    EmptyFile,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("deadline exceeded")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("processing failed: {0}")]
    Processing(String),

    #[error("maximum error threshold exceeded")]
    MaxErrorsExceeded,

    #[error("maximum error limit reached ({0} errors)")]
    LimitReached(usize),

    #[error("error threshold exceeded: {:.1}% > {:.1}%", rate * 100.0, threshold * 100.0)]
    ThresholdExceeded { rate: f64, threshold: f64 },

    #[error("worker pool already started")]
    AlreadyStarted,

    #[error("pipeline has already been run")]
    AlreadyRan,

    #[error("processing aborted: error threshold exceeded")]
    Aborted,

    #[error("{}", format_context(op, source_name, *line, cause))]
    Context {
        op: &'static str,
        source_name: String,
        line: usize,
        #[source]
        cause: Box<PipelineError>,
    },

    #[error("{0}")]
    Other(String),
}

fn format_context(op: &str, source_name: &str, line: usize, cause: &PipelineError) -> String {
    if line > 0 {
        format!("{}: {}:{}: {}", op, source_name, line, cause)
    } else if !source_name.is_empty() {
        format!("{}: {}: {}", op, source_name, cause)
    } else {
        format!("{}: {}", op, cause)
    }
}

impl PipelineError {
    /// Wrap `cause` with the operation, source and line it occurred at.
    pub fn context(
        op: &'static str,
        source_name: impl Into<String>,
        line: usize,
        cause: PipelineError,
    ) -> Self {
        PipelineError::Context {
            op,
            source_name: source_name.into(),
            line,
            cause: Box::new(cause),
        }
    }

    pub fn validation(
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        PipelineError::Validation {
            field: field.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    /// The innermost error, looking through any `Context` layers.
    pub fn root_cause(&self) -> &PipelineError {
        let mut current = self;
        while let PipelineError::Context { cause, .. } = current {
            current = cause;
        }
        current
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self.root_cause(),
            PipelineError::InvalidCsv(_)
                | PipelineError::InvalidRecord(_)
                | PipelineError::Validation { .. }
                | PipelineError::HeaderMismatch { .. }
        )
    }

    pub fn is_io(&self) -> bool {
        matches!(
            self.root_cause(),
            PipelineError::FileNotFound | PipelineError::EmptyFile | PipelineError::Io(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.root_cause(),
            PipelineError::Timeout | PipelineError::Cancelled
        )
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, PipelineError::Context { .. })
            || matches!(self.root_cause(), PipelineError::Processing(_))
    }

    pub fn category(&self) -> ErrorCategory {
        if self.is_validation() {
            ErrorCategory::Validation
        } else if self.is_io() {
            ErrorCategory::Io
        } else if self.is_timeout() {
            ErrorCategory::Timeout
        } else if self.is_processing() {
            ErrorCategory::Processing
        } else {
            ErrorCategory::Unknown
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.root_cause() {
            PipelineError::MaxErrorsExceeded => ErrorSeverity::Critical,
            PipelineError::Cancelled => ErrorSeverity::High,
            _ if self.is_validation() => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }

    /// Informational only: nothing in the pipeline retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Timeout | ErrorCategory::Io
        )
    }
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => PipelineError::FileNotFound,
            _ => PipelineError::Io(err.to_string()),
        }
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            PipelineError::Io(err.to_string())
        } else {
            PipelineError::InvalidCsv(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Validation,
    Processing,
    Io,
    Timeout,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Processing => "PROCESSING",
            ErrorCategory::Io => "IO",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_message_includes_line_and_source() {
        let err = PipelineError::context(
            "read_record",
            "data.csv",
            12,
            PipelineError::InvalidRecord("field count mismatch".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "read_record: data.csv:12: invalid record: field count mismatch"
        );

        let err = PipelineError::context("read", "data.csv", 0, PipelineError::EmptyFile);
        assert_eq!(err.to_string(), "read: data.csv: empty file");

        let err = PipelineError::context("read", "", 0, PipelineError::EmptyFile);
        assert_eq!(err.to_string(), "read: empty file");
    }

    #[test]
    fn test_categories_look_through_context() {
        let mismatch = PipelineError::HeaderMismatch {
            expected: vec!["a".into()],
            actual: vec!["b".into()],
        };
        let wrapped = PipelineError::context("validate_header", "b.csv", 0, mismatch);
        assert_eq!(wrapped.category(), ErrorCategory::Validation);
        assert_eq!(wrapped.severity(), ErrorSeverity::Low);
        assert!(!wrapped.is_retryable());

        let wrapped = PipelineError::context("read", "missing.csv", 0, PipelineError::FileNotFound);
        assert_eq!(wrapped.category(), ErrorCategory::Io);
        assert_eq!(wrapped.severity(), ErrorSeverity::Medium);
        assert!(wrapped.is_retryable());

        let wrapped =
            PipelineError::context("process", "a.csv", 3, PipelineError::Other("boom".into()));
        assert_eq!(wrapped.category(), ErrorCategory::Processing);
    }

    #[test]
    fn test_severity_rules() {
        assert_eq!(
            PipelineError::MaxErrorsExceeded.severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(PipelineError::Cancelled.severity(), ErrorSeverity::High);
        assert_eq!(
            PipelineError::validation("age", "x", "not a number").severity(),
            ErrorSeverity::Low
        );
        assert_eq!(
            PipelineError::Processing("bad".into()).severity(),
            ErrorSeverity::Medium
        );
        assert_eq!(PipelineError::Other("?".into()).severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_timeout_is_retryable_but_unknown_is_not() {
        assert_eq!(PipelineError::Timeout.category(), ErrorCategory::Timeout);
        assert!(PipelineError::Timeout.is_retryable());
        assert_eq!(
            PipelineError::Other("x".into()).category(),
            ErrorCategory::Unknown
        );
        assert!(!PipelineError::Other("x".into()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "nope");
        assert_eq!(PipelineError::from(not_found), PipelineError::FileNotFound);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(PipelineError::from(denied), PipelineError::Io(_)));
    }

    #[test]
    fn test_threshold_message() {
        let err = PipelineError::ThresholdExceeded {
            rate: 0.5,
            threshold: 0.1,
        };
        assert_eq!(err.to_string(), "error threshold exceeded: 50.0% > 10.0%");
    }
}
