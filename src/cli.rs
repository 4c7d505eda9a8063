// Command-line interface definition

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "csvflow")]
#[command(about = "Process CSV files concurrently with bounded workers and error thresholds")]
#[command(
    long_about = "Process CSV files concurrently with bounded workers and error thresholds\n\nEvery file is read on its own thread; records are validated by a pool of workers and\nemitted as JSON lines. Progress and an error report are printed to stderr.\n\nCOMMON EXAMPLES:\n  csvflow data/*.csv -o out.jsonl\n  csvflow big.csv.gz --workers 16 --error-threshold 0.05 --abort-on-error\n  csvflow a.csv b.csv --max-errors 100 --error-report errors.json"
)]
#[command(author = "Dirk Loss <mail@dirk-loss.de>")]
#[command(version)]
#[command(args_override_self = true)]
pub struct Cli {
    /// CSV files to process (gzip and zstd compressed files are detected automatically)
    #[arg(required_unless_present_any = ["show_config", "completions"])]
    pub files: Vec<PathBuf>,

    /// Treat the first row as data instead of a header
    #[arg(long = "no-header", help_heading = "Input Options")]
    pub no_header: bool,

    /// Skip header name checks and cross-file header comparison
    #[arg(long = "no-validate-header", help_heading = "Input Options")]
    pub no_validate_header: bool,

    /// Stop reading a file at its first malformed record
    #[arg(long = "strict", help_heading = "Input Options")]
    pub strict: bool,

    /// Field delimiter (single byte; '\t' for tabs)
    #[arg(
        short = 'd',
        long = "delimiter",
        default_value = ",",
        value_parser = parse_delimiter,
        help_heading = "Input Options"
    )]
    pub delimiter: u8,

    /// Records buffered between the readers and the workers
    #[arg(long = "buffer", default_value_t = crate::parallel::DEFAULT_RECORD_BUFFER, help_heading = "Input Options")]
    pub buffer: usize,

    /// Number of worker threads (0 = number of CPUs)
    #[arg(short = 'w', long = "workers", default_value_t = 0, help_heading = "Performance Options")]
    pub workers: usize,

    /// Cap on records processed at the same time (0 = no cap)
    #[arg(long = "max-active", default_value_t = 0, help_heading = "Performance Options")]
    pub max_active: usize,

    /// Cancel the run once this many errors were collected (0 = unlimited)
    #[arg(long = "max-errors", default_value_t = 0, help_heading = "Error Handling")]
    pub max_errors: usize,

    /// Error rate (errors / processed, 0.0-1.0) above which the run is aborted
    #[arg(long = "error-threshold", default_value_t = 0.0, help_heading = "Error Handling")]
    pub error_threshold: f64,

    /// Abort when the error threshold is exceeded
    #[arg(long = "abort-on-error", help_heading = "Error Handling")]
    pub abort_on_error: bool,

    /// Write every collected error to FILE as JSON
    #[arg(long = "error-report", value_name = "FILE", help_heading = "Error Handling")]
    pub error_report: Option<PathBuf>,

    /// Write JSON lines to FILE instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE", help_heading = "Output Options")]
    pub output: Option<PathBuf>,

    /// Discard processed records (only report statistics)
    #[arg(long = "no-output", conflicts_with = "output", help_heading = "Output Options")]
    pub no_output: bool,

    /// Disable periodic progress reporting
    #[arg(long = "no-progress", help_heading = "Output Options")]
    pub no_progress: bool,

    /// Interval between progress updates (e.g. 500ms, 2s)
    #[arg(
        long = "progress-interval",
        default_value = "1s",
        value_parser = humantime::parse_duration,
        help_heading = "Output Options"
    )]
    pub progress_interval: Duration,

    /// Verbose progress blocks and a per-file breakdown at the end
    #[arg(short = 'v', long = "verbose", help_heading = "Output Options")]
    pub verbose: bool,

    /// Suppress banner, progress and reports
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose", help_heading = "Output Options")]
    pub quiet: bool,

    /// Diagnostic log level or filter directive (overrides CSVFLOW_LOG)
    #[arg(long = "log-level", value_name = "LEVEL", help_heading = "Logging")]
    pub log_level: Option<String>,

    /// Diagnostic log format
    #[arg(long = "log-format", value_enum, default_value = "text", help_heading = "Logging")]
    pub log_format: LogFormat,

    /// Use alias from configuration file
    #[arg(short = 'a', long = "alias", help_heading = "Configuration")]
    pub alias: Vec<String>,

    /// Read configuration from FILE instead of the default locations
    #[arg(long = "config-file", value_name = "FILE", help_heading = "Configuration")]
    pub config_file: Option<PathBuf>,

    /// Ignore configuration files
    #[arg(long = "ignore-config", help_heading = "Configuration")]
    pub ignore_config: bool,

    /// Show configuration file locations and active settings, then exit
    #[arg(long = "show-config", help_heading = "Configuration")]
    pub show_config: bool,

    /// Print a shell completion script and exit
    #[arg(long = "completions", value_enum, value_name = "SHELL", help_heading = "Configuration")]
    pub completions: Option<clap_complete::Shell>,
}

/// Accepts a single byte or the escapes `\t` and `tab`.
fn parse_delimiter(s: &str) -> Result<u8, String> {
    match s {
        "\\t" | "tab" => Ok(b'\t'),
        _ => match s.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(format!(
                "delimiter must be a single byte, got '{}' ({} bytes)",
                s,
                s.len()
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("csvflow").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["data.csv"]).unwrap();
        assert_eq!(cli.files, vec![PathBuf::from("data.csv")]);
        assert_eq!(cli.delimiter, b',');
        assert_eq!(cli.workers, 0);
        assert_eq!(cli.progress_interval, Duration::from_secs(1));
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(!cli.abort_on_error);
    }

    #[test]
    fn test_files_required_unless_show_config() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--show-config"]).unwrap().show_config);
    }

    #[test]
    fn test_delimiter_parsing() {
        assert_eq!(parse_delimiter(";"), Ok(b';'));
        assert_eq!(parse_delimiter("\\t"), Ok(b'\t'));
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn test_durations_and_conflicts() {
        let cli = parse(&["x.csv", "--progress-interval", "250ms"]).unwrap();
        assert_eq!(cli.progress_interval, Duration::from_millis(250));
        assert!(parse(&["x.csv", "--quiet", "--verbose"]).is_err());
        assert!(parse(&["x.csv", "-o", "out", "--no-output"]).is_err());
    }
}
