use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::collector::CollectorConfig;
use crate::parallel::{PipelineOptions, PoolConfig, ProgressConfig, ReaderConfig};
use crate::platform::ReportSink;

/// Upper bound on `--workers`; more threads than this only add contention.
pub const MAX_WORKERS: usize = 1024;

/// Where processed records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
    Discard,
}

/// Settings for one run, built from the command line.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub reader: ReaderConfig,
    pub pool: PoolConfig,
    pub collector: CollectorConfig,
    pub output: OutputTarget,
    pub error_report: Option<PathBuf>,
    pub progress: bool,
    pub progress_interval: Duration,
    pub verbose: bool,
    pub quiet: bool,
}

impl PipelineConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        let output = if cli.no_output {
            OutputTarget::Discard
        } else {
            match &cli.output {
                Some(path) => OutputTarget::File(path.clone()),
                None => OutputTarget::Stdout,
            }
        };

        Self {
            reader: ReaderConfig {
                sources: cli.files.clone(),
                has_header: !cli.no_header,
                validate_header: !cli.no_validate_header,
                strict_records: cli.strict,
                delimiter: cli.delimiter,
                buffer_size: cli.buffer,
            },
            pool: PoolConfig {
                workers: cli.workers,
                max_active: cli.max_active,
                ..Default::default()
            },
            collector: CollectorConfig {
                max_errors: cli.max_errors,
                threshold: cli.error_threshold,
                abort_on_threshold: cli.abort_on_error,
            },
            output,
            error_report: cli.error_report.clone(),
            progress: !cli.no_progress && !cli.quiet,
            progress_interval: cli.progress_interval,
            verbose: cli.verbose,
            quiet: cli.quiet,
        }
    }

    /// Options for [`crate::parallel::Pipeline`], reporting to `sink`
    /// unless quiet.
    pub fn pipeline_options(&self, sink: &ReportSink) -> PipelineOptions {
        let report = (!self.quiet).then(|| sink.clone());
        PipelineOptions {
            reader: self.reader.clone(),
            pool: self.pool.clone(),
            collector: self.collector,
            progress: ProgressConfig {
                sink: if self.progress { report.clone() } else { None },
                interval: self.progress_interval,
                verbose: self.verbose,
                total: 0,
            },
            report,
            handle_signals: true,
        }
    }
}

/// Reject settings the pipeline cannot run with.
pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    if config.reader.sources.is_empty() {
        bail!("no input files given");
    }
    for path in &config.reader.sources {
        if !path.exists() {
            bail!("file not found: {}", path.display());
        }
        if path.is_dir() {
            bail!("not a file: {}", path.display());
        }
    }

    let threshold = config.collector.threshold;
    if !(0.0..=1.0).contains(&threshold) || threshold.is_nan() {
        bail!("error threshold must be between 0.0 and 1.0, got {}", threshold);
    }
    if config.collector.abort_on_threshold && threshold == 0.0 {
        bail!("--abort-on-error requires a non-zero --error-threshold");
    }
    if config.pool.workers > MAX_WORKERS {
        bail!(
            "worker count must be at most {}, got {}",
            MAX_WORKERS,
            config.pool.workers
        );
    }
    if config.reader.buffer_size == 0 {
        bail!("buffer size must be at least 1");
    }
    if config.progress_interval.is_zero() {
        bail!("progress interval must be greater than zero");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::NamedTempFile;

    fn config_for(args: &[&str]) -> PipelineConfig {
        let cli = Cli::try_parse_from(std::iter::once("csvflow").chain(args.iter().copied()))
            .unwrap();
        PipelineConfig::from_cli(&cli)
    }

    #[test]
    fn test_from_cli_maps_flags() {
        let config = config_for(&[
            "a.csv",
            "--no-header",
            "--strict",
            "-d",
            ";",
            "-w",
            "3",
            "--max-active",
            "2",
            "--max-errors",
            "7",
            "--error-threshold",
            "0.25",
            "--abort-on-error",
            "-o",
            "out.jsonl",
        ]);
        assert!(!config.reader.has_header);
        assert!(config.reader.strict_records);
        assert_eq!(config.reader.delimiter, b';');
        assert_eq!(config.pool.workers, 3);
        assert_eq!(config.pool.max_active, 2);
        assert_eq!(config.collector.max_errors, 7);
        assert_eq!(config.collector.threshold, 0.25);
        assert!(config.collector.abort_on_threshold);
        assert_eq!(config.output, OutputTarget::File(PathBuf::from("out.jsonl")));
    }

    #[test]
    fn test_quiet_disables_progress_and_report() {
        let config = config_for(&["a.csv", "-q"]);
        assert!(!config.progress);
        let options = config.pipeline_options(&ReportSink::new(Vec::new()));
        assert!(options.report.is_none());
        assert!(options.progress.sink.is_none());
    }

    #[test]
    fn test_validate_accepts_existing_file() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        assert!(validate_config(&config_for(&[path])).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();

        let missing = validate_config(&config_for(&["/definitely/not/here.csv"]));
        assert!(missing.unwrap_err().to_string().contains("file not found"));

        let threshold = validate_config(&config_for(&[path, "--error-threshold", "1.5"]));
        assert!(threshold.unwrap_err().to_string().contains("between 0.0 and 1.0"));

        let abort = validate_config(&config_for(&[path, "--abort-on-error"]));
        assert!(abort.is_err());

        let workers = validate_config(&config_for(&[path, "-w", "5000"]));
        assert!(workers.unwrap_err().to_string().contains("at most"));

        let buffer = validate_config(&config_for(&[path, "--buffer", "0"]));
        assert!(buffer.is_err());
    }
}
