use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use csvflow::cli::Cli;
use csvflow::config::{validate_config, OutputTarget, PipelineConfig};
use csvflow::config_file::ConfigFile;
use csvflow::logging::init_logging;
use csvflow::platform::{ExitCode, OutputSink, ReportSink, SafeFileOut, SafeStdout};
use csvflow::{ErrorReporter, Pipeline, PipelineError, RecordValidator, SummarySnapshot};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const RULE: &str = "========================================";

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("csvflow: Error: {:#}", e);
            ExitCode::GeneralError
        }
    };
    code.exit();
}

fn run() -> Result<ExitCode> {
    let cli = parse_args()?;

    if cli.show_config {
        print!("{}", ConfigFile::describe());
        return Ok(ExitCode::Success);
    }
    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "csvflow", &mut io::stdout());
        return Ok(ExitCode::Success);
    }

    init_logging(cli.log_level.as_deref(), cli.log_format)?;

    let config = PipelineConfig::from_cli(&cli);
    if let Err(e) = validate_config(&config) {
        eprintln!("csvflow: Error: {:#}", e);
        return Ok(ExitCode::InvalidUsage);
    }
    debug!(?config, "configuration resolved");

    let sink = ReportSink::stderr();
    if !config.quiet {
        sink.write_str(&startup_banner(&config));
    }

    let output = match &config.output {
        OutputTarget::Stdout => Some(OutputSink::Stdout(SafeStdout::new())),
        OutputTarget::File(path) => Some(OutputSink::File(SafeFileOut::new(path)?)),
        OutputTarget::Discard => None,
    };

    let mut pipeline = Pipeline::new(config.pipeline_options(&sink), Arc::new(RecordValidator));
    if let Some(output) = output {
        pipeline = pipeline.with_output(output);
    }

    let outcome = pipeline.run();

    if let Some(path) = &config.error_report {
        ErrorReporter::new(pipeline.collector(), sink.clone())
            .export_json(path)
            .with_context(|| format!("Failed to export error report to {}", path.display()))?;
    }

    if !config.quiet {
        sink.write_str(&final_summary(&pipeline.summary()));
        if config.verbose {
            sink.write_str(&source_breakdown(&pipeline));
        }
    }

    if let Some(code) = pipeline.signal_exit_code() {
        return Ok(code);
    }

    match outcome {
        Ok(()) => Ok(ExitCode::Success),
        Err(PipelineError::Aborted) => {
            eprintln!("csvflow: processing aborted: error threshold exceeded");
            Ok(ExitCode::GeneralError)
        }
        Err(e) => Err(e).context("Pipeline execution failed"),
    }
}

/// Apply config-file defaults and aliases, then parse. Clap reports its own
/// usage errors and exits with status 2.
fn parse_args() -> Result<Cli> {
    let raw_args: Vec<String> = std::env::args().collect();

    let args = if raw_args.iter().any(|arg| arg == "--ignore-config") {
        raw_args
    } else {
        let custom = extract_config_file_arg(&raw_args);
        let config_file = ConfigFile::load_with_custom_path(custom.as_deref())
            .context("Config file error")?;
        config_file.process_args(raw_args).context("Config error")?
    };

    Ok(Cli::try_parse_from(args).unwrap_or_else(|e| e.exit()))
}

fn extract_config_file_arg(args: &[String]) -> Option<PathBuf> {
    args.windows(2)
        .find(|pair| pair[0] == "--config-file")
        .map(|pair| PathBuf::from(&pair[1]))
}

fn startup_banner(config: &PipelineConfig) -> String {
    let mut lines = vec![
        RULE.to_string(),
        format!("csvflow {} starting", VERSION),
        RULE.to_string(),
        format!("Files:           {}", config.reader.sources.len()),
        format!("Workers:         {}", config.pool.effective_workers()),
        format!("Buffer Size:     {}", config.reader.effective_buffer_size()),
        format!("Has Header:      {}", config.reader.has_header),
    ];
    if config.collector.threshold > 0.0 {
        lines.push(format!(
            "Error Threshold: {:.1}%",
            config.collector.threshold * 100.0
        ));
    }
    if let OutputTarget::File(path) = &config.output {
        lines.push(format!("Output File:     {}", path.display()));
    }
    lines.push(RULE.to_string());
    lines.push(String::new());
    lines.join("\n") + "\n"
}

fn final_summary(summary: &SummarySnapshot) -> String {
    let percent = |part: u64| {
        if summary.total == 0 {
            0.0
        } else {
            part as f64 / summary.total as f64 * 100.0
        }
    };
    let duration = std::time::Duration::from_millis(summary.duration.as_millis() as u64);
    [
        String::new(),
        RULE.to_string(),
        "Processing Summary".to_string(),
        RULE.to_string(),
        format!("Total Records:    {}", summary.total),
        format!("Successful:       {} ({:.1}%)", summary.success, percent(summary.success)),
        format!("Failed:           {} ({:.1}%)", summary.failed, percent(summary.failed)),
        format!("Duration:         {}", humantime::format_duration(duration)),
        format!("Throughput:       {:.0} records/sec", summary.throughput),
        RULE.to_string(),
    ]
    .join("\n")
        + "\n"
}

fn source_breakdown(pipeline: &Pipeline) -> String {
    let mut out = String::from("\nPer-file results:\n");
    for (name, stats) in pipeline.source_stats() {
        out.push_str(&format!(
            "  {:<24} processed {:>8}, success {:>8}, failed {:>8}\n",
            name, stats.processed, stats.success, stats.failed
        ));
    }
    out.push_str("Per-worker results:\n");
    for worker in pipeline.worker_stats() {
        out.push_str(&format!(
            "  worker {:<3} processed {:>8}, failed {:>8}\n",
            worker.id, worker.processed, worker.failed
        ));
    }
    out
}
