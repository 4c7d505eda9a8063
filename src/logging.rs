//! Diagnostic logging setup for the binary.
//!
//! Library code only emits `tracing` events; nothing is printed unless a
//! subscriber is installed here.

use anyhow::{anyhow, Result};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV: &str = "CSVFLOW_LOG";
const DEFAULT_DIRECTIVE: &str = "csvflow=warn";

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Pick the filter: an explicit level wins, then `CSVFLOW_LOG`, then
/// `RUST_LOG`, then warnings only.
pub fn build_filter(level: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = level {
        return EnvFilter::try_new(directive_for(level))
            .map_err(|e| anyhow!("Invalid log level '{}': {}", level, e));
    }
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)))
}

/// Bare levels apply to this crate only; anything else is passed through
/// as a full directive.
fn directive_for(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        lvl @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => format!("csvflow={}", lvl),
        _ => level.to_string(),
    }
}

/// Install the global subscriber writing to stderr. Fails if one is already
/// installed.
pub fn init_logging(level: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = build_filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(false)
                    .with_thread_names(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(false),
            )
            .try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to initialise logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_is_scoped_to_crate() {
        assert_eq!(directive_for("debug"), "csvflow=debug");
        assert_eq!(directive_for("WARN"), "csvflow=warn");
        assert_eq!(directive_for("csvflow=trace,info"), "csvflow=trace,info");
    }

    #[test]
    fn test_explicit_level_builds_filter() {
        let filter = build_filter(Some("info")).unwrap();
        assert_eq!(filter.to_string(), "csvflow=info");
    }

    #[test]
    fn test_invalid_directive_is_rejected() {
        assert!(build_filter(Some("csvflow=notalevel")).is_err());
    }
}
