use clap::Args;
use strum::{Display, EnumString};

use crate::defaults::DEFAULT_LOG_FILTER;

/// Supported logging output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
    /// Human-readable single line output.
    #[default]
    Compact,
}

/// Telemetry flags accepted by both binaries.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct LoggingArgs {
    /// Tracing filter expression, e.g. `info` or `warden_sandbox=debug`.
    #[arg(long, env = "WARDEN_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
    /// Log line format.
    #[arg(long, env = "WARDEN_LOG_FORMAT", default_value_t = LogFormat::default())]
    pub log_format: LogFormat,
}

impl Default for LoggingArgs {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: LogFormat::default(),
        }
    }
}

impl LoggingArgs {
    /// Returns the filter expression.
    #[must_use]
    pub const fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Returns the output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
