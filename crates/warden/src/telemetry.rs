//! Structured telemetry for both binaries.
//!
//! Logs always go to stderr. The container's pipes carry protocol bytes only,
//! and the host's stdout is left to the guests' print callbacks.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use warden_config::{LogFormat, LoggingArgs};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Proof that logging is set up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The log filter expression did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another global subscriber is already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the stderr subscriber described by `logging`. Only the first
/// call in a process has any effect.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for a malformed filter and
/// [`TelemetryError::Subscriber`] when a foreign subscriber is already set.
pub fn initialise(logging: &LoggingArgs) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(logging))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(logging: &LoggingArgs) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(logging.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match logging.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("warden=loud")]
    #[case("info,warden_host=chatty")]
    fn malformed_filters_are_rejected(#[case] filter: &str) {
        let logging = LoggingArgs {
            log_filter: filter.to_owned(),
            log_format: LogFormat::Compact,
        };
        assert!(matches!(
            install_subscriber(&logging),
            Err(TelemetryError::Filter(_))
        ));
    }

    #[test]
    fn only_the_first_initialisation_installs() {
        let logging = LoggingArgs::default();
        assert!(initialise(&logging).is_ok());
        let noisy = LoggingArgs {
            log_filter: "trace".to_owned(),
            log_format: LogFormat::Json,
        };
        assert!(initialise(&noisy).is_ok());
        assert!(TELEMETRY_GUARD.get().is_some());
    }
}
