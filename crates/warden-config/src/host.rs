use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use warden_protocol::{SegmentAccess, SegmentDescriptor};

use crate::defaults::{
    DEFAULT_READ_ONLY_NAME, DEFAULT_READ_ONLY_SIZE, DEFAULT_READ_WRITE_NAME,
    DEFAULT_READ_WRITE_SIZE, DEFAULT_SCRIPT,
};
use crate::error::{ConfigError, validate_segment};
use crate::logging::LoggingArgs;

/// Arguments of the orchestrating host.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "warden-host", about = "Drives sandboxed WebAssembly containers over pipes")]
pub struct HostArgs {
    /// WebAssembly module every container loads.
    #[arg(long, value_name = "PATH")]
    pub module: PathBuf,
    /// Container binary; defaults to `warden-container` next to this executable.
    #[arg(long, value_name = "PATH")]
    pub container: Option<PathBuf>,
    /// Name of the read-only shared-memory segment.
    #[arg(long, default_value = DEFAULT_READ_ONLY_NAME)]
    pub ro_name: String,
    /// Size of the read-only segment in bytes.
    #[arg(long, default_value_t = DEFAULT_READ_ONLY_SIZE)]
    pub ro_size: usize,
    /// Name of the read-write shared-memory segment.
    #[arg(long, default_value = DEFAULT_READ_WRITE_NAME)]
    pub rw_name: String,
    /// Size of the read-write segment in bytes.
    #[arg(long, default_value_t = DEFAULT_READ_WRITE_SIZE)]
    pub rw_size: usize,
    /// Comma-separated `label:command` steps, e.g. `a:init,a:tick,a:exit`.
    #[arg(long, default_value = DEFAULT_SCRIPT)]
    pub script: String,
    /// Install the guard page in every container.
    #[arg(long)]
    pub guard: bool,
    /// Fixed seed passed to every container's `init` export.
    #[arg(long, allow_hyphen_values = true)]
    pub seed: Option<i32>,
    /// Maximum time to wait for a handshake or acknowledgement.
    #[arg(long, value_name = "MILLIS")]
    pub reply_timeout_ms: Option<u64>,
    /// Telemetry settings.
    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl HostArgs {
    /// Checks both segment definitions.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an invalid name or an empty segment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_segment(&self.ro_name, self.ro_size)?;
        validate_segment(&self.rw_name, self.rw_size)
    }

    /// Returns the segments the host creates, read-only first.
    #[must_use]
    pub fn segments(&self) -> [SegmentDescriptor; 2] {
        [
            SegmentDescriptor::new(self.ro_name.clone(), self.ro_size, SegmentAccess::ReadOnly),
            SegmentDescriptor::new(self.rw_name.clone(), self.rw_size, SegmentAccess::ReadWrite),
        ]
    }

    /// Returns the configured reply timeout, if any.
    #[must_use]
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }
}
