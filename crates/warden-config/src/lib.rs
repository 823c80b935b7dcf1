//! Command-line configuration shared by the warden binaries.
//!
//! The container process is started with a fixed positional argument list
//! (module, label, pipe descriptors, then the read-only and read-write segment
//! names and sizes). [`ContainerArgs`] is the single definition of that
//! contract: the container parses it with `clap` and the host renders it back
//! to an argument vector with [`ContainerArgs::to_args`].
//!
//! [`HostArgs`] configures the orchestrating host, and [`LoggingArgs`] carries
//! the telemetry settings both binaries accept.

mod container;
pub mod defaults;
mod error;
mod host;
mod logging;

pub use container::ContainerArgs;
pub use error::ConfigError;
pub use host::HostArgs;
pub use logging::{LogFormat, LoggingArgs};
