use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

use thiserror::Error;

use warden_config::ConfigError;
use warden_sandbox::SandboxError;

/// Errors that stop a container.
///
/// Every variant raised before READY is a failed startup: the container exits
/// without writing a byte and the host observes a failed handshake.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The command line failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Loading the module, installing the guard or mapping segments failed.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// A pipe descriptor passed on the command line is not open.
    #[error("descriptor {fd} is not open: {source}")]
    Descriptor {
        /// Offending descriptor.
        fd: RawFd,
        /// Underlying OS error.
        #[source]
        source: nix::Error,
    },

    /// Reading a request or writing a reply failed.
    #[error("command pipe I/O failed: {source}")]
    Pipe {
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl ContainerError {
    pub(crate) fn pipe(source: io::Error) -> Self {
        Self::Pipe {
            source: Arc::new(source),
        }
    }
}
