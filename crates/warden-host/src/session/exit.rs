use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use nix::sys::signal::Signal;

/// How a container process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerExit {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ContainerExit {
    /// Builds an exit record from raw parts.
    #[must_use]
    pub const fn new(code: Option<i32>, signal: Option<i32>) -> Self {
        Self { code, signal }
    }

    /// Exit code, when the process exited normally.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        self.code
    }

    /// Terminating signal, when the process was killed.
    #[must_use]
    pub const fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// Returns `true` for a clean zero exit.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns `true` when the process died from a memory access violation,
    /// which is how read-only and guard-page enforcement shows up.
    #[must_use]
    pub const fn is_hard_fault(&self) -> bool {
        matches!(self.signal, Some(libc::SIGSEGV | libc::SIGBUS))
    }
}

impl From<ExitStatus> for ContainerExit {
    fn from(status: ExitStatus) -> Self {
        Self::new(status.code(), status.signal())
    }
}

impl fmt::Display for ContainerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with status {code}"),
            (None, Some(signal)) => match Signal::try_from(signal) {
                Ok(named) => write!(f, "killed by {}", named.as_str()),
                Err(_) => write!(f, "killed by signal {signal}"),
            },
            (None, None) => f.write_str("ended for an unknown reason"),
        }
    }
}
