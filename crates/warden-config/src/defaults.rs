//! Default values shared by the host and container command lines.

/// Default name of the read-only shared-memory segment.
pub const DEFAULT_READ_ONLY_NAME: &str = "/shared_ro";

/// Default name of the read-write shared-memory segment.
pub const DEFAULT_READ_WRITE_NAME: &str = "/shared_rw";

/// Default size of the read-only segment in bytes.
pub const DEFAULT_READ_ONLY_SIZE: usize = 5000;

/// Default size of the read-write segment in bytes.
pub const DEFAULT_READ_WRITE_SIZE: usize = 1000;

/// Default host script: initialise and verify both containers, then check
/// that a write by one container is visible to the other.
pub const DEFAULT_SCRIPT: &str =
    "a:init,a:verify,b:init,b:verify,a:write_rw,b:read_rw,a:exit,b:exit";

/// File name of the container binary looked up next to the host executable.
pub const CONTAINER_BINARY_NAME: &str = "warden-container";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";
