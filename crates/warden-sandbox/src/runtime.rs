//! Platform helpers for page-granular memory management.

use nix::unistd::{SysconfVar, sysconf};

use crate::error::SandboxError;

/// Returns the host page size in bytes.
///
/// # Errors
///
/// Returns [`SandboxError::PageSize`] when the value is unavailable or not a
/// power of two.
pub fn page_size() -> Result<usize, SandboxError> {
    let raw = sysconf(SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .ok_or(SandboxError::PageSize)?;
    usize::try_from(raw)
        .ok()
        .filter(|size| size.is_power_of_two())
        .ok_or(SandboxError::PageSize)
}
