//! Inaccessible page inserted into the guest heap.

use tracing::{info, warn};

use crate::engine::ALLOCATOR_EXPORT;
use crate::error::SandboxError;
use crate::layout::{self, LayoutError};
use crate::runtime::page_size;
use crate::sandbox::Sandbox;
use crate::shm;

/// Tracing target for guard operations.
const GUARD_TARGET: &str = "warden_sandbox::guard";

/// Installs a guard page by allocating two pages from the guest allocator
/// and revoking access to the trailing one.
///
/// A forward write that walks out of a buffer and reaches the revoked page
/// faults the process. Overflows that stay inside the first page are not
/// caught.
#[derive(Debug, Clone, Copy)]
pub struct GuardAllocator {
    page_size: usize,
}

impl GuardAllocator {
    /// Creates an allocator using the system page size.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PageSize`] when the page size is unavailable.
    pub fn new() -> Result<Self, SandboxError> {
        Ok(Self {
            page_size: page_size()?,
        })
    }

    /// Creates an allocator for an explicit page size.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidPageSize`] unless `page_size` is a power
    /// of two.
    pub const fn with_page_size(page_size: usize) -> Result<Self, LayoutError> {
        if page_size.is_power_of_two() {
            Ok(Self { page_size })
        } else {
            Err(LayoutError::InvalidPageSize(page_size))
        }
    }

    /// Allocates two pages in the guest and revokes the trailing one.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError`] when the allocator is missing, traps or
    /// returns no memory, or the protection change fails.
    pub fn install(&self, sandbox: &mut Sandbox) -> Result<GuardPage, SandboxError> {
        let allocator = sandbox.require_export(ALLOCATOR_EXPORT)?;
        let len = self.page_size * 2;
        let returned = sandbox.call_fatal(allocator, &[layout::to_guest_i32(len)?])?;
        let guest_start = usize::try_from(returned)
            .ok()
            .filter(|offset| *offset > 0)
            .ok_or(SandboxError::AllocationFailed { size: len })?;

        let memory = sandbox.memory();
        let start = memory.host_address(guest_start, len)?;
        let address = layout::guard_page_address(start, len, self.page_size)?;
        let guest_offset = memory.guest_offset(address, self.page_size)?;
        // SAFETY: the page is page-aligned and lies inside an allocation the
        // guest just handed out; no Rust reference borrows it.
        unsafe { shm::revoke(address, self.page_size)? };
        info!(
            target: GUARD_TARGET,
            label = sandbox.label(),
            guest_offset,
            "guard page installed"
        );
        Ok(GuardPage {
            address,
            len: self.page_size,
            guest_offset,
        })
    }
}

/// A revoked page inside guest memory. Access is restored on drop, so the
/// value must be dropped before the [`Sandbox`] owning the memory.
#[derive(Debug)]
pub struct GuardPage {
    address: usize,
    len: usize,
    guest_offset: usize,
}

impl GuardPage {
    /// Offset of the revoked page inside guest linear memory.
    #[must_use]
    pub const fn guest_offset(&self) -> usize {
        self.guest_offset
    }

    /// Size of the revoked range in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always `false`; a guard covers at least one page.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for GuardPage {
    fn drop(&mut self) {
        // SAFETY: the page was revoked by `GuardAllocator::install` inside
        // guest memory that outlives this value.
        if let Err(error) = unsafe { shm::restore(self.address, self.len) } {
            warn!(target: GUARD_TARGET, %error, "failed to restore guard page");
        }
    }
}
