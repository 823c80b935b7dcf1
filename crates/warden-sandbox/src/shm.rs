//! Raw mapping primitives.
//!
//! This is the only module that hands addresses to the kernel. Callers own
//! the address arithmetic and must pass page-aligned ranges that lie inside
//! the guest's linear memory.

use std::ffi::{CString, c_int, c_void};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr;
use std::sync::Arc;

use warden_protocol::SegmentAccess;

use crate::error::SandboxError;

const fn protection(access: SegmentAccess) -> c_int {
    match access {
        SegmentAccess::ReadOnly => libc::PROT_READ,
        SegmentAccess::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
    }
}

fn open_segment(name: &str, access: SegmentAccess) -> Result<OwnedFd, SandboxError> {
    let open_error = |source: io::Error| SandboxError::SharedMemoryOpen {
        name: name.to_owned(),
        source: Arc::new(source),
    };
    let c_name = CString::new(name)
        .map_err(|error| open_error(io::Error::new(io::ErrorKind::InvalidInput, error)))?;
    let flags = if access.is_read_only() {
        libc::O_RDONLY
    } else {
        libc::O_RDWR
    };
    // SAFETY: `c_name` is a valid NUL-terminated string for the call.
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, 0) };
    if fd < 0 {
        return Err(open_error(io::Error::last_os_error()));
    }
    // SAFETY: `shm_open` returned a fresh descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Maps the named segment over `[address, address + len)` with the
/// protection implied by `access`. The descriptor is closed before returning;
/// the mapping keeps the object alive.
///
/// # Safety
///
/// The range must be page-aligned, owned by the caller and not borrowed as
/// Rust data for the duration of the call.
pub(crate) unsafe fn map_segment(
    name: &str,
    address: usize,
    len: usize,
    access: SegmentAccess,
) -> Result<(), SandboxError> {
    let fd = open_segment(name, access)?;
    // SAFETY: the caller guarantees the range is ours to replace.
    let mapped = unsafe {
        libc::mmap(
            ptr::with_exposed_provenance_mut::<c_void>(address),
            len,
            protection(access),
            libc::MAP_SHARED | libc::MAP_FIXED,
            fd.as_raw_fd(),
            0,
        )
    };
    if mapped == libc::MAP_FAILED {
        return Err(SandboxError::Map {
            name: name.to_owned(),
            source: Arc::new(io::Error::last_os_error()),
        });
    }
    let actual = mapped.addr();
    if actual != address {
        return Err(SandboxError::MapMisplaced {
            name: name.to_owned(),
            expected: address,
            actual,
        });
    }
    Ok(())
}

/// Replaces `[address, address + len)` with fresh private zeroed pages,
/// detaching it from any shared object.
///
/// # Safety
///
/// Same contract as [`map_segment`].
pub(crate) unsafe fn release(address: usize, len: usize) -> io::Result<()> {
    // SAFETY: the caller guarantees the range is ours to replace.
    let mapped = unsafe {
        libc::mmap(
            ptr::with_exposed_provenance_mut::<c_void>(address),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
            -1,
            0,
        )
    };
    if mapped == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Revokes all access to `[address, address + len)`.
///
/// # Safety
///
/// Same contract as [`map_segment`]. Any later access to the range faults.
pub(crate) unsafe fn revoke(address: usize, len: usize) -> Result<(), SandboxError> {
    // SAFETY: forwarded caller contract.
    unsafe { set_protection(address, len, libc::PROT_NONE) }
}

/// Restores read and write access to `[address, address + len)`.
///
/// # Safety
///
/// Same contract as [`map_segment`].
pub(crate) unsafe fn restore(address: usize, len: usize) -> Result<(), SandboxError> {
    // SAFETY: forwarded caller contract.
    unsafe { set_protection(address, len, libc::PROT_READ | libc::PROT_WRITE) }
}

unsafe fn set_protection(address: usize, len: usize, prot: c_int) -> Result<(), SandboxError> {
    // SAFETY: the caller guarantees the range is ours.
    let result =
        unsafe { libc::mprotect(ptr::with_exposed_provenance_mut::<c_void>(address), len, prot) };
    if result != 0 {
        return Err(SandboxError::Protect {
            address,
            len,
            source: Arc::new(io::Error::last_os_error()),
        });
    }
    Ok(())
}
