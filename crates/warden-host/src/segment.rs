//! Host-owned POSIX shared-memory segments.

use std::ffi::{CString, c_void};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use tracing::{debug, warn};

use warden_protocol::{SegmentDescriptor, verification_pattern};

use crate::error::SegmentError;

/// Tracing target for segment lifecycle events.
const SEGMENT_TARGET: &str = "warden_host::segment";

/// A named shared-memory object created by the host and mapped read-write
/// into the host process.
///
/// The object is created empty (any stale object of the same name is
/// truncated) and unlinked when the value drops. Containers that still map it
/// keep their pages, so the orchestrator drops segments only after its
/// sessions.
#[derive(Debug)]
pub struct SharedSegment {
    descriptor: SegmentDescriptor,
    base: NonNull<u8>,
}

impl SharedSegment {
    /// Creates, sizes and maps the segment.
    ///
    /// # Errors
    ///
    /// Returns a [`SegmentError`] when the name is invalid, the segment is
    /// empty, or any of the OS calls fail. A partially created object is
    /// unlinked again.
    pub fn create(descriptor: SegmentDescriptor) -> Result<Self, SegmentError> {
        let name = descriptor.name().to_owned();
        if descriptor.size() == 0 {
            return Err(SegmentError::Empty { name });
        }
        let c_name =
            CString::new(name.as_str()).map_err(|_| SegmentError::InvalidName { name: name.clone() })?;
        // SAFETY: `c_name` is a valid NUL-terminated string for the call.
        let raw_fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_TRUNC | libc::O_RDWR,
                0o600,
            )
        };
        if raw_fd < 0 {
            return Err(SegmentError::Create {
                name,
                source: Arc::new(io::Error::last_os_error()),
            });
        }
        // SAFETY: `shm_open` returned a fresh descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };
        match map_object(&fd, descriptor.size(), &name) {
            Ok(base) => {
                debug!(
                    target: SEGMENT_TARGET,
                    segment = %descriptor,
                    "created shared segment"
                );
                Ok(Self { descriptor, base })
            }
            Err(error) => {
                // SAFETY: `c_name` is a valid NUL-terminated string.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                Err(error)
            }
        }
    }

    /// Description of the segment.
    #[must_use]
    pub const fn descriptor(&self) -> &SegmentDescriptor {
        &self.descriptor
    }

    /// Segment size in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.descriptor.size()
    }

    /// Always `false`; empty segments are rejected at creation.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.descriptor.size() == 0
    }

    /// Writes the verification pattern guests check.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::TooSmall`] when the pattern does not fit.
    pub fn fill_verification_pattern(&mut self) -> Result<(), SegmentError> {
        let pattern = verification_pattern(self.descriptor.access(), self.len()).ok_or_else(|| {
            SegmentError::TooSmall {
                name: self.descriptor.name().to_owned(),
                size: self.len(),
            }
        })?;
        self.write(0, &pattern)
    }

    /// Copies `len` bytes starting at `offset`.
    ///
    /// Containers may write concurrently; the copy is whatever the pages held
    /// at the time.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::OutOfBounds`] for a range past the end.
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, SegmentError> {
        self.check_range(offset, len)?;
        let mut bytes = vec![0_u8; len];
        // SAFETY: the range was checked against the mapping length and the
        // destination is a distinct heap buffer of the same length.
        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), bytes.as_mut_ptr(), len);
        }
        Ok(bytes)
    }

    /// Copies `data` into the segment at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::OutOfBounds`] for a range past the end.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), SegmentError> {
        self.check_range(offset, data.len())?;
        // SAFETY: the range was checked against the mapping length and `data`
        // is a Rust slice that cannot alias the shared mapping.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.base.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), SegmentError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(SegmentError::OutOfBounds {
                name: self.descriptor.name().to_owned(),
                offset,
                len,
                size: self.len(),
            }),
        }
    }
}

fn map_object(fd: &OwnedFd, size: usize, name: &str) -> Result<NonNull<u8>, SegmentError> {
    let length = libc::off_t::try_from(size).map_err(|_| SegmentError::Resize {
        name: name.to_owned(),
        size,
        source: Arc::new(io::Error::from(io::ErrorKind::InvalidInput)),
    })?;
    // SAFETY: `fd` is an open shared-memory descriptor.
    if unsafe { libc::ftruncate(fd.as_raw_fd(), length) } != 0 {
        return Err(SegmentError::Resize {
            name: name.to_owned(),
            size,
            source: Arc::new(io::Error::last_os_error()),
        });
    }
    // SAFETY: a fresh shared mapping chosen by the kernel aliases no Rust
    // memory.
    let mapped = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if mapped == libc::MAP_FAILED {
        return Err(SegmentError::Map {
            name: name.to_owned(),
            source: Arc::new(io::Error::last_os_error()),
        });
    }
    NonNull::new(mapped.cast::<u8>()).ok_or_else(|| SegmentError::Map {
        name: name.to_owned(),
        source: Arc::new(io::Error::from(io::ErrorKind::AddrNotAvailable)),
    })
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        let name = self.descriptor.name();
        // SAFETY: `base` and the size describe the mapping made in `create`,
        // which nothing else references once `self` is dropped.
        if unsafe { libc::munmap(self.base.as_ptr().cast::<c_void>(), self.len()) } != 0 {
            warn!(
                target: SEGMENT_TARGET,
                segment = name,
                error = %io::Error::last_os_error(),
                "failed to unmap shared segment"
            );
        }
        let Ok(c_name) = CString::new(name) else {
            return;
        };
        // SAFETY: `c_name` is a valid NUL-terminated string.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
            warn!(
                target: SEGMENT_TARGET,
                segment = name,
                error = %io::Error::last_os_error(),
                "failed to unlink shared segment"
            );
        } else {
            debug!(target: SEGMENT_TARGET, segment = name, "unlinked shared segment");
        }
    }
}
