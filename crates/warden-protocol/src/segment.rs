//! Descriptions of host-created shared-memory segments.

use std::fmt;

/// Protection a container applies when mapping a segment into its guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentAccess {
    /// Pages are mapped readable only; guest writes fault the process.
    ReadOnly,
    /// Pages are mapped readable and writable.
    ReadWrite,
}

impl SegmentAccess {
    /// Returns `true` when the mapping must reject writes.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }

    /// Short tag used in logs and in the verification pattern prefix.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for SegmentAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadOnly => "read-only",
            Self::ReadWrite => "read-write",
        })
    }
}

/// A named OS shared-memory object, its size and intended protection.
///
/// Names are process-wide POSIX shared-memory identifiers such as
/// `/shared_ro`. The host creates the object; containers only open it.
///
/// # Example
///
/// ```
/// use warden_protocol::{SegmentAccess, SegmentDescriptor};
///
/// let segment = SegmentDescriptor::new("/shared_ro", 5000, SegmentAccess::ReadOnly);
/// assert_eq!(segment.name(), "/shared_ro");
/// assert!(segment.access().is_read_only());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentDescriptor {
    name: String,
    size: usize,
    access: SegmentAccess,
}

impl SegmentDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, size: usize, access: SegmentAccess) -> Self {
        Self {
            name: name.into(),
            size,
            access,
        }
    }

    /// Returns the shared-memory object name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the segment size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the protection containers apply to the segment.
    #[must_use]
    pub const fn access(&self) -> SegmentAccess {
        self.access
    }
}

impl fmt::Display for SegmentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes, {})", self.name, self.size, self.access)
    }
}
