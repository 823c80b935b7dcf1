//! Translation between guest offsets and host addresses.

use crate::layout::LayoutError;

/// Snapshot of where a guest's linear memory lives in the host address space.
///
/// The snapshot goes stale when the guest grows its memory, so callers take a
/// fresh one after every guest call that may allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearMemory {
    base: usize,
    len: usize,
}

impl LinearMemory {
    /// Creates a snapshot from a base address and a length in bytes.
    #[must_use]
    pub const fn new(base: usize, len: usize) -> Self {
        Self { base, len }
    }

    /// Host address of guest offset zero.
    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Current size in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the memory has no pages.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` when `[offset, offset + len)` lies inside the memory.
    #[must_use]
    pub fn contains(&self, offset: usize, len: usize) -> bool {
        offset.checked_add(len).is_some_and(|end| end <= self.len)
    }

    /// Converts the guest range `[offset, offset + len)` to a host address.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::OutOfBounds`] when the range leaves the memory.
    pub fn host_address(&self, offset: usize, len: usize) -> Result<usize, LayoutError> {
        if !self.contains(offset, len) {
            return Err(self.out_of_bounds(offset, len));
        }
        self.base.checked_add(offset).ok_or(LayoutError::Overflow)
    }

    /// Converts the host range `[address, address + len)` to a guest offset.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::OutOfBounds`] when the range is not inside the
    /// memory.
    pub fn guest_offset(&self, address: usize, len: usize) -> Result<usize, LayoutError> {
        let offset = address
            .checked_sub(self.base)
            .ok_or_else(|| self.out_of_bounds(address, len))?;
        if !self.contains(offset, len) {
            return Err(self.out_of_bounds(offset, len));
        }
        Ok(offset)
    }

    pub(crate) const fn out_of_bounds(&self, offset: usize, len: usize) -> LayoutError {
        LayoutError::OutOfBounds {
            offset,
            len,
            memory_len: self.len,
        }
    }
}

/// Reads a NUL-terminated string starting at `offset`, scanning at most
/// `limit` bytes. Returns `None` when the offset is out of range or no
/// terminator appears in time.
pub(crate) fn read_c_string(data: &[u8], offset: usize, limit: usize) -> Option<String> {
    let tail = data.get(offset..)?;
    let window = tail.get(..limit).unwrap_or(tail);
    let end = window.iter().position(|byte| *byte == 0)?;
    Some(String::from_utf8_lossy(window.get(..end)?).into_owned())
}
