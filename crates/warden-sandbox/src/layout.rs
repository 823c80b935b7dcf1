//! Page alignment and placement arithmetic.
//!
//! Everything here is a pure function over integers so the placement rules
//! can be tested without a live mapping. Addresses are host virtual addresses;
//! because a guest's linear memory starts on a page boundary, a page-aligned
//! host address is also a page-aligned guest offset.
//!
//! Placement rules for a reservation holding `n` segments:
//!
//! - each segment starts at the first page boundary strictly above the end of
//!   the previous segment (or above the reservation start for the first one),
//!   so a segment never shares a page with guest data or with another segment;
//! - the last segment's end is rounded up to a page boundary, because the
//!   kernel maps whole pages.
//!
//! Each strict advance costs at most one page and the final rounding strictly
//! less than one, so `sum(sizes) + (n + 1) * page` bytes always suffice.

use thiserror::Error;

/// Errors raised by placement arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// The page size is zero or not a power of two.
    #[error("page size {0} is not a power of two")]
    InvalidPageSize(usize),
    /// An intermediate value overflowed the address space.
    #[error("address arithmetic overflowed")]
    Overflow,
    /// The placement does not fit in the reservation.
    #[error("placement needs {required} bytes but only {reserved} were reserved")]
    InsufficientSlack {
        /// Bytes needed from the reservation start to the aligned end.
        required: usize,
        /// Bytes actually reserved.
        reserved: usize,
    },
    /// A range falls outside the guest's linear memory.
    #[error("range at offset {offset:#x} of {len} bytes exceeds linear memory of {memory_len} bytes")]
    OutOfBounds {
        /// Guest offset of the range.
        offset: usize,
        /// Range length.
        len: usize,
        /// Current linear memory size.
        memory_len: usize,
    },
    /// A value cannot be passed to the guest as an `i32`.
    #[error("value {value} does not fit in a guest i32")]
    GuestRange {
        /// Offending value.
        value: usize,
    },
}

/// One segment's place inside a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Page-aligned host address of the segment.
    pub address: usize,
    /// Segment size in bytes.
    pub size: usize,
}

/// Placements for every segment of a reservation, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingPlan {
    /// Host address returned by the guest allocator.
    pub start: usize,
    /// Bytes reserved from `start`.
    pub reserved: usize,
    /// One entry per segment.
    pub placements: Vec<Placement>,
    /// Page-aligned end of the last mapped page.
    pub end: usize,
}

const fn check_page(page: usize) -> Result<(), LayoutError> {
    if page.is_power_of_two() {
        Ok(())
    } else {
        Err(LayoutError::InvalidPageSize(page))
    }
}

/// Rounds `value` down to a multiple of `page`, which must be a power of two.
#[must_use]
pub const fn align_down(value: usize, page: usize) -> usize {
    value & !(page - 1)
}

/// Rounds `value` up to a multiple of `page`, leaving aligned values intact.
#[must_use]
pub const fn align_up(value: usize, page: usize) -> Option<usize> {
    match value.checked_add(page - 1) {
        Some(bumped) => Some(align_down(bumped, page)),
        None => None,
    }
}

/// Returns the first page boundary strictly greater than `value`.
#[must_use]
pub const fn next_boundary_after(value: usize, page: usize) -> Option<usize> {
    align_down(value, page).checked_add(page)
}

/// Returns the allocation size that fits every segment under the placement
/// rules: the sum of the sizes plus one page per segment and one more.
///
/// # Errors
///
/// Returns [`LayoutError::InvalidPageSize`] or [`LayoutError::Overflow`].
pub fn reservation_size(sizes: &[usize], page: usize) -> Result<usize, LayoutError> {
    check_page(page)?;
    let total = sizes
        .iter()
        .try_fold(0_usize, |acc, size| acc.checked_add(*size))
        .ok_or(LayoutError::Overflow)?;
    let slack = sizes
        .len()
        .checked_add(1)
        .and_then(|pages| pages.checked_mul(page))
        .ok_or(LayoutError::Overflow)?;
    total.checked_add(slack).ok_or(LayoutError::Overflow)
}

/// Places `sizes` inside the reservation `[start, start + reserved)`.
///
/// # Errors
///
/// Returns [`LayoutError::InsufficientSlack`] when the aligned end of the last
/// segment lies beyond the reservation, which means the reservation was sized
/// with something other than [`reservation_size`].
pub fn plan_placements(
    start: usize,
    reserved: usize,
    sizes: &[usize],
    page: usize,
) -> Result<MappingPlan, LayoutError> {
    check_page(page)?;
    let mut cursor = start;
    let mut placements = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let address = next_boundary_after(cursor, page).ok_or(LayoutError::Overflow)?;
        cursor = address.checked_add(size).ok_or(LayoutError::Overflow)?;
        placements.push(Placement { address, size });
    }
    let end = align_up(cursor, page).ok_or(LayoutError::Overflow)?;
    let required = end - start;
    if required > reserved {
        return Err(LayoutError::InsufficientSlack { required, reserved });
    }
    Ok(MappingPlan {
        start,
        reserved,
        placements,
        end,
    })
}

/// Returns the address of the page to revoke inside the allocation
/// `[start, start + len)`: the page preceding the allocation end, aligned down.
///
/// # Errors
///
/// Returns [`LayoutError::InsufficientSlack`] when that page does not lie
/// entirely inside the allocation.
pub fn guard_page_address(start: usize, len: usize, page: usize) -> Result<usize, LayoutError> {
    check_page(page)?;
    let end = start.checked_add(len).ok_or(LayoutError::Overflow)?;
    let candidate = end.checked_sub(page).ok_or(LayoutError::Overflow)?;
    let address = align_down(candidate, page);
    if address < start {
        return Err(LayoutError::InsufficientSlack {
            required: end - address,
            reserved: len,
        });
    }
    Ok(address)
}

/// Converts a host-side size or offset into a guest `i32` argument.
///
/// # Errors
///
/// Returns [`LayoutError::GuestRange`] when the value exceeds `i32::MAX`.
pub fn to_guest_i32(value: usize) -> Result<i32, LayoutError> {
    i32::try_from(value).map_err(|_| LayoutError::GuestRange { value })
}
