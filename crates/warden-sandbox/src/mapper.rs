//! Projection of host shared-memory segments into guest linear memory.

use tracing::{debug, info, warn};

use warden_protocol::SegmentDescriptor;

use crate::engine::{ALLOCATOR_EXPORT, SHARED_SETTER_EXPORT};
use crate::error::SandboxError;
use crate::layout::{self, LayoutError};
use crate::runtime::page_size;
use crate::sandbox::Sandbox;
use crate::shm;

/// Tracing target for mapping operations.
const MAPPER_TARGET: &str = "warden_sandbox::mapper";

/// One segment mapped into a guest.
///
/// `guest_offset` and `host_address` name the same pages: the first as the
/// guest sees them, the second as the container process sees them. Dropping
/// the mapping swaps the pages back to private anonymous memory, so it must be
/// dropped before the [`Sandbox`] it was mapped into.
#[derive(Debug)]
pub struct GuestMapping {
    segment: SegmentDescriptor,
    guest_offset: usize,
    host_address: usize,
    mapped_len: usize,
}

impl GuestMapping {
    /// Segment this mapping projects.
    #[must_use]
    pub const fn segment(&self) -> &SegmentDescriptor {
        &self.segment
    }

    /// Offset of the segment inside guest linear memory.
    #[must_use]
    pub const fn guest_offset(&self) -> usize {
        self.guest_offset
    }

    /// Page-aligned host address of the segment.
    #[must_use]
    pub const fn host_address(&self) -> usize {
        self.host_address
    }

    /// Bytes covered by the mapping, rounded up to whole pages.
    #[must_use]
    pub const fn mapped_len(&self) -> usize {
        self.mapped_len
    }
}

impl Drop for GuestMapping {
    fn drop(&mut self) {
        // SAFETY: the range was mapped by `SharedBufferMapper::map` inside
        // guest memory that outlives this value.
        if let Err(error) = unsafe { shm::release(self.host_address, self.mapped_len) } {
            warn!(
                target: MAPPER_TARGET,
                segment = self.segment.name(),
                %error,
                "failed to release shared mapping"
            );
        }
    }
}

/// Maps named segments into a guest at page-aligned offsets.
#[derive(Debug, Clone, Copy)]
pub struct SharedBufferMapper {
    page_size: usize,
}

impl SharedBufferMapper {
    /// Creates a mapper using the system page size.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PageSize`] when the page size is unavailable.
    pub fn new() -> Result<Self, SandboxError> {
        Ok(Self {
            page_size: page_size()?,
        })
    }

    /// Creates a mapper for an explicit page size.
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

    /// Reserves guest heap for `segments`, maps each one at a page-aligned
    /// address inside the reservation and reports the `(offset, size)` pairs
    /// to the guest's setter, in declaration order.
    ///
    /// Every failure is fatal for the container. Mappings created before a
    /// failure are released as the partial result is dropped.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError`] when the allocator or setter is missing or
    /// traps, the allocator returns no memory, the placement does not fit, a
    /// segment cannot be opened or mapped, or a mapping lands elsewhere.
    pub fn map(
        &self,
        sandbox: &mut Sandbox,
        segments: &[SegmentDescriptor],
    ) -> Result<Vec<GuestMapping>, SandboxError> {
        let allocator = sandbox.require_export(ALLOCATOR_EXPORT)?;
        let setter = sandbox.require_export(SHARED_SETTER_EXPORT)?;
        let expected_arity = segments.len() * 2;
        let arity = sandbox.arity(setter)?;
        if arity != expected_arity {
            return Err(SandboxError::Signature {
                name: SHARED_SETTER_EXPORT.to_owned(),
                expected: format!("{expected_arity} i32 parameters"),
                found: format!("{arity} i32 parameters"),
            });
        }

        let sizes: Vec<usize> = segments.iter().map(SegmentDescriptor::size).collect();
        let reserved = layout::reservation_size(&sizes, self.page_size)?;
        let returned = sandbox.call_fatal(allocator, &[layout::to_guest_i32(reserved)?])?;
        let guest_start = usize::try_from(returned)
            .ok()
            .filter(|offset| *offset > 0)
            .ok_or(SandboxError::AllocationFailed { size: reserved })?;

        let memory = sandbox.memory();
        let start = memory.host_address(guest_start, reserved)?;
        let plan = layout::plan_placements(start, reserved, &sizes, self.page_size)?;
        debug!(
            target: MAPPER_TARGET,
            label = sandbox.label(),
            guest_start,
            reserved,
            "reserved guest heap for shared segments"
        );

        let mut mappings = Vec::with_capacity(segments.len());
        for (segment, placement) in segments.iter().zip(&plan.placements) {
            let guest_offset = memory.guest_offset(placement.address, placement.size)?;
            let mapped_len = layout::align_up(placement.size, self.page_size)
                .ok_or(LayoutError::Overflow)?;
            // SAFETY: the placement is page-aligned and lies inside the guest
            // allocation reserved above, which no Rust reference borrows.
            unsafe {
                shm::map_segment(
                    segment.name(),
                    placement.address,
                    placement.size,
                    segment.access(),
                )?;
            }
            info!(
                target: MAPPER_TARGET,
                label = sandbox.label(),
                segment = segment.name(),
                access = %segment.access(),
                guest_offset,
                size = segment.size(),
                "mapped shared segment"
            );
            mappings.push(GuestMapping {
                segment: segment.clone(),
                guest_offset,
                host_address: placement.address,
                mapped_len,
            });
        }

        let mut args = Vec::with_capacity(expected_arity);
        for mapping in &mappings {
            args.push(layout::to_guest_i32(mapping.guest_offset)?);
            args.push(layout::to_guest_i32(mapping.segment.size())?);
        }
        sandbox.call_fatal(setter, &args)?;
        Ok(mappings)
    }
}
