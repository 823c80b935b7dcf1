//! WebAssembly embedding and shared-memory bridging for warden containers.
//!
//! A container owns exactly one [`Sandbox`]: a compiled module, its instance
//! and the typed handles of the exports the container relies on. The crate
//! then lets the container splice host-owned memory into the guest:
//!
//! - [`SharedBufferMapper`] reserves space through the guest's allocator,
//!   page-aligns each named POSIX shared-memory segment inside that space,
//!   maps it there with the segment's protection, and tells the guest where
//!   the segments live.
//! - [`GuardAllocator`] reserves two pages from the guest allocator and
//!   revokes all access to the trailing one, so sequential overflows walking
//!   through the heap fault the process.
//!
//! Alignment and offset arithmetic lives in [`layout`] as pure functions over
//! integers. The only code that touches raw mappings is the private `shm`
//! module.
//!
//! ```rust,no_run
//! use warden_protocol::{SegmentAccess, SegmentDescriptor};
//! use warden_sandbox::{ExportSpec, Sandbox, SharedBufferMapper};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let specs = [
//!     ExportSpec::required("malloc", 1),
//!     ExportSpec::required("set_shared", 2),
//! ];
//! let mut sandbox = Sandbox::from_file("guest.wasm", "A", &specs)?;
//! let segments = [SegmentDescriptor::new("/shared_rw", 1000, SegmentAccess::ReadWrite)];
//! let mappings = SharedBufferMapper::new()?.map(&mut sandbox, &segments)?;
//! assert_eq!(mappings.len(), 1);
//! # Ok(()) }
//! ```
//!
//! Mappings and guard pages must be dropped before the [`Sandbox`] whose
//! memory they live in.

mod call;
mod engine;
mod error;
mod guard;
pub mod layout;
mod mapper;
mod memory;
mod runtime;
mod sandbox;
mod shm;

#[cfg(test)]
mod tests;

pub use call::CallResult;
pub use engine::{
    ALLOCATOR_EXPORT, EngineBinding, ExportHandle, ExportSpec, ExportTable, GuestContext,
    MEMORY_EXPORT, PRINT_IMPORT, SHARED_SETTER_EXPORT,
};
pub use error::SandboxError;
pub use guard::{GuardAllocator, GuardPage};
pub use layout::LayoutError;
pub use mapper::{GuestMapping, SharedBufferMapper};
pub use memory::LinearMemory;
pub use runtime::page_size;
pub use sandbox::Sandbox;
