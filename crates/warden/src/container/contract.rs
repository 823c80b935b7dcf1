//! The guest export contract and how each request maps onto it.

use warden_protocol::Command;
use warden_sandbox::{ALLOCATOR_EXPORT, CallResult, ExportSpec, SHARED_SETTER_EXPORT};

/// Seeds guest state, `(seed: i32)`.
pub const INIT_EXPORT: &str = "init";
/// Advances guest state by one step.
pub const TICK_EXPORT: &str = "tick";
/// Writes to read-only state; expected to hard-fault.
pub const MODIFY_EXPORT: &str = "modify";
/// Checks the verification pattern, returning `0` when intact.
pub const VERIFY_EXPORT: &str = "verify_shared";
/// Writes a byte sequence into the read-write segment, `(pos, val, len)`.
pub const WRITE_RW_EXPORT: &str = "write_rw";
/// Checks a byte sequence in the read-write segment, `(pos, val, len)`.
pub const READ_RW_EXPORT: &str = "read_rw";
/// Writes through the read-only mapping.
pub const WRITE_RO_EXPORT: &str = "write_ro";
/// Traps on purpose.
pub const FORCE_ERROR_EXPORT: &str = "force_error";
/// Scans forward from a stack buffer and corrupts a heap allocation.
pub const OVERFLOW_EXPORT: &str = "test_overflow_attack";
/// Allocates filled blocks until the allocator refuses; returns the failing
/// iteration or `0`.
pub const FILL_MEMORY_EXPORT: &str = "fill_memory";
/// Zeroes and releases every block `fill_memory` allocated.
pub const CLEAR_MEMORY_EXPORT: &str = "clear_memory";

/// Byte `fill_memory` writes into every block.
pub const FILL_BYTE: u8 = 181;

/// Arguments of WRITE_RW and READ_RW: ten bytes counting up from 20,
/// starting at index 3.
pub const RW_SEQUENCE_ARGS: [i32; 3] = [3, 20, 10];

/// Every export a container resolves. Diagnostic exports are optional;
/// requests whose export is missing are answered with FAILED.
pub const GUEST_CONTRACT: &[ExportSpec] = &[
    ExportSpec::required(ALLOCATOR_EXPORT, 1),
    ExportSpec::required(SHARED_SETTER_EXPORT, 4),
    ExportSpec::required(INIT_EXPORT, 1),
    ExportSpec::required(TICK_EXPORT, 0),
    ExportSpec::required(MODIFY_EXPORT, 0),
    ExportSpec::optional(VERIFY_EXPORT, 0),
    ExportSpec::optional(WRITE_RW_EXPORT, 3),
    ExportSpec::optional(READ_RW_EXPORT, 3),
    ExportSpec::optional(WRITE_RO_EXPORT, 0),
    ExportSpec::optional(FORCE_ERROR_EXPORT, 0),
    ExportSpec::optional(OVERFLOW_EXPORT, 0),
    ExportSpec::optional(FILL_MEMORY_EXPORT, 0),
    ExportSpec::optional(CLEAR_MEMORY_EXPORT, 0),
];

/// Which call outcome acknowledges a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expectation {
    /// Any normal return.
    Completes,
    /// A normal return of `0`.
    ReturnsZero,
    /// A normal return other than `0`.
    ReturnsNonZero,
    /// A trap.
    Traps,
}

impl Expectation {
    pub(crate) const fn accepts(self, result: &CallResult) -> bool {
        match (self, result) {
            (Self::Completes, CallResult::Completed(_))
            | (Self::ReturnsZero, CallResult::Completed(0))
            | (Self::Traps, CallResult::Trapped(_)) => true,
            (Self::ReturnsNonZero, CallResult::Completed(value)) => *value != 0,
            _ => false,
        }
    }
}

/// One guest call backing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GuestRequest {
    pub(crate) export: &'static str,
    pub(crate) args: Vec<i32>,
    pub(crate) expectation: Expectation,
}

impl GuestRequest {
    fn new(export: &'static str, args: &[i32], expectation: Expectation) -> Self {
        Self {
            export,
            args: args.to_vec(),
            expectation,
        }
    }
}

/// How the container carries out a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RequestPlan {
    /// Acknowledged without calling the guest: EXIT.
    Local,
    /// Never valid as a request: the reply-only bytes.
    Rejected,
    /// One guest call whose outcome decides the reply.
    Call(GuestRequest),
    /// Fill the heap, then clear it, with a memory census around each call.
    HeapTest,
}

/// Maps a request onto the guest calls that back it.
pub(crate) fn plan_request(command: Command, seed: i32) -> RequestPlan {
    use Expectation::{Completes, ReturnsNonZero, ReturnsZero, Traps};

    let request = match command {
        Command::Init => GuestRequest::new(INIT_EXPORT, &[seed], Completes),
        Command::Tick => GuestRequest::new(TICK_EXPORT, &[], Completes),
        Command::Modify => GuestRequest::new(MODIFY_EXPORT, &[], Completes),
        Command::Verify => GuestRequest::new(VERIFY_EXPORT, &[], ReturnsZero),
        Command::WriteRw => GuestRequest::new(WRITE_RW_EXPORT, &RW_SEQUENCE_ARGS, Completes),
        Command::ReadRw => GuestRequest::new(READ_RW_EXPORT, &RW_SEQUENCE_ARGS, ReturnsZero),
        Command::WriteRo => GuestRequest::new(WRITE_RO_EXPORT, &[], Completes),
        Command::ForceError => GuestRequest::new(FORCE_ERROR_EXPORT, &[], Traps),
        Command::Overflow => GuestRequest::new(OVERFLOW_EXPORT, &[], ReturnsNonZero),
        Command::HeapTest => return RequestPlan::HeapTest,
        Command::Exit => return RequestPlan::Local,
        Command::Ready | Command::Failed => return RequestPlan::Rejected,
    };
    RequestPlan::Call(request)
}
