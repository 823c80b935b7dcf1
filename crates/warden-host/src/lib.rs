//! Host side of warden: shared segments, container sessions and scripted
//! orchestration.
//!
//! The host creates named POSIX shared-memory segments, fills each with the
//! verification pattern, and spawns container processes that map those
//! segments into their guests. It then drives the containers one request at
//! a time over a pair of pipes per container.
//!
//! - [`SharedSegment`] owns one segment and unlinks it on drop.
//! - [`ContainerLauncher`] starts a container and performs the READY
//!   handshake, yielding a [`ContainerSession`].
//! - [`Orchestrator`] ties both together and runs [`ScriptStep`] lists.

mod error;
mod orchestrator;
mod script;
mod segment;
mod session;
#[cfg(test)]
mod test_support;

pub use error::{OrchestratorError, ScriptError, SegmentError, SessionError};
pub use orchestrator::{Orchestrator, SessionExit};
pub use script::{
    ScriptReport, ScriptStep, StepOutcome, StepReport, parse_script, script_labels,
};
pub use segment::SharedSegment;
pub use session::{ContainerExit, ContainerLauncher, ContainerSession};
