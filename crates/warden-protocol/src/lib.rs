//! Wire types shared by the warden host and its containers.
//!
//! The host and each container talk over two unidirectional pipes. Every
//! message in either direction is a single [`Command`] byte: the host writes a
//! request and the container echoes the same byte on success or writes
//! [`Command::Failed`]. A container announces that it finished initialising by
//! writing [`Command::Ready`] once, before it accepts any request.
//!
//! Besides the command bytes, both ends agree on the shared-memory segments
//! the container maps into its guest. Those are described by
//! [`SegmentDescriptor`] values, and the host initialises each segment with
//! the [`pattern`] guests verify.

mod command;
pub mod pattern;
mod segment;
pub mod wire;

pub use command::{Command, CommandParseError};
pub use pattern::{check_verification_pattern, verification_pattern};
pub use segment::{SegmentAccess, SegmentDescriptor};
pub use wire::Reply;
