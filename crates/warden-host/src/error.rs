//! Domain errors raised by the host side of the protocol.
//!
//! I/O errors are wrapped in `Arc` to keep the enums small and cheap to
//! clone into reports.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use warden_protocol::{Command, CommandParseError};

use crate::session::ContainerExit;

/// Errors raised while creating or accessing a shared-memory segment.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// The name cannot be passed to the OS.
    #[error("invalid shared-memory name '{name}'")]
    InvalidName {
        /// Offending name.
        name: String,
    },

    /// The segment has no bytes.
    #[error("shared-memory segment '{name}' is empty")]
    Empty {
        /// Segment name.
        name: String,
    },

    /// Creating the shared-memory object failed.
    #[error("failed to create shared-memory segment '{name}': {source}")]
    Create {
        /// Segment name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Sizing the shared-memory object failed.
    #[error("failed to size shared-memory segment '{name}' to {size} bytes: {source}")]
    Resize {
        /// Segment name.
        name: String,
        /// Requested size.
        size: usize,
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Mapping the object into the host failed.
    #[error("failed to map shared-memory segment '{name}': {source}")]
    Map {
        /// Segment name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },

    /// An access fell outside the segment.
    #[error("range at {offset} of {len} bytes exceeds segment '{name}' of {size} bytes")]
    OutOfBounds {
        /// Segment name.
        name: String,
        /// Start of the range.
        offset: usize,
        /// Length of the range.
        len: usize,
        /// Segment size.
        size: usize,
    },

    /// The segment cannot hold the verification pattern.
    #[error("segment '{name}' of {size} bytes is too small for the verification pattern")]
    TooSmall {
        /// Segment name.
        name: String,
        /// Segment size.
        size: usize,
    },
}

/// Errors raised while driving one container.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The pipes for a new container could not be created.
    #[error("failed to create pipes for container '{label}': {source}")]
    Pipe {
        /// Container label.
        label: String,
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The container process could not be started.
    #[error("failed to spawn container '{label}' from '{program}': {source}")]
    Spawn {
        /// Container label.
        label: String,
        /// Container executable.
        program: PathBuf,
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The container sent something other than READY as its first byte.
    #[error("container '{label}' sent {byte:#04x} instead of READY")]
    Handshake {
        /// Container label.
        label: String,
        /// Byte received.
        byte: u8,
    },

    /// The container closed its reply pipe, usually by dying.
    #[error("container '{label}' terminated: {exit}")]
    Terminated {
        /// Container label.
        label: String,
        /// How the process ended.
        exit: ContainerExit,
    },

    /// The container answered FAILED.
    #[error("container '{label}' failed {command}")]
    Failed {
        /// Container label.
        label: String,
        /// Request that failed.
        command: Command,
    },

    /// The container answered with a byte that matches neither the request
    /// nor FAILED.
    #[error("container '{label}' answered {command} with {received:#04x}")]
    Desync {
        /// Container label.
        label: String,
        /// Request sent.
        command: Command,
        /// Byte received.
        received: u8,
    },

    /// No reply arrived in time; the container was killed.
    #[error("container '{label}' did not reply within {timeout_ms} ms")]
    Timeout {
        /// Container label.
        label: String,
        /// Configured limit.
        timeout_ms: u128,
    },

    /// A request was sent to a session that already failed.
    #[error("container '{label}' is no longer trusted; only exit may be sent")]
    Untrusted {
        /// Container label.
        label: String,
    },

    /// The container has already exited.
    #[error("container '{label}' has already exited")]
    Closed {
        /// Container label.
        label: String,
    },

    /// Only requests can be sent to a container.
    #[error("{command} is a reply, not a request")]
    NotRequest {
        /// Offending command.
        command: Command,
    },

    /// Reading from or writing to a pipe failed.
    #[error("I/O error talking to container '{label}': {source}")]
    Io {
        /// Container label.
        label: String,
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Errors raised while parsing a host script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// A step between commas is blank.
    #[error("script step {index} is empty")]
    EmptyStep {
        /// Zero-based step index.
        index: usize,
    },

    /// A step has no label before the colon.
    #[error("script step '{step}' has no container label")]
    MissingLabel {
        /// Offending step.
        step: String,
    },

    /// A step names no known command.
    #[error("script step '{step}': {source}")]
    UnknownCommand {
        /// Offending step.
        step: String,
        /// Parse failure.
        #[source]
        source: CommandParseError,
    },

    /// A step names a reply rather than a request.
    #[error("script step '{step}' names {command}, which is not a request")]
    NotRequest {
        /// Offending step.
        step: String,
        /// Parsed command.
        command: Command,
    },
}

/// Errors raised by the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Creating or filling a segment failed.
    #[error(transparent)]
    Segment(#[from] SegmentError),

    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The script could not be parsed.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// A container with this label already exists.
    #[error("container '{label}' already exists")]
    DuplicateLabel {
        /// Offending label.
        label: String,
    },

    /// No container carries this label.
    #[error("no container labelled '{label}'")]
    UnknownLabel {
        /// Offending label.
        label: String,
    },
}
