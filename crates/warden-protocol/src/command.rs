//! Single-byte commands exchanged between the host and a container.

use std::fmt;

use strum::{EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

/// One protocol message. Each variant maps to a stable, distinct wire byte.
///
/// `Ready` and `Failed` only ever travel from container to host. Every other
/// variant is a request: the container answers it with exactly one byte, the
/// same one on success or `Failed` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Command {
    /// Container finished initialising and accepts requests.
    Ready,
    /// The request could not be carried out.
    Failed,
    /// Seed and initialise the guest state.
    Init,
    /// Advance the guest by one step.
    Tick,
    /// Run the guest's modify entry point, which writes to read-only state.
    Modify,
    /// Ask the guest to check the verification pattern in every segment.
    Verify,
    /// Ask the guest to write a known sequence into the read-write segment.
    WriteRw,
    /// Ask the guest to check the known sequence in the read-write segment.
    ReadRw,
    /// Ask the guest to write through its read-only mapping.
    WriteRo,
    /// Run a guest export that traps; succeeds only if the trap is observed.
    ForceError,
    /// Run the guest's stack-to-heap overflow attack.
    Overflow,
    /// Fill the guest heap until allocation fails, then clear it again.
    HeapTest,
    /// Stop the command loop.
    Exit,
}

impl Command {
    /// Returns the byte written to the pipe for this command.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Ready => b'@',
            Self::Failed => b'*',
            Self::Init => b'i',
            Self::Tick => b't',
            Self::Modify => b'm',
            Self::Verify => b'v',
            Self::WriteRw => b'w',
            Self::ReadRw => b'r',
            Self::WriteRo => b'q',
            Self::ForceError => b'e',
            Self::Overflow => b'o',
            Self::HeapTest => b'h',
            Self::Exit => b'x',
        }
    }

    /// Decodes a wire byte, returning `None` for bytes outside the protocol.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        let command = match byte {
            b'@' => Self::Ready,
            b'*' => Self::Failed,
            b'i' => Self::Init,
            b't' => Self::Tick,
            b'm' => Self::Modify,
            b'v' => Self::Verify,
            b'w' => Self::WriteRw,
            b'r' => Self::ReadRw,
            b'q' => Self::WriteRo,
            b'e' => Self::ForceError,
            b'o' => Self::Overflow,
            b'h' => Self::HeapTest,
            b'x' => Self::Exit,
            _ => return None,
        };
        Some(command)
    }

    /// Returns `true` for commands the host sends and the container answers.
    #[must_use]
    pub const fn is_request(self) -> bool {
        !matches!(self, Self::Ready | Self::Failed)
    }

    /// Returns the snake-case name used in scripts and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ('{}')", self.name(), char::from(self.as_byte()))
    }
}

impl TryFrom<u8> for Command {
    type Error = CommandParseError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_byte(byte).ok_or(CommandParseError::UnknownByte(byte))
    }
}

/// Errors raised while decoding a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    /// The byte is not part of the protocol.
    #[error("unknown command byte {0:#04x}")]
    UnknownByte(u8),
    /// The text does not name a command.
    #[error("unknown command '{0}'")]
    UnknownName(String),
}
