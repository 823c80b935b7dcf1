//! Byte-level helpers for the command pipes.
//!
//! There is no framing: one byte is one message. Readers treat end-of-file as
//! the peer going away rather than as an error so callers can tell a closed
//! pipe apart from an I/O failure.

use std::io::{self, Read, Write};

use crate::Command;

/// Writes a single command byte and flushes the writer.
///
/// # Errors
///
/// Returns any error raised by the underlying writer.
pub fn write_command(writer: &mut impl Write, command: Command) -> io::Result<()> {
    writer.write_all(&[command.as_byte()])?;
    writer.flush()
}

/// Reads a single byte, returning `None` once the peer closed the pipe.
///
/// # Errors
///
/// Returns any error raised by the underlying reader other than
/// [`io::ErrorKind::Interrupted`], which is retried.
pub fn read_byte(reader: &mut impl Read) -> io::Result<Option<u8>> {
    let mut byte = 0_u8;
    loop {
        match reader.read(std::slice::from_mut(&mut byte)) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte)),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
}

/// How a container answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// The container echoed the request byte.
    Ack,
    /// The container reported [`Command::Failed`].
    Failed,
    /// The container answered with some other byte.
    Mismatch(u8),
}

impl Reply {
    /// Classifies `received` as the answer to `sent`.
    #[must_use]
    pub const fn classify(sent: Command, received: u8) -> Self {
        if received == sent.as_byte() {
            Self::Ack
        } else if received == Command::Failed.as_byte() {
            Self::Failed
        } else {
            Self::Mismatch(received)
        }
    }
}
