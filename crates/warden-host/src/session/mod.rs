//! Host side of the container protocol.
//!
//! A [`ContainerSession`] owns one container process and the two pipes that
//! lead to it. The host writes a request byte and blocks for exactly one reply
//! byte: the same byte on success, FAILED otherwise. Any other outcome (a
//! FAILED reply, a mismatched byte, a closed pipe or a timeout) leaves the
//! session untrusted; only EXIT may still be sent to it.

mod exit;
mod launcher;
mod pipe;

use std::fs::File;
use std::io;
use std::os::fd::AsFd;
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use warden_protocol::wire::{self, Reply};
use warden_protocol::Command;

use crate::error::SessionError;

pub use exit::ContainerExit;
pub use launcher::ContainerLauncher;

/// Tracing target for session operations.
const SESSION_TARGET: &str = "warden_host::session";

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long a container without a reply timeout gets to exit before it is
/// killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// A spawned container that completed its ready handshake.
#[derive(Debug)]
pub struct ContainerSession {
    label: String,
    requests: File,
    replies: File,
    child: Child,
    reply_timeout: Option<Duration>,
    trusted: bool,
    exit: Option<ContainerExit>,
}

impl ContainerSession {
    fn new(
        label: &str,
        requests: File,
        replies: File,
        child: Child,
        reply_timeout: Option<Duration>,
    ) -> Self {
        Self {
            label: label.to_owned(),
            requests,
            replies,
            child,
            reply_timeout,
            trusted: true,
            exit: None,
        }
    }

    /// Label the container was spawned with.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Process identifier of the container.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Returns `false` once a request failed or the protocol desynchronised.
    #[must_use]
    pub const fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Returns `true` until the container process has been reaped.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.exit.is_none()
    }

    /// How the container ended, once it has been reaped.
    #[must_use]
    pub const fn exit_status(&self) -> Option<ContainerExit> {
        self.exit
    }

    /// Sends one request and waits for its acknowledgement.
    ///
    /// Sending [`Command::Exit`] also reaps the container once it has
    /// acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Failed`] or [`SessionError::Desync`] for a bad
    /// reply, [`SessionError::Terminated`] when the container died,
    /// [`SessionError::Timeout`] when no reply arrived in time, and
    /// [`SessionError::Untrusted`] for a non-exit request to a session that
    /// already failed.
    pub fn send(&mut self, command: Command) -> Result<(), SessionError> {
        if !command.is_request() {
            return Err(SessionError::NotRequest { command });
        }
        if self.exit.is_some() {
            return Err(SessionError::Closed {
                label: self.label.clone(),
            });
        }
        if !self.trusted && command != Command::Exit {
            return Err(SessionError::Untrusted {
                label: self.label.clone(),
            });
        }

        debug!(target: SESSION_TARGET, label = %self.label, %command, "sending request");
        if let Err(error) = wire::write_command(&mut self.requests, command) {
            return Err(if error.kind() == io::ErrorKind::BrokenPipe {
                self.terminated()
            } else {
                self.io_error(error)
            });
        }

        let received = self.read_reply()?;
        match Reply::classify(command, received) {
            Reply::Ack => {
                debug!(target: SESSION_TARGET, label = %self.label, %command, "acknowledged");
                if command == Command::Exit {
                    self.reap()?;
                }
                Ok(())
            }
            Reply::Failed => {
                self.trusted = false;
                warn!(target: SESSION_TARGET, label = %self.label, %command, "container reported failure");
                Err(SessionError::Failed {
                    label: self.label.clone(),
                    command,
                })
            }
            Reply::Mismatch(byte) => {
                self.trusted = false;
                warn!(
                    target: SESSION_TARGET,
                    label = %self.label,
                    %command,
                    received = byte,
                    "unexpected acknowledgement"
                );
                Err(SessionError::Desync {
                    label: self.label.clone(),
                    command,
                    received: byte,
                })
            }
        }
    }

    /// Sends EXIT and returns how the container ended.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`ContainerSession::send`].
    pub fn exit(mut self) -> Result<ContainerExit, SessionError> {
        self.send(Command::Exit)?;
        self.reap()
    }

    fn handshake(&mut self) -> Result<(), SessionError> {
        let byte = self.read_reply()?;
        if byte != Command::Ready.as_byte() {
            self.trusted = false;
            return Err(SessionError::Handshake {
                label: self.label.clone(),
                byte,
            });
        }
        info!(
            target: SESSION_TARGET,
            label = %self.label,
            pid = self.pid(),
            "container ready"
        );
        Ok(())
    }

    fn read_reply(&mut self) -> Result<u8, SessionError> {
        if let Some(timeout) = self.reply_timeout {
            let ready = pipe::wait_readable(self.replies.as_fd(), timeout)
                .map_err(|error| self.io_error(error))?;
            if !ready {
                return Err(self.timed_out(timeout));
            }
        }
        match wire::read_byte(&mut self.replies) {
            Ok(Some(byte)) => Ok(byte),
            Ok(None) => Err(self.terminated()),
            Err(error) => Err(self.io_error(error)),
        }
    }

    fn timed_out(&mut self, timeout: Duration) -> SessionError {
        self.trusted = false;
        warn!(
            target: SESSION_TARGET,
            label = %self.label,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "container did not reply in time, killing process"
        );
        drop(self.child.kill());
        if let Ok(status) = self.child.wait() {
            self.exit = Some(status.into());
        }
        SessionError::Timeout {
            label: self.label.clone(),
            timeout_ms: timeout.as_millis(),
        }
    }

    fn terminated(&mut self) -> SessionError {
        self.trusted = false;
        match self.reap() {
            Ok(exit) => {
                warn!(target: SESSION_TARGET, label = %self.label, %exit, "container terminated");
                SessionError::Terminated {
                    label: self.label.clone(),
                    exit,
                }
            }
            Err(error) => error,
        }
    }

    fn reap(&mut self) -> Result<ContainerExit, SessionError> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let status = self
            .wait_with_deadline(self.reply_timeout.unwrap_or(EXIT_GRACE))
            .map_err(|error| self.io_error(error))?;
        let exit = ContainerExit::from(status);
        self.exit = Some(exit);
        debug!(target: SESSION_TARGET, label = %self.label, %exit, "container reaped");
        Ok(exit)
    }

    fn wait_with_deadline(&mut self, timeout: Duration) -> io::Result<ExitStatus> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if start.elapsed() > timeout {
                warn!(
                    target: SESSION_TARGET,
                    label = %self.label,
                    "container did not exit in time, killing process"
                );
                drop(self.child.kill());
                return self.child.wait();
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    fn io_error(&self, error: io::Error) -> SessionError {
        SessionError::Io {
            label: self.label.clone(),
            source: Arc::new(error),
        }
    }
}

impl Drop for ContainerSession {
    fn drop(&mut self) {
        if self.exit.is_some() {
            return;
        }
        warn!(
            target: SESSION_TARGET,
            label = %self.label,
            pid = self.child.id(),
            "killing container that was not shut down"
        );
        drop(self.child.kill());
        drop(self.child.wait());
    }
}
