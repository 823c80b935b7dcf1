//! Container side of the protocol.
//!
//! A container process loads one module, optionally installs a guard page,
//! maps the host's segments into the guest, and only then writes READY. From
//! that point it answers one request byte at a time: each request runs one
//! guest call (two for HEAP_TEST) and is echoed on success or answered with
//! FAILED. EXIT is echoed without calling the guest and ends the loop.

pub mod contract;
mod error;
mod heap;

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::fcntl::{FcntlArg, fcntl};
use tracing::{debug, info, warn};

use warden_config::ContainerArgs;
use warden_protocol::{Command, SegmentDescriptor, wire};
use warden_sandbox::{
    CallResult, ExportHandle, GuardAllocator, GuardPage, GuestMapping, Sandbox,
    SharedBufferMapper,
};

use self::contract::{
    CLEAR_MEMORY_EXPORT, FILL_BYTE, FILL_MEMORY_EXPORT, GUEST_CONTRACT, GuestRequest,
    RequestPlan, plan_request,
};
pub use self::error::ContainerError;
pub use self::heap::HeapCensus;

/// Tracing target for container events.
const CONTAINER_TARGET: &str = "warden::container";

/// How the command loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEnd {
    /// The host sent EXIT.
    Exited,
    /// The host closed the request pipe.
    Disconnected,
}

/// A started container: the sandbox plus everything spliced into its memory.
#[derive(Debug)]
pub struct ContainerRuntime {
    // Declaration order is drop order. The guard and the mappings live inside
    // guest memory, so they go before the sandbox that owns it.
    guard: Option<GuardPage>,
    mappings: Vec<GuestMapping>,
    sandbox: Sandbox,
    seed: i32,
}

impl ContainerRuntime {
    /// Loads the module named in `args` and prepares it for requests.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Config`] for invalid arguments and
    /// [`ContainerError::Sandbox`] for any load, guard or mapping failure.
    pub fn start(args: &ContainerArgs) -> Result<Self, ContainerError> {
        args.validate()?;
        let sandbox = Sandbox::from_file(&args.module, args.label.clone(), GUEST_CONTRACT)?;
        let seed = args.seed.unwrap_or_else(clock_seed);
        Self::prepare(sandbox, &args.segments(), args.guard, seed)
    }

    /// Installs the guard page when requested, then maps `segments`.
    ///
    /// The guard is allocated first so the segments land above it.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Sandbox`] when either step fails.
    pub fn prepare(
        mut sandbox: Sandbox,
        segments: &[SegmentDescriptor],
        install_guard: bool,
        seed: i32,
    ) -> Result<Self, ContainerError> {
        let guard = if install_guard {
            Some(GuardAllocator::new()?.install(&mut sandbox)?)
        } else {
            None
        };
        let mappings = SharedBufferMapper::new()?.map(&mut sandbox, segments)?;
        debug!(
            target: CONTAINER_TARGET,
            label = sandbox.label(),
            segments = mappings.len(),
            guard = guard.is_some(),
            seed,
            "container prepared"
        );
        Ok(Self {
            guard,
            mappings,
            sandbox,
            seed,
        })
    }

    /// Label of this container.
    #[must_use]
    pub fn label(&self) -> &str {
        self.sandbox.label()
    }

    /// Segments mapped into the guest, in declaration order.
    #[must_use]
    pub fn mappings(&self) -> &[GuestMapping] {
        &self.mappings
    }

    /// The revoked page, when a guard was installed.
    #[must_use]
    pub const fn guard(&self) -> Option<&GuardPage> {
        self.guard.as_ref()
    }

    /// Writes READY, then serves requests until EXIT or end of input.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Pipe`] when a read or write fails.
    pub fn serve(
        &mut self,
        requests: &mut impl Read,
        replies: &mut impl Write,
    ) -> Result<LoopEnd, ContainerError> {
        wire::write_command(replies, Command::Ready).map_err(ContainerError::pipe)?;
        info!(target: CONTAINER_TARGET, label = self.label(), "container ready");
        loop {
            let Some(byte) = wire::read_byte(requests).map_err(ContainerError::pipe)? else {
                info!(
                    target: CONTAINER_TARGET,
                    label = self.label(),
                    "host closed the request pipe"
                );
                return Ok(LoopEnd::Disconnected);
            };
            let reply = self.dispatch(byte);
            wire::write_command(replies, reply).map_err(ContainerError::pipe)?;
            if reply == Command::Exit {
                info!(target: CONTAINER_TARGET, label = self.label(), "exit requested");
                return Ok(LoopEnd::Exited);
            }
        }
    }

    /// Counts the bytes of guest memory, skipping the guard page.
    #[must_use]
    pub fn census(&self) -> HeapCensus {
        let skip = self
            .guard
            .as_ref()
            .map(|guard| guard.guest_offset()..guard.guest_offset() + guard.len());
        HeapCensus::take(self.sandbox.memory_data(), skip, FILL_BYTE)
    }

    /// Runs one request byte and returns the reply: the request itself on
    /// success, [`Command::Failed`] otherwise.
    pub fn dispatch(&mut self, byte: u8) -> Command {
        let Some(command) = Command::from_byte(byte) else {
            warn!(
                target: CONTAINER_TARGET,
                label = self.label(),
                byte,
                "unrecognised request byte"
            );
            return Command::Failed;
        };
        let succeeded = match plan_request(command, self.seed) {
            RequestPlan::Local => true,
            RequestPlan::Rejected => {
                warn!(
                    target: CONTAINER_TARGET,
                    label = self.label(),
                    %command,
                    "reply byte received as a request"
                );
                false
            }
            RequestPlan::Call(request) => self.run_call(command, &request),
            RequestPlan::HeapTest => self.heap_test(),
        };
        if succeeded {
            debug!(target: CONTAINER_TARGET, label = self.label(), %command, "request succeeded");
            command
        } else {
            Command::Failed
        }
    }

    fn run_call(&mut self, command: Command, request: &GuestRequest) -> bool {
        let Some(handle) = self.sandbox.export(request.export) else {
            warn!(
                target: CONTAINER_TARGET,
                label = self.label(),
                %command,
                export = request.export,
                "guest does not export this request"
            );
            return false;
        };
        let Some(result) = self.call_guest(command, handle, &request.args) else {
            return false;
        };
        if request.expectation.accepts(&result) {
            return true;
        }
        if let CallResult::Completed(value) = result {
            warn!(
                target: CONTAINER_TARGET,
                label = self.label(),
                %command,
                value,
                "guest reported failure"
            );
        }
        false
    }

    /// Fills the guest heap, clears it again and checks that the fill bytes
    /// are gone. The shared mappings sit below every block the guest hands
    /// out, so they are left untouched.
    fn heap_test(&mut self) -> bool {
        let command = Command::HeapTest;
        let (Some(fill), Some(clear)) = (
            self.sandbox.export(FILL_MEMORY_EXPORT),
            self.sandbox.export(CLEAR_MEMORY_EXPORT),
        ) else {
            warn!(
                target: CONTAINER_TARGET,
                label = self.label(),
                %command,
                "guest does not export the heap test"
            );
            return false;
        };

        let before = self.census();
        info!(target: CONTAINER_TARGET, label = self.label(), %before, "heap before fill");
        let Some(CallResult::Completed(failed_at)) = self.call_guest(command, fill, &[]) else {
            return false;
        };
        let filled = self.census();
        info!(
            target: CONTAINER_TARGET,
            label = self.label(),
            failed_at,
            %filled,
            "heap filled"
        );
        if !self
            .call_guest(command, clear, &[])
            .is_some_and(|result| CallResult::is_ok(&result))
        {
            return false;
        }
        let cleared = self.census();
        info!(target: CONTAINER_TARGET, label = self.label(), %cleared, "heap cleared");
        if cleared.filled > before.filled {
            warn!(
                target: CONTAINER_TARGET,
                label = self.label(),
                left = cleared.filled - before.filled,
                "fill bytes survived the clear"
            );
            return false;
        }
        true
    }

    /// Calls the guest. Returns `None` when the call could not be made at
    /// all; traps are logged by the sandbox.
    fn call_guest(
        &mut self,
        command: Command,
        handle: ExportHandle,
        args: &[i32],
    ) -> Option<CallResult> {
        self.sandbox
            .call(handle, args)
            .inspect_err(|error| {
                warn!(
                    target: CONTAINER_TARGET,
                    label = self.label(),
                    %command,
                    %error,
                    "guest call rejected"
                );
            })
            .ok()
    }
}

/// Runs a container process: opens the pipes, starts the runtime and serves
/// requests.
///
/// # Errors
///
/// Returns a [`ContainerError`] when startup fails or a pipe breaks.
pub fn run(args: &ContainerArgs) -> Result<LoopEnd, ContainerError> {
    let mut requests = open_pipe(args.request_fd)?;
    let mut replies = open_pipe(args.reply_fd)?;
    let mut runtime = ContainerRuntime::start(args)?;
    runtime.serve(&mut requests, &mut replies)
}

fn open_pipe(fd: RawFd) -> Result<File, ContainerError> {
    fcntl(fd, FcntlArg::F_GETFD).map_err(|source| ContainerError::Descriptor { fd, source })?;
    // SAFETY: the descriptor is open and was handed to this process for its
    // exclusive use on the command line.
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn clock_seed() -> i32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or_default();
    (nanos ^ std::process::id()).cast_signed()
}

#[cfg(test)]
mod tests;
