//! Host orchestration: shared segments plus a set of labelled containers.
//!
//! The [`Orchestrator`] creates every segment a [`ContainerLauncher`]
//! describes, writes the verification pattern into each, and then spawns
//! containers on demand. Requests are issued strictly in order: each send
//! waits for its acknowledgement before the next one goes out.
//!
//! # Example
//!
//! ```no_run
//! use warden_host::{ContainerLauncher, Orchestrator, parse_script};
//! use warden_protocol::{SegmentAccess, SegmentDescriptor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let launcher = ContainerLauncher::new(
//!     "target/debug/warden-container",
//!     "guest.wasm",
//!     SegmentDescriptor::new("/shared_ro", 5000, SegmentAccess::ReadOnly),
//!     SegmentDescriptor::new("/shared_rw", 1000, SegmentAccess::ReadWrite),
//! );
//! let mut orchestrator = Orchestrator::new(launcher)?;
//! let report = orchestrator.run_script(&parse_script("a:init,a:verify,a:exit")?)?;
//! assert!(report.is_success());
//! let exits = orchestrator.shutdown();
//! assert!(exits.iter().all(|exit| exit.outcome.is_ok()));
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info, warn};

use warden_protocol::Command;

use crate::error::{OrchestratorError, SessionError};
use crate::script::{ScriptReport, ScriptStep, StepOutcome, script_labels};
use crate::segment::SharedSegment;
use crate::session::{ContainerExit, ContainerLauncher, ContainerSession};

/// Tracing target for orchestration events.
const ORCHESTRATOR_TARGET: &str = "warden_host::orchestrator";

/// How one container ended during [`Orchestrator::shutdown`].
#[derive(Debug)]
pub struct SessionExit {
    /// Container label.
    pub label: String,
    /// Exit record, or the error raised while stopping the container.
    pub outcome: Result<ContainerExit, SessionError>,
}

/// Owns the shared segments and every container session.
#[derive(Debug)]
pub struct Orchestrator {
    // Sessions are declared first so they drop, and their containers are
    // reaped, before the segments are unlinked.
    sessions: Vec<ContainerSession>,
    segments: Vec<SharedSegment>,
    launcher: ContainerLauncher,
}

impl Orchestrator {
    /// Creates the launcher's segments and fills them with the verification
    /// pattern.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Segment`] when a segment cannot be
    /// created or is too small for the pattern. Segments created before the
    /// failure are unlinked again.
    pub fn new(launcher: ContainerLauncher) -> Result<Self, OrchestratorError> {
        let mut segments = Vec::new();
        for descriptor in launcher.segments() {
            let mut segment = SharedSegment::create(descriptor.clone())?;
            segment.fill_verification_pattern()?;
            segments.push(segment);
        }
        info!(
            target: ORCHESTRATOR_TARGET,
            segments = segments.len(),
            program = %launcher.program().display(),
            "shared segments ready"
        );
        Ok(Self {
            sessions: Vec::new(),
            segments,
            launcher,
        })
    }

    /// Spawns a container under `label` and waits for it to become ready.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::DuplicateLabel`] when the label is taken,
    /// or [`OrchestratorError::Session`] when the spawn or handshake fails.
    pub fn spawn(&mut self, label: &str) -> Result<(), OrchestratorError> {
        if self.session(label).is_some() {
            return Err(OrchestratorError::DuplicateLabel {
                label: label.to_owned(),
            });
        }
        let session = self.launcher.launch(label)?;
        self.sessions.push(session);
        Ok(())
    }

    /// Looks up a session by label.
    #[must_use]
    pub fn session(&self, label: &str) -> Option<&ContainerSession> {
        self.sessions.iter().find(|session| session.label() == label)
    }

    /// Sessions in spawn order.
    #[must_use]
    pub fn sessions(&self) -> &[ContainerSession] {
        &self.sessions
    }

    /// Looks up a segment by its shared-memory name.
    #[must_use]
    pub fn segment(&self, name: &str) -> Option<&SharedSegment> {
        self.segments
            .iter()
            .find(|segment| segment.descriptor().name() == name)
    }

    /// Mutable access to a segment, for host-side writes guests should see.
    #[must_use]
    pub fn segment_mut(&mut self, name: &str) -> Option<&mut SharedSegment> {
        self.segments
            .iter_mut()
            .find(|segment| segment.descriptor().name() == name)
    }

    /// Sends one request to the container labelled `label`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownLabel`] for an unknown container
    /// and [`OrchestratorError::Session`] when the request fails.
    pub fn send(&mut self, label: &str, command: Command) -> Result<(), OrchestratorError> {
        let session = self
            .sessions
            .iter_mut()
            .find(|session| session.label() == label)
            .ok_or_else(|| OrchestratorError::UnknownLabel {
                label: label.to_owned(),
            })?;
        session.send(command)?;
        Ok(())
    }

    /// Sends `command` to every trusted, running session in spawn order,
    /// waiting for each acknowledgement before the next send.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failing session's error.
    pub fn broadcast(&mut self, command: Command) -> Result<(), OrchestratorError> {
        for session in self
            .sessions
            .iter_mut()
            .filter(|session| session.is_trusted() && session.is_running())
        {
            session.send(command)?;
        }
        Ok(())
    }

    /// Runs `steps` in order, spawning any container a step names that does
    /// not exist yet (in order of first appearance) before the first step.
    ///
    /// A failed step does not abort the script. Later steps addressed to
    /// the failed container are skipped, except EXIT, which is still sent
    /// while the process is alive.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Session`] when a container cannot be
    /// spawned. Step failures are reported in the [`ScriptReport`].
    pub fn run_script(&mut self, steps: &[ScriptStep]) -> Result<ScriptReport, OrchestratorError> {
        for label in script_labels(steps) {
            if self.session(label).is_none() {
                self.spawn(label)?;
            }
        }

        let mut report = ScriptReport::default();
        for step in steps {
            let outcome = self.run_step(step);
            report.record(step.clone(), outcome);
        }
        Ok(report)
    }

    fn run_step(&mut self, step: &ScriptStep) -> StepOutcome {
        let Some(session) = self
            .sessions
            .iter_mut()
            .find(|session| session.label() == step.label())
        else {
            return StepOutcome::Skipped;
        };
        let exiting = step.command() == Command::Exit;
        if !session.is_running() || (!session.is_trusted() && !exiting) {
            debug!(target: ORCHESTRATOR_TARGET, %step, "skipping step for failed container");
            return StepOutcome::Skipped;
        }
        match session.send(step.command()) {
            Ok(()) => {
                info!(target: ORCHESTRATOR_TARGET, %step, "step acknowledged");
                StepOutcome::Acknowledged
            }
            Err(error) => {
                warn!(target: ORCHESTRATOR_TARGET, %step, %error, "step failed");
                StepOutcome::Failed(error)
            }
        }
    }

    /// Stops every container and then removes the segments.
    ///
    /// Running containers are sent EXIT; containers that already ended
    /// report their recorded exit.
    #[must_use = "the exits report how each container ended"]
    pub fn shutdown(self) -> Vec<SessionExit> {
        let Self {
            sessions, segments, ..
        } = self;
        let exits = sessions
            .into_iter()
            .map(|session| {
                let label = session.label().to_owned();
                let outcome = match session.exit_status() {
                    Some(exit) => Ok(exit),
                    None => session.exit(),
                };
                match &outcome {
                    Ok(exit) => {
                        info!(target: ORCHESTRATOR_TARGET, label = %label, %exit, "container stopped");
                    }
                    Err(error) => warn!(
                        target: ORCHESTRATOR_TARGET,
                        label = %label,
                        %error,
                        "container did not stop cleanly"
                    ),
                }
                SessionExit { label, outcome }
            })
            .collect();
        drop(segments);
        exits
    }
}
