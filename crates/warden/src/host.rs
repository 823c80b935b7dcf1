//! The host program: create segments, run a script, stop every container.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use warden_config::defaults::CONTAINER_BINARY_NAME;
use warden_config::{ConfigError, HostArgs};
use warden_host::{
    ContainerLauncher, Orchestrator, OrchestratorError, ScriptError, ScriptReport, SessionExit,
    StepOutcome, parse_script,
};

/// Tracing target for the host program.
const HOST_TARGET: &str = "warden::host";

/// Errors that stop the host before the script finishes.
#[derive(Debug, Error)]
pub enum HostError {
    /// Command-line values are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The command script does not parse.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Segments or containers could not be set up.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// The host executable's location is unknown, so the container binary
    /// cannot be found next to it.
    #[error("cannot locate the running executable: {source}")]
    CurrentExe {
        /// Underlying OS error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// What happened during one host run.
#[derive(Debug)]
pub struct HostReport {
    /// Per-step outcomes.
    pub script: ScriptReport,
    /// How each container ended.
    pub exits: Vec<SessionExit>,
}

impl HostReport {
    /// Returns `true` when every step was acknowledged and every container
    /// exited cleanly.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.script.is_success()
            && self
                .exits
                .iter()
                .all(|exit| exit.outcome.as_ref().is_ok_and(|status| status.success()))
    }
}

/// Runs the script described by `args` to completion.
///
/// Step failures do not abort the run; they are recorded in the returned
/// report and logged.
///
/// # Errors
///
/// Returns a [`HostError`] when the arguments are invalid or the segments
/// cannot be created.
pub fn run(args: &HostArgs) -> Result<HostReport, HostError> {
    args.validate()?;
    let steps = parse_script(&args.script)?;
    let program = container_program(args)?;
    let launcher = ContainerLauncher::from_host_args(args, program);

    let mut orchestrator = Orchestrator::new(launcher)?;
    let script = orchestrator.run_script(&steps)?;
    for failure in script.failures() {
        match &failure.outcome {
            StepOutcome::Failed(cause) => error!(
                target: HOST_TARGET,
                step = %failure.step,
                error = %cause,
                "step failed"
            ),
            StepOutcome::Skipped => error!(
                target: HOST_TARGET,
                step = %failure.step,
                "step skipped"
            ),
            StepOutcome::Acknowledged => {}
        }
    }

    let exits = orchestrator.shutdown();
    for exit in &exits {
        match &exit.outcome {
            Ok(status) => info!(target: HOST_TARGET, label = %exit.label, %status, "container ended"),
            Err(cause) => error!(
                target: HOST_TARGET,
                label = %exit.label,
                error = %cause,
                "container did not stop cleanly"
            ),
        }
    }
    Ok(HostReport { script, exits })
}

fn container_program(args: &HostArgs) -> Result<PathBuf, HostError> {
    if let Some(program) = &args.container {
        return Ok(program.clone());
    }
    let exe = std::env::current_exe().map_err(|source| HostError::CurrentExe {
        source: Arc::new(source),
    })?;
    Ok(exe.with_file_name(CONTAINER_BINARY_NAME))
}
