//! Host scripts: ordered `label:command` steps.
//!
//! A script is a comma-separated list such as `a:init,a:verify,b:init`. Each
//! step names the container it addresses and a request. The compact form
//! `ai` (one label character followed by the raw wire byte) is accepted too,
//! so `ai,bi,ax,bx` and `a:init,b:init,a:exit,b:exit` are the same script.

use std::fmt;
use std::str::FromStr;

use warden_protocol::{Command, CommandParseError};

use crate::error::{ScriptError, SessionError};

/// One scripted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    label: String,
    command: Command,
}

impl ScriptStep {
    /// Builds a step addressed to `label`.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::NotRequest`] for `Ready` and `Failed`, and
    /// [`ScriptError::MissingLabel`] for an empty label.
    pub fn new(label: impl Into<String>, command: Command) -> Result<Self, ScriptError> {
        let target: String = label.into();
        if target.is_empty() {
            return Err(ScriptError::MissingLabel {
                step: command.name().to_owned(),
            });
        }
        if !command.is_request() {
            return Err(ScriptError::NotRequest {
                step: format!("{target}:{}", command.name()),
                command,
            });
        }
        Ok(Self {
            label: target,
            command,
        })
    }

    /// Container the step addresses.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Request sent.
    #[must_use]
    pub const fn command(&self) -> Command {
        self.command
    }
}

impl fmt::Display for ScriptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.command.name())
    }
}

impl FromStr for ScriptStep {
    type Err = ScriptError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        parse_step(0, text)
    }
}

fn parse_step(index: usize, text: &str) -> Result<ScriptStep, ScriptError> {
    let step = text.trim();
    if step.is_empty() {
        return Err(ScriptError::EmptyStep { index });
    }
    let missing_label = || ScriptError::MissingLabel {
        step: step.to_owned(),
    };

    let (label, command) = if let Some((label, name)) = step.split_once(':') {
        let command = Command::from_str(name.trim()).map_err(|_| ScriptError::UnknownCommand {
            step: step.to_owned(),
            source: CommandParseError::UnknownName(name.trim().to_owned()),
        })?;
        (label.trim(), command)
    } else {
        let mut chars = step.char_indices();
        let (Some(_), Some((split, short)), None) = (chars.next(), chars.next(), chars.next())
        else {
            return Err(missing_label());
        };
        let byte = u8::try_from(short).map_err(|_| missing_label())?;
        let command =
            Command::try_from(byte).map_err(|source| ScriptError::UnknownCommand {
                step: step.to_owned(),
                source,
            })?;
        (step.split_at(split).0, command)
    };

    if label.is_empty() {
        return Err(missing_label());
    }
    if !command.is_request() {
        return Err(ScriptError::NotRequest {
            step: step.to_owned(),
            command,
        });
    }
    Ok(ScriptStep {
        label: label.to_owned(),
        command,
    })
}

/// Parses a comma-separated script.
///
/// # Errors
///
/// Returns the first [`ScriptError`] encountered, naming the offending step.
pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>, ScriptError> {
    text.split(',')
        .enumerate()
        .map(|(index, step)| parse_step(index, step))
        .collect()
}

/// Labels addressed by `steps`, in order of first appearance.
#[must_use]
pub fn script_labels(steps: &[ScriptStep]) -> Vec<&str> {
    let mut labels: Vec<&str> = Vec::new();
    for step in steps {
        if !labels.contains(&step.label()) {
            labels.push(step.label());
        }
    }
    labels
}

/// What happened to one scripted request.
#[derive(Debug)]
pub enum StepOutcome {
    /// The container acknowledged the request.
    Acknowledged,
    /// The request failed; the session is no longer trusted.
    Failed(SessionError),
    /// The request was not sent because its container already failed or
    /// exited.
    Skipped,
}

/// A step together with its outcome.
#[derive(Debug)]
pub struct StepReport {
    /// Step that ran.
    pub step: ScriptStep,
    /// How it ended.
    pub outcome: StepOutcome,
}

/// Outcomes of a whole script, in script order.
#[derive(Debug, Default)]
pub struct ScriptReport {
    steps: Vec<StepReport>,
}

impl ScriptReport {
    pub(crate) fn record(&mut self, step: ScriptStep, outcome: StepOutcome) {
        self.steps.push(StepReport { step, outcome });
    }

    /// Every step in order.
    #[must_use]
    pub fn steps(&self) -> &[StepReport] {
        &self.steps
    }

    /// Returns `true` when every step was acknowledged.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.steps
            .iter()
            .all(|report| matches!(report.outcome, StepOutcome::Acknowledged))
    }

    /// Steps that failed.
    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|report| matches!(report.outcome, StepOutcome::Failed(_)))
    }
}
