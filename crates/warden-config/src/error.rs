use thiserror::Error;

/// Errors raised when parsed arguments violate the spawn contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Shared-memory names must be a single leading slash followed by a
    /// non-empty name without further slashes.
    #[error("invalid shared-memory name '{name}'")]
    InvalidSegmentName {
        /// Offending name.
        name: String,
    },
    /// Segments must hold at least one byte.
    #[error("shared-memory segment '{name}' must not be empty")]
    EmptySegment {
        /// Segment name.
        name: String,
    },
    /// Container labels must be non-empty and free of whitespace.
    #[error("invalid container label '{label}'")]
    InvalidLabel {
        /// Offending label.
        label: String,
    },
}

/// Checks a POSIX shared-memory object name.
pub(crate) fn validate_segment(name: &str, size: usize) -> Result<(), ConfigError> {
    let valid = name
        .strip_prefix('/')
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
    if !valid {
        return Err(ConfigError::InvalidSegmentName {
            name: name.to_owned(),
        });
    }
    if size == 0 {
        return Err(ConfigError::EmptySegment {
            name: name.to_owned(),
        });
    }
    Ok(())
}
