/// Outcome of invoking a guest export.
///
/// A trap is an ordinary outcome rather than an error: the guest hit
/// `unreachable`, an out-of-bounds access or similar, and the container
/// decides whether that is fatal for the command at hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult {
    /// The call returned; functions without a result report `0`.
    Completed(i32),
    /// The call trapped with the given diagnostic.
    Trapped(String),
}

impl CallResult {
    /// Returns `true` when the call returned normally.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns the guest's result, or `None` after a trap.
    #[must_use]
    pub const fn value(&self) -> Option<i32> {
        match self {
            Self::Completed(value) => Some(*value),
            Self::Trapped(_) => None,
        }
    }
}
