//! Error types for monitors.

use thiserror::Error;

/// Result type alias using the monitor [`enum@Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or driving a monitor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested lifecycle transition is not allowed right now.
    #[error("invalid monitor state: {0}")]
    InvalidState(StateViolation),

    /// A callback could not be handed to the scheduler.
    ///
    /// Only ever logged by the sampling loop; never returned to callers.
    #[error("failed to submit callback: {0}")]
    CallbackSubmission(String),

    /// The monitor configuration was rejected.
    #[error("invalid monitor configuration: {0}")]
    InvalidConfig(String),
}

/// The specific contract a caller broke when an [`Error::InvalidState`] is returned.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StateViolation {
    /// The target event loop is closed and cannot accept new tasks.
    #[error("cannot monitor a closed event loop")]
    LoopClosed,

    /// No event loop was given and none is running on this thread.
    #[error("no event loop is running on the current thread")]
    NoRunningLoop,

    /// The monitor is already installed into this or another event loop.
    #[error("monitor is already installed into an event loop")]
    AlreadyInstalled,

    /// The sampling loop of this monitor is already running.
    #[error("monitor is already running")]
    AlreadyRunning,
}

impl Error {
    /// Returns the state violation if this is an [`Error::InvalidState`].
    pub fn violation(&self) -> Option<StateViolation> {
        match self {
            Error::InvalidState(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<StateViolation> for Error {
    fn from(v: StateViolation) -> Self {
        Error::InvalidState(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message_includes_violation() {
        let err = Error::from(StateViolation::AlreadyInstalled);
        assert_eq!(
            err.to_string(),
            "invalid monitor state: monitor is already installed into an event loop"
        );
        assert_eq!(err.violation(), Some(StateViolation::AlreadyInstalled));
    }

    #[test]
    fn other_errors_have_no_violation() {
        let err = Error::InvalidConfig("interval must be positive".into());
        assert_eq!(err.violation(), None);
    }
}
