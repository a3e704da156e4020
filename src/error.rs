//! Error types for simverify.
//!
//! All errors are strongly typed using thiserror. Per-scenario failures
//! (missing scenarios, engine faults, corrupt archives, timeouts) are
//! recoverable: the verifiers convert them into report outcomes. Only
//! configuration errors and explicit aborts escape a verification call.

use thiserror::Error;

use crate::time::SimTime;

/// Validation errors raised while checking plans and configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Checkpoint schedule must contain at least one checkpoint")]
    EmptySchedule,

    #[error("Duration must be positive (got {duration})")]
    NonPositiveDuration {
        duration: SimTime,
    },

    #[error("Sample interval must be positive (got {interval})")]
    NonPositiveInterval {
        interval: SimTime,
    },

    #[error("Schedule is not strictly increasing at index {index}: {previous} then {next}")]
    NonIncreasingSchedule {
        index: usize,
        previous: SimTime,
        next: SimTime,
    },

    #[error("Integrator set cannot be empty")]
    EmptyIntegratorSet,

    #[error("Unknown integrator: {name}")]
    UnknownIntegrator {
        name: String,
    },

    #[error("Invalid number format '{format}': {reason}")]
    InvalidNumberFormat {
        format: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors reported by an engine adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("No scenario constructor named '{name}'")]
    ScenarioNotFound {
        name: String,
    },

    #[error("Failed to construct scenario '{scenario}': {reason}")]
    Construction {
        scenario: String,
        reason: String,
    },

    #[error("Engine fault at t={time}: {message}")]
    Fault {
        time: SimTime,
        message: String,
    },

    #[error("No retained waypoint at t={time}")]
    NoWaypoint {
        time: SimTime,
    },

    #[error("Engine is busy running")]
    Busy,

    #[error("No scenario is loaded")]
    NotLoaded,

    #[error("Model format error: {message}")]
    Format {
        message: String,
    },

    #[error("Engine worker disconnected")]
    Disconnected,
}

/// Errors raised by a scenario session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Scenario not found: {name}")]
    ScenarioNotFound {
        name: String,
    },

    #[error("Simulation fault at t={time}: {message}")]
    SimulationFault {
        time: SimTime,
        message: String,
    },

    #[error("Corrupt or incompatible format: {reason}")]
    CorruptOrIncompatibleFormat {
        reason: String,
    },

    #[error("Engine did not stop within {waited_ms}ms")]
    Timeout {
        waited_ms: u64,
    },

    #[error("Invalid session command: {reason}")]
    InvalidCommand {
        reason: String,
    },

    #[error("Session is poisoned by an earlier timeout")]
    Poisoned,

    #[error("Engine error: {0}")]
    Engine(EngineError),
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ScenarioNotFound { name } => Self::ScenarioNotFound { name },
            EngineError::Fault { time, message } => Self::SimulationFault { time, message },
            EngineError::Format { message } => Self::CorruptOrIncompatibleFormat { reason: message },
            other => Self::Engine(other),
        }
    }
}

impl SessionError {
    /// Returns true if a verifier should record this as an outcome and move on.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ScenarioNotFound { .. }
                | Self::SimulationFault { .. }
                | Self::CorruptOrIncompatibleFormat { .. }
                | Self::Timeout { .. }
        )
    }
}

/// Top-level error type for simverify.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Suite aborted at scenario '{scenario}': {reason}")]
    Aborted {
        scenario: String,
        reason: String,
    },

    #[error("I/O error: {message}")]
    Io {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<EngineError> for HarnessError {
    fn from(err: EngineError) -> Self {
        Self::Session(err.into())
    }
}

impl HarnessError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a session error.
    #[must_use]
    pub const fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }

    /// Returns true if the suite was aborted on request.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Returns true if this error can be recorded as an outcome instead of
    /// stopping the suite.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Session(e) => e.is_recoverable(),
            Self::Validation(_) | Self::Aborted { .. } | Self::Io { .. } | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
