//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error taxonomy for the simulation advance engine."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Malformed or inconsistent model metadata. Raised once at load and fatal to startup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("signal exchange block at position {0} has an empty instance name")]
    EmptyInstance(usize),
    #[error("signal '{0}' is declared more than once")]
    DuplicateSignal(String),
    #[error("input '{name}' has invalid bounds [{min}, {max}]")]
    InvalidBounds { name: String, min: f64, max: f64 },
    #[error("model declares no output signals")]
    NoOutputs,
}

/// Request-level rejection, raised before anything is mutated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown signal")]
    UnknownSignal,
    #[error("value {value} outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("value is not finite")]
    NonFinite,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClockError {
    #[error("step size must be finite and positive, got {0}")]
    InvalidStep(f64),
}

/// Failure reported by the wrapped emulation unit.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum UnitError {
    #[error("unit has no variable named '{0}'")]
    UnknownVariable(String),
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error("solver failed: {0}")]
    Solver(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdapterError {
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error("model call exceeded {0:?}")]
    Timeout(Duration),
    #[error("model worker aborted: {0}")]
    Worker(String),
    #[error("output '{name}' returned non-finite value {value}")]
    NonFiniteOutput { name: String, value: f64 },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResultsError {
    #[error("result timestamp {next} does not follow {last}")]
    NonMonotonic { last: f64, next: f64 },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KpiError {
    #[error("kpi '{kpi}' references unknown output '{signal}'")]
    UnknownSignal { kpi: String, signal: String },
    #[error("kpi '{kpi}' references unknown tag '{tag}'")]
    UnknownTag { kpi: String, tag: String },
    #[error("kpi '{0}' resolves to no signals")]
    NoSignals(String),
    #[error("kpi '{0}' is missing its {1}")]
    MissingParameter(String, &'static str),
}

/// Errors surfaced by the session manager to its callers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("session is not initialized; issue a reset first")]
    NotReady,
    #[error("scenario has ended; issue a reset to start again")]
    ScenarioEnded,
    #[error("invalid input '{name}': {reason}")]
    InvalidInput {
        name: String,
        reason: ValidationError,
    },
    #[error(transparent)]
    InvalidStep(#[from] ClockError),
    #[error("model step failed: {0}")]
    ModelStep(AdapterError),
    #[error("reset failed: {0}")]
    Reset(AdapterError),
    #[error("result commit rejected: {0}")]
    Commit(#[from] ResultsError),
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),
}

impl SessionError {
    /// Validation failures are local and safe to retry immediately.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidInput { .. }
                | SessionError::InvalidStep(_)
                | SessionError::UnknownSignal(_)
        )
    }
}
