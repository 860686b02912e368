//! Error types for jobguard.
//!
//! Uses thiserror for derive macros. Acquisition failures are surfaced to the
//! caller; release-path and reconnection failures never reach this type, they
//! are logged where they happen.

use crate::action::ErrorCode;
use crate::coordination::StoreError;
use crate::exit_codes;
use thiserror::Error;

/// The requested action conflicts with the job's current action.
///
/// Raised by the local guardian without any network round trip, or by the
/// distributed guardian after a failed lease attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct JobInUseError {
    /// The guarded job.
    pub job_id: String,

    /// Human-readable conflict sentence produced by the action domain.
    pub message: String,

    /// Categorical code of the action that could not be performed.
    pub error_code: ErrorCode,

    /// Host holding the conflicting action, when known.
    pub host: Option<String>,
}

impl JobInUseError {
    /// Host holding the conflicting action, if it was recorded.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

/// Main error type for jobguard operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// The requested action conflicts with the current one.
    #[error(transparent)]
    InUse(#[from] JobInUseError),

    /// The coordination service could not be reached at startup.
    #[error("cannot connect to coordination service: {0}")]
    Connection(String),

    /// The coordination service failed while acquiring an action.
    #[error("coordination service error: {0}")]
    Coordination(#[from] StoreError),

    /// Invalid arguments or configuration.
    #[error("{0}")]
    UserError(String),

    /// The command run while holding an action failed.
    #[error("command failed: {0}")]
    CommandFailed(String),
}

impl GuardError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            GuardError::InUse(_) => exit_codes::JOB_IN_USE,
            GuardError::Connection(_) => exit_codes::COORDINATION_FAILURE,
            GuardError::Coordination(_) => exit_codes::COORDINATION_FAILURE,
            GuardError::UserError(_) => exit_codes::USER_ERROR,
            GuardError::CommandFailed(_) => exit_codes::COMMAND_FAILURE,
        }
    }

    /// The in-use details, if this is a conflict error.
    pub fn as_in_use(&self) -> Option<&JobInUseError> {
        match self {
            GuardError::InUse(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for jobguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
