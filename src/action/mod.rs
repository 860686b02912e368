//! Action domains.
//!
//! An action domain is a closed set of mutually exclusive activities that
//! can be performed on a job, together with the pure rules deciding which
//! activity may follow which. Every process in a cluster must apply the
//! same rules, so they live here as plain functions over enums with no I/O.
//!
//! Two domains exist:
//! - [`JobAction`]: the job lifecycle (writing, flushing, closing, ...)
//! - [`ScheduledAction`]: the job's data scheduler (started, stopping, ...)

mod job;
mod scheduled;

pub use job::JobAction;
pub use scheduled::ScheduledAction;

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Stable categorical error identifiers attached to in-use errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Another connection is using the job.
    NativeProcessConcurrentUseError,
    /// The job cannot be paused in its current state.
    CannotPauseJob,
    /// The job cannot be resumed in its current state.
    CannotResumeJob,
    /// The scheduler cannot be started in its current state.
    CannotStartJobScheduler,
    /// The scheduler cannot be stopped in its current state.
    CannotStopJobScheduler,
    /// The scheduler cannot be updated in its current state.
    CannotUpdateJobScheduler,
    /// The scheduler cannot be deleted in its current state.
    CannotDeleteJobScheduler,
}

impl ErrorCode {
    /// The identifier as exposed to callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NativeProcessConcurrentUseError => "NATIVE_PROCESS_CONCURRENT_USE_ERROR",
            ErrorCode::CannotPauseJob => "CANNOT_PAUSE_JOB",
            ErrorCode::CannotResumeJob => "CANNOT_RESUME_JOB",
            ErrorCode::CannotStartJobScheduler => "CANNOT_START_JOB_SCHEDULER",
            ErrorCode::CannotStopJobScheduler => "CANNOT_STOP_JOB_SCHEDULER",
            ErrorCode::CannotUpdateJobScheduler => "CANNOT_UPDATE_JOB_SCHEDULER",
            ErrorCode::CannotDeleteJobScheduler => "CANNOT_DELETE_JOB_SCHEDULER",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour shared by every action domain.
///
/// Methods taking `&self` as the *current* state or as the *requested*
/// action are named accordingly; read the argument names carefully.
pub trait ActionState:
    Copy + Eq + Hash + Debug + Display + Send + Sync + 'static
{
    /// Name of the domain, used as a path segment in the coordination store.
    const DOMAIN: &'static str;

    /// Every variant of the domain.
    const VARIANTS: &'static [Self];

    /// State of a job that has never been seen before.
    fn starting_state() -> Self;

    /// Upper-case variant name; this is the persisted form.
    fn name(&self) -> &'static str;

    /// Parse a variant from its persisted name.
    fn from_name(name: &str) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|v| v.name() == name)
    }

    /// Whether `requested` may start while `self` is the current action.
    fn is_valid_transition(&self, requested: Self) -> bool;

    /// The resting state the job falls back to once `self`, requested while
    /// the job was in `current`, completes.
    fn next_state(&self, current: Self) -> Self;

    /// True for the resting-but-active state that keeps the distributed
    /// lease across a sequence of fine-grained actions.
    fn hold_distributed_lock(&self) -> bool;

    /// Error code reported when `self` was requested but could not start.
    fn error_code(&self) -> ErrorCode;

    /// Conflict sentence for requesting `self` on `job_id` while
    /// `action_in_use` is held, optionally on `host`.
    fn busy_action_error(&self, job_id: &str, action_in_use: Self, host: Option<&str>) -> String;
}

/// Treat an empty host name as unknown.
pub(crate) fn known_host(host: Option<&str>) -> Option<&str> {
    host.filter(|h| !h.is_empty())
}
