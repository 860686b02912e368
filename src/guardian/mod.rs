//! Action guardians.
//!
//! A guardian answers one question per job: may this action start now? It
//! tracks the current action of every job it has seen, rejects invalid
//! transitions with a [`JobInUseError`], and optionally delegates to a
//! *next* guardian so that a cheap in-process check can front a
//! cluster-wide one:
//!
//! ```text
//! caller -> LocalActionGuardian -> DistributedActionGuardian
//! ```
//!
//! Acquisition goes outer to inner and only commits if every guardian in
//! the chain agrees. Release goes outer to inner and never fails.
//!
//! # Tickets
//!
//! A successful acquisition returns an [`ActionTicket`]. Dropping the ticket
//! releases the action, moving the job to the resting state computed when
//! the action was granted.

mod local;
mod ticket;

pub use local::LocalActionGuardian;
pub use ticket::ActionTicket;

use crate::action::ActionState;
use crate::error::{GuardError, JobInUseError, Result};
use std::sync::Arc;

/// A guardian chained behind another one.
pub type NextGuardian<T> = Option<Arc<dyn ActionGuardian<T>>>;

/// Guards mutually exclusive actions on a set of jobs.
pub trait ActionGuardian<T: ActionState>: Send + Sync {
    /// The action currently held on `job_id`, or the domain's starting
    /// state for a job never seen.
    fn current_action(&self, job_id: &str) -> T;

    /// Try to start `action` on `job_id`.
    ///
    /// Returns the resting state the job must move to when the action is
    /// released. Callers normally go through
    /// [`TryAcquire::try_acquiring_action`] instead, which wraps the result
    /// in a ticket.
    fn acquire_action(&self, job_id: &str, action: T) -> Result<T>;

    /// Finish the action on `job_id`, moving it to `next_state`.
    ///
    /// Never fails: problems are logged and forward progress continues.
    fn release_action(&self, job_id: &str, next_state: T);
}

/// Ticket-issuing acquisition for shared guardians.
pub trait TryAcquire<T: ActionState, G: ActionGuardian<T> + ?Sized> {
    /// Try to start `action` on `job_id`, returning a ticket that releases
    /// it when dropped.
    fn try_acquiring_action(&self, job_id: &str, action: T) -> Result<ActionTicket<T, G>>;
}

impl<T: ActionState, G: ActionGuardian<T> + ?Sized> TryAcquire<T, G> for Arc<G> {
    fn try_acquiring_action(&self, job_id: &str, action: T) -> Result<ActionTicket<T, G>> {
        let next_state = self.acquire_action(job_id, action)?;
        Ok(ActionTicket::new(Arc::clone(self), job_id, next_state))
    }
}

/// Build the in-use error for requesting `requested` while `in_use` holds.
pub(crate) fn busy_error<T: ActionState>(
    job_id: &str,
    requested: T,
    in_use: T,
    host: Option<&str>,
) -> JobInUseError {
    let host = host.filter(|h| !h.is_empty());
    JobInUseError {
        job_id: job_id.to_string(),
        message: requested.busy_action_error(job_id, in_use, host),
        error_code: requested.error_code(),
        host: host.map(str::to_string),
    }
}

/// Reject job IDs that cannot name a single coordination store node.
pub(crate) fn check_job_id(job_id: &str) -> Result<()> {
    if job_id.is_empty() || job_id == "." || job_id == ".." || job_id.contains('/') {
        return Err(GuardError::UserError(format!(
            "invalid job id '{}'\n\n\
             Fix: use a non-empty id without '/' that is neither '.' nor '..'.",
            job_id
        )));
    }
    Ok(())
}
