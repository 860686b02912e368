//! RAII action ticket.

use super::ActionGuardian;
use crate::action::ActionState;
use std::sync::Arc;

/// Proof that an action is held on a job.
///
/// When dropped, the action is released and the job moves to the resting
/// state decided at acquisition. Releasing twice is a no-op. The ticket may
/// be moved to and released from another thread.
pub struct ActionTicket<T: ActionState, G: ActionGuardian<T> + ?Sized = dyn ActionGuardian<T>> {
    /// Guardian that granted the action.
    guardian: Arc<G>,

    /// The guarded job.
    job_id: String,

    /// State to restore on release.
    next_state: T,

    /// Whether the ticket has been released already.
    released: bool,
}

impl<T: ActionState, G: ActionGuardian<T> + ?Sized> ActionTicket<T, G> {
    pub(super) fn new(guardian: Arc<G>, job_id: &str, next_state: T) -> Self {
        Self {
            guardian,
            job_id: job_id.to_string(),
            next_state,
            released: false,
        }
    }

    /// The guarded job.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The state the job moves to when this ticket is released.
    pub fn next_state(&self) -> T {
        self.next_state
    }

    /// Whether the action has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the action now. Subsequent calls do nothing.
    pub fn close(&mut self) {
        if !self.released {
            self.released = true;
            self.guardian.release_action(&self.job_id, self.next_state);
        }
    }

    /// Release the action and consume the ticket.
    pub fn release(mut self) {
        self.close();
    }
}

impl<T: ActionState, G: ActionGuardian<T> + ?Sized> Drop for ActionTicket<T, G> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: ActionState, G: ActionGuardian<T> + ?Sized> std::fmt::Debug for ActionTicket<T, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionTicket")
            .field("job_id", &self.job_id)
            .field("next_state", &self.next_state)
            .field("released", &self.released)
            .finish()
    }
}
