//! In-process action guardian.

use super::{ActionGuardian, NextGuardian, busy_error, check_job_id};
use crate::action::ActionState;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

struct Actions<T> {
    /// Committed actions.
    current: HashMap<String, T>,
    /// Actions waiting on the next guardian.
    in_flight: HashMap<String, T>,
}

impl<T> Default for Actions<T> {
    fn default() -> Self {
        Self {
            current: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }
}

/// Guards actions on jobs within a single process.
///
/// The first guardian in a chain: it rejects conflicting actions from
/// memory before any network round trip. The mutex is never held while the
/// next guardian decides. An action waiting on it is recorded as in flight,
/// which rejects other acquisitions of the same job but is not visible
/// through [`ActionGuardian::current_action`] until committed.
pub struct LocalActionGuardian<T: ActionState> {
    actions: Mutex<Actions<T>>,
    next: NextGuardian<T>,
}

impl<T: ActionState> LocalActionGuardian<T> {
    /// Create a standalone guardian.
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(Actions::default()),
            next: None,
        }
    }

    /// Create a guardian that also requires `next` to grant every action.
    pub fn with_next(next: Arc<dyn ActionGuardian<T>>) -> Self {
        Self {
            actions: Mutex::new(Actions::default()),
            next: Some(next),
        }
    }

    fn lock_actions(&self) -> MutexGuard<'_, Actions<T>> {
        // Every critical section leaves the map consistent.
        self.actions
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl<T: ActionState> Default for LocalActionGuardian<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ActionState> ActionGuardian<T> for LocalActionGuardian<T> {
    fn current_action(&self, job_id: &str) -> T {
        self.lock_actions()
            .current
            .get(job_id)
            .copied()
            .unwrap_or_else(T::starting_state)
    }

    fn acquire_action(&self, job_id: &str, action: T) -> Result<T> {
        check_job_id(job_id)?;

        let current = {
            let mut actions = self.lock_actions();
            let current = match actions.in_flight.get(job_id) {
                Some(&pending) => pending,
                None => actions
                    .current
                    .get(job_id)
                    .copied()
                    .unwrap_or_else(T::starting_state),
            };

            if actions.in_flight.contains_key(job_id) || !current.is_valid_transition(action) {
                let err = busy_error(job_id, action, current, None);
                warn!(job_id, "{}", err.message);
                return Err(err.into());
            }
            actions.in_flight.insert(job_id.to_string(), action);
            current
        };

        let granted = match &self.next {
            Some(next) => next.acquire_action(job_id, action).map(|_| ()),
            None => Ok(()),
        };

        let mut actions = self.lock_actions();
        actions.in_flight.remove(job_id);
        granted?;
        actions.current.insert(job_id.to_string(), action);
        drop(actions);

        debug!(job_id, from = %current, to = %action, "acquired action");
        Ok(action.next_state(current))
    }

    fn release_action(&self, job_id: &str, next_state: T) {
        {
            let mut actions = self.lock_actions();
            if next_state == T::starting_state() {
                actions.current.remove(job_id);
            } else {
                actions.current.insert(job_id.to_string(), next_state);
            }
        }
        debug!(job_id, to = %next_state, "released action");

        if let Some(next) = &self.next {
            next.release_action(job_id, next_state);
        }
    }
}
