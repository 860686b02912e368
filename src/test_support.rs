use crate::action::ActionState;
use crate::error::Result;
use crate::guardian::{ActionGuardian, busy_error};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

/// Guardian that records every call and grants everything except one action.
pub(crate) struct RecordingGuardian<T: ActionState> {
    fail_on: Option<T>,
    acquisitions: Mutex<Vec<(String, T)>>,
    releases: Mutex<Vec<(String, T)>>,
}

impl<T: ActionState> RecordingGuardian<T> {
    pub(crate) fn new() -> Self {
        Self {
            fail_on: None,
            acquisitions: Mutex::new(Vec::new()),
            releases: Mutex::new(Vec::new()),
        }
    }

    /// Reject every acquisition of `action` as if another node held the job.
    pub(crate) fn failing_on(action: T) -> Self {
        Self {
            fail_on: Some(action),
            ..Self::new()
        }
    }

    pub(crate) fn acquisitions(&self) -> Vec<(String, T)> {
        self.acquisitions.lock().unwrap().clone()
    }

    pub(crate) fn releases(&self) -> Vec<(String, T)> {
        self.releases.lock().unwrap().clone()
    }
}

impl<T: ActionState> ActionGuardian<T> for RecordingGuardian<T> {
    fn current_action(&self, _job_id: &str) -> T {
        T::starting_state()
    }

    fn acquire_action(&self, job_id: &str, action: T) -> Result<T> {
        self.acquisitions
            .lock()
            .unwrap()
            .push((job_id.to_string(), action));

        if self.fail_on == Some(action) {
            return Err(busy_error(job_id, action, action, Some("elsewhere")).into());
        }
        Ok(action.next_state(T::starting_state()))
    }

    fn release_action(&self, job_id: &str, next_state: T) {
        self.releases
            .lock()
            .unwrap()
            .push((job_id.to_string(), next_state));
    }
}

/// Poll `condition` until it holds or `timeout` expires.
pub(crate) fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Guardian whose acquisitions of one job block until the gate opens.
pub(crate) struct GatedGuardian {
    job_id: String,
    entered: Mutex<Sender<()>>,
    gate: Mutex<Receiver<()>>,
}

impl GatedGuardian {
    /// The guardian, a receiver signalled when a gated acquisition starts,
    /// and the sender that lets it finish.
    pub(crate) fn new(job_id: &str) -> (Self, Receiver<()>, Sender<()>) {
        let (entered, entered_rx) = mpsc::channel();
        let (open, gate) = mpsc::channel();
        let guardian = Self {
            job_id: job_id.to_string(),
            entered: Mutex::new(entered),
            gate: Mutex::new(gate),
        };
        (guardian, entered_rx, open)
    }
}

impl<T: ActionState> ActionGuardian<T> for GatedGuardian {
    fn current_action(&self, _job_id: &str) -> T {
        T::starting_state()
    }

    fn acquire_action(&self, job_id: &str, action: T) -> Result<T> {
        if job_id == self.job_id {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.gate.lock().unwrap().recv();
        }
        Ok(action.next_state(T::starting_state()))
    }

    fn release_action(&self, _job_id: &str, _next_state: T) {}
}
