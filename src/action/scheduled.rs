//! Scheduler actions.

use super::{ActionState, ErrorCode, known_host};
use serde::{Deserialize, Serialize};

/// Status of a job's data scheduler.
///
/// `Stopped` is idle, `Started` is resting-but-active: a running scheduler
/// keeps its lease until it is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduledAction {
    Started,
    Stopping,
    Stopped,
    Update,
    Delete,
}

impl ScheduledAction {
    fn verb(&self) -> &'static str {
        match self {
            ScheduledAction::Started => "start",
            ScheduledAction::Stopping | ScheduledAction::Stopped => "stop",
            ScheduledAction::Update => "update",
            ScheduledAction::Delete => "delete",
        }
    }
}

impl ActionState for ScheduledAction {
    const DOMAIN: &'static str = "scheduler-action";

    const VARIANTS: &'static [Self] = &[
        ScheduledAction::Started,
        ScheduledAction::Stopping,
        ScheduledAction::Stopped,
        ScheduledAction::Update,
        ScheduledAction::Delete,
    ];

    fn starting_state() -> Self {
        ScheduledAction::Stopped
    }

    fn name(&self) -> &'static str {
        match self {
            ScheduledAction::Started => "STARTED",
            ScheduledAction::Stopping => "STOPPING",
            ScheduledAction::Stopped => "STOPPED",
            ScheduledAction::Update => "UPDATE",
            ScheduledAction::Delete => "DELETE",
        }
    }

    fn is_valid_transition(&self, requested: Self) -> bool {
        match self {
            ScheduledAction::Stopped => matches!(
                requested,
                ScheduledAction::Started | ScheduledAction::Update | ScheduledAction::Delete
            ),
            ScheduledAction::Started => requested == ScheduledAction::Stopping,
            _ => false,
        }
    }

    fn next_state(&self, _current: Self) -> Self {
        match self {
            ScheduledAction::Started => ScheduledAction::Started,
            _ => ScheduledAction::Stopped,
        }
    }

    fn hold_distributed_lock(&self) -> bool {
        *self == ScheduledAction::Started
    }

    fn error_code(&self) -> ErrorCode {
        match self {
            ScheduledAction::Started => ErrorCode::CannotStartJobScheduler,
            ScheduledAction::Stopping | ScheduledAction::Stopped => {
                ErrorCode::CannotStopJobScheduler
            }
            ScheduledAction::Update => ErrorCode::CannotUpdateJobScheduler,
            ScheduledAction::Delete => ErrorCode::CannotDeleteJobScheduler,
        }
    }

    fn busy_action_error(&self, job_id: &str, action_in_use: Self, host: Option<&str>) -> String {
        let host_part = match known_host(host) {
            Some(h) => format!(" on host {}", h),
            None => String::new(),
        };
        format!(
            "Cannot {} scheduler for job '{}' while its status is {}{}",
            self.verb(),
            job_id,
            action_in_use.name(),
            host_part
        )
    }
}

impl std::fmt::Display for ScheduledAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
