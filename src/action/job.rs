//! Job lifecycle actions.

use super::{ActionState, ErrorCode, known_host};
use serde::{Deserialize, Serialize};

/// Activities a job can be engaged in.
///
/// `Closed` is the idle state and `Sleeping` the resting-but-active state of
/// a job with an open process between writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobAction {
    Closed,
    Closing,
    Deleting,
    Sleeping,
    Writing,
    Flushing,
    Pausing,
    Resuming,
    Reverting,
    Updating,
}

impl JobAction {
    /// Verb used when this action is the one being requested.
    fn verb(&self) -> &'static str {
        match self {
            JobAction::Closed | JobAction::Closing => "close",
            JobAction::Deleting => "delete",
            JobAction::Sleeping => "hold",
            JobAction::Writing => "write to",
            JobAction::Flushing => "flush",
            JobAction::Pausing => "pause",
            JobAction::Resuming => "resume",
            JobAction::Reverting => "revert",
            JobAction::Updating => "update",
        }
    }

    /// Verb used when this action is the one in progress.
    fn progressive(&self) -> &'static str {
        match self {
            JobAction::Closed | JobAction::Closing => "closing",
            JobAction::Deleting => "deleting",
            JobAction::Sleeping => "holding",
            JobAction::Writing => "writing to",
            JobAction::Flushing => "flushing",
            JobAction::Pausing => "pausing",
            JobAction::Resuming => "resuming",
            JobAction::Reverting => "reverting",
            JobAction::Updating => "updating",
        }
    }
}

impl ActionState for JobAction {
    const DOMAIN: &'static str = "job-action";

    const VARIANTS: &'static [Self] = &[
        JobAction::Closed,
        JobAction::Closing,
        JobAction::Deleting,
        JobAction::Sleeping,
        JobAction::Writing,
        JobAction::Flushing,
        JobAction::Pausing,
        JobAction::Resuming,
        JobAction::Reverting,
        JobAction::Updating,
    ];

    fn starting_state() -> Self {
        JobAction::Closed
    }

    fn name(&self) -> &'static str {
        match self {
            JobAction::Closed => "CLOSED",
            JobAction::Closing => "CLOSING",
            JobAction::Deleting => "DELETING",
            JobAction::Sleeping => "SLEEPING",
            JobAction::Writing => "WRITING",
            JobAction::Flushing => "FLUSHING",
            JobAction::Pausing => "PAUSING",
            JobAction::Resuming => "RESUMING",
            JobAction::Reverting => "REVERTING",
            JobAction::Updating => "UPDATING",
        }
    }

    fn is_valid_transition(&self, requested: Self) -> bool {
        match self {
            JobAction::Closed => true,
            JobAction::Sleeping => matches!(
                requested,
                JobAction::Updating
                    | JobAction::Flushing
                    | JobAction::Closing
                    | JobAction::Deleting
                    | JobAction::Writing
                    | JobAction::Pausing
            ),
            _ => false,
        }
    }

    fn next_state(&self, current: Self) -> Self {
        match self {
            JobAction::Writing | JobAction::Sleeping => JobAction::Sleeping,
            JobAction::Flushing | JobAction::Updating if current == JobAction::Sleeping => {
                JobAction::Sleeping
            }
            _ => JobAction::Closed,
        }
    }

    fn hold_distributed_lock(&self) -> bool {
        *self == JobAction::Sleeping
    }

    fn error_code(&self) -> ErrorCode {
        match self {
            JobAction::Pausing => ErrorCode::CannotPauseJob,
            JobAction::Resuming => ErrorCode::CannotResumeJob,
            _ => ErrorCode::NativeProcessConcurrentUseError,
        }
    }

    fn busy_action_error(&self, job_id: &str, action_in_use: Self, host: Option<&str>) -> String {
        let host_part = match known_host(host) {
            Some(h) => format!("on host {} ", h),
            None => String::new(),
        };
        format!(
            "Cannot {} job {} while another connection {}is {} the job",
            self.verb(),
            job_id,
            host_part,
            action_in_use.progressive()
        )
    }
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_allows_every_action() {
        for &requested in JobAction::VARIANTS {
            assert!(JobAction::Closed.is_valid_transition(requested), "{}", requested);
        }
    }

    #[test]
    fn sleeping_allows_only_fine_grained_actions() {
        let allowed = [
            JobAction::Updating,
            JobAction::Flushing,
            JobAction::Closing,
            JobAction::Deleting,
            JobAction::Writing,
            JobAction::Pausing,
        ];
        for &requested in JobAction::VARIANTS {
            assert_eq!(
                JobAction::Sleeping.is_valid_transition(requested),
                allowed.contains(&requested),
                "{}",
                requested
            );
        }
    }

    #[test]
    fn transient_actions_block_everything() {
        for &current in JobAction::VARIANTS {
            if matches!(current, JobAction::Closed | JobAction::Sleeping) {
                continue;
            }
            for &requested in JobAction::VARIANTS {
                assert!(!current.is_valid_transition(requested));
            }
        }
    }

    #[test]
    fn resting_states() {
        assert_eq!(JobAction::Writing.next_state(JobAction::Closed), JobAction::Sleeping);
        assert_eq!(JobAction::Writing.next_state(JobAction::Sleeping), JobAction::Sleeping);
        assert_eq!(JobAction::Flushing.next_state(JobAction::Sleeping), JobAction::Sleeping);
        assert_eq!(JobAction::Updating.next_state(JobAction::Sleeping), JobAction::Sleeping);
        assert_eq!(JobAction::Updating.next_state(JobAction::Closed), JobAction::Closed);
        assert_eq!(JobAction::Closing.next_state(JobAction::Sleeping), JobAction::Closed);
        assert_eq!(JobAction::Deleting.next_state(JobAction::Closed), JobAction::Closed);
        assert_eq!(JobAction::Pausing.next_state(JobAction::Sleeping), JobAction::Closed);
        assert_eq!(JobAction::Resuming.next_state(JobAction::Closed), JobAction::Closed);
        assert_eq!(JobAction::Reverting.next_state(JobAction::Closed), JobAction::Closed);
    }

    #[test]
    fn only_sleeping_holds_the_distributed_lock() {
        for &action in JobAction::VARIANTS {
            assert_eq!(action.hold_distributed_lock(), action == JobAction::Sleeping);
        }
    }

    #[test]
    fn busy_error_without_host() {
        assert_eq!(
            JobAction::Deleting.busy_action_error("foo", JobAction::Writing, None),
            "Cannot delete job foo while another connection is writing to the job"
        );
        assert_eq!(
            JobAction::Updating.busy_action_error("foo", JobAction::Writing, Some("")),
            "Cannot update job foo while another connection is writing to the job"
        );
    }

    #[test]
    fn busy_error_with_host() {
        assert_eq!(
            JobAction::Closing.busy_action_error("foo", JobAction::Updating, Some("macbook")),
            "Cannot close job foo while another connection on host macbook is updating the job"
        );
    }

    #[test]
    fn error_codes() {
        assert_eq!(JobAction::Resuming.error_code(), ErrorCode::CannotResumeJob);
        assert_eq!(JobAction::Pausing.error_code(), ErrorCode::CannotPauseJob);
        assert_eq!(
            JobAction::Closing.error_code(),
            ErrorCode::NativeProcessConcurrentUseError
        );
    }

    #[test]
    fn names_round_trip_through_from_name() {
        for &action in JobAction::VARIANTS {
            assert_eq!(JobAction::from_name(action.name()), Some(action));
        }
        assert_eq!(JobAction::from_name("writing"), None);
        assert_eq!(JobAction::starting_state(), JobAction::Closed);
    }
}
