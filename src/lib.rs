//! jobguard: cluster-wide mutual exclusion for state-changing actions on
//! long-lived jobs.
//!
//! Before a process starts an action on a job (writing data, updating,
//! closing, deleting, starting a scheduler...), it asks a guardian for a
//! ticket. The guardian refuses actions that conflict with the job's
//! current action, whether that action is held in this process or on
//! another host sharing the same coordination store.
//!
//! - [`action`]: the action domains and their transition rules
//! - [`guardian`]: the guardian trait, tickets and the in-process guardian
//! - [`distributed`]: the guardian backed by a coordination store
//! - [`coordination`]: the store boundary and its memory and file backends

pub mod action;
pub mod cli;
pub mod commands;
pub mod config;
pub mod coordination;
pub mod distributed;
pub mod error;
pub mod exit_codes;
pub mod guardian;
pub mod logging;

#[cfg(test)]
mod test_support;

pub use action::{ActionState, ErrorCode, JobAction, ScheduledAction};
pub use distributed::{DistributedActionGuardian, GuardianSettings, HostnameAction};
pub use error::{GuardError, JobInUseError, Result};
pub use guardian::{ActionGuardian, ActionTicket, LocalActionGuardian, TryAcquire};
