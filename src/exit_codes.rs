//! Exit code constants for the jobguard CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config)
//! - 2: The guarded command failed
//! - 3: Coordination store unreachable or failing
//! - 4: Job in use: the requested action conflicts with the current one

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or invalid configuration.
pub const USER_ERROR: i32 = 1;

/// The command run under a held action exited unsuccessfully.
pub const COMMAND_FAILURE: i32 = 2;

/// The coordination store could not be reached or returned an error.
pub const COORDINATION_FAILURE: i32 = 3;

/// The requested action conflicts with the job's current action.
pub const JOB_IN_USE: i32 = 4;
