//! CLI argument parsing for jobguard.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// jobguard: cluster-wide mutual exclusion for actions on long-lived jobs.
///
/// Processes sharing a store directory never run conflicting actions on the
/// same job at the same time:
/// - `run` holds an action on a job while a command executes
/// - `status`, `jobs` and `hosts` show who holds what
/// - `lease` inspects and clears leases left behind by crashed processes
#[derive(Parser, Debug)]
#[command(name = "jobguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: ./jobguard.yaml when present).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Guard scheduler actions instead of job actions.
    #[arg(long, global = true)]
    pub scheduler: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for jobguard.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the current action of a job.
    ///
    /// Prints the action and the host holding it, or the idle state.
    Status(StatusArgs),

    /// Run a command while holding an action on a job.
    ///
    /// Fails immediately if the action conflicts with the job's current
    /// action. The action is released when the command exits, whatever
    /// its outcome.
    Run(RunArgs),

    /// List hosts with a live guardian.
    Hosts,

    /// List jobs held by some host.
    Jobs,

    /// Lease management commands.
    ///
    /// List or clear leases and locks in the store directory.
    Lease(LeaseCommand),
}

/// Arguments for the `status` command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Job to inspect.
    pub job_id: String,
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Job to act on.
    pub job_id: String,

    /// Action to hold (e.g. writing, updating, started). Case-insensitive.
    pub action: String,

    /// Command to run while holding the action (split like a shell would).
    #[arg(long, value_name = "COMMAND")]
    pub exec: String,
}

/// Lease subcommands.
#[derive(Parser, Debug)]
pub struct LeaseCommand {
    #[command(subcommand)]
    pub action: LeaseAction,
}

/// Available lease actions.
#[derive(Subcommand, Debug)]
pub enum LeaseAction {
    /// List all leases and locks.
    ///
    /// Shows each hold with its owner, pid and age.
    List,

    /// Clear the lease of a job.
    ///
    /// Requires --force flag to prevent accidental clearing.
    Clear(LeaseClearArgs),
}

/// Arguments for the `lease clear` command.
#[derive(Parser, Debug)]
pub struct LeaseClearArgs {
    /// Job whose lease should be cleared.
    pub job_id: String,

    /// Force clearing the lease (required for safety).
    #[arg(long)]
    pub force: bool,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
