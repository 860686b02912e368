//! Command implementations for jobguard.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Every command works on the file coordination store
//! configured for the working directory, in the job or scheduler action
//! domain depending on `--scheduler`.

mod lease;
mod query;
mod run;

use crate::action::{ActionState, JobAction, ScheduledAction};
use crate::cli::{Cli, Command, LeaseAction, LeaseCommand};
use crate::config::Config;
use crate::coordination::{CoordinationStore, FileCoordinator};
use crate::distributed::DistributedActionGuardian;
use crate::error::{GuardError, Result};
use crate::guardian::LocalActionGuardian;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration and working directory of one invocation.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub dir: PathBuf,
}

impl Context {
    /// Context for `dir`, reading `jobguard.yaml` there unless `config`
    /// names another file.
    pub fn load(config: Option<PathBuf>, dir: PathBuf) -> Result<Self> {
        let config = Config::discover(config.as_deref(), &dir)?;
        Ok(Self { config, dir })
    }

    /// Open the store directory.
    pub fn open_store(&self) -> Result<FileCoordinator> {
        Ok(FileCoordinator::open(
            self.config.root_path(&self.dir),
            self.config.lock_timeout(),
        )?)
    }
}

/// The guardian chain of one invocation: an in-process guardian fronting
/// the store-backed one.
pub(crate) struct Guardians<T: ActionState> {
    pub(crate) local: Arc<LocalActionGuardian<T>>,
    pub(crate) distributed: Arc<DistributedActionGuardian<T>>,
}

impl<T: ActionState> Guardians<T> {
    pub(crate) fn open(ctx: &Context) -> Result<Self> {
        let store: Arc<dyn CoordinationStore> = Arc::new(ctx.open_store()?);
        let distributed = Arc::new(DistributedActionGuardian::connect(
            store,
            ctx.config.guardian_settings(),
            None,
        )?);
        let local = Arc::new(LocalActionGuardian::with_next(distributed.clone()));
        Ok(Self { local, distributed })
    }
}

/// Dispatch a command to its implementation.
///
/// This is the main entry point for command execution. The config is
/// resolved against the current working directory.
pub fn dispatch(cli: Cli) -> Result<()> {
    let dir = std::env::current_dir().map_err(|e| {
        GuardError::UserError(format!("cannot determine working directory: {}", e))
    })?;
    let ctx = Context::load(cli.config, dir)?;

    if cli.scheduler {
        dispatch_domain::<ScheduledAction>(&ctx, cli.command)
    } else {
        dispatch_domain::<JobAction>(&ctx, cli.command)
    }
}

/// Route a command within one action domain.
pub fn dispatch_domain<T: ActionState>(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Status(args) => query::cmd_status::<T>(ctx, &args.job_id),
        Command::Run(args) => run::cmd_run::<T>(ctx, args),
        Command::Hosts => query::cmd_hosts::<T>(ctx),
        Command::Jobs => query::cmd_jobs::<T>(ctx),
        Command::Lease(lease_cmd) => dispatch_lease::<T>(ctx, lease_cmd),
    }
}

/// Dispatch lease subcommands.
fn dispatch_lease<T: ActionState>(ctx: &Context, lease_cmd: LeaseCommand) -> Result<()> {
    match lease_cmd.action {
        LeaseAction::List => lease::cmd_lease_list(ctx),
        LeaseAction::Clear(args) => lease::cmd_lease_clear::<T>(ctx, args),
    }
}

/// Parse a case-insensitive action name of domain `T`.
pub(crate) fn parse_action<T: ActionState>(name: &str) -> Result<T> {
    T::from_name(&name.to_uppercase()).ok_or_else(|| {
        let known: Vec<&str> = T::VARIANTS.iter().map(|v| v.name()).collect();
        GuardError::UserError(format!(
            "unknown {} '{}'\n\nValid actions: {}",
            T::DOMAIN,
            name,
            known.join(", ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardian::ActionGuardian;
    use tempfile::TempDir;

    #[test]
    fn test_parse_action_is_case_insensitive() {
        assert_eq!(parse_action::<JobAction>("writing").unwrap(), JobAction::Writing);
        assert_eq!(parse_action::<JobAction>("UPDATING").unwrap(), JobAction::Updating);
        assert_eq!(
            parse_action::<ScheduledAction>("Started").unwrap(),
            ScheduledAction::Started
        );
    }

    #[test]
    fn test_parse_action_lists_domain_actions() {
        let err = parse_action::<ScheduledAction>("writing").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("scheduler-action"));
        assert!(msg.contains("STARTED, STOPPING, STOPPED, UPDATE, DELETE"));
        assert_eq!(err.exit_code(), crate::exit_codes::USER_ERROR);
    }

    #[test]
    fn test_context_opens_store_under_working_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("jobguard.yaml"), "root: state").unwrap();

        let ctx = Context::load(None, dir.path().to_path_buf()).unwrap();
        let store = ctx.open_store().unwrap();
        assert_eq!(store.root(), dir.path().join("state"));
        assert!(dir.path().join("state").is_dir());
    }

    #[test]
    fn test_guardians_share_store_directory() {
        let dir = TempDir::new().unwrap();
        let ctx = Context::load(None, dir.path().to_path_buf()).unwrap();

        let first = Guardians::<JobAction>::open(&ctx).unwrap();
        let second = Guardians::<JobAction>::open(&ctx).unwrap();

        first.local.acquire_action("foo", JobAction::Writing).unwrap();
        assert_eq!(second.distributed.current_action("foo"), JobAction::Writing);
        assert!(second.local.acquire_action("foo", JobAction::Closing).is_err());
        assert!(first.distributed.held_actions().contains_key("foo"));
    }
}
