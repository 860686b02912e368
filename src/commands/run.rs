//! Implementation of the `jobguard run` command.
//!
//! Holds an action on a job for the lifetime of a child process. The
//! ticket is released on every exit path, including spawn failures.

use super::{Context, Guardians, parse_action};
use crate::action::ActionState;
use crate::cli::RunArgs;
use crate::error::{GuardError, Result};
use crate::guardian::TryAcquire;
use std::process::{Command, ExitStatus};
use tracing::info;

/// Split `command` into an argv without invoking a shell.
pub(crate) fn split_command(command: &str) -> Result<Vec<String>> {
    let args = shell_words::split(command).map_err(|e| {
        GuardError::UserError(format!(
            "failed to parse --exec '{}': {}\n\n\
             Fix: check for unmatched quotes or invalid escape sequences.",
            command, e
        ))
    })?;

    if args.is_empty() {
        return Err(GuardError::UserError(
            "--exec is empty after parsing.\n\nFix: provide the command to run.".to_string(),
        ));
    }
    Ok(args)
}

fn run_command(argv: &[String], ctx: &Context) -> Result<ExitStatus> {
    Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(&ctx.dir)
        .status()
        .map_err(|e| {
            GuardError::UserError(format!(
                "failed to execute '{}': {}\n\n\
                 Fix: ensure the command is installed and in PATH.",
                argv[0], e
            ))
        })
}

/// Execute the `jobguard run` command.
pub fn cmd_run<T: ActionState>(ctx: &Context, args: RunArgs) -> Result<()> {
    let action = parse_action::<T>(&args.action)?;
    let argv = split_command(&args.exec)?;

    let guardians = Guardians::<T>::open(ctx)?;
    let ticket = guardians.local.try_acquiring_action(&args.job_id, action)?;
    info!(job_id = %args.job_id, action = %action, command = %args.exec, "running guarded command");

    let status = run_command(&argv, ctx);
    let next_state = ticket.next_state();
    ticket.release();

    let status = status?;
    if !status.success() {
        return Err(GuardError::CommandFailed(format!(
            "'{}' exited with {}",
            args.exec,
            status
                .code()
                .map_or_else(|| "a signal".to_string(), |c| format!("code {}", c))
        )));
    }

    println!(
        "{} {} done; job is now {}",
        args.job_id, action, next_state
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{JobAction, ScheduledAction};
    use crate::config::Config;
    use crate::guardian::ActionGuardian;
    use tempfile::TempDir;

    fn context(dir: &TempDir, hostname: &str) -> Context {
        let config = Config {
            hostname: Some(hostname.to_string()),
            lock_timeout_secs: 2,
            ..Config::default()
        };
        Context {
            config,
            dir: dir.path().to_path_buf(),
        }
    }

    fn run_args(job_id: &str, action: &str, exec: &str) -> RunArgs {
        RunArgs {
            job_id: job_id.to_string(),
            action: action.to_string(),
            exec: exec.to_string(),
        }
    }

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command("echo 'hello world' x").unwrap(),
            vec!["echo", "hello world", "x"]
        );
        assert!(split_command("echo 'unterminated").is_err());
        assert!(split_command("   ").is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_run_releases_after_success() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "worker-1");

        cmd_run::<JobAction>(&ctx, run_args("foo", "updating", "true")).unwrap();

        let observer = Guardians::<JobAction>::open(&ctx).unwrap();
        assert_eq!(observer.distributed.current_action("foo"), JobAction::Closed);
        assert!(
            observer
                .local
                .try_acquiring_action("foo", JobAction::Deleting)
                .is_ok()
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_run_reports_command_failure_and_releases() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "worker-1");

        let err = cmd_run::<JobAction>(&ctx, run_args("foo", "writing", "false")).unwrap_err();
        assert!(matches!(err, GuardError::CommandFailed(_)));
        assert_eq!(err.exit_code(), crate::exit_codes::COMMAND_FAILURE);

        let err = cmd_run::<JobAction>(&ctx, run_args("foo", "writing", "no-such-binary-xyz"))
            .unwrap_err();
        assert!(matches!(err, GuardError::UserError(_)));

        let observer = Guardians::<JobAction>::open(&ctx).unwrap();
        assert_eq!(observer.distributed.current_action("foo"), JobAction::Closed);
    }

    #[test]
    #[cfg(unix)]
    fn test_run_rejected_while_job_in_use() {
        let dir = TempDir::new().unwrap();
        let holder = Guardians::<ScheduledAction>::open(&context(&dir, "worker-1")).unwrap();
        let _started = holder
            .local
            .try_acquiring_action("feed", ScheduledAction::Started)
            .unwrap();

        let marker = dir.path().join("ran");
        let exec = format!("touch {}", marker.display());
        let err = cmd_run::<ScheduledAction>(&context(&dir, "worker-2"), run_args("feed", "delete", &exec))
            .unwrap_err();

        let in_use = err.as_in_use().unwrap();
        assert_eq!(in_use.host(), Some("worker-1"));
        assert_eq!(
            in_use.message,
            "Cannot delete scheduler for job 'feed' while its status is STARTED on host worker-1"
        );
        assert_eq!(err.exit_code(), crate::exit_codes::JOB_IN_USE);
        assert!(!marker.exists());
    }

    #[test]
    fn test_run_rejects_unknown_action() {
        let dir = TempDir::new().unwrap();
        let err = cmd_run::<JobAction>(&context(&dir, "worker-1"), run_args("foo", "started", "true"))
            .unwrap_err();
        assert!(matches!(err, GuardError::UserError(_)));
    }
}
