//! Implementation of the `jobguard lease` commands.

use super::Context;
use crate::action::ActionState;
use crate::cli::LeaseClearArgs;
use crate::distributed::Namespace;
use crate::error::{GuardError, Result};
use crate::guardian::check_job_id;

/// Execute the `jobguard lease list` command.
pub fn cmd_lease_list(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let stale_minutes = ctx.config.lease_stale_minutes;
    let holds = store.list_holds(stale_minutes)?;

    if holds.is_empty() {
        println!("No active leases.");
        return Ok(());
    }

    println!("Active leases and locks ({}):", holds.len());
    println!();

    for hold in &holds {
        println!("  {} ({}):", hold.name, hold.kind.as_str());
        println!("    Owner:      {}", hold.metadata.owner);
        if let Some(pid) = hold.metadata.pid {
            println!("    PID:        {}", pid);
        }
        println!(
            "    Created:    {}",
            hold.metadata.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("    Age:        {}", hold.metadata.age_string());
        if hold.is_stale {
            println!("    Status:     STALE (exceeds {} min threshold)", stale_minutes);
        }
        println!("    Path:       {}", hold.path.display());
        println!();
    }

    let stale_count = holds.iter().filter(|h| h.is_stale).count();
    if stale_count > 0 {
        println!(
            "Note: {} hold(s) are stale. Use `jobguard lease clear <job> --force` to clear a lease.",
            stale_count
        );
    }

    Ok(())
}

/// Execute the `jobguard lease clear` command.
pub fn cmd_lease_clear<T: ActionState>(ctx: &Context, args: LeaseClearArgs) -> Result<()> {
    // Require --force flag
    if !args.force {
        return Err(GuardError::UserError(format!(
            "refusing to clear lease without --force flag.\n\n\
             Clearing a lease lets another process start a conflicting action\n\
             if the holder is still alive. Only clear leases of crashed processes.\n\n\
             To clear the lease, run:\n  jobguard lease clear {} --force",
            args.job_id
        )));
    }

    check_job_id(&args.job_id)?;
    let store = ctx.open_store()?;
    let path = Namespace::new(&ctx.config.namespace).lease(&args.job_id, T::DOMAIN);
    let cleared = store.clear_lease(&path, ctx.config.lease_stale_minutes)?;

    println!("Cleared lease: {}", cleared.name);
    println!();
    println!("Lease details:");
    println!("  Owner:      {}", cleared.metadata.owner);
    if let Some(pid) = cleared.metadata.pid {
        println!("  PID:        {}", pid);
    }
    println!(
        "  Created:    {}",
        cleared.metadata.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Age:        {}", cleared.metadata.age_string());
    if cleared.is_stale {
        println!("  Status:     was STALE");
    }
    println!("  Path:       {}", cleared.path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{JobAction, ScheduledAction};
    use crate::commands::Guardians;
    use crate::coordination::StoreError;
    use crate::guardian::TryAcquire;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Context {
        Context::load(None, dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_lease_list_empty_store() {
        let dir = TempDir::new().unwrap();
        cmd_lease_list(&context(&dir)).unwrap();
    }

    #[test]
    fn test_lease_clear_requires_force() {
        let dir = TempDir::new().unwrap();
        let args = LeaseClearArgs {
            job_id: "foo".to_string(),
            force: false,
        };
        let err = cmd_lease_clear::<JobAction>(&context(&dir), args).unwrap_err();
        assert!(err.to_string().contains("--force"));
    }

    #[test]
    fn test_lease_clear_frees_job() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let crashed = Guardians::<JobAction>::open(&ctx).unwrap();
        let _ticket = crashed
            .local
            .try_acquiring_action("foo", JobAction::Writing)
            .unwrap();
        cmd_lease_list(&ctx).unwrap();

        let args = LeaseClearArgs {
            job_id: "foo".to_string(),
            force: true,
        };
        cmd_lease_clear::<JobAction>(&ctx, args).unwrap();

        let store = ctx.open_store().unwrap();
        assert!(
            store
                .list_holds(ctx.config.lease_stale_minutes)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_lease_clear_uses_domain_path() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let holder = Guardians::<JobAction>::open(&ctx).unwrap();
        let _ticket = holder
            .local
            .try_acquiring_action("foo", JobAction::Writing)
            .unwrap();

        let args = LeaseClearArgs {
            job_id: "foo".to_string(),
            force: true,
        };
        let err = cmd_lease_clear::<ScheduledAction>(&ctx, args).unwrap_err();
        assert!(matches!(
            err,
            GuardError::Coordination(StoreError::NoLease(_))
        ));
    }

    #[test]
    fn test_lease_clear_rejects_paths_as_job_ids() {
        let dir = TempDir::new().unwrap();
        let args = LeaseClearArgs {
            job_id: "../locks".to_string(),
            force: true,
        };
        let err = cmd_lease_clear::<JobAction>(&context(&dir), args).unwrap_err();
        assert!(matches!(err, GuardError::UserError(_)));
    }
}
