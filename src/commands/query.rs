//! Implementation of the `status`, `hosts` and `jobs` commands.

use super::{Context, Guardians};
use crate::action::ActionState;
use crate::distributed::HostnameAction;
use crate::error::Result;
use std::collections::BTreeMap;

/// One-line description of a job's holder.
pub(crate) fn format_status<T: ActionState>(job_id: &str, holder: &HostnameAction<T>) -> String {
    if holder.is_held() {
        format!("{}: {} (host {})", job_id, holder.action, holder.hostname)
    } else {
        format!("{}: {}", job_id, holder.action)
    }
}

/// Table of held jobs, one `job  host` row each.
pub(crate) fn format_jobs(hosts: &BTreeMap<String, String>) -> Vec<String> {
    let width = hosts.keys().map(String::len).max().unwrap_or(0);
    hosts
        .iter()
        .map(|(job, host)| format!("  {:width$}  {}", job, host, width = width))
        .collect()
}

/// Execute the `jobguard status` command.
pub fn cmd_status<T: ActionState>(ctx: &Context, job_id: &str) -> Result<()> {
    let guardians = Guardians::<T>::open(ctx)?;
    let holder = guardians.distributed.current_holder(job_id);
    println!("{}", format_status(job_id, &holder));
    Ok(())
}

/// Execute the `jobguard hosts` command.
pub fn cmd_hosts<T: ActionState>(ctx: &Context) -> Result<()> {
    let guardians = Guardians::<T>::open(ctx)?;
    let own = guardians.distributed.hostname().to_string();

    for host in guardians.distributed.engine_api_hosts()? {
        if host == own {
            println!("{} (this host)", host);
        } else {
            println!("{}", host);
        }
    }
    Ok(())
}

/// Execute the `jobguard jobs` command.
pub fn cmd_jobs<T: ActionState>(ctx: &Context) -> Result<()> {
    let guardians = Guardians::<T>::open(ctx)?;
    let hosts = guardians.distributed.host_by_job()?;

    if hosts.is_empty() {
        println!("No held jobs.");
        return Ok(());
    }

    println!("Held jobs ({}):", hosts.len());
    for line in format_jobs(&hosts) {
        println!("{}", line);
    }
    Ok(())
}
