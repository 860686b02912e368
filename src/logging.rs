//! Tracing subscriber setup for the jobguard binary.
//!
//! Diagnostics go to stderr so command output on stdout stays scriptable.
//! `JOBGUARD_LOG` takes `EnvFilter` directives; without it the level comes
//! from the number of `-v` flags.

use crate::error::{GuardError, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "JOBGUARD_LOG";

/// Base level for a `-v` count.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Build the filter from `directives` if given, else from the `-v` count.
fn build_env_filter(directives: Option<&str>, verbosity: u8) -> Result<EnvFilter> {
    let filter_str = match directives {
        Some(d) if !d.trim().is_empty() => d.to_string(),
        _ => level_for(verbosity).to_string(),
    };
    EnvFilter::try_new(&filter_str).map_err(|e| {
        GuardError::UserError(format!("invalid {} filter '{}': {}", LOG_ENV, filter_str, e))
    })
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(verbosity: u8) -> Result<()> {
    let directives = std::env::var(LOG_ENV).ok();
    let filter = build_env_filter(directives.as_deref(), verbosity)?;

    // try_init fails only when a subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
    Ok(())
}
