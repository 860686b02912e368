//! Config struct definition and default implementation.

use serde::{Deserialize, Serialize};

/// File looked up in the working directory when no `--config` is given.
pub const CONFIG_FILE: &str = "jobguard.yaml";

/// Configuration of the jobguard CLI.
///
/// This struct represents the contents of `jobguard.yaml`.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Store settings
    // =========================================================================
    /// Directory of the shared coordination store (default: ".jobguard").
    #[serde(default = "default_root")]
    pub root: String,

    /// Namespace under which jobs and hosts are recorded (default: "jobguard").
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Host name recorded in descriptors; the machine's host name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    // =========================================================================
    // Timing settings
    // =========================================================================
    /// Seconds to wait for a description lock before giving up.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Seconds to keep trying to reach the coordination service at startup.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Minutes after which a lease or lock file is considered stale.
    #[serde(default = "default_lease_stale_minutes")]
    pub lease_stale_minutes: u32,
}

fn default_root() -> String {
    ".jobguard".to_string()
}

fn default_namespace() -> String {
    "jobguard".to_string()
}

fn default_lock_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_lease_stale_minutes() -> u32 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            namespace: default_namespace(),
            hostname: None,
            lock_timeout_secs: default_lock_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            lease_stale_minutes: default_lease_stale_minutes(),
        }
    }
}
