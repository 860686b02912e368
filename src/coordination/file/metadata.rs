//! Owner metadata stored in lease and lock files.

use crate::coordination::{StoreError, StoreResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Metadata stored in lease and lock files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseMetadata {
    /// Owner of the file (e.g., `user@HOST`).
    pub owner: String,

    /// Process ID of the holder (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Timestamp when the file was created (RFC3339).
    pub created_at: DateTime<Utc>,

    /// The store path the file guards.
    pub purpose: String,

    /// Proof of ownership handed out with the lease.
    pub token: String,
}

impl LeaseMetadata {
    /// Create new metadata with the current timestamp.
    pub fn new(purpose: &str, token: &str) -> Self {
        Self {
            owner: get_owner_string(),
            pid: Some(std::process::id()),
            created_at: Utc::now(),
            purpose: purpose.to_string(),
            token: token.to_string(),
        }
    }

    /// Parse metadata from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|e| StoreError::Metadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Serialize metadata to a JSON string.
    pub fn to_json(&self) -> String {
        // Only strings, integers and a timestamp: serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Age of the file.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.created_at)
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        let age = self.age();
        let minutes = age.num_minutes();
        let hours = age.num_hours();
        let days = age.num_days();

        if days > 0 {
            format!("{}d {}h", days, hours % 24)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else {
            format!("{}m", minutes)
        }
    }

    /// Whether the holder has kept the file longer than `stale_minutes`.
    pub fn is_stale(&self, stale_minutes: u32) -> bool {
        self.age().num_minutes() > i64::from(stale_minutes)
    }
}

/// Owner string written into metadata.
pub(crate) fn get_owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}
