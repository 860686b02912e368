//! Coordination store path layout.
//!
//! ```text
//! /<namespace>/jobs/<job>/<domain>                      lease
//! /<namespace>/jobs/<job>/<domain>/description          descriptor
//! /<namespace>/jobs/<job>/<domain>/description--lock    descriptor lock
//! /<namespace>/nodes/<hostname>/<guardian>              presence
//! ```
//!
//! Job IDs must be valid single segments; guardians reject the others
//! before building a path.

use crate::coordination::join_path;

const JOBS: &str = "jobs";
const NODES: &str = "nodes";
const DESCRIPTION: &str = "description";
const DESCRIPTION_LOCK: &str = "description--lock";

/// Paths of one guardian namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    base: String,
}

impl Namespace {
    /// Namespace rooted at `/<name>`.
    pub fn new(name: &str) -> Self {
        Self {
            base: format!("/{}", name.trim_matches('/')),
        }
    }

    /// Parent of every job node.
    pub fn jobs(&self) -> String {
        join_path(&self.base, &[JOBS])
    }

    /// Parent of every presence node.
    pub fn nodes(&self) -> String {
        join_path(&self.base, &[NODES])
    }

    /// Parent of the presence nodes of `hostname`.
    pub fn node(&self, hostname: &str) -> String {
        join_path(&self.base, &[NODES, hostname])
    }

    /// Presence node of one guardian on `hostname`.
    pub fn presence(&self, hostname: &str, guardian: &str) -> String {
        join_path(&self.base, &[NODES, hostname, guardian])
    }

    /// Node holding every domain of `job_id`.
    pub fn job(&self, job_id: &str) -> String {
        join_path(&self.base, &[JOBS, job_id])
    }

    /// Lease path of `job_id` in `domain`.
    pub fn lease(&self, job_id: &str, domain: &str) -> String {
        join_path(&self.base, &[JOBS, job_id, domain])
    }

    /// Descriptor path of `job_id` in `domain`.
    pub fn description(&self, job_id: &str, domain: &str) -> String {
        join_path(&self.base, &[JOBS, job_id, domain, DESCRIPTION])
    }

    /// Lock guarding the descriptor of `job_id` in `domain`.
    pub fn description_lock(&self, job_id: &str, domain: &str) -> String {
        join_path(&self.base, &[JOBS, job_id, domain, DESCRIPTION_LOCK])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_store_tree() {
        let ns = Namespace::new("jobguard");
        assert_eq!(ns.jobs(), "/jobguard/jobs");
        assert_eq!(ns.node("host-a"), "/jobguard/nodes/host-a");
        assert_eq!(ns.presence("host-a", "42-0"), "/jobguard/nodes/host-a/42-0");
        assert_eq!(ns.job("foo"), "/jobguard/jobs/foo");
        assert_eq!(ns.lease("foo", "job-action"), "/jobguard/jobs/foo/job-action");
        assert_eq!(
            ns.description("foo", "job-action"),
            "/jobguard/jobs/foo/job-action/description"
        );
        assert_eq!(
            ns.description_lock("foo", "scheduler-action"),
            "/jobguard/jobs/foo/scheduler-action/description--lock"
        );
    }

    #[test]
    fn surrounding_slashes_are_ignored() {
        assert_eq!(Namespace::new("/prelert/").jobs(), "/prelert/jobs");
    }
}
