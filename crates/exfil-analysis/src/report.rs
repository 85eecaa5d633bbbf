//! Verdicts for a whole run.

use exfil_core::PolicyId;
use exfil_events::EventLog;
use tracing::info;

use crate::verdict::{PolicyAnalysis, analyze_policy};

/// Pages whose policies carry no experimental signal: the harness's own
/// pages and browser-internal ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgnoredPages {
    home: String,
    launch: String,
    event_log: String,
}

impl IgnoredPages {
    /// Pages served from `web_server_root` (e.g. `http://localhost:8888`).
    pub fn new(web_server_root: &str) -> Self {
        let root = web_server_root.trim_end_matches('/');
        Self {
            home: format!("{root}/"),
            launch: format!("{root}/launched"),
            event_log: format!("{root}/event_log"),
        }
    }

    /// Whether a policy described by `description` should be dropped.
    pub fn is_ignored(&self, description: &str) -> bool {
        description.is_empty()
            || description == self.home
            || description == self.launch
            || description.starts_with(&self.event_log)
            || description.starts_with("chrome")
    }
}

/// Analyze each of `policy_ids` in order, dropping ignored pages.
pub fn analyze_logs(log: &EventLog, policy_ids: &[PolicyId], ignored: &IgnoredPages) -> Vec<PolicyAnalysis> {
    let results: Vec<PolicyAnalysis> = policy_ids
        .iter()
        .map(|pid| analyze_policy(log, pid))
        .filter(|pa| !ignored.is_ignored(&pa.description))
        .collect();
    let violated = results.iter().filter(|pa| pa.policy_violated).count();
    info!(policies = results.len(), violated, "analysis complete");
    results
}

/// [`analyze_logs`] over every policy that appears in `log`.
pub fn analyze_all(log: &EventLog, ignored: &IgnoredPages) -> Vec<PolicyAnalysis> {
    analyze_logs(log, &log.policy_ids(), ignored)
}
