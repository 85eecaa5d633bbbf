//! Per-policy verdicts.
//!
//! A policy is violated when, after some untrusted code touched a sensitive
//! API (the *tainting* access), untrusted code also reached the network.
//! Three kinds of evidence count, and the one with the lowest event id wins:
//!
//! 1. a later request from the same policy with an untrusted initiator stack
//! 2. a later `exfiltration_*` probe access with an untrusted stack
//! 3. the first request of any other policy (a tab the page opened) whose
//!    stack is untrusted under this policy's latest snapshot

use exfil_core::PolicyId;
use exfil_events::{Entry, EventLog, RequestWillBeSent};
use exfil_policy::PolicyState;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// API name prefix of the synthetic exfiltration probes.
pub const PROBE_PREFIX: &str = "exfiltration_";

/// Outcome for one policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyAnalysis {
    /// Policy analyzed.
    pub policy_id: PolicyId,
    /// Document URL of the policy's first request. Empty when it made none.
    pub description: String,
    /// Whether tainted code reached the network.
    pub policy_violated: bool,
    /// API of the tainting access, if any.
    #[serde(rename = "TaintingAPIName")]
    pub tainting_api_name: String,
    /// Resource type of the violating request.
    pub req_resource_type: String,
    /// URL of the violating request. Empty for probe violations.
    #[serde(rename = "ReqURL")]
    pub req_url: String,
    /// Initiator type of the violating request.
    pub req_initiator: String,
    /// Script ids on the violating stack, innermost first.
    pub req_stack_scripts: Vec<String>,
    /// Event id of the violating evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_event_id: Option<u64>,
}

struct Violation {
    event_id: u64,
    resource_type: String,
    url: String,
    initiator: String,
    stack_scripts: Vec<String>,
}

impl Violation {
    fn from_request(req: &Entry<'_, RequestWillBeSent>, stack_scripts: Vec<String>) -> Self {
        Self {
            event_id: req.event_id(),
            resource_type: req.resource_type.clone(),
            url: req.request.url.clone(),
            initiator: req.initiator.kind.clone(),
            stack_scripts,
        }
    }
}

fn is_probe(api_name: &str) -> bool {
    api_name.starts_with(PROBE_PREFIX)
}

/// True when `event_id` would beat the current finding.
fn beats(found: Option<&Violation>, event_id: u64) -> bool {
    found.is_none_or(|v| event_id < v.event_id)
}

/// Initiator script ids of `req` when they are not all trusted by `state`.
fn untrusted_initiator(req: &RequestWillBeSent, state: &PolicyState) -> Option<Vec<String>> {
    let ids = req.initiator.stack_trace.as_ref()?.script_ids();
    if state.stack_is_trusted(&ids) {
        return None;
    }
    Some(ids)
}

/// Decide whether `policy_id` was violated. Reads only `log`.
pub fn analyze_policy(log: &EventLog, policy_id: &PolicyId) -> PolicyAnalysis {
    let mut analysis = PolicyAnalysis {
        policy_id: policy_id.clone(),
        ..PolicyAnalysis::default()
    };

    let requests = log.network_request_will_be_sent(policy_id);
    let Some(first) = requests.first() else {
        return analysis;
    };
    analysis.description = first.document_url.clone();

    let accesses = log.api_access(policy_id);
    let Some(tainting) = accesses
        .iter()
        .find(|a| !is_probe(&a.api_name) && !a.policy_state.stack_is_trusted(&a.script_id_stack))
    else {
        return analysis;
    };
    analysis.tainting_api_name = tainting.api_name.clone();
    let taint_id = tainting.event_id();
    debug!(policy_id = %policy_id, api = %tainting.api_name, event_id = taint_id, "tainted");

    let mut found: Option<Violation> = requests
        .iter()
        .filter(|r| r.event_id() > taint_id)
        .find_map(|r| {
            let ids = untrusted_initiator(r, &r.policy_state)?;
            for id in &ids {
                if r.policy_state.trust_group_state_for_script_id(id).is_none() {
                    debug!(script_id = %id, event_id = r.event_id(), "unknown script on request stack");
                }
            }
            Some(Violation::from_request(r, ids))
        });

    let probe = accesses.iter().find(|a| {
        is_probe(&a.api_name)
            && a.event_id() > taint_id
            && beats(found.as_ref(), a.event_id())
            && !a.policy_state.stack_is_trusted(&a.script_id_stack)
    });
    if let Some(probe) = probe {
        found = Some(Violation {
            event_id: probe.event_id(),
            resource_type: "Document".to_owned(),
            url: String::new(),
            initiator: "script".to_owned(),
            stack_scripts: probe.script_id_stack.clone(),
        });
    }

    // `tainting` exists, so there is a latest snapshot.
    if let Some(latest) = accesses.last() {
        for other in log.policy_ids() {
            if other == *policy_id {
                continue;
            }
            let other_requests = log.network_request_will_be_sent(&other);
            let Some(opener) = other_requests.first() else {
                continue;
            };
            if opener.event_id() <= taint_id || !beats(found.as_ref(), opener.event_id()) {
                continue;
            }
            if let Some(ids) = untrusted_initiator(opener, &latest.policy_state) {
                debug!(policy_id = %policy_id, other = %other, event_id = opener.event_id(), "cross-target request");
                found = Some(Violation::from_request(opener, ids));
            }
        }
    }

    if let Some(v) = found {
        analysis.policy_violated = true;
        analysis.req_resource_type = v.resource_type;
        analysis.req_url = v.url;
        analysis.req_initiator = v.initiator;
        analysis.req_stack_scripts = v.stack_scripts;
        analysis.violation_event_id = Some(v.event_id);
    }
    analysis
}
