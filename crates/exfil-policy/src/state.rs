//! Read-only policy snapshots embedded in logged events.
//!
//! A [`PolicyState`] is a value copy of a policy's group membership at the
//! moment an event was recorded, so later analysis never consults live
//! policies.

use chrono::{DateTime, Utc};
use exfil_core::PolicyId;
use serde::{Deserialize, Serialize};

use crate::script_set::{InlineScript, RemoteScript};

/// Snapshot of a whole policy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyState {
    /// Policy the snapshot was taken from.
    pub policy_id: PolicyId,
    /// Groups in evaluation order.
    pub trust_groups: Vec<TrustGroupState>,
    /// When the snapshot was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
}

/// Snapshot of one trust group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrustGroupState {
    /// Whether scripts in this group are trusted.
    pub trusted: bool,
    /// Remote scripts assigned to the group.
    #[serde(default)]
    pub remote_scripts: Vec<RemoteScript>,
    /// Inline scripts assigned to the group.
    #[serde(default)]
    pub inline_scripts: Vec<InlineScript>,
}

impl TrustGroupState {
    /// Whether the group holds a script with this id.
    pub fn has_script(&self, script_id: &str) -> bool {
        self.remote_scripts.iter().any(|s| s.script_id == script_id)
            || self.inline_scripts.iter().any(|s| s.script_id == script_id)
    }
}

impl PolicyState {
    /// The group holding `script_id`, if any.
    pub fn trust_group_state_for_script_id(&self, script_id: &str) -> Option<&TrustGroupState> {
        self.trust_groups.iter().find(|g| g.has_script(script_id))
    }

    /// True iff every script in the stack belongs to a trusted group.
    ///
    /// A script no group holds makes the stack untrusted. An empty stack is
    /// trusted.
    pub fn stack_is_trusted<I, S>(&self, script_ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        script_ids.into_iter().all(|id| {
            self.trust_group_state_for_script_id(id.as_ref())
                .is_some_and(|g| g.trusted)
        })
    }
}
