//! Trust groups and policies.
//!
//! A [`Policy`] is an ordered list of [`TrustGroup`]s. A new script goes to
//! the first group that accepts it, unless it was created by a script already
//! sitting in an untrusted group, in which case it inherits that group.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use exfil_core::{PolicyId, StackTrace};

use crate::filter_list::FilterListMatcher;
use crate::script_set::ScriptSet;
use crate::state::{PolicyState, TrustGroupState};

/// A bucket of scripts sharing one trust verdict.
#[derive(Clone, Debug)]
pub struct TrustGroup {
    trusted: bool,
    scripts: ScriptSet,
}

impl TrustGroup {
    /// A group with no scripts yet.
    pub fn new(trusted: bool, scripts: ScriptSet) -> Self {
        Self { trusted, scripts }
    }

    /// Whether scripts in this group are trusted.
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Membership test and registered scripts.
    pub fn scripts(&self) -> &ScriptSet {
        &self.scripts
    }

    fn state(&self) -> TrustGroupState {
        TrustGroupState {
            trusted: self.trusted,
            remote_scripts: self.scripts.remote_scripts().to_vec(),
            inline_scripts: self.scripts.inline_scripts().to_vec(),
        }
    }
}

/// An evaluation-ordered list of trust groups.
#[derive(Clone, Debug)]
pub struct Policy {
    id: PolicyId,
    groups: Vec<TrustGroup>,
}

enum ScriptRef<'a> {
    Remote { url: &'a str },
    Inline { hash: &'a str },
}

impl Policy {
    /// A policy with a fresh random id.
    pub fn new(groups: Vec<TrustGroup>) -> Self {
        Self::with_id(PolicyId::generate(), groups)
    }

    /// A policy with a caller-chosen id.
    pub fn with_id(id: PolicyId, groups: Vec<TrustGroup>) -> Self {
        Self { id, groups }
    }

    /// One universal trusted group.
    pub fn trusting() -> Self {
        Self::new(vec![TrustGroup::new(true, ScriptSet::universal())])
    }

    /// One universal untrusted group.
    pub fn untrusting() -> Self {
        Self::new(vec![TrustGroup::new(false, ScriptSet::universal())])
    }

    /// Trusted scripts from `origins`, everything else untrusted.
    pub fn hostname(origins: Vec<String>) -> Self {
        Self::new(vec![
            TrustGroup::new(true, ScriptSet::hostname(origins)),
            TrustGroup::new(false, ScriptSet::universal()),
        ])
    }

    /// Block-listed scripts untrusted, everything else trusted.
    pub fn filter_list(matcher: Arc<FilterListMatcher>) -> Self {
        Self::new(vec![
            TrustGroup::new(false, ScriptSet::filter_list(matcher)),
            TrustGroup::new(true, ScriptSet::universal()),
        ])
    }

    /// This policy's id.
    pub fn id(&self) -> &PolicyId {
        &self.id
    }

    /// Groups in evaluation order.
    pub fn groups(&self) -> &[TrustGroup] {
        &self.groups
    }

    /// Assign a remote script to a group.
    ///
    /// Returns the receiving group, or `None` when no group accepts it. An
    /// unassigned script is held by no group.
    pub fn register_remote_script(
        &mut self,
        script_id: &str,
        url: &str,
        stack: Option<&StackTrace>,
    ) -> Option<&TrustGroup> {
        self.register(script_id, &ScriptRef::Remote { url }, stack)
    }

    /// Assign an inline script to a group. See [`register_remote_script`](Self::register_remote_script).
    pub fn register_inline_script(
        &mut self,
        script_id: &str,
        hash: &str,
        stack: Option<&StackTrace>,
    ) -> Option<&TrustGroup> {
        self.register(script_id, &ScriptRef::Inline { hash }, stack)
    }

    fn register(
        &mut self,
        script_id: &str,
        script: &ScriptRef<'_>,
        stack: Option<&StackTrace>,
    ) -> Option<&TrustGroup> {
        let idx = stack
            .and_then(|st| self.inherited_group(st))
            .or_else(|| {
                self.groups.iter().position(|g| match *script {
                    ScriptRef::Remote { url } => g.scripts.contains_remote_script(script_id, url),
                    ScriptRef::Inline { hash } => g.scripts.contains_inline_script(script_id, hash),
                })
            })?;

        let group = &mut self.groups[idx];
        match *script {
            ScriptRef::Remote { url } => group.scripts.add_remote_script(script_id, url),
            ScriptRef::Inline { hash } => group.scripts.add_inline_script(script_id, hash),
        }
        Some(&self.groups[idx])
    }

    /// First untrusted group holding a script anywhere on the creating stack,
    /// walking from the innermost frame out through async parents.
    fn inherited_group(&self, stack: &StackTrace) -> Option<usize> {
        let mut node = Some(stack);
        while let Some(st) = node {
            for frame in &st.call_frames {
                if let Some(idx) = self.group_index_for_script_id(&frame.script_id) {
                    if !self.groups[idx].trusted {
                        return Some(idx);
                    }
                }
            }
            node = st.parent.as_deref();
        }
        None
    }

    fn group_index_for_script_id(&self, script_id: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.scripts.has_script(script_id))
    }

    /// Group holding `script_id`, if any.
    pub fn trust_group_for_script_id(&self, script_id: &str) -> Option<&TrustGroup> {
        self.group_index_for_script_id(script_id)
            .map(|idx| &self.groups[idx])
    }

    /// Ids of every script in the first trusted group: remote, then inline.
    pub fn trusted_script_ids(&self) -> Vec<String> {
        let Some(group) = self.groups.iter().find(|g| g.trusted) else {
            return Vec::new();
        };
        group
            .scripts
            .remote_scripts()
            .iter()
            .map(|s| s.script_id.clone())
            .chain(
                group
                    .scripts
                    .inline_scripts()
                    .iter()
                    .map(|s| s.script_id.clone()),
            )
            .collect()
    }

    /// [`trusted_script_ids`](Self::trusted_script_ids) paired with the URL
    /// page code sees for each one. Inline scripts pair with an empty string,
    /// as do remote URLs an untrusted script was also loaded from.
    pub fn trusted_script_urls(&self) -> Vec<(String, String)> {
        let Some(group) = self.groups.iter().find(|g| g.trusted) else {
            return Vec::new();
        };
        let untrusted_urls: HashSet<&str> = self
            .groups
            .iter()
            .filter(|g| !g.trusted)
            .flat_map(|g| g.scripts.remote_scripts())
            .map(|s| s.url.as_str())
            .collect();
        group
            .scripts
            .remote_scripts()
            .iter()
            .map(|s| {
                let url = if untrusted_urls.contains(s.url.as_str()) {
                    String::new()
                } else {
                    s.url.clone()
                };
                (s.script_id.clone(), url)
            })
            .chain(
                group
                    .scripts
                    .inline_scripts()
                    .iter()
                    .map(|s| (s.script_id.clone(), String::new())),
            )
            .collect()
    }

    /// Deep snapshot for embedding in events.
    pub fn state(&self) -> PolicyState {
        PolicyState {
            policy_id: self.id.clone(),
            trust_groups: self.groups.iter().map(TrustGroup::state).collect(),
            captured_at: Some(Utc::now()),
        }
    }
}
