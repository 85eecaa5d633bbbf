//! Script-set membership tests and the scripts registered against them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::filter_list::FilterListMatcher;

/// A script loaded from a URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteScript {
    /// Debugger script id.
    pub script_id: String,
    /// Source URL.
    #[serde(rename = "URL")]
    pub url: String,
}

/// A script embedded in a document or created from a string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InlineScript {
    /// Debugger script id.
    pub script_id: String,
    /// Content hash reported by the debugger.
    pub hash: String,
}

/// How a [`ScriptSet`] decides whether it accepts a script.
#[derive(Clone, Debug)]
pub enum Membership {
    /// Accepts every script.
    Universal,
    /// Accepts remote scripts served from one of these `scheme://host` origins,
    /// and every inline script.
    Hostname(Vec<String>),
    /// Accepts remote scripts the block-lists match. Never accepts inline scripts.
    FilterList(Arc<FilterListMatcher>),
}

/// Membership test plus the scripts that have been assigned to it.
///
/// Registered scripts are never mutated or removed.
#[derive(Clone, Debug)]
pub struct ScriptSet {
    membership: Membership,
    remote: Vec<RemoteScript>,
    inline: Vec<InlineScript>,
}

impl ScriptSet {
    /// An empty set with the given membership test.
    pub fn new(membership: Membership) -> Self {
        Self {
            membership,
            remote: Vec::new(),
            inline: Vec::new(),
        }
    }

    /// Accepts everything.
    pub fn universal() -> Self {
        Self::new(Membership::Universal)
    }

    /// Accepts remote scripts from `origins`.
    pub fn hostname(origins: Vec<String>) -> Self {
        Self::new(Membership::Hostname(origins))
    }

    /// Accepts remote scripts matched by `matcher`.
    pub fn filter_list(matcher: Arc<FilterListMatcher>) -> Self {
        Self::new(Membership::FilterList(matcher))
    }

    /// The membership test.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Whether a remote script at `url` belongs here.
    pub fn contains_remote_script(&self, _script_id: &str, url: &str) -> bool {
        match &self.membership {
            Membership::Universal => true,
            Membership::Hostname(origins) => {
                origin_of(url).is_some_and(|o| origins.iter().any(|h| *h == o))
            }
            Membership::FilterList(matcher) => matcher.matches(url),
        }
    }

    /// Whether an inline script belongs here.
    pub fn contains_inline_script(&self, _script_id: &str, _hash: &str) -> bool {
        match &self.membership {
            Membership::Universal | Membership::Hostname(_) => true,
            Membership::FilterList(_) => false,
        }
    }

    /// Record a remote script.
    pub fn add_remote_script(&mut self, script_id: &str, url: &str) {
        self.remote.push(RemoteScript {
            script_id: script_id.to_owned(),
            url: url.to_owned(),
        });
    }

    /// Record an inline script.
    pub fn add_inline_script(&mut self, script_id: &str, hash: &str) {
        self.inline.push(InlineScript {
            script_id: script_id.to_owned(),
            hash: hash.to_owned(),
        });
    }

    /// Remote scripts in registration order.
    pub fn remote_scripts(&self) -> &[RemoteScript] {
        &self.remote
    }

    /// Inline scripts in registration order.
    pub fn inline_scripts(&self) -> &[InlineScript] {
        &self.inline
    }

    /// Whether a script with this id has been registered here.
    pub fn has_script(&self, script_id: &str) -> bool {
        self.remote.iter().any(|s| s.script_id == script_id)
            || self.inline.iter().any(|s| s.script_id == script_id)
    }
}

/// `scheme://host[:port]` of a URL, or `None` if it does not parse.
///
/// Default ports are dropped, so `https://a.example:443/x` and
/// `https://a.example/x` share an origin.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str().unwrap_or_default();
    Some(match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universal_accepts_everything() {
        let s = ScriptSet::universal();
        assert!(s.contains_remote_script("1", "https://anything.example/x.js"));
        assert!(s.contains_remote_script("1", "not a url"));
        assert!(s.contains_inline_script("2", "abc"));
    }

    #[test]
    fn hostname_matches_origin_only() {
        let s = ScriptSet::hostname(vec!["https://a.example".into()]);
        assert!(s.contains_remote_script("1", "https://a.example/lib/app.js?v=1"));
        assert!(!s.contains_remote_script("1", "http://a.example/app.js"));
        assert!(!s.contains_remote_script("1", "https://b.example/app.js"));
        assert!(!s.contains_remote_script("1", "https://sub.a.example/app.js"));
        assert!(!s.contains_remote_script("1", "::garbage"));
        assert!(s.contains_inline_script("2", "h"));
    }

    #[test]
    fn hostname_respects_explicit_ports() {
        let s = ScriptSet::hostname(vec!["http://localhost:8888".into()]);
        assert!(s.contains_remote_script("1", "http://localhost:8888/a.js"));
        assert!(!s.contains_remote_script("1", "http://localhost:9999/a.js"));
    }

    #[test]
    fn filter_list_never_accepts_inline() {
        let m = Arc::new(FilterListMatcher::parse("||ads.example^\n"));
        let s = ScriptSet::filter_list(m);
        assert!(s.contains_remote_script("1", "https://ads.example/a.js"));
        assert!(!s.contains_remote_script("1", "https://site.example/a.js"));
        assert!(!s.contains_inline_script("2", "h"));
    }

    #[test]
    fn registered_scripts_are_kept_in_order() {
        let mut s = ScriptSet::universal();
        s.add_remote_script("1", "https://a.example/a.js");
        s.add_inline_script("2", "h2");
        s.add_remote_script("3", "https://a.example/b.js");
        assert_eq!(s.remote_scripts().len(), 2);
        assert_eq!(s.remote_scripts()[1].script_id, "3");
        assert_eq!(s.inline_scripts()[0].hash, "h2");
        assert!(s.has_script("2"));
        assert!(!s.has_script("4"));
    }

    #[test]
    fn origin_of_drops_path_and_default_port() {
        assert_eq!(
            origin_of("https://a.example:443/x?y#z").as_deref(),
            Some("https://a.example")
        );
        assert_eq!(
            origin_of("http://localhost:8888/").as_deref(),
            Some("http://localhost:8888")
        );
        assert_eq!(origin_of("about:blank").as_deref(), Some("about://"));
        assert_eq!(origin_of(""), None);
    }
}
