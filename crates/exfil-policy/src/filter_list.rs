//! Ad/tracker block-list matching for script URLs.
//!
//! Rules use the Adblock Plus syntax and are evaluated by [`adblock::Engine`],
//! with every lookup made as a `script` request with no source page.
//!
//! The engine is expensive to build and immutable afterwards. [`FilterListMatcher::shared`]
//! builds it once per process and hands out the same [`Arc`] to every caller.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use adblock::Engine;
use adblock::lists::ParseOptions;
use adblock::request::Request;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::errors::PolicyError;

static SHARED: OnceLock<Arc<FilterListMatcher>> = OnceLock::new();
static SHARED_INIT: Mutex<()> = parking_lot::const_mutex(());

/// Compiled block and exception rules.
pub struct FilterListMatcher {
    engine: Mutex<Engine>,
    lines: usize,
}

impl FilterListMatcher {
    /// Build a matcher from filter list text.
    pub fn parse(text: &str) -> Self {
        Self::from_lines(text.lines().map(str::to_owned).collect())
    }

    /// Build a matcher from the concatenation of several list files.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, PolicyError> {
        let mut rules = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path).map_err(|source| {
                PolicyError::FilterListRead {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            rules.extend(text.lines().map(str::to_owned));
        }
        let matcher = Self::from_lines(rules);
        info!(lists = paths.len(), lines = matcher.lines, "filter lists loaded");
        Ok(matcher)
    }

    fn from_lines(rules: Vec<String>) -> Self {
        let lines = rules.len();
        Self {
            engine: Mutex::new(Engine::from_rules(rules, ParseOptions::default())),
            lines,
        }
    }

    /// The process-wide matcher, built from `paths` on first call.
    ///
    /// Later calls return the same instance regardless of `paths`. A failed
    /// build leaves the slot empty so a later call can retry.
    pub fn shared(paths: &[PathBuf]) -> Result<Arc<Self>, PolicyError> {
        if let Some(m) = SHARED.get() {
            return Ok(Arc::clone(m));
        }
        let _guard = SHARED_INIT.lock();
        if let Some(m) = SHARED.get() {
            return Ok(Arc::clone(m));
        }
        let matcher = Arc::new(Self::from_files(paths)?);
        let _ = SHARED.set(Arc::clone(&matcher));
        Ok(matcher)
    }

    /// Whether a script at `url` is blocked by the lists. URLs the engine
    /// cannot parse never match.
    pub fn matches(&self, url: &str) -> bool {
        let request = match Request::new(url, "", "script") {
            Ok(request) => request,
            Err(e) => {
                debug!(url, error = ?e, "unmatchable script URL");
                return false;
            }
        };
        self.engine.lock().check_network_request(&request).matched
    }

    /// Number of list lines the engine was built from.
    pub fn line_count(&self) -> usize {
        self.lines
    }
}

impl Default for FilterListMatcher {
    fn default() -> Self {
        Self::from_lines(Vec::new())
    }
}

impl fmt::Debug for FilterListMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterListMatcher")
            .field("lines", &self.lines)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
[Adblock Plus 2.0]
! Title: test list
||ads.example^
||tracker.net/collect/
||cdn.example/lib/ads.js$script
||images.example^$image
@@||ads.example/allowed/
example.com##.ad-banner
";

    fn matcher() -> FilterListMatcher {
        FilterListMatcher::parse(LIST)
    }

    #[test]
    fn domain_anchor_matches_host_and_subdomains() {
        let m = matcher();
        assert!(m.matches("https://ads.example/x.js"));
        assert!(m.matches("http://static.ads.example/y.js"));
        assert!(!m.matches("https://notads.example/x.js"));
        assert!(!m.matches("https://example.com/ads.example/x.js"));
    }

    #[test]
    fn path_rules() {
        let m = matcher();
        assert!(m.matches("https://tracker.net/collect/v2/t.js"));
        assert!(!m.matches("https://tracker.net/other/t.js"));
    }

    #[test]
    fn type_options_restrict_to_scripts() {
        let m = matcher();
        assert!(m.matches("https://cdn.example/lib/ads.js"));
        assert!(!m.matches("https://images.example/a.js"));
    }

    #[test]
    fn exceptions_override_blocks() {
        let m = matcher();
        assert!(!m.matches("https://ads.example/allowed/ok.js"));
        assert!(m.matches("https://ads.example/denied/no.js"));
    }

    #[test]
    fn unparseable_urls_never_match() {
        assert!(!matcher().matches("not a url"));
        assert!(!FilterListMatcher::default().matches("https://ads.example/x.js"));
    }

    #[test]
    fn from_files_concatenates_lists() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "||one.example^\n").unwrap();
        std::fs::write(&b, "||two.example^\n").unwrap();
        let m = FilterListMatcher::from_files(&[a, b]).unwrap();
        assert!(m.matches("https://one.example/a.js"));
        assert!(m.matches("https://two.example/a.js"));
        assert_eq!(m.line_count(), 2);
    }

    #[test]
    fn from_files_reports_missing_list() {
        let err = FilterListMatcher::from_files(&[PathBuf::from("/nonexistent/list.txt")])
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/list.txt"));
    }

    #[test]
    fn shared_returns_one_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        std::fs::write(&path, "||shared.example^\n").unwrap();
        let first = FilterListMatcher::shared(&[path.clone()]).unwrap();
        let second = FilterListMatcher::shared(&[]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
