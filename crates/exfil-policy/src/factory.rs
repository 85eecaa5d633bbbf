//! Builds a fresh policy for each top-level navigation.

use std::path::PathBuf;
use std::sync::Arc;

use exfil_core::PolicyKind;
use tracing::warn;

use crate::errors::PolicyError;
use crate::filter_list::FilterListMatcher;
use crate::policy::Policy;
use crate::script_set::origin_of;

/// Creates policies of one configured kind.
#[derive(Clone, Debug)]
pub struct PolicyFactory {
    kind: PolicyKind,
    matcher: Arc<FilterListMatcher>,
}

impl PolicyFactory {
    /// A factory for `kind`. Filter lists are loaded (once per process) only
    /// for [`PolicyKind::FilterList`].
    pub fn new(kind: PolicyKind, filter_lists: &[PathBuf]) -> Result<Self, PolicyError> {
        let matcher = match kind {
            PolicyKind::FilterList => FilterListMatcher::shared(filter_lists)?,
            _ => Arc::new(FilterListMatcher::default()),
        };
        Ok(Self { kind, matcher })
    }

    /// A factory using an already-built matcher.
    pub fn with_matcher(kind: PolicyKind, matcher: Arc<FilterListMatcher>) -> Self {
        Self { kind, matcher }
    }

    /// The configured kind.
    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    /// A new policy for a document at `page_url`.
    pub fn create(&self, page_url: &str) -> Policy {
        match self.kind {
            PolicyKind::Trusting => Policy::trusting(),
            PolicyKind::Untrusting => Policy::untrusting(),
            PolicyKind::Hostname => {
                let origins = match origin_of(page_url) {
                    Some(origin) => vec![origin],
                    None => {
                        warn!(url = page_url, "page URL has no origin, trusting no remote scripts");
                        Vec::new()
                    }
                };
                Policy::hostname(origins)
            }
            PolicyKind::FilterList => Policy::filter_list(Arc::clone(&self.matcher)),
        }
    }
}
