//! The canned trust policy shapes a run can be configured with.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which policy shape each new navigation gets.
///
/// Serialized by name (`"hostname"`); the numeric form (`2`) is also
/// accepted when reading configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PolicyKindRepr")]
pub enum PolicyKind {
    /// One universal trusted group.
    #[default]
    Trusting,
    /// One universal untrusted group.
    Untrusting,
    /// Scripts from the page's own origin are trusted, everything else is not.
    Hostname,
    /// Scripts matching ad/tracker filter lists are untrusted, everything else is trusted.
    FilterList,
}

impl PolicyKind {
    /// All kinds in numeric order.
    pub const ALL: [Self; 4] = [
        Self::Trusting,
        Self::Untrusting,
        Self::Hostname,
        Self::FilterList,
    ];

    /// Numeric index used by the legacy integer form.
    pub fn index(self) -> u8 {
        match self {
            Self::Trusting => 0,
            Self::Untrusting => 1,
            Self::Hostname => 2,
            Self::FilterList => 3,
        }
    }

    /// Kind for a legacy integer, if in range.
    pub fn from_index(index: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| u64::from(k.index()) == index)
    }

    /// Human-readable summary of what the kind trusts.
    pub fn description(self) -> &'static str {
        match self {
            Self::Trusting => "Trust everything",
            Self::Untrusting => "Trust nothing",
            Self::Hostname => "Trust hostname matching page origin",
            Self::FilterList => "Distrust ad/analytics scripts",
        }
    }

    /// Name used in configuration and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trusting => "trusting",
            Self::Untrusting => "untrusting",
            Self::Hostname => "hostname",
            Self::FilterList => "filterList",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Policy {}: {}", self.index(), self.description())
    }
}

/// Returned when a string names no policy kind.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("bad policy type '{0}': expected one of trusting, untrusting, hostname, filterList or 0-3")]
pub struct ParsePolicyKindError(pub String);

impl FromStr for PolicyKind {
    type Err = ParsePolicyKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u64>() {
            return Self::from_index(n).ok_or_else(|| ParsePolicyKindError(s.to_owned()));
        }
        let lowered = s.to_ascii_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().to_ascii_lowercase() == lowered)
            .ok_or_else(|| ParsePolicyKindError(s.to_owned()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyKindRepr {
    Index(u64),
    Name(String),
}

impl TryFrom<PolicyKindRepr> for PolicyKind {
    type Error = ParsePolicyKindError;

    fn try_from(repr: PolicyKindRepr) -> Result<Self, Self::Error> {
        match repr {
            PolicyKindRepr::Index(n) => {
                Self::from_index(n).ok_or_else(|| ParsePolicyKindError(n.to_string()))
            }
            PolicyKindRepr::Name(s) => s.parse(),
        }
    }
}
