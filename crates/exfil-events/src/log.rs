//! Append-only event log.

use std::collections::HashSet;
use std::path::Path;

use exfil_core::PolicyId;
use tracing::info;

use crate::errors::EventLogError;
use crate::types::{
    ApiAccess, Event, EventHeader, EventKind, PageLifecycle, RequestIntercepted,
    RequestWillBeSent, ScriptParsed,
};

/// A logged payload together with its header.
#[derive(Clone, Copy, Debug)]
pub struct Entry<'a, T> {
    /// Header of the event.
    pub header: &'a EventHeader,
    /// Typed payload.
    pub payload: &'a T,
}

impl<T> Entry<'_, T> {
    /// Shorthand for `header.event_id()`.
    pub fn event_id(&self) -> u64 {
        self.header.event_id()
    }
}

impl<T> std::ops::Deref for Entry<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.payload
    }
}

/// Ordered events of one session. [`append`](Self::append) is the only
/// mutation and the only place event ids are assigned.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
    next_event_id: u64,
}

impl EventLog {
    /// An empty log. The first appended event gets id `0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted events, keeping their ids.
    pub fn from_events(events: Vec<Event>) -> Self {
        let next_event_id = events.iter().map(|e| e.event_id() + 1).max().unwrap_or(0);
        Self {
            events,
            next_event_id,
        }
    }

    /// Stamp `event` with the next id and append it. Returns the id.
    pub fn append(&mut self, mut event: Event) -> u64 {
        let id = self.next_event_id;
        event.header.event_id = id;
        self.events.push(event);
        self.next_event_id += 1;
        id
    }

    /// All events in log order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct policy ids in order of first appearance.
    pub fn policy_ids(&self) -> Vec<PolicyId> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .filter(|e| seen.insert(e.policy_id()))
            .map(|e| e.policy_id().clone())
            .collect()
    }

    fn of_kind<'a, T>(
        &'a self,
        policy_id: &PolicyId,
        select: impl Fn(&'a EventKind) -> Option<&'a T>,
    ) -> Vec<Entry<'a, T>> {
        self.events
            .iter()
            .filter(|e| e.policy_id() == policy_id)
            .filter_map(|e| {
                select(&e.kind).map(|payload| Entry {
                    header: &e.header,
                    payload,
                })
            })
            .collect()
    }

    /// `NetworkRequestIntercepted` events of a policy, in log order.
    pub fn network_request_intercepted(&self, policy_id: &PolicyId) -> Vec<Entry<'_, RequestIntercepted>> {
        self.of_kind(policy_id, |k| match k {
            EventKind::NetworkRequestIntercepted(p) => Some(p),
            _ => None,
        })
    }

    /// `NetworkRequestWillBeSent` events of a policy, in log order.
    pub fn network_request_will_be_sent(&self, policy_id: &PolicyId) -> Vec<Entry<'_, RequestWillBeSent>> {
        self.of_kind(policy_id, |k| match k {
            EventKind::NetworkRequestWillBeSent(p) => Some(p),
            _ => None,
        })
    }

    /// `APIAccess` events of a policy, in log order.
    pub fn api_access(&self, policy_id: &PolicyId) -> Vec<Entry<'_, ApiAccess>> {
        self.of_kind(policy_id, |k| match k {
            EventKind::ApiAccess(p) => Some(p),
            _ => None,
        })
    }

    /// `DebuggerScriptParsed` events of a policy, in log order.
    pub fn script_parsed(&self, policy_id: &PolicyId) -> Vec<Entry<'_, ScriptParsed>> {
        self.of_kind(policy_id, |k| match k {
            EventKind::DebuggerScriptParsed(p) => Some(p),
            _ => None,
        })
    }

    /// `PageLifecycleEvent` events of a policy, in log order.
    pub fn page_lifecycle(&self, policy_id: &PolicyId) -> Vec<Entry<'_, PageLifecycle>> {
        self.of_kind(policy_id, |k| match k {
            EventKind::PageLifecycle(p) => Some(p),
            _ => None,
        })
    }

    /// Indented JSON array of every event.
    pub fn to_json_pretty(&self) -> Result<String, EventLogError> {
        Ok(serde_json::to_string_pretty(&self.events)?)
    }

    /// Write the log to `path`, creating parent directories.
    pub fn write_to_file(&self, path: &Path) -> Result<(), EventLogError> {
        let io_err = |source| EventLogError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = self.to_json_pretty()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, json).map_err(io_err)?;
        info!(path = %path.display(), events = self.events.len(), "event log written");
        Ok(())
    }

    /// Load a log written by [`write_to_file`](Self::write_to_file).
    pub fn read_from_file(path: &Path) -> Result<Self, EventLogError> {
        let text = std::fs::read_to_string(path).map_err(|source| EventLogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let events: Vec<Event> = serde_json::from_str(&text)?;
        Ok(Self::from_events(events))
    }
}
