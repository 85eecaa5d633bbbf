//! Event records.
//!
//! Every [`Event`] is a common [`EventHeader`] plus one of five payloads in
//! [`EventKind`]. On disk the two are flattened into one object with an
//! `EventType` tag:
//!
//! ```json
//! {
//!   "EventId": 4,
//!   "Timestamp": "2024-01-01T00:00:00Z",
//!   "PolicyId": "9f0c…",
//!   "TargetId": "A1B2…",
//!   "EventType": "APIAccess",
//!   "APIName": "document_cookie",
//!   "ScriptIdStack": ["31", "27"],
//!   "PolicyState": { … }
//! }
//! ```

use chrono::{DateTime, Utc};
use exfil_core::{Message, PolicyId, StackTrace, TargetId};
use exfil_policy::PolicyState;
use serde::{Deserialize, Serialize};

/// Fields shared by every event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventHeader {
    pub(crate) event_id: u64,
    /// When the underlying occurrence happened.
    pub timestamp: DateTime<Utc>,
    /// Policy active on the target at the time.
    pub policy_id: PolicyId,
    /// Target the event came from.
    pub target_id: TargetId,
}

impl EventHeader {
    /// Position in the global log order, assigned on append.
    pub fn event_id(&self) -> u64 {
        self.event_id
    }
}

/// One logged event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Common fields.
    #[serde(flatten)]
    pub header: EventHeader,
    /// Kind-specific payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// An event not yet in any log. Its id is assigned by [`EventLog::append`](crate::EventLog::append).
    pub fn new(
        policy_id: PolicyId,
        target_id: TargetId,
        timestamp: DateTime<Utc>,
        kind: impl Into<EventKind>,
    ) -> Self {
        Self {
            header: EventHeader {
                event_id: 0,
                timestamp,
                policy_id,
                target_id,
            },
            kind: kind.into(),
        }
    }

    /// Shorthand for `header.event_id()`.
    pub fn event_id(&self) -> u64 {
        self.header.event_id
    }

    /// Shorthand for `header.policy_id`.
    pub fn policy_id(&self) -> &PolicyId {
        &self.header.policy_id
    }

    /// The `EventType` tag written to disk.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            EventKind::NetworkRequestIntercepted(_) => "NetworkRequestIntercepted",
            EventKind::NetworkRequestWillBeSent(_) => "NetworkRequestWillBeSent",
            EventKind::ApiAccess(_) => "APIAccess",
            EventKind::DebuggerScriptParsed(_) => "DebuggerScriptParsed",
            EventKind::PageLifecycle(_) => "PageLifecycleEvent",
        }
    }
}

/// The five event payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "EventType")]
pub enum EventKind {
    /// A request paused by network interception.
    NetworkRequestIntercepted(RequestIntercepted),
    /// A request about to be sent, with its initiator.
    NetworkRequestWillBeSent(RequestWillBeSent),
    /// Page code touched an instrumented property.
    #[serde(rename = "APIAccess")]
    ApiAccess(ApiAccess),
    /// The debugger compiled a script.
    DebuggerScriptParsed(ScriptParsed),
    /// A page lifecycle milestone on a watched target.
    #[serde(rename = "PageLifecycleEvent")]
    PageLifecycle(PageLifecycle),
}

macro_rules! into_kind {
    ($($payload:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$payload> for EventKind {
                fn from(p: $payload) -> Self {
                    Self::$variant(p)
                }
            }
        )*
    };
}

into_kind! {
    RequestIntercepted => NetworkRequestIntercepted,
    RequestWillBeSent => NetworkRequestWillBeSent,
    ApiAccess => ApiAccess,
    ScriptParsed => DebuggerScriptParsed,
    PageLifecycle => PageLifecycle,
}

/// Payload of `NetworkRequestIntercepted`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestIntercepted {
    /// Frame issuing the request.
    pub frame_id: String,
    /// Resource type (`Document`, `Script`, ...).
    pub resource_type: String,
    /// Top-level navigation of the target.
    pub is_navigation_request: bool,
    /// Redirect target, when the interception is a redirect.
    #[serde(rename = "RedirectURL")]
    pub redirect_url: String,
    /// Request line details.
    pub request: NetworkRequest,
    /// Policy snapshot after any navigation reset.
    pub policy_state: PolicyState,
}

/// Payload of `NetworkRequestWillBeSent`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestWillBeSent {
    /// What caused the request.
    pub initiator: Initiator,
    /// Loader id.
    pub loader_id: String,
    /// Frame issuing the request.
    pub frame_id: String,
    /// Whether a user gesture triggered it.
    pub has_user_gesture: bool,
    /// Resource type (`Document`, `Script`, `XHR`, ...).
    pub resource_type: String,
    /// URL of the document issuing the request.
    #[serde(rename = "DocumentURL")]
    pub document_url: String,
    /// Request line details.
    pub request: NetworkRequest,
    /// Policy snapshot.
    pub policy_state: PolicyState,
}

impl RequestWillBeSent {
    /// Script ids on the initiator stack, if the initiator carried one.
    pub fn initiator_script_ids(&self) -> Option<Vec<String>> {
        self.initiator.stack_trace.as_ref().map(StackTrace::script_ids)
    }
}

/// Payload of `APIAccess`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiAccess {
    /// Shim name with the instrumentation prefix removed.
    #[serde(rename = "APIName")]
    pub api_name: String,
    /// Script ids of the paused call stack, innermost first.
    pub script_id_stack: Vec<String>,
    /// Policy snapshot.
    pub policy_state: PolicyState,
}

/// Payload of `DebuggerScriptParsed`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScriptParsed {
    /// Debugger script id.
    pub script_id: String,
    /// Source URL (empty for most inline scripts).
    #[serde(rename = "URL")]
    pub url: String,
    /// Content hash.
    pub hash: String,
    /// Stack that created the script, if any.
    pub stack_trace: Option<StackTrace>,
}

/// Payload of `PageLifecycleEvent`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PageLifecycle {
    /// Frame id.
    pub frame_id: String,
    /// Loader id.
    pub loader_id: String,
    /// Milestone name (`load`, `DOMContentLoaded`, ...).
    pub name: String,
    /// Policy snapshot.
    pub policy_state: PolicyState,
}

/// Request line details.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkRequest {
    /// Request URL.
    #[serde(rename = "URL")]
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Whether the request has a body.
    pub has_post_data: bool,
    /// Whether it comes from `<link rel=preload>`.
    pub is_link_preload: bool,
}

impl NetworkRequest {
    /// Decode a `Network.Request` object.
    pub fn from_message(msg: &Message) -> Self {
        Self {
            url: msg.string("url"),
            method: msg.string("method"),
            has_post_data: msg.bool("hasPostData"),
            is_link_preload: msg.bool("isLinkPreload"),
        }
    }
}

/// What caused a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Initiator {
    /// `parser`, `script`, `preload`, `other`, ...
    #[serde(rename = "Type")]
    pub kind: String,
    /// Script stack for script-initiated requests.
    pub stack_trace: Option<StackTrace>,
    /// Initiating document URL for parser requests.
    #[serde(rename = "URL")]
    pub url: String,
    /// Line in the initiating document.
    pub line_number: i64,
}

impl Initiator {
    /// Decode a `Network.Initiator` object.
    pub fn from_message(msg: &Message) -> Self {
        Self {
            kind: msg.string("type"),
            stack_trace: StackTrace::from_field(msg, "stack"),
            url: msg.string("url"),
            line_number: msg.int("lineNumber"),
        }
    }
}

/// Convert protocol wall-clock seconds to a timestamp. Out-of-range values
/// fall back to the current time.
#[allow(clippy::cast_possible_truncation)]
pub fn timestamp_from_secs(secs: f64) -> DateTime<Utc> {
    if !secs.is_finite() || secs <= 0.0 {
        return Utc::now();
    }
    DateTime::from_timestamp_millis((secs * 1000.0) as i64).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header_json(event_type: &str) -> serde_json::Value {
        json!({
            "EventId": 7,
            "Timestamp": "2024-05-01T12:00:00Z",
            "PolicyId": "p1",
            "TargetId": "t1",
            "EventType": event_type,
        })
    }

    #[test]
    fn serializes_flat_with_event_type_tag() {
        let e = Event::new(
            PolicyId::from("p1"),
            TargetId::from("t1"),
            Utc::now(),
            ApiAccess {
                api_name: "document_cookie".into(),
                script_id_stack: vec!["3".into()],
                policy_state: PolicyState::default(),
            },
        );
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["EventType"], "APIAccess");
        assert_eq!(v["EventId"], 0);
        assert_eq!(v["PolicyId"], "p1");
        assert_eq!(v["APIName"], "document_cookie");
        assert_eq!(v["ScriptIdStack"][0], "3");
        assert_eq!(e.event_type(), "APIAccess");
    }

    #[test]
    fn deserializes_page_lifecycle_tag() {
        let mut v = header_json("PageLifecycleEvent");
        let obj = v.as_object_mut().unwrap();
        let _ = obj.insert("FrameId".into(), json!("f"));
        let _ = obj.insert("LoaderId".into(), json!("l"));
        let _ = obj.insert("Name".into(), json!("load"));
        let _ = obj.insert("PolicyState".into(), json!({"PolicyId": "p1", "TrustGroups": []}));
        let e: Event = serde_json::from_value(v).unwrap();
        assert_eq!(e.event_id(), 7);
        assert!(matches!(e.kind, EventKind::PageLifecycle(ref p) if p.name == "load"));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!(serde_json::from_value::<Event>(header_json("Mystery")).is_err());
    }

    #[test]
    fn initiator_decodes_stack() {
        let msg = Message::from(json!({
            "type": "script",
            "stack": {"callFrames": [{"scriptId": "12"}]},
            "url": "",
            "lineNumber": 4
        }));
        let i = Initiator::from_message(&msg);
        assert_eq!(i.kind, "script");
        assert_eq!(i.line_number, 4);
        assert_eq!(i.stack_trace.unwrap().script_ids(), vec!["12"]);
    }

    #[test]
    fn parser_initiator_has_no_stack() {
        let i = Initiator::from_message(&Message::from(json!({"type": "parser", "url": "https://a.example/"})));
        assert!(i.stack_trace.is_none());
        let v = serde_json::to_value(&i).unwrap();
        assert_eq!(v["Type"], "parser");
        assert!(v["StackTrace"].is_null());
    }

    #[test]
    fn network_request_decodes() {
        let r = NetworkRequest::from_message(&Message::from(json!({
            "url": "https://x.example/c", "method": "POST", "hasPostData": true
        })));
        assert_eq!(r.method, "POST");
        assert!(r.has_post_data);
        assert!(!r.is_link_preload);
    }

    #[test]
    fn wall_time_conversion() {
        let t = timestamp_from_secs(1_700_000_000.5);
        assert_eq!(t.timestamp_millis(), 1_700_000_000_500);
        assert!(timestamp_from_secs(f64::NAN) <= Utc::now());
    }
}
