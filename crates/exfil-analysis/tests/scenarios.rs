//! End-to-end verdicts over hand-built event logs.

use chrono::Utc;
use exfil_analysis::{IgnoredPages, PolicyAnalysis, analyze_all, analyze_logs, analyze_policy};
use exfil_core::{CallFrame, PolicyId, StackTrace, TargetId};
use exfil_events::{ApiAccess, Event, EventKind, EventLog, Initiator, NetworkRequest, RequestWillBeSent, ScriptParsed};
use exfil_policy::Policy;
use proptest::prelude::*;

const PAGE: &str = "https://a.example/";

fn stack(ids: &[&str]) -> StackTrace {
    StackTrace {
        call_frames: ids
            .iter()
            .map(|id| CallFrame {
                script_id: (*id).to_owned(),
                ..CallFrame::default()
            })
            .collect(),
        ..StackTrace::default()
    }
}

/// Builds a log the way a session would, one tab per policy.
#[derive(Default)]
struct Run {
    log: EventLog,
}

impl Run {
    fn push(&mut self, policy: &Policy, kind: impl Into<EventKind>) -> u64 {
        let target = TargetId::from(format!("tab-{}", policy.id()));
        self.log
            .append(Event::new(policy.id().clone(), target, Utc::now(), kind))
    }

    fn script(&mut self, policy: &mut Policy, id: &str, url: &str) -> u64 {
        let _ = policy.register_remote_script(id, url, None);
        self.push(
            policy,
            ScriptParsed {
                script_id: id.into(),
                url: url.into(),
                hash: format!("hash-{id}"),
                stack_trace: None,
            },
        )
    }

    fn access(&mut self, policy: &Policy, api: &str, ids: &[&str]) -> u64 {
        self.push(
            policy,
            ApiAccess {
                api_name: api.into(),
                script_id_stack: ids.iter().map(|s| (*s).to_owned()).collect(),
                policy_state: policy.state(),
            },
        )
    }

    fn request(&mut self, policy: &Policy, url: &str, initiator: Option<StackTrace>) -> u64 {
        self.push(
            policy,
            RequestWillBeSent {
                initiator: Initiator {
                    kind: if initiator.is_some() { "script" } else { "parser" }.into(),
                    stack_trace: initiator,
                    ..Initiator::default()
                },
                loader_id: "L".into(),
                frame_id: "F".into(),
                has_user_gesture: false,
                resource_type: "Image".into(),
                document_url: PAGE.into(),
                request: NetworkRequest {
                    url: url.into(),
                    method: "GET".into(),
                    ..NetworkRequest::default()
                },
                policy_state: policy.state(),
            },
        )
    }
}

#[test]
fn no_requests_means_empty_analysis() {
    let mut run = Run::default();
    let mut p = Policy::untrusting();
    let _ = run.script(&mut p, "1", "https://a.example/app.js");
    let _ = run.access(&p, "document_cookie", &["1"]);
    assert_eq!(
        analyze_policy(&run.log, p.id()),
        PolicyAnalysis {
            policy_id: p.id().clone(),
            ..PolicyAnalysis::default()
        }
    );
}

// Scenario A
#[test]
fn trusted_access_never_taints() {
    let mut run = Run::default();
    let mut p = Policy::trusting();
    let _ = run.request(&p, "https://a.example/", None);
    let _ = run.script(&mut p, "1", "https://cdn.example/lib.js");
    let _ = run.access(&p, "document_cookie", &["1"]);
    let _ = run.request(&p, "https://b.example/beacon", Some(stack(&["1"])));

    let pa = analyze_policy(&run.log, p.id());
    assert_eq!(pa.description, PAGE);
    assert!(!pa.policy_violated);
    assert_eq!(pa.tainting_api_name, "");
    assert_eq!(pa.violation_event_id, None);
}

// Scenario B
#[test]
fn untrusting_policy_flags_next_scripted_request() {
    let mut run = Run::default();
    let mut p = Policy::untrusting();
    let _ = run.request(&p, "https://a.example/", None);
    let _ = run.script(&mut p, "1", "https://a.example/app.js");
    let before = run.request(&p, "https://b.example/early", Some(stack(&["1"])));
    let taint = run.access(&p, "document_cookie", &["1"]);
    let _ = run.request(&p, "https://a.example/style.css", None);
    let exfil = run.request(&p, "https://b.example/p.gif?c=1", Some(stack(&["1"])));
    assert!(before < taint && taint < exfil);

    let pa = analyze_policy(&run.log, p.id());
    assert!(pa.policy_violated);
    assert_eq!(pa.tainting_api_name, "document_cookie");
    assert_eq!(pa.req_url, "https://b.example/p.gif?c=1");
    assert_eq!(pa.req_resource_type, "Image");
    assert_eq!(pa.req_initiator, "script");
    assert_eq!(pa.req_stack_scripts, vec!["1"]);
    assert_eq!(pa.violation_event_id, Some(exfil));
}

// Scenario C
#[test]
fn hostname_policy_flags_foreign_script() {
    let mut run = Run::default();
    let mut p = Policy::hostname(vec!["https://a.example".into()]);
    let _ = run.request(&p, "https://a.example/", None);
    let _ = run.script(&mut p, "own", "https://a.example/app.js");
    let _ = run.script(&mut p, "ads", "https://b.example/ads.js");

    // Own code reads cookies and sends them home: fine.
    let _ = run.access(&p, "document_cookie", &["own"]);
    let _ = run.request(&p, "https://a.example/api", Some(stack(&["own"])));
    assert!(!analyze_policy(&run.log, p.id()).policy_violated);

    // The foreign script reads them and then anything it initiates is flagged.
    let taint = run.access(&p, "document_cookie", &["ads", "own"]);
    let _ = run.request(&p, "https://a.example/api2", Some(stack(&["own"])));
    let exfil = run.request(&p, "https://b.example/collect", Some(stack(&["own", "ads"])));

    let pa = analyze_policy(&run.log, p.id());
    assert!(pa.policy_violated);
    assert!(taint < exfil);
    assert_eq!(pa.req_url, "https://b.example/collect");
    assert_eq!(pa.req_stack_scripts, vec!["own", "ads"]);
}

// Scenario D
#[test]
fn earlier_probe_beats_later_request() {
    let mut run = Run::default();
    let mut p = Policy::untrusting();
    let _ = run.request(&p, "https://a.example/", None);
    let _ = run.script(&mut p, "1", "https://a.example/app.js");
    let taint = run.access(&p, "localStorage", &["1"]);
    let probe = run.access(&p, "exfiltration_image_src", &["1"]);
    let req = run.request(&p, "https://b.example/x", Some(stack(&["1"])));
    assert!(taint < probe && probe < req);

    let pa = analyze_policy(&run.log, p.id());
    assert!(pa.policy_violated);
    assert_eq!(pa.tainting_api_name, "localStorage");
    assert_eq!(pa.violation_event_id, Some(probe));
    assert_eq!(pa.req_resource_type, "Document");
    assert_eq!(pa.req_initiator, "script");
    assert_eq!(pa.req_url, "");
    assert_eq!(pa.req_stack_scripts, vec!["1"]);
}

#[test]
fn later_probe_loses_to_earlier_request() {
    let mut run = Run::default();
    let mut p = Policy::untrusting();
    let _ = run.request(&p, "https://a.example/", None);
    let _ = run.script(&mut p, "1", "https://a.example/app.js");
    let _ = run.access(&p, "document_cookie", &["1"]);
    let req = run.request(&p, "https://b.example/x", Some(stack(&["1"])));
    let _ = run.access(&p, "exfiltration_location_href", &["1"]);

    let pa = analyze_policy(&run.log, p.id());
    assert_eq!(pa.violation_event_id, Some(req));
    assert_eq!(pa.req_url, "https://b.example/x");
}

#[test]
fn probes_never_taint() {
    let mut run = Run::default();
    let mut p = Policy::untrusting();
    let _ = run.request(&p, "https://a.example/", None);
    let _ = run.script(&mut p, "1", "https://a.example/app.js");
    let _ = run.access(&p, "exfiltration_script_src", &["1"]);
    let _ = run.request(&p, "https://b.example/x", Some(stack(&["1"])));

    let pa = analyze_policy(&run.log, p.id());
    assert!(!pa.policy_violated);
    assert_eq!(pa.tainting_api_name, "");
}

#[test]
fn async_request_uses_scheduling_frames() {
    let mut run = Run::default();
    let mut p = Policy::untrusting();
    let _ = run.request(&p, "https://a.example/", None);
    let _ = run.script(&mut p, "1", "https://a.example/app.js");
    let _ = run.access(&p, "document_cookie", &["1"]);
    let continuation = StackTrace {
        description: "setTimeout".into(),
        call_frames: Vec::new(),
        parent: Some(Box::new(stack(&["1"]))),
        ..StackTrace::default()
    };
    let _ = run.request(&p, "https://b.example/later", Some(continuation));

    let pa = analyze_policy(&run.log, p.id());
    assert!(pa.policy_violated);
    assert_eq!(pa.req_stack_scripts, vec!["1"]);
}

#[test]
fn popup_first_request_counts_against_opener() {
    let mut run = Run::default();
    let mut opener = Policy::untrusting();
    let popup = Policy::trusting();
    let _ = run.request(&opener, "https://a.example/", None);
    let _ = run.script(&mut opener, "1", "https://a.example/app.js");
    let _ = run.access(&opener, "document_cookie", &["1"]);
    let first = run.request(&popup, "https://b.example/?c=secret", Some(stack(&["1"])));
    let _ = run.request(&popup, "https://b.example/later", Some(stack(&["1"])));
    let own = run.request(&opener, "https://b.example/own", Some(stack(&["1"])));
    assert!(first < own);

    let pa = analyze_policy(&run.log, opener.id());
    assert!(pa.policy_violated);
    assert_eq!(pa.violation_event_id, Some(first));
    assert_eq!(pa.req_url, "https://b.example/?c=secret");

    // The popup itself saw no tainting access.
    assert!(!analyze_policy(&run.log, popup.id()).policy_violated);
}

#[test]
fn popup_before_taint_is_ignored() {
    let mut run = Run::default();
    let mut opener = Policy::untrusting();
    let popup = Policy::trusting();
    let _ = run.request(&opener, "https://a.example/", None);
    let _ = run.script(&mut opener, "1", "https://a.example/app.js");
    let _ = run.request(&popup, "https://b.example/", Some(stack(&["1"])));
    let _ = run.access(&opener, "document_cookie", &["1"]);

    assert!(!analyze_policy(&run.log, opener.id()).policy_violated);
}

#[test]
fn analyze_logs_drops_harness_pages_and_keeps_order() {
    let mut run = Run::default();
    let home = Policy::trusting();
    let _ = run.push(
        &home,
        RequestWillBeSent {
            initiator: Initiator::default(),
            loader_id: String::new(),
            frame_id: String::new(),
            has_user_gesture: false,
            resource_type: "Document".into(),
            document_url: "http://localhost:8888/launched".into(),
            request: NetworkRequest::default(),
            policy_state: home.state(),
        },
    );
    let quiet = Policy::trusting();
    let site = Policy::untrusting();
    let _ = run.request(&site, "https://a.example/", None);

    let ids: Vec<PolicyId> = vec![home.id().clone(), quiet.id().clone(), site.id().clone()];
    let results = analyze_logs(&run.log, &ids, &IgnoredPages::new("http://localhost:8888"));
    assert_eq!(results.len(), 1);
    assert_eq!(&results[0].policy_id, site.id());

    let all = analyze_all(&run.log, &IgnoredPages::new("http://localhost:8888"));
    assert_eq!(all, results);
}

#[test]
fn verdict_survives_persistence() {
    let mut run = Run::default();
    let mut p = Policy::untrusting();
    let _ = run.request(&p, "https://a.example/", None);
    let _ = run.script(&mut p, "1", "https://a.example/app.js");
    let _ = run.access(&p, "document_cookie", &["1"]);
    let _ = run.request(&p, "https://b.example/x", Some(stack(&["1"])));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");
    run.log.write_to_file(&path).unwrap();
    let reread = EventLog::read_from_file(&path).unwrap();

    let before = analyze_policy(&run.log, p.id());
    assert!(before.policy_violated);
    assert_eq!(analyze_policy(&reread, p.id()), before);

    let json = serde_json::to_value(&before).unwrap();
    assert_eq!(json["PolicyViolated"], true);
    assert_eq!(json["TaintingAPIName"], "document_cookie");
    assert_eq!(json["ReqURL"], "https://b.example/x");
    let back: PolicyAnalysis = serde_json::from_value(json).unwrap();
    assert_eq!(back, before);
}

proptest! {
    #[test]
    fn analysis_is_deterministic(ops in prop::collection::vec(0u8..4, 0..30)) {
        let mut run = Run::default();
        let mut p = Policy::untrusting();
        let _ = run.script(&mut p, "1", "https://a.example/app.js");
        for op in ops {
            let _ = match op {
                0 => run.request(&p, "https://b.example/x", Some(stack(&["1"]))),
                1 => run.request(&p, "https://a.example/", None),
                2 => run.access(&p, "document_cookie", &["1"]),
                _ => run.access(&p, "exfiltration_image_src", &["1"]),
            };
        }
        let first = analyze_policy(&run.log, p.id());
        let second = analyze_policy(&run.log, p.id());
        prop_assert_eq!(&first, &second);
        if let Some(id) = first.violation_event_id {
            prop_assert!(first.policy_violated);
            prop_assert!(run.log.events().iter().any(|e| e.event_id() == id));
        }
    }
}
