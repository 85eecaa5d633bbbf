//! One browser tab.
//!
//! A [`TargetSession`] pairs an immutable handle (target id, protocol
//! connection, session-wide state) with a mutable [`TargetState`] behind a
//! per-target async lock. Every event handler takes that lock for its whole
//! run, so interception, pause and script-parsed handling for one tab never
//! interleave.

use std::sync::Arc;

use base64::Engine as _;
use chrono::Utc;
use exfil_cdp::CommandSender;
use exfil_core::{Message, PolicyId, StackTrace, TargetId};
use exfil_events::{
    ApiAccess, Event, EventKind, Initiator, NetworkRequest, PageLifecycle, RequestIntercepted,
    RequestWillBeSent, ScriptParsed, timestamp_from_secs,
};
use exfil_policy::Policy;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{Result, SessionError};
use crate::instrumentation::SHIM_PREFIX;
use crate::shared::Shared;

/// Protocol domains enabled on every connection.
pub(crate) const DOMAINS: [&str; 6] = ["Debugger", "Network", "Page", "Runtime", "Target", "Inspector"];

/// Where a target is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetPhase {
    /// Constructed, nothing sent yet.
    Created,
    /// Interception and domains being set up.
    Attaching,
    /// Instrumented and idle.
    Attached,
    /// Inside a `Debugger.paused` handler.
    Paused,
    /// Connection torn down.
    Closed,
}

/// Mutable per-target fields.
#[derive(Debug)]
pub(crate) struct TargetState {
    phase: TargetPhase,
    nav_history: Vec<String>,
    policy: Policy,
    instrumentation_script_id: Option<String>,
}

/// A tracked page target.
pub struct TargetSession {
    target_id: TargetId,
    client: Arc<dyn CommandSender>,
    state: Mutex<TargetState>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TargetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSession")
            .field("target_id", &self.target_id)
            .finish_non_exhaustive()
    }
}

impl TargetSession {
    /// A target starting on `url`, with its first policy already created.
    pub(crate) fn new(
        shared: Arc<Shared>,
        target_id: TargetId,
        url: &str,
        client: Arc<dyn CommandSender>,
    ) -> Arc<Self> {
        let policy = shared.factory.create(url);
        shared.record_policy(policy.id().clone());
        info!(target_id = %target_id, policy_id = %policy.id(), url, "new target");
        Arc::new(Self {
            target_id,
            client,
            state: Mutex::new(TargetState {
                phase: TargetPhase::Created,
                nav_history: vec![url.to_owned()],
                policy,
                instrumentation_script_id: None,
            }),
            shared,
        })
    }

    /// The browser's id for this tab.
    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    /// Current phase.
    pub async fn phase(&self) -> TargetPhase {
        self.state.lock().await.phase
    }

    /// Every top-level URL this tab navigated to, oldest first.
    pub async fn nav_history(&self) -> Vec<String> {
        self.state.lock().await.nav_history.clone()
    }

    /// Id of the policy currently in force.
    pub async fn policy_id(&self) -> PolicyId {
        self.state.lock().await.policy.id().clone()
    }

    /// Event stamped with this target and its current policy.
    fn event(&self, state: &TargetState, kind: impl Into<EventKind>) -> Event {
        Event::new(
            state.policy.id().clone(),
            self.target_id.clone(),
            Utc::now(),
            kind,
        )
    }

    // ── Setup ───────────────────────────────────────────────────────────

    /// Intercept every HTTP(S) request. Runs before callbacks are wired.
    pub(crate) async fn enable_interception(&self) -> Result<()> {
        self.state.lock().await.phase = TargetPhase::Attaching;
        let _ = self
            .client
            .send(
                "Network.setRequestInterception",
                json!({ "patterns": [{ "urlPattern": "http*" }] }),
            )
            .await?;
        Ok(())
    }

    /// Async stack depth, per-document break, then the instrumentation.
    pub(crate) async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let _ = self
            .client
            .send(
                "Debugger.setAsyncCallStackDepth",
                json!({ "maxDepth": self.shared.config.async_stack_depth }),
            )
            .await?;
        if self.shared.config.pause_on_new_document {
            let _ = self
                .client
                .send(
                    "Page.addScriptToEvaluateOnNewDocument",
                    json!({ "source": "debugger;" }),
                )
                .await?;
        }
        self.install_instrumentation(&mut state).await?;
        state.phase = TargetPhase::Attached;
        Ok(())
    }

    /// Compile and run the instrumentation unless this document already has it.
    async fn install_instrumentation(&self, state: &mut TargetState) -> Result<()> {
        if state.instrumentation_script_id.is_some() {
            return Ok(());
        }
        let method = "Runtime.compileScript";
        let reply = self
            .client
            .send(
                method,
                json!({
                    "expression": &*self.shared.instrumentation,
                    "sourceURL": "",
                    "persistScript": true,
                }),
            )
            .await?;
        let script_id = reply.string("scriptId");
        if script_id.is_empty() {
            return Err(SessionError::MissingField {
                method: method.into(),
                field: "scriptId".into(),
            });
        }
        debug!(target_id = %self.target_id, %script_id, "instrumentation compiled");
        state.instrumentation_script_id = Some(script_id.clone());
        let _ = self
            .client
            .send("Runtime.runScript", json!({ "scriptId": script_id }))
            .await?;
        Ok(())
    }

    /// New top-level document: fresh policy, instrumentation must be reinstalled.
    fn nav_reset(&self, state: &mut TargetState, url: &str) {
        state.nav_history.push(url.to_owned());
        state.instrumentation_script_id = None;
        state.policy = self.shared.factory.create(url);
        self.shared.record_policy(state.policy.id().clone());
        info!(target_id = %self.target_id, policy_id = %state.policy.id(), url, "navigation");
    }

    /// Drop the connection.
    pub(crate) async fn close(&self) {
        self.state.lock().await.phase = TargetPhase::Closed;
        self.client.close();
    }

    /// Log a lifecycle milestone against the current policy.
    pub(crate) async fn log_page_lifecycle(&self, p: &Message) {
        let state = self.state.lock().await;
        let event = self.event(
            &state,
            PageLifecycle {
                frame_id: p.string("frameId"),
                loader_id: p.string("loaderId"),
                name: p.string("name"),
                policy_state: state.policy.state(),
            },
        );
        let _ = self.shared.log_event(event);
    }

    /// PNG bytes of the current viewport.
    pub(crate) async fn capture_screenshot(&self) -> Result<Vec<u8>> {
        let reply = self.client.send("Page.captureScreenshot", json!({})).await?;
        base64::engine::general_purpose::STANDARD
            .decode(reply.string("data"))
            .map_err(|e| SessionError::Screenshot(e.to_string()))
    }

    // ── Event handlers ──────────────────────────────────────────────────

    /// `Network.requestIntercepted`: reset on top-level navigation, let the
    /// request through, log it.
    pub async fn on_request_intercepted(&self, p: Message) -> Result<()> {
        let mut state = self.state.lock().await;
        let request = p.message("request").unwrap_or_default();
        let url = request.string("url");
        let resource_type = p.string("resourceType");
        let frame_id = p.string("frameId");
        let nav = p.bool("isNavigationRequest") && frame_id == self.target_id.as_str();
        debug!(target_id = %self.target_id, nav, %resource_type, %url, "intercepted");

        if nav {
            self.nav_reset(&mut state, &url);
        }

        let _ = self
            .client
            .send(
                "Network.continueInterceptedRequest",
                json!({ "interceptionId": p.string("interceptionId") }),
            )
            .await?;

        let event = self.event(
            &state,
            RequestIntercepted {
                frame_id,
                resource_type,
                is_navigation_request: nav,
                redirect_url: p.string("redirectURL"),
                request: NetworkRequest::from_message(&request),
                policy_state: state.policy.state(),
            },
        );
        let _ = self.shared.log_event(event);
        Ok(())
    }

    /// `Network.requestWillBeSent`: log the request with its initiator stack.
    pub async fn on_request_will_be_sent(&self, p: Message) -> Result<()> {
        let state = self.state.lock().await;
        let initiator = p
            .message("initiator")
            .map(|m| Initiator::from_message(&m))
            .unwrap_or_default();
        let request = p.message("request").unwrap_or_default();
        let payload = RequestWillBeSent {
            initiator,
            loader_id: p.string("loaderId"),
            frame_id: p.string("frameId"),
            has_user_gesture: p.bool("hasUserGesture"),
            resource_type: p.string("type"),
            document_url: p.string("documentURL"),
            request: NetworkRequest::from_message(&request),
            policy_state: state.policy.state(),
        };
        debug!(
            target_id = %self.target_id,
            url = %payload.request.url,
            stack = ?payload.initiator_script_ids().unwrap_or_default(),
            "request"
        );
        let mut event = self.event(&state, payload);
        event.header.timestamp = timestamp_from_secs(p.float("wallTime"));
        let _ = self.shared.log_event(event);
        Ok(())
    }

    /// `Debugger.scriptParsed`: log the script, then assign it to a trust group.
    pub async fn on_script_parsed(&self, p: Message) -> Result<()> {
        let mut state = self.state.lock().await;
        if p.bool("isLiveEdit") {
            return Ok(());
        }
        let stack = StackTrace::from_field(&p, "stackTrace");
        if let (Some(st), Some(instr)) = (&stack, &state.instrumentation_script_id) {
            if !st.call_frames.is_empty() && st.call_frames.iter().all(|cf| cf.script_id == *instr) {
                return Ok(());
            }
        }

        let script_id = p.string("scriptId");
        let url = p.string("url");
        let hash = p.string("hash");
        debug!(target_id = %self.target_id, %script_id, %url, "parsed");

        let event = self.event(
            &state,
            ScriptParsed {
                script_id: script_id.clone(),
                url: url.clone(),
                hash: hash.clone(),
                stack_trace: stack.clone(),
            },
        );
        let _ = self.shared.log_event(event);

        let is_remote = p.int("startLine") == 0 && p.int("startColumn") == 0 && !url.is_empty();
        let assigned = if is_remote {
            state
                .policy
                .register_remote_script(&script_id, &url, stack.as_ref())
                .map(|g| g.is_trusted())
        } else {
            state
                .policy
                .register_inline_script(&script_id, &hash, stack.as_ref())
                .map(|g| g.is_trusted())
        };
        match assigned {
            Some(trusted) => debug!(%script_id, trusted, "script classified"),
            None if is_remote => warn!(%script_id, %url, "Failed to register remote script"),
            None => warn!(%script_id, %hash, "Failed to register inline script"),
        }
        Ok(())
    }

    /// `Debugger.paused`: tag the pause, record shim accesses, always resume.
    pub async fn on_paused(&self, p: Message) -> Result<()> {
        let mut state = self.state.lock().await;
        state.phase = TargetPhase::Paused;
        let outcome = self.classify_pause(&mut state, &p).await;
        let resumed = self.client.send("Debugger.resume", json!({})).await;
        state.phase = TargetPhase::Attached;
        outcome?;
        let _ = resumed?;
        Ok(())
    }

    async fn classify_pause(&self, state: &mut TargetState, p: &Message) -> Result<()> {
        let frames = p.messages("callFrames");
        let script_ids: Vec<String> = frames
            .iter()
            .map(|cf| cf.message("location").unwrap_or_default().string("scriptId"))
            .collect();

        self.install_instrumentation(state).await?;

        let reason = p.string("reason");
        let in_instrumentation = script_ids
            .first()
            .is_some_and(|id| Some(id.as_str()) == state.instrumentation_script_id.as_deref());

        let tag = if reason == "EventListener" {
            let event_name = p.message("data").unwrap_or_default().string("eventName");
            format!("{reason}:{event_name}")
        } else if let (true, Some(top)) = (in_instrumentation, frames.first()) {
            let tag = top.string("functionName");
            self.push_trusted_ids(state, top).await?;
            if let Some(api_name) = tag.strip_prefix(SHIM_PREFIX) {
                let event = self.event(
                    state,
                    ApiAccess {
                        api_name: api_name.to_owned(),
                        script_id_stack: script_ids.clone(),
                        policy_state: state.policy.state(),
                    },
                );
                let _ = self.shared.log_event(event);
            }
            tag
        } else {
            "breakpoint".to_owned()
        };

        debug!(target_id = %self.target_id, %tag, stack = ?script_ids, "paused");
        Ok(())
    }

    /// Copy the trusted script ids, keyed to their URLs, into the shim's
    /// closure scope.
    async fn push_trusted_ids(&self, state: &TargetState, top: &Message) -> Result<()> {
        let ids: Map<String, Value> = state
            .policy
            .trusted_script_urls()
            .into_iter()
            .map(|(id, url)| (id, Value::String(url)))
            .collect();
        let _ = self
            .client
            .send(
                "Debugger.setVariableValue",
                json!({
                    "scopeNumber": 1,
                    "variableName": "trustedScriptIds",
                    "newValue": { "value": ids },
                    "callFrameId": top.string("callFrameId"),
                }),
            )
            .await?;
        Ok(())
    }

    /// `Runtime.consoleAPICalled`: echo page console output.
    pub async fn on_console_api_called(&self, p: Message) -> Result<()> {
        if self.shared.config.chromium_log {
            return Ok(());
        }
        let mut line = format!("console.{}:", p.string("type"));
        for arg in p.messages("args") {
            let value = arg.get("value").filter(|v| !v.is_null());
            match value {
                Some(Value::String(s)) => line = format!("{line} {s}"),
                Some(v) => line = format!("{line} {v}"),
                None if arg.string("subtype") == "null" => line = format!("{line} null"),
                None => line = format!("{line} <{}>", arg.string("type")),
            }
        }
        info!(target_id = %self.target_id, "{line}");
        Ok(())
    }
}
