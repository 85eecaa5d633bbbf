//! State shared by the session manager and every target.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use exfil_cdp::Endpoint;
use exfil_core::{Message, PolicyId, TargetId};
use exfil_events::{Event, EventLog};
use exfil_policy::PolicyFactory;
use exfil_settings::ExfilSettings;
use parking_lot::Mutex;

use crate::lifecycle::Lifecycle;
use crate::target::TargetSession;

/// Session tuning knobs, usually taken from [`ExfilSettings`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Browser debugging endpoint.
    pub endpoint: Endpoint,
    /// Delay between root connection attempts.
    pub connect_retry: Duration,
    /// `Debugger.setAsyncCallStackDepth` value.
    pub async_stack_depth: u32,
    /// Break on the first statement of every new document.
    pub pause_on_new_document: bool,
    /// Wait between a watched page's `load` and its screenshot.
    pub screenshot_delay: Duration,
    /// Where `screenshot.png` goes.
    pub run_dir: PathBuf,
    /// Browser output is already being logged; skip console echo.
    pub chromium_log: bool,
}

impl SessionConfig {
    /// Build from loaded settings. `run_dir` is the per-run directory.
    pub fn from_settings(settings: &ExfilSettings, run_dir: PathBuf) -> Self {
        Self {
            endpoint: Endpoint::new(
                settings.browser.host.clone(),
                settings.browser.remote_debugging_port,
            ),
            connect_retry: Duration::from_millis(settings.run.connect_retry_ms),
            async_stack_depth: settings.instrumentation.async_stack_depth,
            pause_on_new_document: settings.instrumentation.pause_on_new_document,
            screenshot_delay: Duration::from_millis(settings.run.screenshot_delay_ms),
            run_dir,
            chromium_log: settings.browser.chromium_log,
        }
    }
}

/// Everything behind the session-wide lock.
#[derive(Default)]
pub(crate) struct SharedState {
    pub(crate) targets: HashMap<TargetId, Arc<TargetSession>>,
    pub(crate) event_log: EventLog,
    pub(crate) policy_ids: Vec<PolicyId>,
    pub(crate) watched_targets: Vec<TargetId>,
    /// `load` milestones of watched targets that were not tracked yet.
    pub(crate) pending_loads: HashMap<TargetId, Message>,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<SharedState>,
    pub(crate) factory: PolicyFactory,
    pub(crate) instrumentation: Arc<str>,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) config: SessionConfig,
}

impl Shared {
    pub(crate) fn new(
        config: SessionConfig,
        factory: PolicyFactory,
        instrumentation: impl Into<Arc<str>>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            state: Mutex::new(SharedState::default()),
            factory,
            instrumentation: instrumentation.into(),
            lifecycle,
            config,
        }
    }

    /// Append under the session lock. The log assigns the id.
    pub(crate) fn log_event(&self, event: Event) -> u64 {
        self.state.lock().event_log.append(event)
    }

    pub(crate) fn record_policy(&self, id: PolicyId) {
        self.state.lock().policy_ids.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let mut s = ExfilSettings::default();
        s.browser.remote_debugging_port = 9333;
        s.run.screenshot_delay_ms = 250;
        let c = SessionConfig::from_settings(&s, PathBuf::from("run/x"));
        assert_eq!(c.endpoint.port(), 9333);
        assert_eq!(c.endpoint.host(), "localhost");
        assert_eq!(c.screenshot_delay, Duration::from_millis(250));
        assert_eq!(c.async_stack_depth, 32);
        assert!(c.pause_on_new_document);
        assert_eq!(c.run_dir, PathBuf::from("run/x"));
    }
}
