//! The root connection and the set of live targets.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use exfil_cdp::{CommandSender, Connection, EventHandler, handler};
use exfil_core::{Message, PolicyId, TargetId};
use exfil_events::{Event, EventLog};
use exfil_policy::PolicyFactory;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, SessionError, ShutdownCause};
use crate::lifecycle::Lifecycle;
use crate::shared::{SessionConfig, Shared};
use crate::target::{DOMAINS, TargetSession};

/// Owns the root connection, every target, and the event log.
pub struct SessionManager {
    shared: Arc<Shared>,
    root: tokio::sync::Mutex<Option<Arc<Connection>>>,
}

impl SessionManager {
    /// A manager that has not connected yet.
    pub fn new(
        config: SessionConfig,
        factory: PolicyFactory,
        instrumentation: impl Into<Arc<str>>,
        lifecycle: Arc<Lifecycle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared::new(config, factory, instrumentation, lifecycle)),
            root: tokio::sync::Mutex::new(None),
        })
    }

    /// Handshakes shared with the controller.
    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.shared.lifecycle
    }

    /// Connect (retrying until the browser answers) and start tracking targets.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.setup_root_conn().await
    }

    fn rebuild(self: Arc<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { self.setup_root_conn().await })
    }

    /// Close every target and the old root, then build a new root
    /// connection with its callbacks.
    async fn setup_root_conn(self: &Arc<Self>) -> Result<()> {
        let mut root = self.root.lock().await;

        let stale: Vec<Arc<TargetSession>> =
            self.shared.state.lock().targets.drain().map(|(_, t)| t).collect();
        for target in stale {
            target.close().await;
        }
        if let Some(old) = root.take() {
            old.close();
        }

        let config = &self.shared.config;
        let conn = Arc::new(config.endpoint.connect_with_retry(config.connect_retry).await);
        let lifecycle = &self.shared.lifecycle;

        let weak = Arc::downgrade(self);
        conn.on(
            "Target.targetCreated",
            guarded(lifecycle, "Target.targetCreated", {
                let weak = weak.clone();
                move |p| {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(mgr) => mgr.on_target_created(p).await,
                            None => Ok(()),
                        }
                    }
                }
            }),
        );
        conn.on(
            "Inspector.detached",
            guarded(lifecycle, "Inspector.detached", move |p| {
                let weak: Weak<Self> = weak.clone();
                async move {
                    let Some(mgr) = weak.upgrade() else {
                        return Ok(());
                    };
                    warn!(reason = %p.string("reason"), "inspector detached, rebuilding session");
                    // The rebuild closes this connection, so it cannot run
                    // on this connection's dispatcher.
                    drop(tokio::spawn(async move {
                        let lifecycle = Arc::clone(&mgr.shared.lifecycle);
                        if let Err(e) = mgr.rebuild().await {
                            error!(error = %e, "session rebuild failed");
                            let _ = lifecycle
                                .request_shutdown(Some(ShutdownCause::Other(e.to_string())))
                                .await;
                        }
                    }));
                    Ok(())
                }
            }),
        );

        init_conn(&conn, lifecycle).await?;
        *root = Some(conn);
        info!("root connection ready");
        Ok(())
    }

    async fn on_target_created(self: &Arc<Self>, p: Message) -> Result<()> {
        let Some(info) = p.message("targetInfo") else {
            return Ok(());
        };
        if info.string("type") != "page" {
            return Ok(());
        }
        let target_id = TargetId::from(info.string("targetId"));
        let known = self.shared.state.lock().targets.contains_key(&target_id);
        if known {
            return Ok(());
        }

        let target = self.attach_target(target_id.clone(), &info.string("url")).await?;
        self.track(target_id, target).await;
        Ok(())
    }

    /// Start tracking an attached target and replay a `load` that arrived
    /// while it was attaching.
    async fn track(self: &Arc<Self>, target_id: TargetId, target: Arc<TargetSession>) {
        let pending = {
            let mut state = self.shared.state.lock();
            let _ = state.targets.insert(target_id.clone(), Arc::clone(&target));
            state.pending_loads.remove(&target_id)
        };
        self.shared.lifecycle.signal_attached();
        if let Some(p) = pending {
            self.on_load(target, &p).await;
        }
    }

    /// Dedicated connection, interception, callbacks, domains, instrumentation.
    async fn attach_target(self: &Arc<Self>, target_id: TargetId, url: &str) -> Result<Arc<TargetSession>> {
        let conn = Arc::new(
            self.shared
                .config
                .endpoint
                .connect_target(target_id.as_str())
                .await?,
        );
        let _ = conn
            .send("Target.activateTarget", json!({ "targetId": target_id.as_str() }))
            .await?;

        let client: Arc<dyn CommandSender> = conn.clone();
        let target = TargetSession::new(Arc::clone(&self.shared), target_id, url, client);
        target.enable_interception().await?;
        self.install_target_callbacks(&conn, &target);
        init_conn(&conn, &self.shared.lifecycle).await?;
        target.initialize().await?;
        Ok(target)
    }

    fn install_target_callbacks(self: &Arc<Self>, conn: &Connection, target: &Arc<TargetSession>) {
        let lifecycle = &self.shared.lifecycle;

        macro_rules! route {
            ($method:literal => $handler:ident) => {{
                let weak = Arc::downgrade(target);
                conn.on(
                    $method,
                    guarded(lifecycle, $method, move |p| {
                        let weak = weak.clone();
                        async move {
                            match weak.upgrade() {
                                Some(t) => t.$handler(p).await,
                                None => Ok(()),
                            }
                        }
                    }),
                );
            }};
        }

        route!("Debugger.scriptParsed" => on_script_parsed);
        route!("Debugger.paused" => on_paused);
        route!("Network.requestIntercepted" => on_request_intercepted);
        route!("Network.requestWillBeSent" => on_request_will_be_sent);
        route!("Runtime.consoleAPICalled" => on_console_api_called);

        let weak = Arc::downgrade(self);
        conn.on(
            "Page.lifecycleEvent",
            guarded(lifecycle, "Page.lifecycleEvent", move |p| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(mgr) => mgr.on_page_lifecycle(p).await,
                        None => Ok(()),
                    }
                }
            }),
        );
    }

    /// Open `url` in a new tab and watch it for its `load` milestone.
    pub async fn open_url(&self, url: &str) -> Result<TargetId> {
        let root = self.root.lock().await;
        let conn = root.as_ref().ok_or(SessionError::NotStarted)?;
        info!(url, "opening URL");
        let reply = conn.send("Target.createTarget", json!({ "url": url })).await?;
        let target_id = TargetId::from(reply.string("targetId"));
        self.shared
            .state
            .lock()
            .watched_targets
            .push(target_id.clone());
        Ok(target_id)
    }

    /// On a watched tab's `load`: log it, screenshot after a delay, stop.
    async fn on_page_lifecycle(self: &Arc<Self>, p: Message) -> Result<()> {
        if p.string("name") != "load" {
            return Ok(());
        }
        let target_id = TargetId::from(p.string("frameId"));
        let target = {
            let mut state = self.shared.state.lock();
            let Some(pos) = state.watched_targets.iter().position(|w| *w == target_id) else {
                return Ok(());
            };
            let _ = state.watched_targets.remove(pos);
            match state.targets.get(&target_id).cloned() {
                Some(target) => target,
                None => {
                    debug!(target_id = %target_id, "watched target loaded while attaching");
                    let _ = state.pending_loads.insert(target_id, p);
                    return Ok(());
                }
            }
        };
        self.on_load(target, &p).await;
        Ok(())
    }

    async fn on_load(self: &Arc<Self>, target: Arc<TargetSession>, p: &Message) {
        target.log_page_lifecycle(p).await;
        info!(target_id = %target.target_id(), "page loaded");

        let mgr = Arc::clone(self);
        drop(tokio::spawn(async move {
            tokio::time::sleep(mgr.shared.config.screenshot_delay).await;
            let cause = match mgr.save_screenshot(&target).await {
                Ok(path) => {
                    info!(path = %path.display(), "screenshot saved");
                    None
                }
                Err(e) => {
                    error!(error = %e, "screenshot failed");
                    Some(ShutdownCause::Other(e.to_string()))
                }
            };
            let _ = mgr.shared.lifecycle.request_shutdown(cause).await;
        }));
    }

    async fn save_screenshot(&self, target: &TargetSession) -> Result<PathBuf> {
        info!(target_id = %target.target_id(), "taking screenshot");
        let png = target.capture_screenshot().await?;
        let dir = &self.shared.config.run_dir;
        let path = dir.join("screenshot.png");
        let io_err = |source| SessionError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;
        std::fs::write(&path, png).map_err(io_err)?;
        Ok(path)
    }

    /// The target whose navigation history contains `url`.
    pub async fn target_for_url(&self, url: &str) -> Option<Arc<TargetSession>> {
        let targets: Vec<Arc<TargetSession>> =
            self.shared.state.lock().targets.values().cloned().collect();
        for target in targets {
            if target.nav_history().await.iter().any(|u| u == url) {
                return Some(target);
            }
        }
        None
    }

    /// A tracked target by id.
    pub fn target(&self, target_id: &TargetId) -> Option<Arc<TargetSession>> {
        self.shared.state.lock().targets.get(target_id).cloned()
    }

    /// Snapshot of the event log.
    pub fn event_log(&self) -> EventLog {
        self.shared.state.lock().event_log.clone()
    }

    /// Snapshot of every logged event.
    pub fn events(&self) -> Vec<Event> {
        self.shared.state.lock().event_log.events().to_vec()
    }

    /// Every policy id created so far, in creation order.
    pub fn policy_ids(&self) -> Vec<PolicyId> {
        self.shared.state.lock().policy_ids.clone()
    }

    /// Persist the event log as indented JSON.
    pub fn write_log(&self, path: &Path) -> Result<()> {
        self.event_log().write_to_file(path)?;
        Ok(())
    }

    /// Close every target and the root connection.
    pub async fn close_all(&self) {
        let mut root = self.root.lock().await;
        let targets: Vec<Arc<TargetSession>> =
            self.shared.state.lock().targets.drain().map(|(_, t)| t).collect();
        for target in targets {
            target.close().await;
        }
        if let Some(conn) = root.take() {
            conn.close();
        }
    }
}

/// Discovery, auto-attach, cache and lifecycle settings, then domains.
async fn init_conn(conn: &Arc<Connection>, lifecycle: &Arc<Lifecycle>) -> Result<()> {
    let _ = conn
        .send("Target.setDiscoverTargets", json!({ "discover": true }))
        .await?;
    let _ = conn
        .send(
            "Target.setAutoAttach",
            json!({ "autoAttach": true, "waitForDebuggerOnStart": false }),
        )
        .await?;

    let weak = Arc::downgrade(conn);
    conn.on(
        "Target.attachedToTarget",
        guarded(lifecycle, "Target.attachedToTarget", move |_| {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(conn) => enable_domains(&*conn).await,
                    None => Ok(()),
                }
            }
        }),
    );

    let _ = conn
        .send("Network.setCacheDisabled", json!({ "cacheDisabled": true }))
        .await?;
    let _ = conn
        .send("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
        .await?;
    enable_domains(&**conn).await
}

async fn enable_domains(client: &dyn CommandSender) -> Result<()> {
    for domain in DOMAINS {
        let _ = client.send(&format!("{domain}.enable"), json!({})).await?;
    }
    Ok(())
}

/// Wrap a fallible callback so an error or panic becomes a shutdown request
/// instead of killing the dispatcher.
pub(crate) fn guarded<F, Fut>(lifecycle: &Arc<Lifecycle>, method: &'static str, f: F) -> EventHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let f = Arc::new(f);
    let lifecycle = Arc::clone(lifecycle);
    handler(move |msg| {
        let f = Arc::clone(&f);
        let lifecycle = Arc::clone(&lifecycle);
        async move {
            let outcome = AssertUnwindSafe(async move { f(msg).await })
                .catch_unwind()
                .await;
            let cause = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => {
                    error!(method, error = %e, "callback failed");
                    ShutdownCause::CallbackFailed {
                        method: method.to_owned(),
                        message: e.to_string(),
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(method, %message, "callback panicked");
                    ShutdownCause::CallbackPanicked {
                        method: method.to_owned(),
                        message,
                    }
                }
            };
            drop(tokio::spawn(async move {
                let _ = lifecycle.request_shutdown(Some(cause)).await;
            }));
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
