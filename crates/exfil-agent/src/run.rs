//! One instrumented browsing run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use exfil_analysis::{IgnoredPages, PolicyAnalysis, analyze_logs};
use exfil_policy::PolicyFactory;
use exfil_session::{Lifecycle, SessionConfig, SessionManager, ShutdownCause, instrumentation, supervise};
use exfil_settings::ExfilSettings;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::launch::{BrowserProcess, LaunchCommand, extension_dir, prepare_user_data_dir};

/// Output directory name for a run: hex digest of the URL, or `default`.
pub fn namespace(open_url: Option<&str>) -> String {
    let Some(url) = open_url.filter(|u| !u.is_empty()) else {
        return "default".to_owned();
    };
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Where one run writes its output.
#[derive(Clone, Debug)]
pub struct RunPaths {
    /// `<run_dir>/<namespace>`.
    pub root: PathBuf,
}

impl RunPaths {
    /// Paths for `namespace` under `run_dir`, made absolute.
    pub fn new(run_dir: &str, namespace: &str) -> Result<Self> {
        let root = std::path::absolute(Path::new(run_dir).join(namespace))
            .with_context(|| format!("Bad run directory {run_dir}"))?;
        Ok(Self { root })
    }

    /// Tee target for the process log.
    pub fn stdout_log(&self) -> PathBuf {
        self.root.join("logs").join("stdout.log")
    }

    /// Persisted event log.
    pub fn events(&self) -> PathBuf {
        self.root.join("logs").join("events.json")
    }

    /// Per-policy verdicts.
    pub fn analysis(&self) -> PathBuf {
        self.root.join("analysis.json")
    }

    /// Browser profile.
    pub fn user_data(&self) -> PathBuf {
        self.root.join("user_data")
    }
}

/// Write verdicts as indented JSON.
pub fn write_analysis(path: &Path, results: &[PolicyAnalysis]) -> Result<()> {
    let json = serde_json::to_string_pretty(results).context("Failed to serialize analysis")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), policies = results.len(), "analysis written");
    Ok(())
}

/// Launch the browser, drive the session until it stops, then persist the
/// event log and verdicts. Returns the cause that stopped the run, if it
/// was not a normal stop.
pub async fn run(settings: &ExfilSettings, paths: &RunPaths, open_url: Option<&str>) -> Result<Option<ShutdownCause>> {
    let script = instrumentation::load(
        Path::new(&settings.instrumentation.shims_path),
        Path::new(&settings.instrumentation.template_path),
    )
    .context("Failed to build instrumentation script")?;
    let filter_lists: Vec<PathBuf> = settings.policy.filter_lists.iter().map(PathBuf::from).collect();
    let factory = PolicyFactory::new(settings.policy.kind, &filter_lists).context("Failed to load filter lists")?;
    info!(policy = %settings.policy.kind, "policy selected");

    let lifecycle = Arc::new(Lifecycle::new());

    prepare_user_data_dir(&paths.user_data())?;
    let cmd = LaunchCommand::new(
        &settings.browser,
        &paths.user_data(),
        extension_dir(&settings.browser)?.as_deref(),
        &settings.web_server.url("/launched"),
    );
    let browser = BrowserProcess::spawn(&cmd, settings.browser.chromium_log, Arc::clone(&lifecycle))?;
    let supervisor = tokio::spawn(supervise(
        Arc::clone(&lifecycle),
        browser,
        None,
        Duration::from_millis(settings.web_server.shutdown_timeout_ms),
    ));

    // The launch page attaching is what makes the browser usable.
    {
        let lifecycle = Arc::clone(&lifecycle);
        drop(tokio::spawn(async move {
            lifecycle.wait_attached().await;
            let _ = lifecycle.signal_ready().await;
        }));
    }
    {
        let lifecycle = Arc::clone(&lifecycle);
        drop(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted");
                let _ = lifecycle.request_shutdown(Some(ShutdownCause::Interrupted)).await;
            }
        }));
    }

    let manager = SessionManager::new(
        SessionConfig::from_settings(settings, paths.root.clone()),
        factory,
        script,
        Arc::clone(&lifecycle),
    );

    let session = async {
        manager.start().await?;
        let _ = lifecycle.wait_ready().await;
        if let Some(url) = open_url {
            let _ = manager.open_url(url).await?;
        }
        Ok::<(), exfil_session::SessionError>(())
    };
    let cause = tokio::select! {
        res = session => {
            if let Err(e) = res {
                error!(error = %e, "session failed");
                let _ = lifecycle.request_shutdown(Some(ShutdownCause::Other(e.to_string()))).await;
            }
            lifecycle.wait_stopped().await
        }
        cause = lifecycle.wait_stopped() => cause,
    };
    let _ = supervisor.await;

    manager.close_all().await;
    manager.write_log(&paths.events()).context("Failed to write event log")?;
    let results = analyze_logs(
        &manager.event_log(),
        &manager.policy_ids(),
        &IgnoredPages::new(&settings.web_server.url("")),
    );
    write_analysis(&paths.analysis(), &results)?;
    Ok(cause)
}
