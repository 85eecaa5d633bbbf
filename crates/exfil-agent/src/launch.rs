//! Chromium launch and teardown.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use exfil_session::{Collaborator, Lifecycle};
use exfil_settings::BrowserSettings;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Browser output lines that carry no information.
const NOISE: &[&str] = &[
    "Class RTCDispatcher is implemented in both",
    "Couldn't set selectedTextBackgroundColor from default",
    "Failed to call method: org.freedesktop",
    "DaemonVersion: GetAndBlock: failed",
];

/// Devtools docked at the bottom, collapsed, no paused overlay; extension
/// developer mode on.
const PREFERENCES: &str = r#"{
  "devtools": {
    "preferences": {
      "currentDockState": "\"bottom\"",
      "Inspector.drawerSplitViewState": "{\"horizontal\":{\"size\":0,\"showMode\":\"OnlyMain\"}}",
      "InspectorView.splitViewState": "{\"vertical\":{\"size\":0},\"horizontal\":{\"size\":73}}",
      "disablePausedStateOverlay": "true"
    }
  },
  "extensions": {
    "ui": {
      "developer_mode": true
    }
  }
}
"#;

/// Program and arguments that start the browser.
#[derive(Debug, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Executable.
    pub program: String,
    /// Arguments, launch URL last.
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Build the command line. Headless runs go through `xvfb-run`.
    pub fn new(
        browser: &BrowserSettings,
        user_data_dir: &Path,
        extension_dir: Option<&Path>,
        launch_url: &str,
    ) -> Self {
        let mut args = vec![
            format!("--remote-debugging-port={}", browser.remote_debugging_port),
            "--enable-logging=stderr".to_owned(),
            "--v=0".to_owned(),
            "--disable-fre".to_owned(),
            "--no-default-browser-check".to_owned(),
            "--no-first-run".to_owned(),
            "--disable-popup-blocking".to_owned(),
            "--enable-devtools-experiments".to_owned(),
        ];
        if let Some(dir) = extension_dir {
            args.push(format!("--load-extension={}", dir.display()));
        }
        args.push(format!("--user-data-dir={}", user_data_dir.display()));

        let mut program = browser.chromium_path.clone();
        if browser.headless {
            args.push("--disable-gpu".to_owned());
            args.push("--window-size=1366,3840".to_owned());
            args.splice(0..0, ["-a".to_owned(), program]);
            program = "xvfb-run".to_owned();
        }
        if browser.open_devtools {
            args.push("--auto-open-devtools-for-tabs".to_owned());
        }
        args.push(launch_url.to_owned());
        Self { program, args }
    }
}

/// Recreate `user_data_dir` with a `Default/Preferences` file.
pub fn prepare_user_data_dir(user_data_dir: &Path) -> Result<()> {
    if user_data_dir.exists() {
        std::fs::remove_dir_all(user_data_dir)
            .with_context(|| format!("Failed to clear {}", user_data_dir.display()))?;
    }
    let default_dir = user_data_dir.join("Default");
    std::fs::create_dir_all(&default_dir)
        .with_context(|| format!("Failed to create {}", default_dir.display()))?;
    let prefs = default_dir.join("Preferences");
    std::fs::write(&prefs, PREFERENCES)
        .with_context(|| format!("Failed to write {}", prefs.display()))?;
    Ok(())
}

/// Whether a browser output line should be dropped.
pub fn is_noise(line: &str) -> bool {
    line.trim().is_empty() || NOISE.iter().any(|n| line.contains(n))
}

async fn pipe_to_log<R: AsyncRead + Unpin>(stream: R, source: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !is_noise(&line) {
            info!(target: "chromium", source, "{line}");
        }
    }
}

/// The running browser, stopped by killing its whole process group.
pub struct BrowserProcess {
    pgid: Pid,
}

impl BrowserProcess {
    /// Start the browser in its own process group. When it exits on its own
    /// a normal shutdown is requested.
    pub fn spawn(
        cmd: &LaunchCommand,
        forward_output: bool,
        lifecycle: Arc<Lifecycle>,
    ) -> Result<Arc<Self>> {
        let output = || {
            if forward_output {
                Stdio::piped()
            } else {
                Stdio::null()
            }
        };
        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .spawn()
            .with_context(|| format!("Failed to launch {}", cmd.program))?;
        let pid = child.id().context("Browser exited during launch")?;
        let pgid = Pid::from_raw(i32::try_from(pid).context("Browser pid out of range")?);
        info!(pid, program = %cmd.program, "browser launched");

        if let Some(stdout) = child.stdout.take() {
            drop(tokio::spawn(pipe_to_log(stdout, "stdout")));
        }
        if let Some(stderr) = child.stderr.take() {
            drop(tokio::spawn(pipe_to_log(stderr, "stderr")));
        }

        drop(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(%status, "browser exited"),
                Err(e) => warn!(error = %e, "failed to wait for browser"),
            }
            let _ = lifecycle.request_shutdown(None).await;
        }));

        Ok(Arc::new(Self { pgid }))
    }
}

#[async_trait]
impl Collaborator for BrowserProcess {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn stop(&self) -> std::io::Result<()> {
        match killpg(self.pgid, Signal::SIGKILL) {
            Ok(()) => {
                info!("Chromium stopped.");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!(pgid = %self.pgid, "browser process group already gone");
                Ok(())
            }
            Err(errno) => Err(errno.into()),
        }
    }
}

/// Absolute extension directory, or `None` when none is configured.
pub fn extension_dir(browser: &BrowserSettings) -> Result<Option<PathBuf>> {
    if browser.extension_dir.is_empty() {
        return Ok(None);
    }
    let dir = std::path::absolute(&browser.extension_dir)
        .with_context(|| format!("Bad extension path {}", browser.extension_dir))?;
    Ok(Some(dir))
}
