//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the keys it overrides.

use exfil_core::PolicyKind;
use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "browser": { "remoteDebuggingPort": 9333, "headless": true },
///   "policy": { "type": "hostname" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExfilSettings {
    /// Browser launch and debugging endpoint.
    pub browser: BrowserSettings,
    /// Auxiliary web server hosting harness pages.
    pub web_server: WebServerSettings,
    /// Trust policy applied to each navigation.
    pub policy: PolicySettings,
    /// Page instrumentation.
    pub instrumentation: InstrumentationSettings,
    /// Run directory and timing.
    pub run: RunSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Browser launch and debugging endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserSettings {
    /// Path to the Chromium binary.
    pub chromium_path: String,
    /// Host the debugging endpoint listens on.
    pub host: String,
    /// Remote debugging port.
    pub remote_debugging_port: u16,
    /// Run under a virtual display instead of a visible window.
    pub headless: bool,
    /// Open devtools for every new tab.
    pub open_devtools: bool,
    /// Forward the browser's stdout/stderr into the log.
    pub chromium_log: bool,
    /// Unpacked extension loaded at launch. Empty to load none.
    pub extension_dir: String,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chromium_path: default_chromium_path().to_string(),
            host: "localhost".to_string(),
            remote_debugging_port: 9222,
            headless: false,
            open_devtools: false,
            chromium_log: false,
            extension_dir: "extension".to_string(),
        }
    }
}

fn default_chromium_path() -> &'static str {
    if cfg!(target_os = "macos") {
        "chromium/darwin/Chromium.app/Contents/MacOS/Chromium"
    } else {
        "chromium/linux/chrome"
    }
}

/// Auxiliary web server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebServerSettings {
    /// Port the harness pages are served on.
    pub port: u16,
    /// How long the server gets to stop during teardown.
    pub shutdown_timeout_ms: u64,
}

impl Default for WebServerSettings {
    fn default() -> Self {
        Self {
            port: 8888,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl WebServerSettings {
    /// Absolute URL of `path` on the web server.
    pub fn url(&self, path: &str) -> String {
        format!("http://localhost:{}{path}", self.port)
    }
}

/// Trust policy settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySettings {
    /// Policy shape created for each navigation.
    #[serde(rename = "type")]
    pub kind: PolicyKind,
    /// Ad/tracker block-lists backing the filter-list policy.
    pub filter_lists: Vec<String>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            kind: PolicyKind::default(),
            filter_lists: vec![
                "filter_lists/easylist.txt".to_string(),
                "filter_lists/easyprivacy.txt".to_string(),
            ],
        }
    }
}

/// Page instrumentation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstrumentationSettings {
    /// Shim definitions, one `name object property` triple per line.
    pub shims_path: String,
    /// Instrumentation script template.
    pub template_path: String,
    /// Debugger async call-stack depth.
    pub async_stack_depth: u32,
    /// Break into the debugger at the start of every new document.
    pub pause_on_new_document: bool,
}

impl Default for InstrumentationSettings {
    fn default() -> Self {
        Self {
            shims_path: "js/shims.txt".to_string(),
            template_path: "js/instrumentation_template.js".to_string(),
            async_stack_depth: 32,
            pause_on_new_document: true,
        }
    }
}

/// Run directory and timing settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunSettings {
    /// Root directory for run output.
    pub run_dir: String,
    /// Delay between page load and the screenshot.
    pub screenshot_delay_ms: u64,
    /// Backoff between attempts to reach the debugging endpoint.
    pub connect_retry_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            run_dir: "run".to_string(),
            screenshot_delay_ms: 5_000,
            connect_retry_ms: 100,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
