//! Settings loading: defaults, then the settings file, then `EXFIL_*`
//! environment overrides.
//!
//! Every section deserializes with `#[serde(default)]`, so a file that names
//! only some keys of a section keeps the compiled defaults for the rest.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use exfil_core::PolicyKind;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ExfilSettings;

/// Resolve the path to the settings file (`~/.exfil/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".exfil").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ExfilSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ExfilSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<ExfilSettings> {
    if !path.exists() {
        debug!(?path, "settings file not found, using defaults");
        return Ok(ExfilSettings::default());
    }
    debug!(?path, "loading settings from file");
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut ExfilSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`, so tests can avoid the process env.
pub fn apply_overrides(settings: &mut ExfilSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };
    let browser = &mut settings.browser;
    env.set_string("EXFIL_CHROMIUM_PATH", &mut browser.chromium_path);
    env.set_string("EXFIL_HOST", &mut browser.host);
    env.set_parsed(
        "EXFIL_REMOTE_DEBUGGING_PORT",
        1..=u16::MAX,
        &mut browser.remote_debugging_port,
    );
    env.set_bool("EXFIL_HEADLESS", &mut browser.headless);
    env.set_bool("EXFIL_OPEN_DEVTOOLS", &mut browser.open_devtools);
    env.set_bool("EXFIL_CHROMIUM_LOG", &mut browser.chromium_log);
    env.set_string("EXFIL_EXTENSION_DIR", &mut browser.extension_dir);

    env.set_parsed("EXFIL_WEB_SERVER_PORT", 1..=u16::MAX, &mut settings.web_server.port);
    env.set_parsed(
        "EXFIL_SHUTDOWN_TIMEOUT_MS",
        1..=60_000,
        &mut settings.web_server.shutdown_timeout_ms,
    );

    if let Some(v) = env.string("EXFIL_POLICY") {
        match v.parse::<PolicyKind>() {
            Ok(kind) => settings.policy.kind = kind,
            Err(e) => warn!(key = "EXFIL_POLICY", error = %e, "ignoring"),
        }
    }
    if let Some(v) = env.string("EXFIL_FILTER_LISTS") {
        settings.policy.filter_lists = v
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect();
    }

    env.set_string("EXFIL_RUN_DIR", &mut settings.run.run_dir);
    env.set_parsed(
        "EXFIL_SCREENSHOT_DELAY_MS",
        0..=600_000,
        &mut settings.run.screenshot_delay_ms,
    );
    env.set_parsed(
        "EXFIL_CONNECT_RETRY_MS",
        1..=10_000,
        &mut settings.run.connect_retry_ms,
    );
    env.set_string("EXFIL_LOG_LEVEL", &mut settings.logging.level);
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_in_range<T: FromStr + PartialOrd>(val: &str, range: &RangeInclusive<T>) -> Option<T> {
    val.trim().parse().ok().filter(|n| range.contains(n))
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn set_string(&self, name: &str, slot: &mut String) {
        if let Some(v) = self.string(name) {
            *slot = v;
        }
    }

    fn set_bool(&self, name: &str, slot: &mut bool) {
        let Some(val) = (self.lookup)(name) else {
            return;
        };
        match parse_bool(&val) {
            Some(v) => *slot = v,
            None => warn!(key = name, value = %val, "invalid boolean env var, ignoring"),
        }
    }

    fn set_parsed<T>(&self, name: &str, range: RangeInclusive<T>, slot: &mut T)
    where
        T: FromStr + PartialOrd + std::fmt::Display,
    {
        let Some(val) = (self.lookup)(name) else {
            return;
        };
        match parse_in_range(&val, &range) {
            Some(v) => *slot = v,
            None => warn!(
                key = name,
                value = %val,
                min = %range.start(),
                max = %range.end(),
                "out-of-range env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_file_layer(&dir.path().join("absent.json")).unwrap();
        assert_eq!(s.browser.remote_debugging_port, 9222);
    }

    #[test]
    fn partial_sections_keep_their_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"policy": {"type": "filterList"}, "run": {"runDir": "/tmp/runs"}}"#,
        )
        .unwrap();
        let s = load_file_layer(&path).unwrap();
        assert_eq!(s.policy.kind, PolicyKind::FilterList);
        assert_eq!(s.policy.filter_lists.len(), 2);
        assert_eq!(s.run.run_dir, "/tmp/runs");
        assert_eq!(s.run.screenshot_delay_ms, 5_000);
        assert_eq!(s.browser.remote_debugging_port, 9222);
    }

    #[test]
    fn file_filter_lists_replace_the_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"policy": {"filterLists": ["mine.txt"]}}"#).unwrap();
        let s = load_file_layer(&path).unwrap();
        assert_eq!(s.policy.filter_lists, vec!["mine.txt".to_string()]);
        assert_eq!(s.policy.kind, PolicyKind::Trusting);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn bad_policy_in_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"policy": {"type": 7}}"#).unwrap();
        assert!(load_file_layer(&path).is_err());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut s = ExfilSettings::default();
        apply_overrides(
            &mut s,
            lookup(&[
                ("EXFIL_REMOTE_DEBUGGING_PORT", "9333"),
                ("EXFIL_HOST", "10.0.0.2"),
                ("EXFIL_HEADLESS", "yes"),
                ("EXFIL_EXTENSION_DIR", "ext"),
                ("EXFIL_POLICY", "hostname"),
                ("EXFIL_FILTER_LISTS", "a.txt, b.txt,"),
                ("EXFIL_SHUTDOWN_TIMEOUT_MS", "250"),
                ("EXFIL_RUN_DIR", "out"),
                ("EXFIL_CONNECT_RETRY_MS", "40"),
            ]),
        );
        assert_eq!(s.browser.remote_debugging_port, 9333);
        assert_eq!(s.browser.host, "10.0.0.2");
        assert!(s.browser.headless);
        assert_eq!(s.browser.extension_dir, "ext");
        assert_eq!(s.policy.kind, PolicyKind::Hostname);
        assert_eq!(s.policy.filter_lists, vec!["a.txt", "b.txt"]);
        assert_eq!(s.web_server.shutdown_timeout_ms, 250);
        assert_eq!(s.run.run_dir, "out");
        assert_eq!(s.run.connect_retry_ms, 40);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = ExfilSettings::default();
        apply_overrides(
            &mut s,
            lookup(&[
                ("EXFIL_REMOTE_DEBUGGING_PORT", "0"),
                ("EXFIL_WEB_SERVER_PORT", "70000"),
                ("EXFIL_HEADLESS", "maybe"),
                ("EXFIL_POLICY", "9"),
                ("EXFIL_RUN_DIR", ""),
                ("EXFIL_SCREENSHOT_DELAY_MS", "soon"),
            ]),
        );
        assert_eq!(s.browser.remote_debugging_port, 9222);
        assert_eq!(s.web_server.port, 8888);
        assert!(!s.browser.headless);
        assert_eq!(s.policy.kind, PolicyKind::Trusting);
        assert_eq!(s.run.run_dir, "run");
        assert_eq!(s.run.screenshot_delay_ms, 5_000);
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn range_parsing_is_inclusive() {
        assert_eq!(parse_in_range::<u16>("65535", &(1..=u16::MAX)), Some(65535));
        assert_eq!(parse_in_range::<u16>("70000", &(1..=u16::MAX)), None);
        assert_eq!(parse_in_range::<u64>(" 10 ", &(10..=20)), Some(10));
        assert_eq!(parse_in_range::<u64>("21", &(10..=20)), None);
    }
}
