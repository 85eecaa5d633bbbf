//! # exfil-agent
//!
//! Launches an instrumented Chromium, records what page scripts touch and
//! send, and reports per-policy exfiltration verdicts.

#![deny(unsafe_code)]

mod launch;
mod run;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use exfil_analysis::{IgnoredPages, analyze_all};
use exfil_core::PolicyKind;
use exfil_events::EventLog;
use exfil_settings::ExfilSettings;

/// Exfiltration analyzer.
#[derive(Parser, Debug)]
#[command(name = "exfil-agent", about = "Browser taint tracking and trust-policy analysis")]
struct Cli {
    /// Settings file (defaults to `~/.exfil/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch the browser and record one run.
    Run(RunArgs),
    /// Re-run the analyzer over a saved event log and print the verdicts.
    Analyze {
        /// Path to `events.json`.
        events: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// URL to open once the browser is ready.
    #[arg(long)]
    open_url: Option<String>,

    /// Policy type: trusting, untrusting, hostname, filterList (or 0-3).
    #[arg(long)]
    policy: Option<PolicyKind>,

    /// Path to the Chromium binary.
    #[arg(long)]
    chromium: Option<String>,

    /// Run under a virtual display.
    #[arg(long)]
    headless: bool,

    /// Open devtools for every new tab.
    #[arg(long)]
    open_devtools: bool,

    /// Forward browser stdout/stderr into the log.
    #[arg(long)]
    chromium_log: bool,

    /// Remote debugging port.
    #[arg(long)]
    remote_debugging_port: Option<u16>,

    /// Harness web server port.
    #[arg(long)]
    web_server_port: Option<u16>,

    /// Directory for run output.
    #[arg(long)]
    run_dir: Option<String>,

    /// Debug logging.
    #[arg(long)]
    verbose: bool,
}

impl RunArgs {
    /// Flags win over the settings file and environment.
    fn apply(&self, settings: &mut ExfilSettings) {
        if let Some(kind) = self.policy {
            settings.policy.kind = kind;
        }
        if let Some(path) = &self.chromium {
            settings.browser.chromium_path.clone_from(path);
        }
        settings.browser.headless |= self.headless;
        settings.browser.open_devtools |= self.open_devtools;
        settings.browser.chromium_log |= self.chromium_log;
        if let Some(port) = self.remote_debugging_port {
            settings.browser.remote_debugging_port = port;
        }
        if let Some(port) = self.web_server_port {
            settings.web_server.port = port;
        }
        if let Some(dir) = &self.run_dir {
            settings.run.run_dir.clone_from(dir);
        }
        if self.verbose {
            settings.logging.level = "debug".to_owned();
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<ExfilSettings> {
    let path = path.cloned().unwrap_or_else(exfil_settings::settings_path);
    exfil_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

async fn run_command(settings: ExfilSettings, args: &RunArgs) -> Result<ExitCode> {
    let ns = run::namespace(args.open_url.as_deref());
    let paths = run::RunPaths::new(&settings.run.run_dir, &ns)?;
    exfil_core::logging::init_subscriber_with_file(&settings.logging.level, &paths.stdout_log())
        .with_context(|| format!("Failed to open {}", paths.stdout_log().display()))?;
    tracing::info!(namespace = %ns, url = args.open_url.as_deref().unwrap_or(""), "starting run");

    if exfil_settings::init_settings(settings).is_err() {
        tracing::warn!("settings were already initialized");
    }
    let settings = exfil_settings::get_settings();

    match run::run(settings, &paths, args.open_url.as_deref()).await? {
        None => {
            tracing::info!("Run complete");
            Ok(ExitCode::SUCCESS)
        }
        Some(cause) => {
            tracing::error!(cause = %cause, "Stopped with error");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn analyze_command(settings: &ExfilSettings, events: &Path) -> Result<ExitCode> {
    exfil_core::logging::init_subscriber(&settings.logging.level);
    let log = EventLog::read_from_file(events)
        .with_context(|| format!("Failed to read {}", events.display()))?;
    let results = analyze_all(&log, &IgnoredPages::new(&settings.web_server.url("")));
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.settings.as_ref())?;
    match cli.command {
        Command::Run(args) => {
            args.apply(&mut settings);
            run_command(settings, &args).await
        }
        Command::Analyze { events } => analyze_command(&settings, &events),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse_and_override_settings() {
        let cli = Cli::parse_from([
            "exfil-agent",
            "run",
            "--open-url",
            "https://a.example/",
            "--policy",
            "hostname",
            "--headless",
            "--remote-debugging-port",
            "9333",
            "--run-dir",
            "out",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.open_url.as_deref(), Some("https://a.example/"));

        let mut settings = ExfilSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.policy.kind, PolicyKind::Hostname);
        assert!(settings.browser.headless);
        assert!(!settings.browser.open_devtools);
        assert_eq!(settings.browser.remote_debugging_port, 9333);
        assert_eq!(settings.run.run_dir, "out");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn legacy_numeric_policy_is_accepted() {
        let cli = Cli::parse_from(["exfil-agent", "run", "--policy", "3", "--verbose"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut settings = ExfilSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.policy.kind, PolicyKind::FilterList);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn bad_policy_is_rejected() {
        assert!(Cli::try_parse_from(["exfil-agent", "run", "--policy", "paranoid"]).is_err());
    }

    #[test]
    fn analyze_takes_a_path_and_global_settings() {
        let cli = Cli::parse_from(["exfil-agent", "analyze", "run/x/logs/events.json", "--settings", "s.json"]);
        assert_eq!(cli.settings, Some(PathBuf::from("s.json")));
        assert!(matches!(cli.command, Command::Analyze { events } if events == PathBuf::from("run/x/logs/events.json")));
    }

    #[test]
    fn analyze_command_reads_saved_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        EventLog::new().write_to_file(&path).unwrap();
        let code = analyze_command(&ExfilSettings::default(), &path).unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
        assert!(analyze_command(&ExfilSettings::default(), &dir.path().join("missing.json")).is_err());
    }
}
