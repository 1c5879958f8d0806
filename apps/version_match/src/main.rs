use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use convergence::{RunOutcome, RunReport, UpgradeResult};
use panorama::PanoramaClient;
use shared::error::ConvergenceError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

/// Upgrade NSX firewalls to the software version most of the device-group runs.
#[derive(Parser, Debug)]
#[command(name = "nsx-version-match")]
struct Cli {
    /// TOML settings file (defaults to ./version-match.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    hostname: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    accept_invalid_certs: bool,
    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,
    /// Skip firewalls that fail to upgrade instead of stopping the run
    #[arg(long)]
    continue_on_error: bool,
    /// Log the upgrades that would be issued without sending them
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.hostname {
            settings.hostname = v;
        }
        if let Some(v) = self.port {
            settings.port = v;
        }
        if let Some(v) = self.username {
            settings.username = v;
        }
        if let Some(v) = self.password {
            settings.password = v;
        }
        if let Some(v) = self.api_key {
            settings.api_key = Some(v);
        }
        if self.accept_invalid_certs {
            settings.accept_invalid_certs = true;
        }
        if let Some(v) = self.log_level {
            settings.log_level = v.to_ascii_lowercase();
        }
        if self.continue_on_error {
            settings.stop_on_error = false;
        }
        if self.dry_run {
            settings.dry_run = true;
        }
    }

    fn settings(self) -> anyhow::Result<Settings> {
        let mut settings = load_settings(self.config.as_deref())?;
        self.apply(&mut settings);
        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let settings = match Cli::parse().settings() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&settings.log_level))
        .with_writer(std::io::stderr)
        .init();

    match converge(&settings).await {
        Ok(outcome) => {
            log_outcome(&outcome);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn converge(settings: &Settings) -> anyhow::Result<RunOutcome> {
    info!(hostname = %settings.hostname, "connecting to Panorama");
    let client = PanoramaClient::connect(&settings.panorama_config())
        .await
        .with_context(|| format!("failed to log in to Panorama at {}", settings.hostname))?;

    let outcome = convergence::run(&client, &settings.run_config()).await?;
    Ok(outcome)
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ConvergenceError>()
        .map(ConvergenceError::exit_code)
        .unwrap_or(1)
}

fn log_outcome(outcome: &RunOutcome) {
    let report: &RunReport = match outcome {
        RunOutcome::AlreadyConverged { .. } => return,
        RunOutcome::Dispatched(report) => report,
    };

    let count = |result: UpgradeResult| {
        report
            .outcomes
            .iter()
            .filter(|device| device.result == result)
            .count()
    };
    let failed = report.failures().count();
    if failed > 0 {
        let serials: Vec<&str> = report.failures().map(|device| device.serial.as_str()).collect();
        warn!(failed, serials = ?serials, "firewalls not upgraded");
    }
    info!(
        group = %report.group,
        target = %report.target,
        upgraded = count(UpgradeResult::Upgraded),
        dry_run = count(UpgradeResult::DryRun),
        failed,
        skipped = report.unparsable.len(),
        unchanged = report.unchanged.len(),
        "version match complete"
    );
}
