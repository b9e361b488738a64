//! `testbed foundation` command handler

use std::io::Write;

use colored::Colorize;
use serde::Serialize;
use tracing::info;

use testbed_core::{EnvName, FoundationStatus, TestbedConfig, TestbedError, UnitId, UnitRunner};

use crate::cli::{FoundationAction, FoundationArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `foundation` command.
pub async fn execute(
    args: FoundationArgs,
    config: &TestbedConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let runner = UnitRunner::from_config(config).map_err(TestbedError::from)?;
    match args.action {
        FoundationAction::Status => {
            let report = tokio::task::spawn_blocking(move || status_report(&runner))
                .await
                .map_err(|e| CliError::Command(format!("foundation task failed: {e}")))??;
            writer.render(&report)?;
        }
        FoundationAction::Rebuild => {
            info!("rebuilding foundation on request");
            let report = tokio::task::spawn_blocking(move || runner.rebuild_foundation())
                .await
                .map_err(|e| CliError::Command(format!("foundation task failed: {e}")))??;
            writer.render(&report)?;
        }
    }
    Ok(())
}

fn status_report(runner: &UnitRunner) -> Result<FoundationReport, CliError> {
    let cache = runner.foundation();
    Ok(FoundationReport {
        env: cache.env().clone(),
        unit: runner.registry().foundation_unit().cloned(),
        status: cache.status()?,
    })
}

/// Foundation cache status.
#[derive(Debug, Serialize)]
pub struct FoundationReport {
    pub env: EnvName,
    /// Bootstrap unit, if one is configured
    pub unit: Option<UnitId>,
    #[serde(flatten)]
    pub status: FoundationStatus,
}

impl Render for FoundationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Foundation: {}", self.env.as_str().bold())?;
        match &self.unit {
            Some(unit) => writeln!(w, "  Bootstrap unit: {unit}")?,
            None => writeln!(w, "  Bootstrap unit: {}", "not configured".yellow())?,
        }
        match &self.status {
            FoundationStatus::Missing => {
                writeln!(w, "  Status: {}", "missing".yellow().bold())?;
            }
            FoundationStatus::Fresh { built_at, age_secs } => {
                writeln!(w, "  Status: {}", "fresh".green().bold())?;
                writeln!(w, "  Built: {} ({} ago)", built_at.to_rfc3339(), human_age(*age_secs))?;
            }
            FoundationStatus::Stale { built_at, age_secs } => {
                writeln!(w, "  Status: {}", "stale".red().bold())?;
                writeln!(w, "  Built: {} ({} ago)", built_at.to_rfc3339(), human_age(*age_secs))?;
                writeln!(w, "  Run `testbed foundation rebuild` to refresh it.")?;
            }
        }
        Ok(())
    }
}

fn human_age(secs: u64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {}h", s / 86_400, (s % 86_400) / 3600),
    }
}
