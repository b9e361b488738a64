//! `testbed run-unit` command handler

use std::io::Write;

use colored::Colorize;
use tracing::info;

use testbed_core::runner::{RunReport, UnitRunner};
use testbed_core::{TestbedConfig, TestbedError};

use crate::cli::RunUnitArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `run-unit` command.
///
/// The engine does blocking filesystem and process work, so the run
/// happens on tokio's blocking pool.
pub async fn execute(
    args: RunUnitArgs,
    config: &TestbedConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let runner = UnitRunner::from_config(config).map_err(TestbedError::from)?;
    info!(unit = %args.name, prereq = ?args.prereq.as_ref().map(|p| p.as_str()), "running unit");

    let report = tokio::task::spawn_blocking(move || runner.run(&args.name, args.prereq.as_ref()))
        .await
        .map_err(|e| CliError::Command(format!("run task failed: {e}")))??;

    writer.render(&report)?;
    Ok(())
}

impl Render for RunReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "Run {} {} (run id {})",
            self.unit.as_str().bold(),
            "PASSED".green().bold(),
            self.run_id
        )?;

        for rebuild in &self.rebuilds {
            writeln!(
                w,
                "  {} {} before {}: {}",
                "rebuilt".yellow(),
                rebuild.env.as_str().bold(),
                rebuild.unit,
                rebuild.reason
            )?;
        }
        for env in &self.seeded {
            writeln!(w, "  {} {} from foundation", "seeded".cyan(), env.as_str().bold())?;
        }

        if self.executed.is_empty() {
            writeln!(w, "  No units executed.")?;
            return Ok(());
        }

        writeln!(w)?;
        writeln!(w, "  {:<32} {:<20} {:>10}", "UNIT", "ENV", "DURATION")?;
        writeln!(w, "  {}", "-".repeat(64))?;
        for executed in &self.executed {
            writeln!(
                w,
                "  {:<32} {:<20} {:>8}ms",
                executed.unit.as_str(),
                executed.env.as_str(),
                executed.duration_ms
            )?;
        }
        Ok(())
    }
}
