//! `testbed inspect-env` command handler

use std::io::Write;

use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use testbed_core::types::UnitState;
use testbed_core::{
    EnvironmentManager, EnvironmentReport, TestbedConfig, TestbedError, UnitId, UnitRegistry,
};

use crate::cli::EnvTargetArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render, or_dash};

/// Execute the `inspect-env` command. Read-only: never creates the environment.
pub async fn execute(
    args: EnvTargetArgs,
    config: &TestbedConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let registry = UnitRegistry::from_config(config).map_err(TestbedError::from)?;
    let envs = EnvironmentManager::from_config(config);
    let name = args.name;

    let declared = registry.env(&name).is_some();
    let seeded = registry.seeds_from_foundation(&name);
    let order = registry.order_for(&name).to_vec();
    debug!(env = %name, declared, units = order.len(), "inspecting environment");

    let environment = tokio::task::spawn_blocking(move || envs.inspect(&name, &order))
        .await
        .map_err(|e| CliError::Command(format!("inspect task failed: {e}")))??;

    let report = InspectReport {
        interrupted: environment.interrupted().cloned().collect(),
        declared,
        seed_from_foundation: seeded,
        environment,
    };
    writer.render(&report)?;
    Ok(())
}

/// Marker, lock and foundation state of one environment.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    #[serde(flatten)]
    pub environment: EnvironmentReport,
    /// Whether the environment is declared in the configuration
    pub declared: bool,
    pub seed_from_foundation: bool,
    /// Units with a start marker but no completion marker
    pub interrupted: Vec<UnitId>,
}

impl Render for InspectReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let env = &self.environment;
        writeln!(w, "Environment: {}", env.name.as_str().bold())?;
        writeln!(w, "  Path: {}", env.root.display())?;

        if !env.exists {
            writeln!(w, "  State: {}", "not created".yellow())?;
            return Ok(());
        }
        let state = if self.interrupted.is_empty() {
            "clean".green()
        } else {
            "interrupted".red().bold()
        };
        writeln!(w, "  State: {}", state)?;
        if !self.declared {
            writeln!(w, "  {}", "not declared in configuration".yellow())?;
        }
        if self.seed_from_foundation {
            writeln!(w, "  Seeded from foundation: yes")?;
        }
        if let Some(at) = env.foundation_completed_at {
            writeln!(w, "  Foundation completed: {}", at.to_rfc3339())?;
        }

        writeln!(w)?;
        if env.units.is_empty() {
            writeln!(w, "  No units declared or recorded.")?;
        } else {
            writeln!(
                w,
                "  {:<28} {:<10} {:<36} {:<36}",
                "UNIT", "STATE", "STARTED", "COMPLETED"
            )?;
            writeln!(w, "  {}", "-".repeat(112))?;
            for unit in &env.units {
                let state = match unit.state {
                    UnitState::Completed => "completed".green(),
                    UnitState::Started => "started".red(),
                    UnitState::Absent => "absent".normal(),
                };
                let name = if unit.in_order {
                    unit.unit.to_string()
                } else {
                    format!("{} *", unit.unit)
                };
                writeln!(
                    w,
                    "  {:<28} {:<10} {:<36} {:<36}",
                    name,
                    state,
                    or_dash(unit.started_at.map(|t| t.to_rfc3339())),
                    or_dash(unit.completed_at.map(|t| t.to_rfc3339())),
                )?;
            }
        }

        if !env.locks.is_empty() {
            writeln!(w)?;
            writeln!(w, "  Locks:")?;
            for holder in &env.locks {
                let liveness = if holder.alive {
                    "alive".yellow()
                } else {
                    "stale".red()
                };
                writeln!(
                    w,
                    "    {} pid={} ({})",
                    holder.unit,
                    or_dash(holder.pid),
                    liveness
                )?;
            }
        }
        Ok(())
    }
}
