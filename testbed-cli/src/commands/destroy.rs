//! `testbed destroy-env` command handler

use std::io::Write;

use colored::Colorize;
use serde::Serialize;
use tracing::info;

use testbed_core::{EnvName, EnvironmentManager, TestbedConfig};

use crate::cli::EnvTargetArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `destroy-env` command.
///
/// Destroying an environment that does not exist succeeds with `existed: false`.
pub async fn execute(
    args: EnvTargetArgs,
    config: &TestbedConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let envs = EnvironmentManager::from_config(config);
    let name = args.name;
    info!(env = %name, "destroying environment");

    let report = tokio::task::spawn_blocking(move || -> Result<DestroyReport, CliError> {
        let existed = envs.exists(&name);
        envs.destroy(&name)?;
        Ok(DestroyReport {
            path: envs.locate(&name).root().display().to_string(),
            env: name,
            existed,
        })
    })
    .await
    .map_err(|e| CliError::Command(format!("destroy task failed: {e}")))??;

    writer.render(&report)?;
    Ok(())
}

/// Result of a `destroy-env` invocation.
#[derive(Debug, Serialize)]
pub struct DestroyReport {
    pub env: EnvName,
    pub path: String,
    /// Whether the directory was present before the call
    pub existed: bool,
}

impl Render for DestroyReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.existed {
            writeln!(
                w,
                "Environment {} {} ({})",
                self.env.as_str().bold(),
                "destroyed".red().bold(),
                self.path
            )
        } else {
            writeln!(
                w,
                "Environment {} does not exist, nothing to destroy",
                self.env.as_str().bold()
            )
        }
    }
}
