//! `testbed list` command handler

use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use testbed_core::{EnvName, EnvironmentManager, TestbedConfig, TestbedError, UnitId, UnitRegistry};

use crate::error::CliError;
use crate::output::{OutputWriter, Render, or_dash};

/// Execute the `list` command.
pub async fn execute(config: &TestbedConfig, writer: &OutputWriter) -> Result<(), CliError> {
    let registry = UnitRegistry::from_config(config).map_err(TestbedError::from)?;
    let envs = EnvironmentManager::from_config(config);

    let on_disk = tokio::task::spawn_blocking(move || envs.list())
        .await
        .map_err(|e| CliError::Command(format!("list task failed: {e}")))??;

    writer.render(&build_report(&registry, &on_disk))?;
    Ok(())
}

fn build_report(registry: &UnitRegistry, on_disk: &[EnvName]) -> ListReport {
    let mut units: Vec<UnitEntry> = registry
        .units()
        .map(|spec| UnitEntry {
            name: spec.id.clone(),
            env: spec.env.clone(),
            prereq: spec.prereq.clone(),
            standalone: spec.standalone,
            foundation: registry.foundation_unit() == Some(&spec.id),
        })
        .collect();
    units.sort_by(|a, b| a.name.cmp(&b.name));

    let mut environments: Vec<EnvEntry> = registry
        .environments()
        .map(|spec| EnvEntry {
            name: spec.name.clone(),
            declared: true,
            on_disk: on_disk.contains(&spec.name),
            seed_from_foundation: spec.seed_from_foundation,
            order: spec.order.clone(),
        })
        .collect();
    for name in on_disk {
        if registry.env(name).is_none() {
            environments.push(EnvEntry {
                name: name.clone(),
                declared: false,
                on_disk: true,
                seed_from_foundation: false,
                order: Vec::new(),
            });
        }
    }
    environments.sort_by(|a, b| a.name.cmp(&b.name));

    ListReport {
        foundation_env: registry.foundation_env().clone(),
        units,
        environments,
    }
}

/// Declared units and known environments.
#[derive(Debug, Serialize)]
pub struct ListReport {
    pub foundation_env: EnvName,
    pub units: Vec<UnitEntry>,
    pub environments: Vec<EnvEntry>,
}

#[derive(Debug, Serialize)]
pub struct UnitEntry {
    pub name: UnitId,
    pub env: EnvName,
    pub prereq: Option<UnitId>,
    pub standalone: bool,
    /// Whether this unit bootstraps the foundation environment
    pub foundation: bool,
}

#[derive(Debug, Serialize)]
pub struct EnvEntry {
    pub name: EnvName,
    pub declared: bool,
    pub on_disk: bool,
    pub seed_from_foundation: bool,
    pub order: Vec<UnitId>,
}

impl Render for ListReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Units ({}):", self.units.len())?;
        if self.units.is_empty() {
            writeln!(w, "  (none)")?;
        } else {
            writeln!(w, "  {:<28} {:<20} {:<28} {}", "NAME", "ENV", "PREREQ", "FLAGS")?;
            writeln!(w, "  {}", "-".repeat(88))?;
            for unit in &self.units {
                let mut flags = Vec::new();
                if unit.standalone {
                    flags.push("standalone");
                }
                if unit.foundation {
                    flags.push("foundation");
                }
                writeln!(
                    w,
                    "  {:<28} {:<20} {:<28} {}",
                    unit.name.as_str(),
                    unit.env.as_str(),
                    or_dash(unit.prereq.as_ref()),
                    flags.join(",")
                )?;
            }
        }

        writeln!(w)?;
        writeln!(
            w,
            "Environments ({}, foundation: {}):",
            self.environments.len(),
            self.foundation_env.as_str().bold()
        )?;
        if self.environments.is_empty() {
            writeln!(w, "  (none)")?;
        }
        for env in &self.environments {
            let presence = if env.on_disk {
                "present".green()
            } else {
                "absent".normal()
            };
            let mut line = format!("  {:<20} {}", env.name.as_str(), presence);
            if !env.declared {
                line.push_str(&format!(" {}", "undeclared".yellow()));
            }
            if env.seed_from_foundation {
                line.push_str(" seeded");
            }
            if !env.order.is_empty() {
                let order: Vec<&str> = env.order.iter().map(UnitId::as_str).collect();
                line.push_str(&format!(" [{}]", order.join(" -> ")));
            }
            writeln!(w, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
[foundation]
unit = "bootstrap"

[[environments]]
name = "seq"
order = ["first", "second"]
seed_from_foundation = true

[[units]]
name = "bootstrap"
env = "foundation"
command = ["true"]

[[units]]
name = "second"
env = "seq"
prereq = "first"
command = ["true"]

[[units]]
name = "first"
env = "seq"
command = ["true"]

[[units]]
name = "lint"
standalone = true
command = ["true"]
"#;

    fn registry() -> UnitRegistry {
        let config = TestbedConfig::parse(TOML).expect("should parse");
        UnitRegistry::from_config(&config).expect("registry")
    }

    #[test]
    fn test_build_report_sorts_and_flags_units() {
        let report = build_report(&registry(), &[]);

        let names: Vec<&str> = report.units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["bootstrap", "first", "lint", "second"]);
        let bootstrap = &report.units[0];
        assert!(bootstrap.foundation);
        let lint = &report.units[2];
        assert!(lint.standalone);
    }

    #[test]
    fn test_build_report_merges_undeclared_disk_environments() {
        // Given: an environment left on disk that no longer appears in the config
        let leftover: EnvName = "old-run".parse().expect("env");
        let seq: EnvName = "seq".parse().expect("env");

        // When
        let report = build_report(&registry(), &[leftover.clone(), seq.clone()]);

        // Then
        let old = report
            .environments
            .iter()
            .find(|e| e.name == leftover)
            .expect("leftover should be listed");
        assert!(!old.declared);
        assert!(old.on_disk);
        let declared = report
            .environments
            .iter()
            .find(|e| e.name == seq)
            .expect("seq should be listed");
        assert!(declared.declared && declared.on_disk && declared.seed_from_foundation);
    }

    #[test]
    fn test_list_report_render_text() {
        let report = build_report(&registry(), &[]);
        let mut buffer = Vec::new();
        report.render_text(&mut buffer).expect("render");
        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.contains("Units (4):"));
        assert!(output.contains("first -> second"));
        assert!(output.contains("standalone"));
    }
}
