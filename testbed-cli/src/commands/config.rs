//! `testbed config` command handler

use std::io::Write;
use std::path::Path;

use colored::Colorize;
use serde::Serialize;
use tracing::info;

use testbed_core::TestbedConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

const SECTIONS: [&str; 5] = ["general", "lock", "foundation", "environments", "units"];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

/// Load the file, apply overrides and run every validation, including the
/// prerequisite-cycle check performed while building the unit registry.
async fn execute_validate(config_path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %config_path.display(), "validating configuration");

    let report = match TestbedConfig::load(config_path).await {
        Ok(config) => ConfigValidationReport {
            source: config_path.display().to_string(),
            valid: true,
            errors: Vec::new(),
            units: config.units.len(),
            environments: config.environments.len(),
        },
        Err(e) => ConfigValidationReport {
            source: config_path.display().to_string(),
            valid: false,
            errors: vec![e.to_string()],
            units: 0,
            environments: 0,
        },
    };

    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }
    Ok(())
}

async fn execute_show(
    config_path: &Path,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading configuration");

    let config = TestbedConfig::load(config_path).await?;
    let report = ConfigReport {
        source: config_path.display().to_string(),
        config_toml: render_section(&config, section.as_deref())?,
        section,
    };

    writer.render(&report)?;
    Ok(())
}

/// Serialize the whole configuration, or only one top-level table of it.
fn render_section(config: &TestbedConfig, section: Option<&str>) -> Result<String, CliError> {
    let full = toml::to_string_pretty(config)
        .map_err(|e| CliError::Command(format!("failed to serialize config: {e}")))?;
    let Some(name) = section else {
        return Ok(full);
    };
    if !SECTIONS.contains(&name) {
        return Err(CliError::Command(format!(
            "unknown section: {name} (expected: {})",
            SECTIONS.join(", ")
        )));
    }

    let mut table: toml::Table = full
        .parse()
        .map_err(|e| CliError::Command(format!("failed to re-read config: {e}")))?;
    let mut only = toml::Table::new();
    if let Some(value) = table.remove(name) {
        only.insert(name.to_owned(), value);
    }
    toml::to_string_pretty(&only)
        .map_err(|e| CliError::Command(format!("failed to serialize section {name}: {e}")))
}

/// Configuration display report.
///
/// `config_toml` is only used for text rendering and skipped in JSON.
#[derive(Serialize)]
pub struct ConfigReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if let Some(ref section) = self.section {
            let section_label = format!("[{}]", section);
            writeln!(
                w,
                "Configuration {} (source: {})",
                section_label.bold(),
                self.source
            )?;
        } else {
            writeln!(w, "Configuration (source: {})", self.source.bold())?;
        }

        writeln!(w)?;
        write!(w, "{}", self.config_toml)
    }
}

/// Configuration validation report.
#[derive(Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    pub valid: bool,
    /// Validation error messages (empty if valid)
    pub errors: Vec<String>,
    pub units: usize,
    pub environments: usize,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Config Validation: {}", self.source.bold())?;

        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
            writeln!(
                w,
                "  Declared: {} unit(s), {} environment(s)",
                self.units, self.environments
            )?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
[general]
log_level = "debug"

[lock]
max_reclaim_attempts = 7

[[environments]]
name = "seq"
order = ["a"]

[[units]]
name = "a"
env = "seq"
command = ["true"]
"#;

    fn config() -> TestbedConfig {
        TestbedConfig::parse(TOML).expect("should parse")
    }

    #[test]
    fn test_render_section_lock_only() {
        let out = render_section(&config(), Some("lock")).expect("render");
        assert!(out.contains("[lock]"), "section header should be kept");
        assert!(out.contains("max_reclaim_attempts = 7"));
        assert!(!out.contains("log_level"), "other sections should be omitted");
    }

    #[test]
    fn test_render_section_units_array() {
        let out = render_section(&config(), Some("units")).expect("render");
        assert!(out.contains("[[units]]"));
        assert!(out.contains("name = \"a\""));
        assert!(!out.contains("[lock]"));
    }

    #[test]
    fn test_render_full_config() {
        let out = render_section(&config(), None).expect("render");
        assert!(out.contains("[general]"));
        assert!(out.contains("[[environments]]"));
    }

    #[test]
    fn test_render_section_unknown_is_rejected() {
        let err = render_section(&config(), Some("plugins")).expect_err("should reject");
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("unknown section"));
    }

    #[test]
    fn test_config_report_json_skips_toml() {
        let report = ConfigReport {
            source: "testbed.toml".to_owned(),
            section: Some("lock".to_owned()),
            config_toml: "[lock]".to_owned(),
        };

        let parsed = serde_json::to_value(&report).expect("serialize");

        assert_eq!(parsed["source"], "testbed.toml");
        assert_eq!(parsed["section"], "lock");
        assert!(parsed.get("config_toml").is_none());
    }

    #[test]
    fn test_config_validation_report_invalid() {
        let report = ConfigValidationReport {
            source: "bad.toml".to_owned(),
            valid: false,
            errors: vec!["prerequisite cycle detected: a -> b -> a".to_owned()],
            units: 0,
            environments: 0,
        };

        let mut buffer = Vec::new();
        report.render_text(&mut buffer).expect("render");

        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.contains("INVALID"));
        assert!(output.contains("a -> b -> a"));
    }

    #[test]
    fn test_config_validation_report_valid_counts() {
        let report = ConfigValidationReport {
            source: "testbed.toml".to_owned(),
            valid: true,
            errors: Vec::new(),
            units: 5,
            environments: 2,
        };

        let mut buffer = Vec::new();
        report.render_text(&mut buffer).expect("render");

        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.contains("VALID"));
        assert!(output.contains("5 unit(s), 2 environment(s)"));
        assert!(!output.contains("Error:"));
    }
}
