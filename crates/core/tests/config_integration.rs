//! testbed.toml 통합 설정 테스트
//!
//! - testbed.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 잘못된 선언 에러 테스트

use testbed_core::config::TestbedConfig;
use testbed_core::error::{ConfigError, TestbedError};
use testbed_core::registry::UnitRegistry;

const EXAMPLE: &str = include_str!("../../../testbed.toml.example");

// =============================================================================
// testbed.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let config = TestbedConfig::parse(EXAMPLE).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "pretty");
    assert_eq!(config.general.env_root, ".testbed/envs");
    assert_eq!(config.general.work_dir, "work");
}

#[test]
fn example_config_passes_validation() {
    let config = TestbedConfig::parse(EXAMPLE).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_scalars_match_code_defaults() {
    let config = TestbedConfig::parse(EXAMPLE).expect("should parse");
    let defaults = TestbedConfig::default();

    assert_eq!(config.general.log_level, defaults.general.log_level);
    assert_eq!(config.general.log_format, defaults.general.log_format);
    assert_eq!(config.general.env_root, defaults.general.env_root);
    assert_eq!(config.general.work_dir, defaults.general.work_dir);
    assert_eq!(
        config.lock.max_reclaim_attempts,
        defaults.lock.max_reclaim_attempts
    );
    assert_eq!(config.lock.init_grace_secs, defaults.lock.init_grace_secs);
    assert_eq!(config.foundation.env, defaults.foundation.env);
    assert_eq!(
        config.foundation.stale_after_hours,
        defaults.foundation.stale_after_hours
    );
}

#[test]
fn example_registry_has_declared_chain() {
    let config = TestbedConfig::parse(EXAMPLE).expect("should parse");
    let registry = UnitRegistry::from_config(&config).expect("registry should build");

    let env = "sequential".parse().expect("valid env name");
    let order: Vec<&str> = registry.order_for(&env).iter().map(|u| u.as_str()).collect();
    assert_eq!(order, ["01-setup", "02-build", "03-package"]);
    assert!(registry.seeds_from_foundation(&env));
    assert_eq!(
        registry.foundation_unit().map(|u| u.as_str()),
        Some("bootstrap")
    );

    let docs = registry
        .unit(&"docs-check".parse().expect("valid unit name"))
        .expect("docs-check should be registered");
    assert!(docs.standalone);
    assert_eq!(docs.env.as_str(), "docs-check");
}

// =============================================================================
// 부분 설정 테스트
// =============================================================================

#[test]
fn partial_config_only_lock_section() {
    let toml = r#"
[lock]
max_reclaim_attempts = 7
"#;
    let config = TestbedConfig::parse(toml).expect("should parse");
    assert_eq!(config.lock.max_reclaim_attempts, 7);
    // 다른 필드는 기본값
    assert_eq!(config.lock.init_grace_secs, 5);
    assert_eq!(config.general.log_level, "info");
    assert!(config.units.is_empty());
    config.validate().expect("partial config should validate");
}

#[test]
fn unit_without_env_is_rejected_unless_standalone() {
    // Given: 환경을 지정하지 않은 일반 유닛
    let toml = r#"
[[units]]
name = "floating"
command = ["true"]
"#;
    let config = TestbedConfig::parse(toml).expect("should parse");

    // When
    let err = config.validate().expect_err("should reject");

    // Then
    match err {
        TestbedError::Config(ConfigError::InvalidValue { field, .. }) => {
            assert_eq!(field, "units[0].env");
        }
        other => panic!("expected invalid value, got {other:?}"),
    }
}

#[test]
fn static_prerequisite_cycle_is_rejected() {
    let toml = r#"
[[environments]]
name = "loop"

[[units]]
name = "a"
env = "loop"
prereq = "b"
command = ["true"]

[[units]]
name = "b"
env = "loop"
prereq = "a"
command = ["true"]
"#;
    let config = TestbedConfig::parse(toml).expect("should parse");
    let err = config.validate().expect_err("cycle should be rejected");
    assert!(err.to_string().contains("cycle"), "got: {err}");
}

#[test]
fn seeding_without_bootstrap_unit_is_rejected() {
    let toml = r#"
[[environments]]
name = "seq"
seed_from_foundation = true
"#;
    let config = TestbedConfig::parse(toml).expect("should parse");
    let err = config.validate().expect_err("should reject");
    assert!(err.to_string().contains("foundation.unit"), "got: {err}");
}

#[test]
fn order_entry_from_other_environment_is_rejected() {
    let toml = r#"
[[environments]]
name = "left"
order = ["r"]

[[environments]]
name = "right"

[[units]]
name = "r"
env = "right"
command = ["true"]
"#;
    let config = TestbedConfig::parse(toml).expect("should parse");
    assert!(config.validate().is_err());
}

// =============================================================================
// 파일 로딩 테스트
// =============================================================================

#[tokio::test]
async fn load_from_file_applies_validation() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("testbed.toml");
    std::fs::write(&path, "[general]\nlog_level = \"loud\"\n").expect("should write");

    let err = TestbedConfig::from_file(&path)
        .await
        .expect_err("invalid level should fail");
    assert!(err.to_string().contains("general.log_level"));
}

#[tokio::test]
async fn load_example_from_disk() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("testbed.toml");
    std::fs::write(&path, EXAMPLE).expect("should write");

    let config = TestbedConfig::from_file(&path)
        .await
        .expect("example should load");
    assert_eq!(config.units.len(), 5);
    assert_eq!(config.environments.len(), 1);
}
