//! 설정 관리 — testbed.toml 파싱 및 런타임 설정
//!
//! [`TestbedConfig`]는 엔진 전체 설정과 유닛/환경 선언을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`TESTBED_GENERAL_ENV_ROOT=/tmp/envs` 형식)
//! 3. 설정 파일 (`testbed.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), testbed_core::error::TestbedError> {
//! use testbed_core::config::TestbedConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = TestbedConfig::load("testbed.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = TestbedConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, TestbedError};
use crate::registry::UnitRegistry;
use crate::types::EnvName;

/// testbed 통합 설정
///
/// `testbed.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestbedConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 락 설정
    #[serde(default)]
    pub lock: LockConfig,
    /// 파운데이션 캐시 설정
    #[serde(default)]
    pub foundation: FoundationConfig,
    /// 순서가 있는 공유 환경 선언
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
    /// 유닛 선언
    #[serde(default)]
    pub units: Vec<UnitConfig>,
}

impl TestbedConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 설정 로딩 순서:
    /// 1. TOML 파일 파싱
    /// 2. 환경변수 오버라이드 적용
    /// 3. 유효성 검증
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TestbedError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, TestbedError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TestbedError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                TestbedError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, TestbedError> {
        toml::from_str(toml_str).map_err(|e| {
            TestbedError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `TESTBED_{SECTION}_{FIELD}`
    /// 예: `TESTBED_LOCK_MAX_RECLAIM_ATTEMPTS=5`
    ///
    /// 유닛/환경 선언은 오버라이드 대상이 아닙니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "TESTBED_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "TESTBED_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.env_root, "TESTBED_GENERAL_ENV_ROOT");
        override_string(&mut self.general.work_dir, "TESTBED_GENERAL_WORK_DIR");

        // Lock
        override_u32(
            &mut self.lock.max_reclaim_attempts,
            "TESTBED_LOCK_MAX_RECLAIM_ATTEMPTS",
        );
        override_u64(&mut self.lock.init_grace_secs, "TESTBED_LOCK_INIT_GRACE_SECS");

        // Foundation
        override_string(&mut self.foundation.env, "TESTBED_FOUNDATION_ENV");
        override_u64(
            &mut self.foundation.stale_after_hours,
            "TESTBED_FOUNDATION_STALE_AFTER_HOURS",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 스칼라 값을 검사한 뒤, 유닛/환경 선언은 레지스트리를 실제로 구성하여
    /// 참조 무결성과 전제 조건 순환 여부까지 확인합니다.
    pub fn validate(&self) -> Result<(), TestbedError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.general.env_root.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "general.env_root".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        // work_dir은 환경 루트 바로 아래의 단일 경로 요소여야 함
        if let Err(e) = EnvName::new(self.general.work_dir.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.work_dir".to_owned(),
                reason: e.to_string(),
            }
            .into());
        }

        if self.lock.max_reclaim_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lock.max_reclaim_attempts".to_owned(),
                reason: "must be at least 1".to_owned(),
            }
            .into());
        }

        if self.foundation.stale_after_hours == 0 {
            return Err(ConfigError::InvalidValue {
                field: "foundation.stale_after_hours".to_owned(),
                reason: "must be at least 1".to_owned(),
            }
            .into());
        }

        UnitRegistry::from_config(self)?;

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 모든 환경이 생성되는 루트 디렉토리
    pub env_root: String,
    /// 환경 루트 아래 작업 트리 디렉토리 이름
    pub work_dir: String,
}

impl GeneralConfig {
    /// 환경 루트 경로
    pub fn env_root_path(&self) -> PathBuf {
        PathBuf::from(&self.env_root)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
            env_root: ".testbed/envs".to_owned(),
            work_dir: "work".to_owned(),
        }
    }
}

/// 락 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// 오래된 락 회수 최대 시도 횟수
    pub max_reclaim_attempts: u32,
    /// pid 파일이 아직 없는 락 디렉토리를 초기화 중으로 간주하는 시간 (초)
    pub init_grace_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_reclaim_attempts: 3,
            init_grace_secs: 5,
        }
    }
}

/// 파운데이션 캐시 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FoundationConfig {
    /// 파운데이션 환경 이름
    pub env: String,
    /// 파운데이션을 구축하는 부트스트랩 유닛
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// 이 시간(시간 단위)보다 오래된 파운데이션은 경고
    pub stale_after_hours: u64,
}

impl Default for FoundationConfig {
    fn default() -> Self {
        Self {
            env: "foundation".to_owned(),
            unit: None,
            stale_after_hours: 24,
        }
    }
}

/// 공유 환경 선언
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// 환경 이름
    pub name: String,
    /// 이 환경을 공유하는 유닛들의 전체 순서
    pub order: Vec<String>,
    /// 새로 생성될 때 파운데이션 작업 트리를 복사해 시작할지 여부
    pub seed_from_foundation: bool,
}

/// 유닛 선언
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    /// 유닛 이름
    pub name: String,
    /// 유닛이 실행되는 환경 (standalone 유닛은 생략 시 유닛 이름 사용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// 직전 전제 조건 유닛
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prereq: Option<String>,
    /// 항상 새 환경에서 실행되며 오염 검사를 받지 않음
    pub standalone: bool,
    /// 작업 트리에서 실행할 명령 (argv)
    pub command: Vec<String>,
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const CHAIN_TOML: &str = r#"
[foundation]
env = "foundation"
unit = "bootstrap"

[[environments]]
name = "sequential"
order = ["01-setup", "02-build", "03-package"]
seed_from_foundation = true

[[units]]
name = "bootstrap"
env = "foundation"
command = ["sh", "-c", "echo bootstrap"]

[[units]]
name = "01-setup"
env = "sequential"
command = ["sh", "-c", "true"]

[[units]]
name = "02-build"
env = "sequential"
prereq = "01-setup"
command = ["sh", "-c", "true"]

[[units]]
name = "03-package"
env = "sequential"
prereq = "02-build"
command = ["sh", "-c", "true"]

[[units]]
name = "docs-check"
standalone = true
command = ["sh", "-c", "true"]
"#;

    #[test]
    fn default_config_has_sane_values() {
        let config = TestbedConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.general.work_dir, "work");
        assert_eq!(config.lock.max_reclaim_attempts, 3);
        assert_eq!(config.foundation.env, "foundation");
        assert!(config.foundation.unit.is_none());
        assert!(config.units.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        let config = TestbedConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = TestbedConfig::parse("").unwrap();
        assert_eq!(config.general.env_root, ".testbed/envs");
        assert_eq!(config.foundation.stale_after_hours, 24);
    }

    #[test]
    fn from_str_chain_toml() {
        let config = TestbedConfig::parse(CHAIN_TOML).unwrap();
        assert_eq!(config.environments.len(), 1);
        assert_eq!(config.environments[0].order.len(), 3);
        assert!(config.environments[0].seed_from_foundation);
        assert_eq!(config.units.len(), 5);
        assert_eq!(config.units[2].prereq.as_deref(), Some("01-setup"));
        assert!(config.units[4].standalone);
        config.validate().unwrap();
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let result = TestbedConfig::parse("invalid = [[[toml");
        assert!(matches!(
            result.unwrap_err(),
            TestbedError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = TestbedConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let mut config = TestbedConfig::default();
        config.general.log_format = "xml".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_format"));
    }

    #[test]
    fn validate_rejects_nested_work_dir() {
        let mut config = TestbedConfig::default();
        config.general.work_dir = "work/tree".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("work_dir"));
    }

    #[test]
    fn validate_rejects_zero_reclaim_attempts() {
        let mut config = TestbedConfig::default();
        config.lock.max_reclaim_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_reclaim_attempts"));
    }

    #[test]
    fn validate_rejects_unknown_prereq() {
        let mut config = TestbedConfig::parse(CHAIN_TOML).unwrap();
        config.units[1].prereq = Some("missing".to_owned());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    #[serial]
    fn env_overrides_apply_to_scalars() {
        let mut config = TestbedConfig::default();
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe {
            std::env::set_var("TESTBED_GENERAL_ENV_ROOT", "/tmp/testbed-envs");
            std::env::set_var("TESTBED_LOCK_MAX_RECLAIM_ATTEMPTS", "7");
        }
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("TESTBED_GENERAL_ENV_ROOT");
            std::env::remove_var("TESTBED_LOCK_MAX_RECLAIM_ATTEMPTS");
        }
        assert_eq!(config.general.env_root, "/tmp/testbed-envs");
        assert_eq!(config.lock.max_reclaim_attempts, 7);
    }

    #[test]
    #[serial]
    fn env_override_invalid_number_keeps_original() {
        let mut val = 3u32;
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var("TEST_TESTBED_U32_BAD", "three") };
        override_u32(&mut val, "TEST_TESTBED_U32_BAD");
        unsafe { std::env::remove_var("TEST_TESTBED_U32_BAD") };
        assert_eq!(val, 3);
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = TestbedConfig::parse(CHAIN_TOML).unwrap();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = TestbedConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.units.len(), config.units.len());
        assert_eq!(parsed.foundation.unit, config.foundation.unit);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let result = TestbedConfig::from_file("/nonexistent/path/testbed.toml").await;
        assert!(matches!(
            result.unwrap_err(),
            TestbedError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
