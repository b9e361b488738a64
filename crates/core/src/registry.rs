//! 유닛 레지스트리 — 유닛/환경 식별자에서 메타데이터로의 중앙 매핑
//!
//! 레지스트리는 다음을 보장합니다:
//! - 모든 유닛은 정확히 하나의 환경에 속함
//! - 공유 환경의 `order`는 그 환경에 속한 등록된 유닛만 중복 없이 나열
//! - 전제 조건은 등록된 유닛을 가리키며 정적 순환이 없음
//! - 파운데이션에서 시드하는 환경이 있으면 부트스트랩 유닛이 존재

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::body::{CommandBody, UnitBody};
use crate::config::TestbedConfig;
use crate::error::ConfigError;
use crate::types::{EnvName, UnitId};

/// 등록된 유닛 메타데이터
#[derive(Clone)]
pub struct UnitSpec {
    /// 유닛 식별자
    pub id: UnitId,
    /// 유닛이 실행되는 환경
    pub env: EnvName,
    /// 선언된 직전 전제 조건
    pub prereq: Option<UnitId>,
    /// 항상 새 환경에서 실행, 오염 검사 면제
    pub standalone: bool,
    /// 유닛 본문
    pub body: Arc<dyn UnitBody>,
}

impl UnitSpec {
    pub fn new(id: UnitId, env: EnvName, body: Arc<dyn UnitBody>) -> Self {
        Self {
            id,
            env,
            prereq: None,
            standalone: false,
            body,
        }
    }

    /// 직전 전제 조건을 지정합니다.
    pub fn with_prereq(mut self, prereq: UnitId) -> Self {
        self.prereq = Some(prereq);
        self
    }

    /// standalone 유닛으로 지정합니다.
    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }
}

impl std::fmt::Debug for UnitSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitSpec")
            .field("id", &self.id)
            .field("env", &self.env)
            .field("prereq", &self.prereq)
            .field("standalone", &self.standalone)
            .field("body", &self.body.describe())
            .finish()
    }
}

/// 등록된 환경 메타데이터
#[derive(Debug, Clone)]
pub struct EnvSpec {
    /// 환경 이름
    pub name: EnvName,
    /// 환경을 공유하는 유닛의 전체 순서
    pub order: Vec<UnitId>,
    /// 생성 시 파운데이션 작업 트리를 복사할지 여부
    pub seed_from_foundation: bool,
}

impl EnvSpec {
    pub fn new(name: EnvName) -> Self {
        Self {
            name,
            order: Vec::new(),
            seed_from_foundation: false,
        }
    }

    pub fn with_order(mut self, order: Vec<UnitId>) -> Self {
        self.order = order;
        self
    }

    pub fn seeded_from_foundation(mut self) -> Self {
        self.seed_from_foundation = true;
        self
    }
}

/// 유닛 레지스트리
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    units: BTreeMap<UnitId, UnitSpec>,
    envs: BTreeMap<EnvName, EnvSpec>,
    foundation_env: EnvName,
    foundation_unit: Option<UnitId>,
}

impl UnitRegistry {
    /// 빌더를 생성합니다.
    pub fn builder(foundation_env: EnvName) -> RegistryBuilder {
        RegistryBuilder {
            foundation_env,
            foundation_unit: None,
            envs: Vec::new(),
            units: Vec::new(),
        }
    }

    /// 설정 파일의 선언으로부터 레지스트리를 구성합니다.
    ///
    /// 유닛 본문은 각 유닛의 `command`로 만든 [`CommandBody`]입니다.
    pub fn from_config(config: &TestbedConfig) -> Result<Self, ConfigError> {
        let foundation_env = parse_env("foundation.env", &config.foundation.env)?;
        let mut builder = Self::builder(foundation_env);

        if let Some(unit) = &config.foundation.unit {
            builder = builder.foundation_unit(parse_unit("foundation.unit", unit)?);
        }

        for (i, env) in config.environments.iter().enumerate() {
            let name = parse_env(&format!("environments[{i}].name"), &env.name)?;
            let order = env
                .order
                .iter()
                .map(|u| parse_unit(&format!("environments[{i}].order"), u))
                .collect::<Result<Vec<_>, _>>()?;
            let mut spec = EnvSpec::new(name).with_order(order);
            spec.seed_from_foundation = env.seed_from_foundation;
            builder = builder.environment(spec);
        }

        for (i, unit) in config.units.iter().enumerate() {
            let id = parse_unit(&format!("units[{i}].name"), &unit.name)?;
            let env = match (&unit.env, unit.standalone) {
                (Some(env), _) => parse_env(&format!("units[{i}].env"), env)?,
                (None, true) => parse_env(&format!("units[{i}].name"), id.as_str())?,
                (None, false) => {
                    return Err(invalid(
                        &format!("units[{i}].env"),
                        format!("unit '{id}' must name its environment unless it is standalone"),
                    ));
                }
            };
            let body = CommandBody::from_argv(&unit.command).ok_or_else(|| {
                invalid(
                    &format!("units[{i}].command"),
                    format!("unit '{id}' has an empty command"),
                )
            })?;

            let mut spec = UnitSpec::new(id, env, Arc::new(body));
            if let Some(prereq) = &unit.prereq {
                spec = spec.with_prereq(parse_unit(&format!("units[{i}].prereq"), prereq)?);
            }
            spec.standalone = unit.standalone;
            builder = builder.unit(spec);
        }

        builder.build()
    }

    /// 유닛 메타데이터 조회
    pub fn unit(&self, id: &UnitId) -> Option<&UnitSpec> {
        self.units.get(id)
    }

    /// 환경 메타데이터 조회
    pub fn env(&self, name: &EnvName) -> Option<&EnvSpec> {
        self.envs.get(name)
    }

    /// 환경의 선언된 유닛 순서 (없으면 빈 슬라이스)
    pub fn order_for(&self, env: &EnvName) -> &[UnitId] {
        self.envs.get(env).map(|e| e.order.as_slice()).unwrap_or(&[])
    }

    /// 환경이 파운데이션에서 시드되는지 여부
    pub fn seeds_from_foundation(&self, env: &EnvName) -> bool {
        self.envs.get(env).is_some_and(|e| e.seed_from_foundation)
    }

    /// 등록된 모든 유닛 (이름 순)
    pub fn units(&self) -> impl Iterator<Item = &UnitSpec> {
        self.units.values()
    }

    /// 등록된 모든 환경 (이름 순)
    pub fn environments(&self) -> impl Iterator<Item = &EnvSpec> {
        self.envs.values()
    }

    pub fn foundation_env(&self) -> &EnvName {
        &self.foundation_env
    }

    pub fn foundation_unit(&self) -> Option<&UnitId> {
        self.foundation_unit.as_ref()
    }
}

/// [`UnitRegistry`] 빌더
///
/// `build()`에서 모든 교차 참조를 한 번에 검증합니다.
pub struct RegistryBuilder {
    foundation_env: EnvName,
    foundation_unit: Option<UnitId>,
    envs: Vec<EnvSpec>,
    units: Vec<UnitSpec>,
}

impl RegistryBuilder {
    /// 파운데이션 부트스트랩 유닛을 지정합니다.
    pub fn foundation_unit(mut self, unit: UnitId) -> Self {
        self.foundation_unit = Some(unit);
        self
    }

    /// 공유 환경을 선언합니다.
    pub fn environment(mut self, spec: EnvSpec) -> Self {
        self.envs.push(spec);
        self
    }

    /// 유닛을 등록합니다.
    pub fn unit(mut self, spec: UnitSpec) -> Self {
        self.units.push(spec);
        self
    }

    /// 검증 후 레지스트리를 생성합니다.
    pub fn build(self) -> Result<UnitRegistry, ConfigError> {
        let mut envs: BTreeMap<EnvName, EnvSpec> = BTreeMap::new();
        for spec in self.envs {
            if spec.name == self.foundation_env && spec.seed_from_foundation {
                return Err(invalid(
                    "environments",
                    format!("foundation environment '{}' cannot seed from itself", spec.name),
                ));
            }
            if envs.contains_key(&spec.name) {
                return Err(invalid(
                    "environments",
                    format!("environment '{}' is declared twice", spec.name),
                ));
            }
            envs.insert(spec.name.clone(), spec);
        }
        envs.entry(self.foundation_env.clone())
            .or_insert_with(|| EnvSpec::new(self.foundation_env.clone()));

        let mut units: BTreeMap<UnitId, UnitSpec> = BTreeMap::new();
        for spec in self.units {
            if units.contains_key(&spec.id) {
                return Err(invalid(
                    "units",
                    format!("unit '{}' is declared twice", spec.id),
                ));
            }
            if spec.standalone {
                if envs.contains_key(&spec.env) {
                    return Err(invalid(
                        "units",
                        format!(
                            "standalone unit '{}' cannot use shared environment '{}'",
                            spec.id, spec.env
                        ),
                    ));
                }
                if let Some(other) = units.values().find(|u| u.standalone && u.env == spec.env) {
                    return Err(invalid(
                        "units",
                        format!(
                            "standalone units '{}' and '{}' both claim environment '{}'",
                            other.id, spec.id, spec.env
                        ),
                    ));
                }
            } else if !envs.contains_key(&spec.env) {
                return Err(invalid(
                    "units",
                    format!(
                        "unit '{}' references undeclared environment '{}'",
                        spec.id, spec.env
                    ),
                ));
            }
            units.insert(spec.id.clone(), spec);
        }

        for env in envs.values() {
            let mut seen = BTreeSet::new();
            for id in &env.order {
                let Some(unit) = units.get(id) else {
                    return Err(invalid(
                        "environments.order",
                        format!("environment '{}' orders unknown unit '{id}'", env.name),
                    ));
                };
                if unit.env != env.name {
                    return Err(invalid(
                        "environments.order",
                        format!(
                            "environment '{}' orders unit '{id}' which runs in '{}'",
                            env.name, unit.env
                        ),
                    ));
                }
                if !seen.insert(id) {
                    return Err(invalid(
                        "environments.order",
                        format!("environment '{}' lists unit '{id}' twice", env.name),
                    ));
                }
            }
        }

        for unit in units.values() {
            if let Some(prereq) = &unit.prereq {
                if prereq == &unit.id {
                    return Err(invalid(
                        "units.prereq",
                        format!("unit '{}' cannot be its own prerequisite", unit.id),
                    ));
                }
                if !units.contains_key(prereq) {
                    return Err(invalid(
                        "units.prereq",
                        format!("unit '{}' requires unknown unit '{prereq}'", unit.id),
                    ));
                }
            }
        }

        for start in units.keys() {
            let mut chain = vec![start];
            let mut current = start;
            while let Some(next) = units.get(current).and_then(|u| u.prereq.as_ref()) {
                if chain.contains(&next) {
                    chain.push(next);
                    let rendered: Vec<&str> = chain.iter().map(|u| u.as_str()).collect();
                    return Err(invalid(
                        "units.prereq",
                        format!("prerequisite cycle: {}", rendered.join(" -> ")),
                    ));
                }
                chain.push(next);
                current = next;
            }
        }

        let seeding = envs.values().filter(|e| e.seed_from_foundation).count();
        match &self.foundation_unit {
            Some(id) => {
                let Some(unit) = units.get(id) else {
                    return Err(invalid(
                        "foundation.unit",
                        format!("foundation unit '{id}' is not declared"),
                    ));
                };
                if unit.env != self.foundation_env || unit.standalone {
                    return Err(invalid(
                        "foundation.unit",
                        format!(
                            "foundation unit '{id}' must run in environment '{}'",
                            self.foundation_env
                        ),
                    ));
                }
            }
            None if seeding > 0 => {
                return Err(invalid(
                    "foundation.unit",
                    format!("{seeding} environment(s) seed from the foundation but no bootstrap unit is declared"),
                ));
            }
            None => {}
        }

        Ok(UnitRegistry {
            units,
            envs,
            foundation_env: self.foundation_env,
            foundation_unit: self.foundation_unit,
        })
    }
}

fn invalid(field: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
}

fn parse_env(field: &str, raw: &str) -> Result<EnvName, ConfigError> {
    EnvName::new(raw).map_err(|e| invalid(field, e.to_string()))
}

fn parse_unit(field: &str, raw: &str) -> Result<UnitId, ConfigError> {
    UnitId::new(raw).map_err(|e| invalid(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::UnitContext;
    use crate::error::BodyError;

    fn noop() -> Arc<dyn UnitBody> {
        Arc::new(|_: &UnitContext<'_>| -> Result<(), BodyError> { Ok(()) })
    }

    fn u(name: &str) -> UnitId {
        name.parse().unwrap()
    }

    fn e(name: &str) -> EnvName {
        name.parse().unwrap()
    }

    fn chain_builder() -> RegistryBuilder {
        UnitRegistry::builder(e("foundation"))
            .environment(EnvSpec::new(e("seq")).with_order(vec![u("a"), u("b"), u("c")]))
            .unit(UnitSpec::new(u("a"), e("seq"), noop()))
            .unit(UnitSpec::new(u("b"), e("seq"), noop()).with_prereq(u("a")))
            .unit(UnitSpec::new(u("c"), e("seq"), noop()).with_prereq(u("b")))
    }

    #[test]
    fn builds_valid_chain() {
        let registry = chain_builder().build().unwrap();
        assert_eq!(registry.order_for(&e("seq")), &[u("a"), u("b"), u("c")]);
        assert_eq!(registry.unit(&u("c")).unwrap().prereq, Some(u("b")));
        assert!(!registry.seeds_from_foundation(&e("seq")));
        // 파운데이션 환경은 자동으로 등록됨
        assert!(registry.env(&e("foundation")).is_some());
        assert!(registry.order_for(&e("nope")).is_empty());
    }

    #[test]
    fn rejects_static_prereq_cycle() {
        let err = UnitRegistry::builder(e("foundation"))
            .environment(EnvSpec::new(e("seq")))
            .unit(UnitSpec::new(u("a"), e("seq"), noop()).with_prereq(u("b")))
            .unit(UnitSpec::new(u("b"), e("seq"), noop()).with_prereq(u("a")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn rejects_self_prereq() {
        let err = UnitRegistry::builder(e("foundation"))
            .environment(EnvSpec::new(e("seq")))
            .unit(UnitSpec::new(u("a"), e("seq"), noop()).with_prereq(u("a")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("its own prerequisite"));
    }

    #[test]
    fn rejects_order_with_foreign_unit() {
        let err = UnitRegistry::builder(e("foundation"))
            .environment(EnvSpec::new(e("seq")).with_order(vec![u("a"), u("x")]))
            .environment(EnvSpec::new(e("other")))
            .unit(UnitSpec::new(u("a"), e("seq"), noop()))
            .unit(UnitSpec::new(u("x"), e("other"), noop()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("runs in 'other'"));
    }

    #[test]
    fn rejects_duplicate_order_entry() {
        let err = UnitRegistry::builder(e("foundation"))
            .environment(EnvSpec::new(e("seq")).with_order(vec![u("a"), u("a")]))
            .unit(UnitSpec::new(u("a"), e("seq"), noop()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn rejects_undeclared_environment() {
        let err = UnitRegistry::builder(e("foundation"))
            .unit(UnitSpec::new(u("a"), e("seq"), noop()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("undeclared environment 'seq'"));
    }

    #[test]
    fn standalone_unit_cannot_share_environment() {
        let err = chain_builder()
            .unit(UnitSpec::new(u("solo"), e("seq"), noop()).standalone())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("standalone"));
    }

    #[test]
    fn seeding_requires_foundation_unit() {
        let err = UnitRegistry::builder(e("foundation"))
            .environment(EnvSpec::new(e("seq")).seeded_from_foundation())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("bootstrap"));

        let registry = UnitRegistry::builder(e("foundation"))
            .foundation_unit(u("boot"))
            .environment(EnvSpec::new(e("seq")).seeded_from_foundation())
            .unit(UnitSpec::new(u("boot"), e("foundation"), noop()))
            .build()
            .unwrap();
        assert!(registry.seeds_from_foundation(&e("seq")));
        assert_eq!(registry.foundation_unit(), Some(&u("boot")));
    }

    #[test]
    fn foundation_unit_must_live_in_foundation_env() {
        let err = chain_builder()
            .foundation_unit(u("a"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must run in environment 'foundation'"));
    }

    #[test]
    fn from_config_defaults_standalone_env_to_unit_name() {
        let config = TestbedConfig::parse(
            r#"
[[units]]
name = "docs-check"
standalone = true
command = ["true"]
"#,
        )
        .unwrap();
        let registry = UnitRegistry::from_config(&config).unwrap();
        let spec = registry.unit(&u("docs-check")).unwrap();
        assert_eq!(spec.env, e("docs-check"));
        assert!(spec.standalone);
        assert_eq!(spec.body.describe(), "true");
    }

    #[test]
    fn from_config_rejects_empty_command() {
        let config = TestbedConfig::parse(
            r#"
[[environments]]
name = "seq"

[[units]]
name = "a"
env = "seq"
"#,
        )
        .unwrap();
        let err = UnitRegistry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[test]
    fn from_config_reports_invalid_name_field() {
        let config = TestbedConfig::parse(
            r#"
[[environments]]
name = "../escape"
"#,
        )
        .unwrap();
        let err = UnitRegistry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("environments[0].name"));
    }
}
