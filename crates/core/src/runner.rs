//! 유닛 실행기 — 전제 조건 해석, 오염 재구축, 파운데이션 시드, 본문 실행
//!
//! # 실행 순서 (유닛 하나)
//! 1. 환경 로드 (standalone 유닛은 항상 삭제 후 재생성)
//! 2. (환경, 유닛) 락 획득
//! 3. 오염 검사 → 오염 시 락 해제, 환경 재구축, 락 재획득
//! 4. 새로 만든 환경이 파운데이션 시드 대상이면 파운데이션 복사
//! 5. 완료되지 않은 전제 조건을 재귀적으로 실행
//! 6. 시작 마커 기록 → 본문 실행 → 완료 마커 기록
//!
//! 본문이 실패하면 시작 마커를 남긴 채 락만 해제합니다. 다음 실행에서
//! 오염 감지기가 중단된 유닛을 발견하고 환경을 재구축합니다.
//!
//! 전제 조건은 해석 스택을 따라 재귀적으로 처리하며, 스택에 이미 있는
//! 유닛을 다시 만나면 순환으로 보고합니다.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::body::UnitContext;
use crate::config::TestbedConfig;
use crate::environment::{Environment, EnvironmentManager};
use crate::error::{ConfigError, FoundationError, RunnerError};
use crate::foundation::FoundationCache;
use crate::lock::UnitLock;
use crate::metrics as m;
use crate::pollution::{PollutionDetector, PollutionReason, Verdict};
use crate::registry::{UnitRegistry, UnitSpec};
use crate::types::{EnvName, UnitId};

/// 기본 파운데이션 노후 임계값 (시간)
const DEFAULT_STALE_AFTER_HOURS: u64 = 24;

/// 최상위 실행 한 번의 결과
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// 로그 상관관계용 실행 ID
    pub run_id: Uuid,
    /// 요청된 유닛
    pub unit: UnitId,
    /// 실행된 유닛 (실행 순서)
    pub executed: Vec<ExecutedUnit>,
    /// 오염으로 재구축된 환경
    pub rebuilds: Vec<Rebuild>,
    /// 파운데이션에서 시드된 환경
    pub seeded: Vec<EnvName>,
}

/// 실행된 유닛 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutedUnit {
    pub unit: UnitId,
    pub env: EnvName,
    pub duration_ms: u64,
}

/// 오염으로 인한 재구축 기록
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rebuild {
    pub env: EnvName,
    /// 재구축을 일으킨 유닛
    pub unit: UnitId,
    pub reason: PollutionReason,
}

impl RunReport {
    fn new(run_id: Uuid, unit: UnitId) -> Self {
        Self {
            run_id,
            unit,
            executed: Vec::new(),
            rebuilds: Vec::new(),
            seeded: Vec::new(),
        }
    }

    /// 실행된 유닛 ID (실행 순서)
    pub fn executed_units(&self) -> Vec<&UnitId> {
        self.executed.iter().map(|e| &e.unit).collect()
    }
}

struct Resolution {
    stack: Vec<UnitId>,
    report: RunReport,
}

/// 유닛 실행기
#[derive(Debug, Clone)]
pub struct UnitRunner {
    registry: Arc<UnitRegistry>,
    envs: EnvironmentManager,
    detector: PollutionDetector,
    stale_after_hours: u64,
}

impl UnitRunner {
    pub fn new(registry: UnitRegistry, envs: EnvironmentManager) -> Self {
        Self {
            registry: Arc::new(registry),
            envs,
            detector: PollutionDetector::new(),
            stale_after_hours: DEFAULT_STALE_AFTER_HOURS,
        }
    }

    /// 설정으로부터 레지스트리와 환경 관리자를 구성합니다.
    pub fn from_config(config: &TestbedConfig) -> Result<Self, ConfigError> {
        let registry = UnitRegistry::from_config(config)?;
        Ok(Self::new(registry, EnvironmentManager::from_config(config))
            .with_stale_after_hours(config.foundation.stale_after_hours))
    }

    pub fn with_stale_after_hours(mut self, hours: u64) -> Self {
        self.stale_after_hours = hours;
        self
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    pub fn envs(&self) -> &EnvironmentManager {
        &self.envs
    }

    /// 파운데이션 캐시 핸들
    pub fn foundation(&self) -> FoundationCache<'_> {
        FoundationCache::new(
            &self.envs,
            self.registry.foundation_env(),
            self.stale_after_hours,
        )
    }

    /// 유닛을 실행합니다.
    ///
    /// `prereq`가 주어지면 레지스트리에 선언된 전제 조건 대신 사용합니다.
    /// 재귀적으로 실행되는 전제 조건은 각자의 선언된 전제 조건을 따릅니다.
    pub fn run(&self, unit: &UnitId, prereq: Option<&UnitId>) -> Result<RunReport, RunnerError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, unit = %unit);
        let _enter = span.enter();

        info!(prereq = ?prereq.map(UnitId::as_str), "run requested");
        let mut resolution = Resolution {
            stack: Vec::new(),
            report: RunReport::new(run_id, unit.clone()),
        };

        match self.resolve(&mut resolution, unit, prereq) {
            Ok(()) => {
                let report = resolution.report;
                info!(
                    executed = report.executed.len(),
                    rebuilds = report.rebuilds.len(),
                    "run finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "run failed");
                Err(e)
            }
        }
    }

    /// 파운데이션 환경을 삭제하고 부트스트랩 유닛을 다시 실행합니다.
    pub fn rebuild_foundation(&self) -> Result<RunReport, RunnerError> {
        let Some(bootstrap) = self.registry.foundation_unit() else {
            return Err(FoundationError::MissingWorkTree {
                env: self.registry.foundation_env().clone(),
                path: self.envs.locate(self.registry.foundation_env()).work_dir().to_path_buf(),
            }
            .into());
        };
        info!(foundation = %self.registry.foundation_env(), "rebuilding foundation");
        self.envs.destroy(self.registry.foundation_env())?;
        self.run(bootstrap, None)
    }

    fn resolve(
        &self,
        resolution: &mut Resolution,
        unit: &UnitId,
        prereq: Option<&UnitId>,
    ) -> Result<(), RunnerError> {
        if let Some(pos) = resolution.stack.iter().position(|u| u == unit) {
            let chain = resolution.stack[pos..]
                .iter()
                .chain(std::iter::once(unit))
                .map(UnitId::as_str)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(RunnerError::CycleDetected { chain });
        }
        let spec = self
            .registry
            .unit(unit)
            .ok_or_else(|| RunnerError::UnknownUnit { unit: unit.clone() })?;

        resolution.stack.push(unit.clone());
        let result = self.execute(resolution, spec, prereq);
        resolution.stack.pop();
        result
    }

    fn execute(
        &self,
        resolution: &mut Resolution,
        spec: &UnitSpec,
        prereq: Option<&UnitId>,
    ) -> Result<(), RunnerError> {
        let locks = self.envs.locks();

        let mut env = if spec.standalone {
            debug!(env = %spec.env, unit = %spec.id, "standalone unit, recreating environment");
            self.envs.reset(&spec.env)?
        } else {
            self.envs.load(&spec.env)?
        };
        let mut lock = Some(locks.acquire(&env, &spec.id)?);

        if !spec.standalone {
            let order = self.registry.order_for(&spec.env);
            if let Verdict::Polluted(reason) = self.detector.check(&env, &spec.id, order)? {
                if let Some(held) = lock.take() {
                    held.release()?;
                }
                env = self.rebuild(spec, &reason)?;
                lock = Some(locks.acquire(&env, &spec.id)?);
                resolution.report.rebuilds.push(Rebuild {
                    env: spec.env.clone(),
                    unit: spec.id.clone(),
                    reason,
                });
            }
        }

        if env.created() && self.registry.seeds_from_foundation(&spec.env) {
            let seeded = self
                .foundation()
                .ensure(&env, || self.build_foundation(resolution, &spec.id));
            if let Err(e) = seeded {
                // 부분적으로 시드된 환경은 다음 실행이 처음부터 시작하도록 삭제
                if let Some(held) = lock.take() {
                    if let Err(release_err) = held.release() {
                        warn!(env = %spec.env, unit = %spec.id, error = %release_err, "failed to release lock");
                    }
                }
                if let Err(destroy_err) = self.envs.destroy(&spec.env) {
                    warn!(env = %spec.env, error = %destroy_err, "failed to discard partially seeded environment");
                }
                return Err(e);
            }
            resolution.report.seeded.push(spec.env.clone());
        }

        if let Some(prereq) = prereq.or(spec.prereq.as_ref()) {
            if self.is_completed(prereq) {
                debug!(unit = %spec.id, prereq = %prereq, "prerequisite already satisfied");
            } else {
                info!(unit = %spec.id, prereq = %prereq, "resolving prerequisite");
                // 같은 환경의 전제 조건이 환경을 재구축할 수 있도록 락을 내려놓음
                if self.shares_env(prereq, &spec.env) {
                    if let Some(held) = lock.take() {
                        held.release()?;
                    }
                }
                self.resolve(resolution, prereq, None)
                    .map_err(|source| RunnerError::PrerequisiteFailed {
                        unit: spec.id.clone(),
                        prereq: prereq.clone(),
                        source: Box::new(source),
                    })?;
            }
        }

        let lock = match lock {
            Some(held) => held,
            None => locks.acquire(&env, &spec.id)?,
        };
        self.run_body(resolution, spec, &env, lock)
    }

    fn run_body(
        &self,
        resolution: &mut Resolution,
        spec: &UnitSpec,
        env: &Environment,
        lock: UnitLock,
    ) -> Result<(), RunnerError> {
        let markers = env.markers();
        markers.record_start(&spec.id)?;
        metrics::counter!(m::UNITS_STARTED_TOTAL, m::LABEL_ENV => spec.env.to_string()).increment(1);
        info!(env = %spec.env, unit = %spec.id, body = %spec.body.describe(), "unit started");

        let ctx = UnitContext {
            env: env.name(),
            unit: &spec.id,
            env_root: env.root(),
            work_dir: env.work_dir(),
            run_id: resolution.report.run_id,
        };
        let started = Instant::now();
        let outcome = spec.body.execute(&ctx);
        let elapsed = started.elapsed();
        metrics::histogram!(m::UNIT_DURATION_SECONDS).record(elapsed.as_secs_f64());

        if let Err(source) = outcome {
            if let Err(e) = lock.release() {
                warn!(env = %spec.env, unit = %spec.id, error = %e, "failed to release lock after failure");
            }
            metrics::counter!(m::UNITS_FAILED_TOTAL, m::LABEL_ENV => spec.env.to_string())
                .increment(1);
            error!(
                env = %spec.env,
                unit = %spec.id,
                error = %source,
                "unit failed, start marker left in place"
            );
            return Err(RunnerError::BodyFailed {
                env: spec.env.clone(),
                unit: spec.id.clone(),
                source,
            });
        }

        markers.record_complete(&spec.id)?;
        if self.is_foundation_unit(spec) && markers.foundation_completed_at()?.is_none() {
            markers.record_foundation_complete()?;
        }
        lock.release()?;

        metrics::counter!(m::UNITS_COMPLETED_TOTAL, m::LABEL_ENV => spec.env.to_string())
            .increment(1);
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        info!(env = %spec.env, unit = %spec.id, duration_ms, "unit completed");
        resolution.report.executed.push(ExecutedUnit {
            unit: spec.id.clone(),
            env: spec.env.clone(),
            duration_ms,
        });
        Ok(())
    }

    fn rebuild(&self, spec: &UnitSpec, reason: &PollutionReason) -> Result<Environment, RunnerError> {
        warn!(
            env = %spec.env,
            unit = %spec.id,
            rule = reason.rule(),
            "rebuilding polluted environment"
        );
        self.envs
            .reset(&spec.env)
            .map_err(|source| RunnerError::RebuildFailed {
                env: spec.env.clone(),
                unit: spec.id.clone(),
                rule: reason.rule().to_owned(),
                source,
            })
    }

    /// 파운데이션 부트스트랩 유닛을 실행합니다. 이미 완료되었으면 건너뜁니다.
    fn build_foundation(
        &self,
        resolution: &mut Resolution,
        dependent: &UnitId,
    ) -> Result<(), RunnerError> {
        let foundation_env = self.registry.foundation_env();
        let Some(bootstrap) = self.registry.foundation_unit() else {
            return Err(FoundationError::MissingWorkTree {
                env: foundation_env.clone(),
                path: self.envs.locate(foundation_env).work_dir().to_path_buf(),
            }
            .into());
        };
        if self.is_completed(bootstrap) {
            return Ok(());
        }
        self.resolve(resolution, bootstrap, None)
            .map_err(|source| RunnerError::PrerequisiteFailed {
                unit: dependent.clone(),
                prereq: bootstrap.clone(),
                source: Box::new(source),
            })
    }

    /// 유닛이 자신의 환경에서 완료되었는지 확인합니다.
    fn shares_env(&self, unit: &UnitId, env: &EnvName) -> bool {
        self.registry.unit(unit).is_some_and(|spec| &spec.env == env)
    }

    fn is_completed(&self, unit: &UnitId) -> bool {
        self.registry
            .unit(unit)
            .is_some_and(|spec| self.envs.locate(&spec.env).markers().is_completed(unit))
    }

    fn is_foundation_unit(&self, spec: &UnitSpec) -> bool {
        self.registry.foundation_unit() == Some(&spec.id)
            && &spec.env == self.registry.foundation_env()
    }
}
