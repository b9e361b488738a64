//! 오염 감지기 — 환경의 마커 상태가 다음 유닛 실행에 안전한지 판단
//!
//! 규칙은 우선순위 순으로 평가되며 처음 일치하는 규칙이 보고됩니다:
//!
//! 1. 요청된 유닛이 이미 완료됨 → [`PollutionReason::AlreadyCompleted`]
//! 2. 시작했지만 완료되지 않은 유닛이 있음 → [`PollutionReason::InterruptedUnit`]
//! 3. 시작 마커 없이 완료 마커만 있음 → [`PollutionReason::OrphanCompletion`]
//! 4. 선언된 순서에서 요청된 유닛보다 뒤의 유닛이 시작됨 → [`PollutionReason::OutOfOrder`]
//!
//! standalone 유닛은 항상 새 환경을 받으므로 검사 대상이 아닙니다.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::environment::Environment;
use crate::error::MarkerError;
use crate::metrics as m;
use crate::types::UnitId;

/// 오염 판단 근거
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PollutionReason {
    /// 요청된 유닛이 이미 완료됨 (재실행은 재구축 필요)
    AlreadyCompleted { unit: UnitId },
    /// 중단된 유닛의 시작 마커가 남아 있음
    InterruptedUnit { unit: UnitId },
    /// 시작 마커 없는 완료 마커 (불법 상태 조합)
    OrphanCompletion { unit: UnitId },
    /// 순서상 뒤의 유닛이 이미 실행됨
    OutOfOrder { unit: UnitId, later: UnitId },
}

impl PollutionReason {
    /// 로그와 메트릭 레이블에 사용하는 규칙 이름
    pub fn rule(&self) -> &'static str {
        match self {
            Self::AlreadyCompleted { .. } => "already_completed",
            Self::InterruptedUnit { .. } => "interrupted_unit",
            Self::OrphanCompletion { .. } => "orphan_completion",
            Self::OutOfOrder { .. } => "out_of_order",
        }
    }
}

impl fmt::Display for PollutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyCompleted { unit } => write!(f, "unit '{unit}' already completed"),
            Self::InterruptedUnit { unit } => {
                write!(f, "unit '{unit}' started but never completed")
            }
            Self::OrphanCompletion { unit } => {
                write!(f, "unit '{unit}' has a completion marker without a start marker")
            }
            Self::OutOfOrder { unit, later } => {
                write!(f, "unit '{later}' ordered after '{unit}' has already started")
            }
        }
    }
}

/// 오염 검사 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Polluted(PollutionReason),
}

impl Verdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

/// 오염 감지기
#[derive(Debug, Clone, Copy, Default)]
pub struct PollutionDetector;

impl PollutionDetector {
    pub fn new() -> Self {
        Self
    }

    /// `unit`을 실행하기 전에 `env`가 오염되었는지 판단합니다.
    ///
    /// `order`는 환경에 선언된 유닛 순서입니다. 비어 있거나 `unit`을
    /// 포함하지 않으면 순서 규칙은 적용되지 않습니다.
    pub fn check(
        &self,
        env: &Environment,
        unit: &UnitId,
        order: &[UnitId],
    ) -> Result<Verdict, MarkerError> {
        let verdict = match evaluate(env, unit, order)? {
            Some(reason) => {
                warn!(
                    env = %env.name(),
                    unit = %unit,
                    rule = reason.rule(),
                    reason = %reason,
                    "environment polluted"
                );
                metrics::counter!(m::POLLUTION_DETECTED_TOTAL, m::LABEL_RULE => reason.rule())
                    .increment(1);
                Verdict::Polluted(reason)
            }
            None => {
                debug!(env = %env.name(), unit = %unit, "environment clean");
                Verdict::Clean
            }
        };
        Ok(verdict)
    }

    /// [`check`](Self::check)의 불리언 형태
    pub fn is_clean(
        &self,
        env: &Environment,
        unit: &UnitId,
        order: &[UnitId],
    ) -> Result<bool, MarkerError> {
        Ok(self.check(env, unit, order)?.is_clean())
    }
}

fn evaluate(
    env: &Environment,
    unit: &UnitId,
    order: &[UnitId],
) -> Result<Option<PollutionReason>, MarkerError> {
    let markers = env.markers();

    if markers.is_completed(unit) {
        return Ok(Some(PollutionReason::AlreadyCompleted { unit: unit.clone() }));
    }

    let started = markers.list_started()?;
    let completed = markers.list_completed()?;

    if let Some(interrupted) = started.iter().find(|u| !completed.contains(u)) {
        return Ok(Some(PollutionReason::InterruptedUnit {
            unit: interrupted.clone(),
        }));
    }

    if let Some(orphan) = completed.iter().find(|u| !started.contains(u)) {
        return Ok(Some(PollutionReason::OrphanCompletion {
            unit: orphan.clone(),
        }));
    }

    if let Some(pos) = order.iter().position(|u| u == unit) {
        if let Some(later) = order[pos + 1..].iter().find(|u| started.contains(u)) {
            return Ok(Some(PollutionReason::OutOfOrder {
                unit: unit.clone(),
                later: later.clone(),
            }));
        }
    }

    Ok(None)
}
