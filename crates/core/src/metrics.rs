//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::histogram!()`
//! 매크로를 호출합니다. 레코더가 설치되지 않으면 모든 호출은 no-op입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `testbed_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)
//!
//! # 사용 예시
//!
//! ```ignore
//! use testbed_core::metrics as m;
//!
//! metrics::counter!(m::UNITS_STARTED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 오염 규칙 레이블 키 (already_completed, interrupted_unit, orphan_completion, out_of_order)
pub const LABEL_RULE: &str = "rule";

/// 환경 레이블 키
pub const LABEL_ENV: &str = "env";

// ─── 유닛 실행 메트릭 ──────────────────────────────────────────────

/// 시작된 유닛 수 (counter, label: env)
pub const UNITS_STARTED_TOTAL: &str = "testbed_units_started_total";

/// 완료된 유닛 수 (counter, label: env)
pub const UNITS_COMPLETED_TOTAL: &str = "testbed_units_completed_total";

/// 본문이 실패한 유닛 수 (counter, label: env)
pub const UNITS_FAILED_TOTAL: &str = "testbed_units_failed_total";

/// 유닛 본문 실행 시간 (histogram, 초)
pub const UNIT_DURATION_SECONDS: &str = "testbed_unit_duration_seconds";

// ─── 환경 상태 메트릭 ──────────────────────────────────────────────

/// 감지된 오염 수 (counter, label: rule)
pub const POLLUTION_DETECTED_TOTAL: &str = "testbed_pollution_detected_total";

/// 회수된 오래된 락 수 (counter)
pub const STALE_LOCKS_RECLAIMED_TOTAL: &str = "testbed_stale_locks_reclaimed_total";

/// 삭제된 환경 수 (counter)
pub const ENVIRONMENTS_DESTROYED_TOTAL: &str = "testbed_environments_destroyed_total";

// ─── 파운데이션 메트릭 ─────────────────────────────────────────────

/// 파운데이션 빌드 수 (counter)
pub const FOUNDATION_BUILDS_TOTAL: &str = "testbed_foundation_builds_total";

/// 파운데이션에서 시드된 환경 수 (counter, label: env)
pub const FOUNDATION_SEEDS_TOTAL: &str = "testbed_foundation_seeds_total";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더를 설치한 임베딩 프로세스가 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(UNITS_STARTED_TOTAL, "Total number of unit bodies started");
    describe_counter!(
        UNITS_COMPLETED_TOTAL,
        "Total number of units that completed successfully"
    );
    describe_counter!(
        UNITS_FAILED_TOTAL,
        "Total number of unit bodies that reported failure"
    );
    describe_histogram!(
        UNIT_DURATION_SECONDS,
        "Wall-clock duration of a unit body in seconds"
    );
    describe_counter!(
        POLLUTION_DETECTED_TOTAL,
        "Environments found polluted before a run, by rule"
    );
    describe_counter!(
        STALE_LOCKS_RECLAIMED_TOTAL,
        "Lock directories reclaimed from dead holders"
    );
    describe_counter!(
        ENVIRONMENTS_DESTROYED_TOTAL,
        "Total number of environment trees deleted"
    );
    describe_counter!(
        FOUNDATION_BUILDS_TOTAL,
        "Total number of foundation bootstrap builds"
    );
    describe_counter!(
        FOUNDATION_SEEDS_TOTAL,
        "Environments seeded from the foundation working tree"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        UNITS_STARTED_TOTAL,
        UNITS_COMPLETED_TOTAL,
        UNITS_FAILED_TOTAL,
        UNIT_DURATION_SECONDS,
        POLLUTION_DETECTED_TOTAL,
        STALE_LOCKS_RECLAIMED_TOTAL,
        ENVIRONMENTS_DESTROYED_TOTAL,
        FOUNDATION_BUILDS_TOTAL,
        FOUNDATION_SEEDS_TOTAL,
    ];

    #[test]
    fn all_metrics_start_with_testbed_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("testbed_"),
                "Metric '{}' does not start with 'testbed_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES
            .iter()
            .filter(|n| !n.ends_with("_seconds"))
        {
            assert!(name.ends_with("_total"), "Counter '{}' lacks _total", name);
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더 없이 호출해도 panic 하지 않아야 함
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_RULE, LABEL_ENV] {
            assert_eq!(label.to_lowercase(), label);
        }
    }
}
