//! 에러 타입 — 도메인별 에러 정의
//!
//! 모든 에러 메시지는 환경 이름, 유닛 이름, 그리고 관련된 규칙/마커/락을
//! 포함하여 사용자가 `.state/` 디렉토리를 직접 확인할 수 있도록 합니다.

use std::path::PathBuf;

use crate::types::{EnvName, UnitId};

/// testbed 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum TestbedError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 이름 검증 에러
    #[error("invalid name: {0}")]
    Name(#[from] NameError),

    /// 마커 저장소 에러
    #[error("marker error: {0}")]
    Marker(#[from] MarkerError),

    /// 락 관련 에러
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// 환경 관리 에러
    #[error("environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// 파운데이션 캐시 에러
    #[error("foundation error: {0}")]
    Foundation(#[from] FoundationError),

    /// 유닛 실행 에러
    #[error("run failed: {0}")]
    Runner(#[from] RunnerError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 환경/유닛 이름 검증 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// 빈 이름
    #[error("{kind} name must not be empty")]
    Empty { kind: &'static str },

    /// 최대 길이 초과
    #[error("{kind} name is {len} bytes long (max: {max})")]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },

    /// 허용되지 않는 문자
    #[error("{kind} name '{name}' contains invalid character {ch:?}")]
    InvalidChar {
        kind: &'static str,
        name: String,
        ch: char,
    },

    /// 예약된 형식 (경로 탐색, 숨김 파일 등)
    #[error("{kind} name '{name}' {reason}")]
    Reserved {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },
}

/// 마커 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    /// 이미 기록된 마커 (마커는 불변)
    #[error("marker '{marker}' already recorded for unit '{unit}' in environment '{env}'")]
    AlreadyRecorded {
        env: EnvName,
        unit: UnitId,
        marker: String,
    },

    /// 시작 마커 없이 완료를 기록하려 함
    #[error("unit '{unit}' has no start marker in environment '{env}', refusing to mark it complete")]
    NotStarted { env: EnvName, unit: UnitId },

    /// 타임스탬프 파싱 실패
    #[error("marker {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// 마커 파일 I/O 실패
    #[error("marker io failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 락 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// 살아있는 프로세스가 이미 락을 보유 (재시도하지 않음)
    #[error("unit '{unit}' is already running in environment '{env}' ({})", describe_holder(.pid))]
    Conflict {
        env: EnvName,
        unit: UnitId,
        pid: Option<u32>,
    },

    /// 오래된 락 회수 실패
    #[error("cannot reclaim stale lock for unit '{unit}' in environment '{env}' after {attempts} attempt(s): {reason}")]
    StaleReclaimFailed {
        env: EnvName,
        unit: UnitId,
        attempts: u32,
        reason: String,
    },

    /// 락 디렉토리 I/O 실패
    #[error("lock io failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 환경 관리 에러
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    /// 살아있는 락이 있어 삭제할 수 없음
    #[error("environment '{env}' is busy: lock for unit '{unit}' is held ({})", describe_holder(.pid))]
    Busy {
        env: EnvName,
        unit: UnitId,
        pid: Option<u32>,
    },

    /// 환경 루트 밖의 경로에 대한 작업 거부
    #[error("refusing to operate on {} outside environments root {}", .path.display(), .root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },

    /// 락 조회 실패
    #[error(transparent)]
    Lock(#[from] LockError),

    /// 마커 조회 실패
    #[error(transparent)]
    Marker(#[from] MarkerError),

    /// 환경 디렉토리 I/O 실패
    #[error("environment io failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 파운데이션 캐시 에러
#[derive(Debug, thiserror::Error)]
pub enum FoundationError {
    /// 작업 트리 복사 실패 (부분 복사 허용 안 함)
    #[error("failed to copy foundation {} into {}: {reason}", .src.display(), .dst.display())]
    CopyFailed {
        src: PathBuf,
        dst: PathBuf,
        reason: String,
    },

    /// 부트스트랩 후에도 파운데이션 작업 트리가 없음
    #[error("foundation environment '{env}' has no working tree at {}", .path.display())]
    MissingWorkTree { env: EnvName, path: PathBuf },

    /// 파운데이션 완료 마커 처리 실패
    #[error(transparent)]
    Marker(#[from] MarkerError),
}

/// 유닛 본문 실행 에러
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    /// 외부 명령 실행 실패
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// 외부 명령이 0이 아닌 코드로 종료
    #[error("'{program}' exited with {}", describe_exit(.code))]
    ExitStatus { program: String, code: Option<i32> },

    /// 본문이 보고한 실패
    #[error("{0}")]
    Failed(String),
}

/// 유닛 실행(전제 조건 해석 포함) 에러
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// 레지스트리에 없는 유닛
    #[error("unknown unit '{unit}'")]
    UnknownUnit { unit: UnitId },

    /// 전제 조건 순환
    #[error("prerequisite cycle detected: {chain}")]
    CycleDetected { chain: String },

    /// 전제 조건 유닛 실패 (의존 유닛은 시작하지 않음)
    #[error("prerequisite '{prereq}' of unit '{unit}' failed: {source}")]
    PrerequisiteFailed {
        unit: UnitId,
        prereq: UnitId,
        #[source]
        source: Box<RunnerError>,
    },

    /// 유닛 본문 실패 (시작 마커는 의도적으로 남김)
    #[error("unit '{unit}' failed in environment '{env}', start marker left in place: {source}")]
    BodyFailed {
        env: EnvName,
        unit: UnitId,
        #[source]
        source: BodyError,
    },

    /// 오염 감지 후 재구축 실패
    #[error("environment '{env}' is polluted ({rule}) and could not be rebuilt for unit '{unit}': {source}")]
    RebuildFailed {
        env: EnvName,
        unit: UnitId,
        rule: String,
        #[source]
        source: EnvironmentError,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Foundation(#[from] FoundationError),
}

impl RunnerError {
    /// 전제 조건 래핑을 벗겨 실제 원인 에러를 반환합니다.
    pub fn root_cause(&self) -> &RunnerError {
        match self {
            Self::PrerequisiteFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn describe_holder(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!("held by pid {pid}"),
        None => "holder pid not yet recorded".to_owned(),
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (killed by signal)".to_owned(),
    }
}
