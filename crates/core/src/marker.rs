//! 마커 저장소 — 환경별 불변 타임스탬프 사실 기록
//!
//! 각 환경의 `.state/` 디렉토리에 다음 파일을 생성합니다:
//!
//! ```text
//! .state/
//!   .start-<unit>          # 유닛 시작
//!   .complete-<unit>       # 유닛 완료
//!   .foundation-complete   # 파운데이션 전용
//! ```
//!
//! 마커 내용은 나노초 정밀도의 RFC 3339 UTC 타임스탬프이며 진단 용도로만
//! 사용됩니다 (논리 시계가 아님). 마커는 한 번 기록되면 수정되지 않고,
//! 환경 전체 삭제 시에만 함께 지워집니다.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::environment::Environment;
use crate::error::MarkerError;
use crate::types::{EnvName, UnitId, UnitState};

/// 시작 마커 파일 접두어
pub const START_PREFIX: &str = ".start-";
/// 완료 마커 파일 접두어
pub const COMPLETE_PREFIX: &str = ".complete-";
/// 파운데이션 완료 마커 파일 이름
pub const FOUNDATION_MARKER: &str = ".foundation-complete";

/// 한 환경의 마커 저장소
///
/// [`Environment::markers`]로 얻습니다.
#[derive(Debug, Clone, Copy)]
pub struct MarkerStore<'a> {
    env: &'a EnvName,
    state_dir: &'a Path,
}

impl<'a> MarkerStore<'a> {
    pub(crate) fn new(env: &'a Environment) -> Self {
        Self {
            env: env.name(),
            state_dir: env.state_dir(),
        }
    }

    /// 유닛 시작을 기록합니다.
    pub fn record_start(&self, unit: &UnitId) -> Result<DateTime<Utc>, MarkerError> {
        let path = self.start_path(unit);
        self.write_marker(&path, unit, START_PREFIX)
    }

    /// 유닛 완료를 기록합니다.
    ///
    /// 시작 마커가 없으면 거부합니다 (`absent → completed` 전이는 불법).
    pub fn record_complete(&self, unit: &UnitId) -> Result<DateTime<Utc>, MarkerError> {
        if !self.is_started(unit) {
            return Err(MarkerError::NotStarted {
                env: self.env.clone(),
                unit: unit.clone(),
            });
        }
        let path = self.complete_path(unit);
        self.write_marker(&path, unit, COMPLETE_PREFIX)
    }

    /// 시작 마커 존재 여부
    pub fn is_started(&self, unit: &UnitId) -> bool {
        self.start_path(unit).is_file()
    }

    /// 완료 마커 존재 여부
    pub fn is_completed(&self, unit: &UnitId) -> bool {
        self.complete_path(unit).is_file()
    }

    /// 유닛의 현재 상태
    pub fn state(&self, unit: &UnitId) -> UnitState {
        if self.is_completed(unit) {
            UnitState::Completed
        } else if self.is_started(unit) {
            UnitState::Started
        } else {
            UnitState::Absent
        }
    }

    /// 시작 마커가 있는 모든 유닛 (이름 순)
    pub fn list_started(&self) -> Result<Vec<UnitId>, MarkerError> {
        self.list(START_PREFIX)
    }

    /// 완료 마커가 있는 모든 유닛 (이름 순)
    pub fn list_completed(&self) -> Result<Vec<UnitId>, MarkerError> {
        self.list(COMPLETE_PREFIX)
    }

    /// 시작 시각
    pub fn started_at(&self, unit: &UnitId) -> Result<Option<DateTime<Utc>>, MarkerError> {
        read_timestamp(&self.start_path(unit))
    }

    /// 완료 시각
    pub fn completed_at(&self, unit: &UnitId) -> Result<Option<DateTime<Utc>>, MarkerError> {
        read_timestamp(&self.complete_path(unit))
    }

    /// 파운데이션 완료를 기록합니다.
    pub fn record_foundation_complete(&self) -> Result<DateTime<Utc>, MarkerError> {
        let path = self.state_dir.join(FOUNDATION_MARKER);
        self.ensure_state_dir()?;
        let now = Utc::now();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MarkerError::Corrupt {
                    path,
                    reason: "foundation marker already exists".to_owned(),
                });
            }
            Err(source) => return Err(MarkerError::Io { path, source }),
        };
        writeln!(file, "{}", format_timestamp(now))
            .map_err(|source| MarkerError::Io { path: path.clone(), source })?;
        debug!(env = %self.env, "foundation marker recorded");
        Ok(now)
    }

    /// 파운데이션 완료 시각
    pub fn foundation_completed_at(&self) -> Result<Option<DateTime<Utc>>, MarkerError> {
        read_timestamp(&self.state_dir.join(FOUNDATION_MARKER))
    }

    fn start_path(&self, unit: &UnitId) -> PathBuf {
        self.state_dir.join(format!("{START_PREFIX}{unit}"))
    }

    fn complete_path(&self, unit: &UnitId) -> PathBuf {
        self.state_dir.join(format!("{COMPLETE_PREFIX}{unit}"))
    }

    fn ensure_state_dir(&self) -> Result<(), MarkerError> {
        fs::create_dir_all(self.state_dir).map_err(|source| MarkerError::Io {
            path: self.state_dir.to_path_buf(),
            source,
        })
    }

    fn write_marker(
        &self,
        path: &Path,
        unit: &UnitId,
        prefix: &str,
    ) -> Result<DateTime<Utc>, MarkerError> {
        self.ensure_state_dir()?;
        let now = Utc::now();

        // create_new: 기존 마커는 덮어쓰지 않음
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MarkerError::AlreadyRecorded {
                    env: self.env.clone(),
                    unit: unit.clone(),
                    marker: format!("{prefix}{unit}"),
                });
            }
            Err(source) => {
                return Err(MarkerError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        writeln!(file, "{}", format_timestamp(now)).map_err(|source| MarkerError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(env = %self.env, unit = %unit, marker = prefix, "marker recorded");
        Ok(now)
    }

    fn list(&self, prefix: &str) -> Result<Vec<UnitId>, MarkerError> {
        let entries = match fs::read_dir(self.state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(MarkerError::Io {
                    path: self.state_dir.to_path_buf(),
                    source,
                });
            }
        };

        let mut units = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MarkerError::Io {
                path: self.state_dir.to_path_buf(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(raw) = name.strip_prefix(prefix) else {
                continue;
            };
            if !entry.path().is_file() {
                continue;
            }
            match UnitId::new(raw) {
                Ok(unit) => units.push(unit),
                Err(e) => debug!(env = %self.env, file = name, error = %e, "skipping unrecognised marker"),
            }
        }
        units.sort();
        Ok(units)
    }
}

/// 마커용 타임스탬프 형식 (RFC 3339, 나노초, `Z` 접미어)
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn read_timestamp(path: &Path) -> Result<Option<DateTime<Utc>>, MarkerError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(MarkerError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    DateTime::parse_from_rfc3339(content.trim())
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|e| MarkerError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
