//! 파운데이션 캐시 — 비싼 부트스트랩 결과를 한 번 만들어 여러 환경에 복사
//!
//! 파운데이션 환경은 부트스트랩 유닛 하나만 변경합니다. 다른 환경은
//! 생성 직후 파운데이션의 작업 트리를 복사받아 시작합니다.
//!
//! `.foundation-complete` 마커가 없으면 부트스트랩을 실행하고, 마커가
//! 임계값보다 오래되었으면 경고만 남기고 그대로 사용합니다.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::environment::{Environment, EnvironmentManager};
use crate::error::FoundationError;
use crate::metrics as m;
use crate::types::EnvName;

/// 파운데이션 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FoundationStatus {
    /// 완료 마커 없음
    Missing,
    /// 임계값 이내
    Fresh {
        built_at: DateTime<Utc>,
        age_secs: u64,
    },
    /// 임계값 초과 (경고만, 재빌드하지 않음)
    Stale {
        built_at: DateTime<Utc>,
        age_secs: u64,
    },
}

impl FoundationStatus {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// 파운데이션 캐시
#[derive(Debug, Clone, Copy)]
pub struct FoundationCache<'a> {
    envs: &'a EnvironmentManager,
    env: &'a EnvName,
    stale_after: TimeDelta,
}

impl<'a> FoundationCache<'a> {
    pub fn new(envs: &'a EnvironmentManager, env: &'a EnvName, stale_after_hours: u64) -> Self {
        let hours = i64::from(u32::try_from(stale_after_hours).unwrap_or(u32::MAX));
        Self {
            envs,
            env,
            stale_after: TimeDelta::try_hours(hours).unwrap_or(TimeDelta::zero()),
        }
    }

    /// 파운데이션 환경 이름
    pub fn env(&self) -> &EnvName {
        self.env
    }

    /// 현재 파운데이션 상태를 조회합니다. 환경을 생성하지 않습니다.
    pub fn status(&self) -> Result<FoundationStatus, FoundationError> {
        self.status_at(Utc::now())
    }

    fn status_at(&self, now: DateTime<Utc>) -> Result<FoundationStatus, FoundationError> {
        let foundation = self.envs.locate(self.env);
        let Some(built_at) = foundation.markers().foundation_completed_at()? else {
            return Ok(FoundationStatus::Missing);
        };

        let age = now.signed_duration_since(built_at);
        let age_secs = u64::try_from(age.num_seconds()).unwrap_or(0);
        if age > self.stale_after {
            Ok(FoundationStatus::Stale { built_at, age_secs })
        } else {
            Ok(FoundationStatus::Fresh { built_at, age_secs })
        }
    }

    /// 파운데이션을 보장한 뒤 작업 트리를 `target`에 복사합니다.
    ///
    /// 완료 마커가 없으면 `build`를 호출하고, `build`가 마커를 남기지 않았으면
    /// 여기서 기록합니다. 복사 실패는 재시도하지 않습니다.
    pub fn ensure<F, E>(&self, target: &Environment, build: F) -> Result<u64, E>
    where
        F: FnOnce() -> Result<(), E>,
        E: From<FoundationError>,
    {
        match self.status()? {
            FoundationStatus::Missing => {
                info!(foundation = %self.env, "foundation missing, running bootstrap");
                build()?;
                let foundation = self.envs.locate(self.env);
                let markers = foundation.markers();
                if markers
                    .foundation_completed_at()
                    .map_err(FoundationError::from)?
                    .is_none()
                {
                    markers
                        .record_foundation_complete()
                        .map_err(FoundationError::from)?;
                }
                metrics::counter!(m::FOUNDATION_BUILDS_TOTAL).increment(1);
            }
            FoundationStatus::Stale { built_at, age_secs } => {
                warn!(
                    foundation = %self.env,
                    built_at = %built_at,
                    age_hours = age_secs / 3600,
                    "foundation is stale, consider `testbed foundation rebuild`"
                );
            }
            FoundationStatus::Fresh { .. } => {}
        }

        let foundation = self.envs.locate(self.env);
        if !foundation.work_dir().is_dir() {
            return Err(FoundationError::MissingWorkTree {
                env: self.env.clone(),
                path: foundation.work_dir().to_path_buf(),
            }
            .into());
        }

        let copied = copy_tree(foundation.work_dir(), target.work_dir())?;
        metrics::counter!(m::FOUNDATION_SEEDS_TOTAL, m::LABEL_ENV => target.name().to_string())
            .increment(1);
        info!(
            foundation = %self.env,
            env = %target.name(),
            files = copied,
            "environment seeded from foundation"
        );
        Ok(copied)
    }
}

/// `src` 트리를 `dst` 아래로 복사합니다. 복사한 파일 수를 반환합니다.
///
/// 파일 권한은 유지되고 심볼릭 링크는 링크 자체로 다시 만듭니다.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64, FoundationError> {
    let fail = |reason: String| FoundationError::CopyFailed {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        reason,
    };

    fs::create_dir_all(dst).map_err(|e| fail(format!("create {}: {e}", dst.display())))?;

    let mut copied = 0u64;
    let mut dirs = Vec::new();
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| fail(e.to_string()))?;
        let path = entry.path();
        let rel = path
            .strip_prefix(src)
            .map_err(|e| fail(format!("{}: {e}", path.display())))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target: PathBuf = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| fail(format!("create {}: {e}", target.display())))?;
            let perms = entry
                .metadata()
                .map_err(|e| fail(e.to_string()))?
                .permissions();
            dirs.push((target, perms));
        } else if file_type.is_symlink() {
            let link = fs::read_link(path)
                .map_err(|e| fail(format!("readlink {}: {e}", path.display())))?;
            make_symlink(&link, &target)
                .map_err(|e| fail(format!("symlink {}: {e}", target.display())))?;
            copied += 1;
        } else {
            // fs::copy는 권한 비트도 함께 복사함
            fs::copy(path, &target)
                .map_err(|e| fail(format!("copy {}: {e}", path.display())))?;
            copied += 1;
        }
    }

    // 읽기 전용 디렉터리도 내용을 채운 뒤에 권한을 적용, 가장 깊은 곳부터
    for (dir, perms) in dirs.into_iter().rev() {
        fs::set_permissions(&dir, perms)
            .map_err(|e| fail(format!("chmod {}: {e}", dir.display())))?;
    }
    Ok(copied)
}

#[cfg(unix)]
fn make_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn make_symlink(_link: &Path, target: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot recreate symlink {} on this platform", target.display()),
    ))
}
