//! 환경 관리자 — 환경 디렉토리의 생성, 조회, 삭제
//!
//! 환경 하나는 환경 루트 아래의 디렉토리 하나입니다:
//!
//! ```text
//! <env_root>/<env>/
//!   .state/      # 마커와 락
//!   work/        # 유닛이 변경하는 작업 트리
//! ```
//!
//! 삭제는 살아있는 락 보유자가 없을 때만 허용되며, 정규화된 경로가
//! 환경 루트의 하위 경로인지 확인한 뒤에만 수행합니다.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TestbedConfig;
use crate::error::EnvironmentError;
use crate::lock::{LockHolder, LockManager};
use crate::marker::MarkerStore;
use crate::metrics as m;
use crate::types::{EnvName, UnitId, UnitState};

/// 환경별 상태 디렉토리 이름
pub const STATE_DIR: &str = ".state";

/// 로드된 환경 핸들
#[derive(Debug, Clone)]
pub struct Environment {
    name: EnvName,
    root: PathBuf,
    state_dir: PathBuf,
    work_dir: PathBuf,
    created: bool,
}

impl Environment {
    pub fn name(&self) -> &EnvName {
        &self.name
    }

    /// 환경 디렉토리
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 마커와 락이 저장되는 디렉토리
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// 유닛 본문이 변경하는 작업 트리
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// 이 핸들을 얻은 `load` 호출이 환경을 새로 만들었는지 여부
    pub fn created(&self) -> bool {
        self.created
    }

    /// 이 환경의 마커 저장소
    pub fn markers(&self) -> MarkerStore<'_> {
        MarkerStore::new(self)
    }
}

/// 환경 관리자
#[derive(Debug, Clone)]
pub struct EnvironmentManager {
    root: PathBuf,
    work_dir: String,
    locks: LockManager,
}

impl EnvironmentManager {
    pub fn new(root: impl Into<PathBuf>, work_dir: impl Into<String>, locks: LockManager) -> Self {
        Self {
            root: root.into(),
            work_dir: work_dir.into(),
            locks,
        }
    }

    /// 설정에서 환경 관리자를 생성합니다.
    pub fn from_config(config: &TestbedConfig) -> Self {
        Self::new(
            config.general.env_root_path(),
            config.general.work_dir.clone(),
            LockManager::new(&config.lock),
        )
    }

    /// 환경 루트 디렉토리
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// 디스크에 접근하지 않고 환경 핸들을 만듭니다.
    pub fn locate(&self, name: &EnvName) -> Environment {
        let root = self.root.join(name.as_str());
        Environment {
            name: name.clone(),
            state_dir: root.join(STATE_DIR),
            work_dir: root.join(&self.work_dir),
            root,
            created: false,
        }
    }

    /// 환경 디렉토리가 존재하는지 확인합니다.
    pub fn exists(&self, name: &EnvName) -> bool {
        self.root.join(name.as_str()).is_dir()
    }

    /// 환경을 로드합니다. 없으면 상태 디렉토리와 작업 트리를 함께 생성합니다.
    pub fn load(&self, name: &EnvName) -> Result<Environment, EnvironmentError> {
        let mut env = self.locate(name);
        env.created = !env.root.exists();

        for dir in [&env.state_dir, &env.work_dir] {
            fs::create_dir_all(dir).map_err(|source| EnvironmentError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        if env.created {
            info!(env = %name, root = %env.root.display(), "environment created");
        } else {
            debug!(env = %name, "environment loaded");
        }
        Ok(env)
    }

    /// 환경 디렉토리 전체를 삭제합니다.
    ///
    /// 존재하지 않는 환경은 아무 작업도 하지 않습니다.
    ///
    /// # Errors
    ///
    /// - [`EnvironmentError::Busy`]: 살아있는 프로세스가 락을 보유 중 (호출자 자신 포함)
    /// - [`EnvironmentError::OutsideRoot`]: 대상 경로가 환경 루트 밖으로 해석됨
    pub fn destroy(&self, name: &EnvName) -> Result<(), EnvironmentError> {
        let env = self.locate(name);
        match fs::symlink_metadata(&env.root) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(env = %name, "environment does not exist, nothing to destroy");
                return Ok(());
            }
            Err(source) => {
                return Err(EnvironmentError::Io {
                    path: env.root.clone(),
                    source,
                });
            }
        }

        let target = self.guard_scope(&env.root)?;

        if let Some(holder) = self.locks.holders(&env)?.into_iter().find(|h| h.alive) {
            warn!(
                env = %name,
                unit = %holder.unit,
                pid = ?holder.pid,
                "refusing to destroy environment with a live lock"
            );
            return Err(EnvironmentError::Busy {
                env: name.clone(),
                unit: holder.unit,
                pid: holder.pid,
            });
        }

        fs::remove_dir_all(&target).map_err(|source| EnvironmentError::Io {
            path: target.clone(),
            source,
        })?;
        metrics::counter!(m::ENVIRONMENTS_DESTROYED_TOTAL).increment(1);
        info!(env = %name, root = %target.display(), "environment destroyed");
        Ok(())
    }

    /// 환경을 삭제한 뒤 새로 생성합니다.
    pub fn reset(&self, name: &EnvName) -> Result<Environment, EnvironmentError> {
        self.destroy(name)?;
        self.load(name)
    }

    /// 환경 루트 아래의 모든 환경 (이름 순)
    ///
    /// 환경 이름 규칙에 맞지 않는 디렉토리는 건너뜁니다.
    pub fn list(&self) -> Result<Vec<EnvName>, EnvironmentError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(EnvironmentError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| EnvironmentError::Io {
                path: self.root.clone(),
                source,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str().and_then(|n| EnvName::new(n).ok()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// 환경의 마커, 락, 파운데이션 상태를 진단용으로 수집합니다.
    ///
    /// `order`에 나열된 유닛이 먼저 그 순서대로 나오고, 순서에 없지만
    /// 마커가 있는 유닛이 이름 순으로 뒤따릅니다. 환경을 생성하지 않습니다.
    pub fn inspect(
        &self,
        name: &EnvName,
        order: &[UnitId],
    ) -> Result<EnvironmentReport, EnvironmentError> {
        let env = self.locate(name);
        if !self.exists(name) {
            return Ok(EnvironmentReport {
                name: name.clone(),
                root: env.root,
                exists: false,
                foundation_completed_at: None,
                units: Vec::new(),
                locks: Vec::new(),
            });
        }

        let markers = env.markers();
        let mut ids: Vec<UnitId> = order.to_vec();
        let mut extras: Vec<UnitId> = markers
            .list_started()?
            .into_iter()
            .chain(markers.list_completed()?)
            .filter(|u| !order.contains(u))
            .collect();
        extras.sort();
        extras.dedup();
        ids.extend(extras);

        let mut units = Vec::with_capacity(ids.len());
        for unit in ids {
            units.push(UnitReport {
                state: markers.state(&unit),
                started_at: markers.started_at(&unit)?,
                completed_at: markers.completed_at(&unit)?,
                in_order: order.contains(&unit),
                unit,
            });
        }

        Ok(EnvironmentReport {
            name: name.clone(),
            foundation_completed_at: markers.foundation_completed_at()?,
            locks: self.locks.holders(&env)?,
            root: env.root,
            exists: true,
            units,
        })
    }

    /// 대상이 환경 루트의 엄격한 하위 경로인지 확인하고 정규화된 경로를 반환합니다.
    fn guard_scope(&self, target: &Path) -> Result<PathBuf, EnvironmentError> {
        let root = fs::canonicalize(&self.root).map_err(|source| EnvironmentError::Io {
            path: self.root.clone(),
            source,
        })?;
        let resolved = fs::canonicalize(target).map_err(|source| EnvironmentError::Io {
            path: target.to_path_buf(),
            source,
        })?;

        if resolved != root && resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            Err(EnvironmentError::OutsideRoot {
                path: resolved,
                root,
            })
        }
    }
}

/// 환경 진단 보고서
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentReport {
    pub name: EnvName,
    pub root: PathBuf,
    pub exists: bool,
    pub foundation_completed_at: Option<DateTime<Utc>>,
    pub units: Vec<UnitReport>,
    pub locks: Vec<LockHolder>,
}

impl EnvironmentReport {
    /// 시작했지만 완료되지 않은 유닛
    pub fn interrupted(&self) -> impl Iterator<Item = &UnitId> {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Started)
            .map(|u| &u.unit)
    }
}

/// 유닛 하나의 마커 상태
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub unit: UnitId,
    pub state: UnitState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 환경의 선언된 순서에 포함되는지 여부
    pub in_order: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, EnvironmentManager) {
        let dir = TempDir::new().unwrap();
        let manager = EnvironmentManager::new(dir.path().join("envs"), "work", LockManager::default());
        (dir, manager)
    }

    fn e(name: &str) -> EnvName {
        name.parse().unwrap()
    }

    fn u(name: &str) -> UnitId {
        name.parse().unwrap()
    }

    #[test]
    fn load_creates_layout_once() {
        let (_dir, manager) = setup();
        let first = manager.load(&e("seq")).unwrap();
        assert!(first.created());
        assert!(first.state_dir().is_dir());
        assert!(first.work_dir().is_dir());
        assert!(first.state_dir().ends_with("seq/.state"));

        let second = manager.load(&e("seq")).unwrap();
        assert!(!second.created());
    }

    #[test]
    fn locate_does_not_touch_disk() {
        let (_dir, manager) = setup();
        let env = manager.locate(&e("seq"));
        assert!(!env.root().exists());
        assert!(!manager.exists(&e("seq")));
    }

    #[test]
    fn destroy_missing_is_noop() {
        let (_dir, manager) = setup();
        manager.destroy(&e("nothing")).unwrap();
    }

    #[test]
    fn destroy_removes_markers_and_work_tree() {
        let (_dir, manager) = setup();
        let env = manager.load(&e("seq")).unwrap();
        env.markers().record_start(&u("a")).unwrap();
        fs::write(env.work_dir().join("file"), "data").unwrap();

        manager.destroy(&e("seq")).unwrap();
        assert!(!env.root().exists());
        assert!(manager.load(&e("seq")).unwrap().created());
    }

    #[test]
    fn destroy_with_own_live_lock_is_busy() {
        let (_dir, manager) = setup();
        let env = manager.load(&e("seq")).unwrap();
        let lock = manager.locks().acquire(&env, &u("a")).unwrap();

        let err = manager.destroy(&e("seq")).unwrap_err();
        match err {
            EnvironmentError::Busy { unit, pid, .. } => {
                assert_eq!(unit, u("a"));
                assert_eq!(pid, Some(std::process::id()));
            }
            other => panic!("expected busy, got {other:?}"),
        }
        assert!(env.root().exists());

        lock.release().unwrap();
        manager.destroy(&e("seq")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn destroy_refuses_symlink_escaping_root() {
        let (dir, manager) = setup();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("precious"), "keep").unwrap();
        fs::create_dir_all(manager.root()).unwrap();
        std::os::unix::fs::symlink(&outside, manager.root().join("escape")).unwrap();

        let err = manager.destroy(&e("escape")).unwrap_err();
        assert!(matches!(err, EnvironmentError::OutsideRoot { .. }));
        assert!(outside.join("precious").exists());
    }

    #[test]
    fn list_returns_sorted_valid_names() {
        let (_dir, manager) = setup();
        assert!(manager.list().unwrap().is_empty());
        manager.load(&e("beta")).unwrap();
        manager.load(&e("alpha")).unwrap();
        fs::create_dir_all(manager.root().join(".hidden")).unwrap();
        fs::write(manager.root().join("file"), "x").unwrap();

        assert_eq!(manager.list().unwrap(), vec![e("alpha"), e("beta")]);
    }

    #[test]
    fn reset_yields_fresh_environment() {
        let (_dir, manager) = setup();
        let env = manager.load(&e("seq")).unwrap();
        env.markers().record_start(&u("a")).unwrap();

        let fresh = manager.reset(&e("seq")).unwrap();
        assert!(fresh.created());
        assert!(!fresh.markers().is_started(&u("a")));
    }

    #[test]
    fn inspect_orders_declared_units_first() {
        let (_dir, manager) = setup();
        let env = manager.load(&e("seq")).unwrap();
        let markers = env.markers();
        markers.record_start(&u("01-a")).unwrap();
        markers.record_complete(&u("01-a")).unwrap();
        markers.record_start(&u("zz-stray")).unwrap();

        let order = [u("01-a"), u("02-b")];
        let report = manager.inspect(&e("seq"), &order).unwrap();

        assert!(report.exists);
        let ids: Vec<_> = report.units.iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(ids, ["01-a", "02-b", "zz-stray"]);
        assert_eq!(report.units[0].state, UnitState::Completed);
        assert_eq!(report.units[1].state, UnitState::Absent);
        assert!(!report.units[2].in_order);
        assert_eq!(report.interrupted().collect::<Vec<_>>(), vec![&u("zz-stray")]);
    }

    #[test]
    fn inspect_missing_environment_does_not_create_it() {
        let (_dir, manager) = setup();
        let report = manager.inspect(&e("ghost"), &[]).unwrap();
        assert!(!report.exists);
        assert!(!manager.exists(&e("ghost")));
    }
}
