//! 락 관리자 — (환경, 유닛) 단위의 프로세스 간 상호 배제
//!
//! 디렉토리 생성(`mkdir`)의 원자성을 이용합니다:
//!
//! ```text
//! .state/.lock-<unit>/pid
//! ```
//!
//! # 획득 알고리즘
//! 1. `.lock-<unit>` 디렉토리를 `create_dir`로 생성 시도
//! 2. 성공 → 현재 프로세스 pid를 `pid` 파일에 기록하고 반환
//! 3. 이미 존재 → 기록된 pid의 생존 여부를 `kill(pid, 0)`으로 확인
//!    - 살아있음 → [`LockError::Conflict`] (재시도하지 않음)
//!    - 죽었음 → 오래된 락으로 보고 회수 후 재시도 (최대 `max_reclaim_attempts`회)
//!
//! # 회수
//! 오래된 락은 바로 삭제하지 않고 `.reclaim-<unit>-<uuid>` 이름으로 옮긴 뒤
//! 옮겨진 디렉토리의 pid를 다시 확인합니다. 관찰한 pid와 같으면 삭제하고,
//! 그사이 다른 프로세스가 새로 획득한 락을 옮긴 경우에는 원래 이름으로
//! 되돌리고 [`LockError::StaleReclaimFailed`]를 반환합니다. 이미 다른
//! 프로세스가 옮겨 간 락은 건드리지 않고 획득을 다시 시도합니다.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LockConfig;
use crate::environment::Environment;
use crate::error::LockError;
use crate::metrics as m;
use crate::types::{EnvName, UnitId};

/// 락 디렉토리 접두어
pub const LOCK_PREFIX: &str = ".lock-";
/// 락 디렉토리 안의 pid 파일 이름
pub const PID_FILE: &str = "pid";
/// 회수 중인 락이 잠시 옮겨지는 이름의 접두어
const TOMBSTONE_PREFIX: &str = ".reclaim-";

/// 락 관리자
#[derive(Debug, Clone)]
pub struct LockManager {
    max_reclaim_attempts: u32,
    init_grace: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(&LockConfig::default())
    }
}

impl LockManager {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            max_reclaim_attempts: config.max_reclaim_attempts,
            init_grace: Duration::from_secs(config.init_grace_secs),
        }
    }

    /// (환경, 유닛) 락을 획득합니다.
    ///
    /// # Errors
    ///
    /// - [`LockError::Conflict`]: 살아있는 프로세스가 락을 보유 중
    /// - [`LockError::StaleReclaimFailed`]: 오래된 락 회수가 허용 횟수를 초과했거나 삭제 불가
    /// - [`LockError::Io`]: 상태 디렉토리 생성 또는 pid 기록 실패
    pub fn acquire(&self, env: &Environment, unit: &UnitId) -> Result<UnitLock, LockError> {
        fs::create_dir_all(env.state_dir()).map_err(|source| LockError::Io {
            path: env.state_dir().to_path_buf(),
            source,
        })?;

        let dir = lock_dir(env.state_dir(), unit);
        let pid = std::process::id();
        let mut reclaimed = 0u32;

        loop {
            match fs::create_dir(&dir) {
                Ok(()) => match write_pid(&dir, pid) {
                    Ok(()) if read_pid(&dir) == Some(pid) => {
                        debug!(env = %env.name(), unit = %unit, pid, "lock acquired");
                        return Ok(UnitLock {
                            env: env.name().clone(),
                            unit: unit.clone(),
                            dir,
                            pid,
                            released: false,
                        });
                    }
                    Ok(()) => {
                        debug!(env = %env.name(), unit = %unit, "lock moved while initializing, retrying");
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        debug!(env = %env.name(), unit = %unit, "lock moved while initializing, retrying");
                    }
                    Err(source) => {
                        // pid 없는 락을 남기지 않음
                        let _ = fs::remove_dir_all(&dir);
                        return Err(LockError::Io { path: dir, source });
                    }
                },
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    self.contend(env, unit, &dir, reclaimed)?;
                }
                Err(source) => return Err(LockError::Io { path: dir, source }),
            }

            reclaimed += 1;
            if reclaimed > self.max_reclaim_attempts {
                return Err(LockError::StaleReclaimFailed {
                    env: env.name().clone(),
                    unit: unit.clone(),
                    attempts: reclaimed,
                    reason: "lock kept reappearing".to_owned(),
                });
            }
        }
    }

    /// 이미 존재하는 락의 보유자를 확인하고, 오래된 락이면 회수합니다.
    ///
    /// `Ok`는 획득을 다시 시도해도 된다는 뜻입니다.
    fn contend(
        &self,
        env: &Environment,
        unit: &UnitId,
        dir: &Path,
        reclaimed: u32,
    ) -> Result<(), LockError> {
        match inspect_holder(dir, self.init_grace) {
            HolderState::Alive(holder) => Err(LockError::Conflict {
                env: env.name().clone(),
                unit: unit.clone(),
                pid: Some(holder),
            }),
            HolderState::Initializing => Err(LockError::Conflict {
                env: env.name().clone(),
                unit: unit.clone(),
                pid: None,
            }),
            HolderState::Vanished => {
                debug!(env = %env.name(), unit = %unit, "lock released while inspecting, retrying");
                Ok(())
            }
            HolderState::Stale(holder) => {
                if reclaimed >= self.max_reclaim_attempts {
                    return Err(LockError::StaleReclaimFailed {
                        env: env.name().clone(),
                        unit: unit.clone(),
                        attempts: reclaimed,
                        reason: "retry limit exceeded".to_owned(),
                    });
                }
                warn!(
                    env = %env.name(),
                    unit = %unit,
                    stale_pid = ?holder,
                    "reclaiming stale lock"
                );
                let failed = |reason: String| LockError::StaleReclaimFailed {
                    env: env.name().clone(),
                    unit: unit.clone(),
                    attempts: reclaimed + 1,
                    reason,
                };
                match reclaim(env.state_dir(), dir, unit, holder).map_err(failed)? {
                    Reclaim::Removed => {
                        metrics::counter!(m::STALE_LOCKS_RECLAIMED_TOTAL).increment(1);
                        Ok(())
                    }
                    Reclaim::Gone => {
                        debug!(env = %env.name(), unit = %unit, "stale lock already taken by another reclaimer");
                        Ok(())
                    }
                    Reclaim::Restored => Err(failed(
                        "lock was re-acquired during reclaim".to_owned(),
                    )),
                }
            }
        }
    }

    /// 락을 해제합니다 (락 디렉토리를 무조건 삭제).
    pub fn release(&self, lock: UnitLock) -> Result<(), LockError> {
        lock.release()
    }

    /// 환경의 모든 락 보유자를 조회합니다.
    pub fn holders(&self, env: &Environment) -> Result<Vec<LockHolder>, LockError> {
        let state_dir = env.state_dir();
        let entries = match fs::read_dir(state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LockError::Io {
                    path: state_dir.to_path_buf(),
                    source,
                });
            }
        };

        let mut holders = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LockError::Io {
                path: state_dir.to_path_buf(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(raw) = file_name.to_str().and_then(|n| n.strip_prefix(LOCK_PREFIX)) else {
                continue;
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Ok(unit) = UnitId::new(raw) else {
                debug!(env = %env.name(), dir = %path.display(), "skipping unrecognised lock directory");
                continue;
            };
            let (pid, alive) = match inspect_holder(&path, self.init_grace) {
                HolderState::Alive(pid) => (Some(pid), true),
                HolderState::Initializing => (None, true),
                HolderState::Stale(pid) => (pid, false),
                HolderState::Vanished => continue,
            };
            holders.push(LockHolder { unit, pid, alive });
        }
        holders.sort_by(|a, b| a.unit.cmp(&b.unit));
        Ok(holders)
    }
}

/// 보유 중인 (환경, 유닛) 락
///
/// 명시적으로 [`UnitLock::release`]를 호출하지 않으면 drop 시점에
/// 최선 노력으로 해제됩니다. 프로세스가 비정상 종료하면 락 디렉토리가
/// 남고, 다음 획득 시 오래된 락으로 회수됩니다.
#[derive(Debug)]
pub struct UnitLock {
    env: EnvName,
    unit: UnitId,
    dir: PathBuf,
    pid: u32,
    released: bool,
}

impl UnitLock {
    pub fn env(&self) -> &EnvName {
        &self.env
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// 락 디렉토리를 삭제합니다.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        remove_lock_dir(&self.dir).map_err(|source| LockError::Io {
            path: self.dir.clone(),
            source,
        })?;
        debug!(env = %self.env, unit = %self.unit, "lock released");
        Ok(())
    }
}

impl Drop for UnitLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match remove_lock_dir(&self.dir) {
            Ok(()) => info!(env = %self.env, unit = %self.unit, "lock released on drop"),
            Err(e) => warn!(
                env = %self.env,
                unit = %self.unit,
                error = %e,
                "failed to release lock on drop"
            ),
        }
    }
}

/// 락 보유자 정보 (진단용)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockHolder {
    /// 락 대상 유닛
    pub unit: UnitId,
    /// 기록된 pid (초기화 중이거나 손상된 경우 `None`)
    pub pid: Option<u32>,
    /// 보유자가 살아있는지 여부
    pub alive: bool,
}

enum HolderState {
    /// 살아있는 프로세스가 보유
    Alive(u32),
    /// pid가 아직 기록되지 않았고 유예 시간 이내
    Initializing,
    /// 보유자가 죽었거나, pid 없이 유예 시간이 지남
    Stale(Option<u32>),
    /// 확인 도중 락이 사라짐
    Vanished,
}

fn inspect_holder(dir: &Path, init_grace: Duration) -> HolderState {
    match read_pid(dir) {
        Some(pid) if is_process_alive(pid) => HolderState::Alive(pid),
        Some(pid) => HolderState::Stale(Some(pid)),
        None => inspect_by_age(dir, init_grace),
    }
}

fn inspect_by_age(dir: &Path, init_grace: Duration) -> HolderState {
    let modified = match fs::metadata(dir).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) if e.kind() == ErrorKind::NotFound => return HolderState::Vanished,
        Err(_) => return HolderState::Stale(None),
    };
    match modified.elapsed() {
        Ok(age) if age >= init_grace => HolderState::Stale(None),
        // 미래 시각(시계 역행)도 초기화 중으로 취급
        _ => HolderState::Initializing,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Reclaim {
    /// 오래된 락을 삭제함
    Removed,
    /// 다른 회수자가 먼저 옮겨 감
    Gone,
    /// 새로 획득된 락을 옮겼기 때문에 되돌려 놓음
    Restored,
}

/// 오래된 락을 묘비 이름으로 옮긴 뒤, 관찰한 보유자와 같을 때만 삭제합니다.
fn reclaim(
    state_dir: &Path,
    dir: &Path,
    unit: &UnitId,
    observed: Option<u32>,
) -> Result<Reclaim, String> {
    let tombstone = state_dir.join(format!(
        "{TOMBSTONE_PREFIX}{unit}-{}",
        Uuid::new_v4().simple()
    ));
    match fs::rename(dir, &tombstone) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Reclaim::Gone),
        Err(e) => return Err(format!("cannot move {} aside: {e}", dir.display())),
    }

    let captured = read_pid(&tombstone);
    if captured == observed && captured.is_none_or(|pid| !is_process_alive(pid)) {
        fs::remove_dir_all(&tombstone)
            .map_err(|e| format!("cannot remove {}: {e}", tombstone.display()))?;
        return Ok(Reclaim::Removed);
    }

    if let Err(e) = fs::rename(&tombstone, dir) {
        warn!(
            unit = %unit,
            lock = %dir.display(),
            error = %e,
            "failed to restore lock moved during reclaim"
        );
        let _ = fs::remove_dir_all(&tombstone);
    }
    Ok(Reclaim::Restored)
}

fn lock_dir(state_dir: &Path, unit: &UnitId) -> PathBuf {
    state_dir.join(format!("{LOCK_PREFIX}{unit}"))
}

fn read_pid(dir: &Path) -> Option<u32> {
    fs::read_to_string(dir.join(PID_FILE))
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn write_pid(dir: &Path, pid: u32) -> std::io::Result<()> {
    let mut file = fs::File::create(dir.join(PID_FILE))?;
    writeln!(file, "{pid}")?;
    file.sync_all()
}

fn remove_lock_dir(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// 주어진 pid의 프로세스가 살아있는지 확인합니다.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // 0은 프로세스 그룹 전체, i32 범위 밖은 음수로 해석되므로 유효한 pid가 아님
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    // SAFETY: kill(2) with signal 0 is safe and does not affect the target process
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };

    if result == 0 {
        true
    } else {
        // 프로세스는 존재하지만 시그널 권한이 없음
        std::io::Error::last_os_error().kind() == ErrorKind::PermissionDenied
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    warn!("process liveness check not supported on this platform");
    true
}
