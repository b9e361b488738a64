//! 유닛 본문 — 엔진이 해석하지 않는 외부 작업의 경계
//!
//! 엔진은 유닛 본문을 불투명한 작업으로 취급합니다. 본문은 환경의 작업 트리
//! 경로를 받아 성공/실패만 돌려주며, 그 안에서 빌드 도구, 버전 관리 클라이언트,
//! 데이터베이스 클라이언트 등을 자유롭게 호출할 수 있습니다.

use std::fmt;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::BodyError;
use crate::types::{EnvName, UnitId};

/// 유닛 본문에 전달되는 명시적 실행 컨텍스트
///
/// 작업 디렉토리나 프로세스 환경변수 같은 암묵적 전역 상태 대신
/// 필요한 모든 정보를 이 구조체로 전달합니다.
#[derive(Debug, Clone, Copy)]
pub struct UnitContext<'a> {
    /// 실행 중인 환경
    pub env: &'a EnvName,
    /// 실행 중인 유닛
    pub unit: &'a UnitId,
    /// 환경 루트 디렉토리
    pub env_root: &'a Path,
    /// 유닛이 변경할 수 있는 작업 트리
    pub work_dir: &'a Path,
    /// 최상위 실행 요청 ID (로그 상관관계용)
    pub run_id: Uuid,
}

/// 유닛 본문 trait
///
/// 새로운 종류의 유닛 작업을 지원하려면 이 trait을 구현합니다.
/// `Fn(&UnitContext) -> Result<(), BodyError>` 클로저도 그대로 사용할 수 있습니다.
pub trait UnitBody: Send + Sync {
    /// 진단 메시지에 표시할 본문 설명
    fn describe(&self) -> String {
        "<in-process body>".to_owned()
    }

    /// 작업 트리에서 본문을 실행
    fn execute(&self, ctx: &UnitContext<'_>) -> Result<(), BodyError>;
}

impl<F> UnitBody for F
where
    F: Fn(&UnitContext<'_>) -> Result<(), BodyError> + Send + Sync,
{
    fn execute(&self, ctx: &UnitContext<'_>) -> Result<(), BodyError> {
        self(ctx)
    }
}

/// 외부 명령을 작업 트리에서 실행하는 본문
///
/// 표준 입출력은 상속되며, 다음 환경변수가 추가로 전달됩니다:
/// `TESTBED_ENV`, `TESTBED_UNIT`, `TESTBED_ENV_ROOT`, `TESTBED_WORK_DIR`, `TESTBED_RUN_ID`.
#[derive(Debug, Clone)]
pub struct CommandBody {
    program: String,
    args: Vec<String>,
}

impl CommandBody {
    /// argv에서 명령 본문을 생성합니다. 빈 argv는 `None`입니다.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl fmt::Display for CommandBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl UnitBody for CommandBody {
    fn describe(&self) -> String {
        self.to_string()
    }

    fn execute(&self, ctx: &UnitContext<'_>) -> Result<(), BodyError> {
        info!(
            env = %ctx.env,
            unit = %ctx.unit,
            command = %self,
            "executing unit command"
        );

        let status = Command::new(&self.program)
            .args(&self.args)
            .current_dir(ctx.work_dir)
            .env("TESTBED_ENV", ctx.env.as_str())
            .env("TESTBED_UNIT", ctx.unit.as_str())
            .env("TESTBED_ENV_ROOT", ctx.env_root)
            .env("TESTBED_WORK_DIR", ctx.work_dir)
            .env("TESTBED_RUN_ID", ctx.run_id.to_string())
            .status()
            .map_err(|source| BodyError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        debug!(unit = %ctx.unit, status = %status, "unit command exited");

        if status.success() {
            Ok(())
        } else {
            Err(BodyError::ExitStatus {
                program: self.program.clone(),
                code: status.code(),
            })
        }
    }
}
