#![doc = include_str!("../README.md")]

pub mod body;
pub mod config;
pub mod environment;
pub mod error;
pub mod foundation;
pub mod lock;
pub mod marker;
pub mod metrics;
pub mod pollution;
pub mod registry;
pub mod runner;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{
    BodyError, ConfigError, EnvironmentError, FoundationError, LockError, MarkerError, NameError,
    RunnerError, TestbedError,
};

// 설정
pub use config::TestbedConfig;

// 엔진 구성 요소
pub use body::{CommandBody, UnitBody, UnitContext};
pub use environment::{Environment, EnvironmentManager, EnvironmentReport, UnitReport};
pub use foundation::{FoundationCache, FoundationStatus};
pub use lock::{LockHolder, LockManager, UnitLock};
pub use marker::MarkerStore;
pub use pollution::{PollutionDetector, PollutionReason, Verdict};
pub use registry::{EnvSpec, UnitRegistry, UnitSpec};
pub use runner::{RunReport, UnitRunner};

// 도메인 타입
pub use types::{EnvName, UnitId, UnitState};
