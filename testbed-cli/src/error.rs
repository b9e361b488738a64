//! CLI-specific error types and exit code mapping

use testbed_core::error::{
    EnvironmentError, FoundationError, LockError, MarkerError, RunnerError, TestbedError,
};

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// Logging could not be initialised.
    #[error("logging error: {0}")]
    Logging(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from testbed-core.
    #[error("{0}")]
    Core(#[from] TestbedError),

    /// Unit run failure.
    #[error("{0}")]
    Run(#[from] RunnerError),

    /// Environment management failure.
    #[error("{0}")]
    Environment(#[from] EnvironmentError),

    /// Foundation cache failure.
    #[error("{0}")]
    Foundation(#[from] FoundationError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                                     |
    /// |------|---------------------------------------------|
    /// | 0    | Success                                     |
    /// | 1    | General / command / unit body error         |
    /// | 2    | Configuration error                         |
    /// | 3    | Lock conflict or environment busy           |
    /// | 4    | Pollution rebuild or stale lock reclaim     |
    /// | 5    | Prerequisite failure                        |
    /// | 6    | Foundation copy failure                     |
    /// | 10   | IO error                                    |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Io(_) => 10,
            Self::Core(e) => core_code(e),
            Self::Run(e) => runner_code(e),
            Self::Environment(e) => environment_code(e),
            Self::Foundation(e) => foundation_code(e),
            Self::JsonSerialize(_) | Self::Command(_) | Self::Logging(_) => 1,
        }
    }
}

fn core_code(err: &TestbedError) -> i32 {
    match err {
        TestbedError::Config(_) => 2,
        TestbedError::Name(_) => 1,
        TestbedError::Marker(e) => marker_code(e),
        TestbedError::Lock(e) => lock_code(e),
        TestbedError::Environment(e) => environment_code(e),
        TestbedError::Foundation(e) => foundation_code(e),
        TestbedError::Runner(e) => runner_code(e),
        TestbedError::Io(_) => 10,
    }
}

fn runner_code(err: &RunnerError) -> i32 {
    match err {
        RunnerError::PrerequisiteFailed { .. } => 5,
        RunnerError::RebuildFailed { .. } => 4,
        RunnerError::Lock(e) => lock_code(e),
        RunnerError::Marker(e) => marker_code(e),
        RunnerError::Environment(e) => environment_code(e),
        RunnerError::Foundation(e) => foundation_code(e),
        RunnerError::UnknownUnit { .. }
        | RunnerError::CycleDetected { .. }
        | RunnerError::BodyFailed { .. } => 1,
    }
}

fn lock_code(err: &LockError) -> i32 {
    match err {
        LockError::Conflict { .. } => 3,
        LockError::StaleReclaimFailed { .. } => 4,
        LockError::Io { .. } => 10,
    }
}

fn environment_code(err: &EnvironmentError) -> i32 {
    match err {
        EnvironmentError::Busy { .. } => 3,
        EnvironmentError::OutsideRoot { .. } => 1,
        EnvironmentError::Lock(e) => lock_code(e),
        EnvironmentError::Marker(e) => marker_code(e),
        EnvironmentError::Io { .. } => 10,
    }
}

fn foundation_code(err: &FoundationError) -> i32 {
    match err {
        FoundationError::CopyFailed { .. } => 6,
        FoundationError::MissingWorkTree { .. } => 1,
        FoundationError::Marker(e) => marker_code(e),
    }
}

fn marker_code(err: &MarkerError) -> i32 {
    match err {
        MarkerError::Io { .. } => 10,
        _ => 1,
    }
}
