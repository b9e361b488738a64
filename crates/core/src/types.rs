//! 도메인 타입 — 검증된 식별자와 유닛 상태
//!
//! 환경과 유닛은 자유 형식 문자열이 아니라 검증된 newtype으로만 다룹니다.
//! 이름은 그대로 디렉토리/파일 이름의 일부가 되므로, 경로 구분자나
//! `..` 같은 경로 탐색 요소는 생성 시점에 거부됩니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NameError;

/// 이름의 최대 길이 (바이트)
pub const MAX_NAME_LEN: usize = 128;

fn validate_name(kind: &'static str, raw: &str) -> Result<(), NameError> {
    if raw.is_empty() {
        return Err(NameError::Empty { kind });
    }
    if raw.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong {
            kind,
            len: raw.len(),
            max: MAX_NAME_LEN,
        });
    }
    if let Some(ch) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(NameError::InvalidChar {
            kind,
            name: raw.to_owned(),
            ch,
        });
    }
    if raw.starts_with('.') || raw.starts_with('-') {
        return Err(NameError::Reserved {
            kind,
            name: raw.to_owned(),
            reason: "must not start with '.' or '-'",
        });
    }
    if raw.contains("..") {
        return Err(NameError::Reserved {
            kind,
            name: raw.to_owned(),
            reason: "must not contain '..'",
        });
    }
    Ok(())
}

/// 환경 이름
///
/// 환경 루트 디렉토리 `<env_root>/<name>`의 마지막 경로 요소가 됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EnvName(String);

impl EnvName {
    /// 이름을 검증하여 생성합니다.
    pub fn new(raw: impl Into<String>) -> Result<Self, NameError> {
        let raw = raw.into();
        validate_name("environment", &raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EnvName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EnvName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EnvName> for String {
    fn from(value: EnvName) -> Self {
        value.0
    }
}

impl AsRef<str> for EnvName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 유닛 식별자
///
/// 마커 파일(`.start-<unit>`, `.complete-<unit>`)과
/// 락 디렉토리(`.lock-<unit>`) 이름에 사용됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId(String);

impl UnitId {
    /// 이름을 검증하여 생성합니다.
    pub fn new(raw: impl Into<String>) -> Result<Self, NameError> {
        let raw = raw.into();
        validate_name("unit", &raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UnitId {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UnitId {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UnitId> for String {
    fn from(value: UnitId) -> Self {
        value.0
    }
}

impl AsRef<str> for UnitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 환경 안에서의 유닛 상태
///
/// 합법적인 전이는 `Absent → Started → Completed` 하나뿐입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    /// 마커 없음
    Absent,
    /// 시작 마커만 존재
    Started,
    /// 완료 마커 존재
    Completed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_numeric_prefixed_names() {
        let unit: UnitId = "01-setup_v2.sh".parse().unwrap();
        assert_eq!(unit.as_str(), "01-setup_v2.sh");
        assert_eq!(unit.to_string(), "01-setup_v2.sh");
    }

    #[test]
    fn rejects_empty_name() {
        assert_eq!(
            UnitId::new("").unwrap_err(),
            NameError::Empty { kind: "unit" }
        );
    }

    #[test]
    fn rejects_path_separators() {
        let err = EnvName::new("../etc").unwrap_err();
        assert!(matches!(err, NameError::InvalidChar { ch: '/', .. }));
        let err = EnvName::new("a\\b").unwrap_err();
        assert!(matches!(err, NameError::InvalidChar { ch: '\\', .. }));
    }

    #[test]
    fn rejects_dot_dot_and_hidden_names() {
        assert!(matches!(
            EnvName::new("..").unwrap_err(),
            NameError::Reserved { .. }
        ));
        assert!(matches!(
            EnvName::new("a..b").unwrap_err(),
            NameError::Reserved { .. }
        ));
        assert!(matches!(
            UnitId::new(".state").unwrap_err(),
            NameError::Reserved { .. }
        ));
        assert!(matches!(
            UnitId::new("-rf").unwrap_err(),
            NameError::Reserved { .. }
        ));
    }

    #[test]
    fn rejects_overlong_names() {
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            UnitId::new(long).unwrap_err(),
            NameError::TooLong { len: 129, .. }
        ));
        assert!(UnitId::new("a".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn rejects_whitespace_and_unicode() {
        assert!(UnitId::new("build tool").is_err());
        assert!(UnitId::new("빌드").is_err());
    }

    #[test]
    fn serde_validates_on_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            env: EnvName,
        }
        let ok: Wrapper = toml::from_str("env = \"sequential\"").unwrap();
        assert_eq!(ok.env.as_str(), "sequential");
        let bad: Result<Wrapper, _> = toml::from_str("env = \"../../tmp\"");
        assert!(bad.is_err());
    }

    #[test]
    fn unit_state_display_is_lowercase() {
        assert_eq!(UnitState::Absent.to_string(), "absent");
        assert_eq!(UnitState::Started.to_string(), "started");
        assert_eq!(UnitState::Completed.to_string(), "completed");
    }
}
