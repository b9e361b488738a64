#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use testbed_core::types::{EnvName, UnitId};

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    env: &'a str,
    unit: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    // 받아들여진 이름은 항상 단일 경로 요소여야 함
    if let Ok(env) = EnvName::new(input.env) {
        let s = env.as_str();
        assert!(!s.contains('/') && !s.contains('\\'));
        assert!(!s.starts_with('.'));
        assert_ne!(s, "..");
    }
    if let Ok(unit) = input.unit.parse::<UnitId>() {
        let s = unit.as_str();
        assert!(!s.contains('/') && !s.contains('\\'));
        assert!(!s.starts_with('.'));
    }
});
