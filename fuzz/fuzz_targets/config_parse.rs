#![no_main]

use libfuzzer_sys::fuzz_target;
use testbed_core::TestbedConfig;
use testbed_core::registry::UnitRegistry;

fuzz_target!(|data: &[u8]| {
    // TOML 파서는 &str을 받으므로 UTF-8 변환 필요
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = TestbedConfig::parse(text) else {
        return;
    };
    // 검증을 통과한 설정은 레지스트리도 반드시 구성되어야 함
    if config.validate().is_ok() {
        assert!(UnitRegistry::from_config(&config).is_ok());
    }
});
