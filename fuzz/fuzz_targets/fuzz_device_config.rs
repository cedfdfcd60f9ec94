//! Fuzzes device configuration parsing from JSON and YAML.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_device_config

#![deny(static_mut_refs)]
#![no_main]

use devif_engine::config::DeviceConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Accepted configs must survive a JSON round trip.
    for config in [DeviceConfig::from_json_str(text), DeviceConfig::from_yaml_str(text)]
        .into_iter()
        .flatten()
    {
        let json = config.to_json_string().expect("valid config serializes");
        let back = DeviceConfig::from_json_str(&json).expect("serialized config parses");
        assert_eq!(back, config);
    }
});
