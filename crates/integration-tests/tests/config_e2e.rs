//! Devices opened from serialized configuration.

use anyhow::Result;
use devif_engine::prelude::*;
use devif_integration_tests::Bench;
use devif_test_helpers::fixtures::AUX;
use devif_test_helpers::prelude::*;
use insta::assert_snapshot;

const BENCH_YAML: &str = "\
default_timeout_ms: 50
modes: STATUS_VERIFY
terminal_modes:
  ctrl: GETSET_VERIFY | RETRY_ON_FAILURE
  \"0x201\": DOUBLEGET_VERIFY
retry_limit: 3
";

/// ```text
/// Given  a YAML config naming one terminal by name and one by address
/// When   a device is opened with it
/// Then   the timeout and both terminal policies are in effect
/// ```
#[test]
fn scenario_yaml_config_applies_policy() -> Result<()> {
    let config = DeviceConfig::from_yaml_str(BENCH_YAML)?;

    let bench = Bench::configured(&config)?;

    assert_eq!(bench.device.timeout()?, 50);
    assert_eq!(bench.device.modes()?, Modes::STATUS_VERIFY);
    assert_eq!(
        bench.device.terminal_modes("ctrl")?,
        Modes::GETSET_VERIFY | Modes::RETRY_ON_FAILURE
    );
    assert_eq!(bench.device.terminal_modes(AUX)?, Modes::DOUBLEGET_VERIFY);
    assert_eq!(bench.device.terminal_modes("adc")?, Modes::empty());
    Ok(())
}

/// ```text
/// Given  a configured retry limit of three attempts on ctrl
/// When   two transfers time out in a row
/// Then   the third attempt succeeds
/// ```
#[test]
fn scenario_retry_limit_from_config() -> Result<()> {
    let bench = Bench::configured(&DeviceConfig::from_yaml_str(BENCH_YAML)?)?;
    bench.faults.push_n(Fault::Timeout, 2);

    bench.device.get("ctrl", "id", Timeout::Default)?;

    assert_eq!(bench.faults.injected(), 2);
    Ok(())
}

/// ```text
/// Given  a configured retry limit of three attempts on ctrl
/// When   three transfers time out in a row
/// Then   the timeout surfaces with the configured default timeout
/// ```
#[test]
fn scenario_retry_limit_exhausted() -> Result<()> {
    let bench = Bench::configured(&DeviceConfig::from_yaml_str(BENCH_YAML)?)?;
    bench.faults.push_n(Fault::Timeout, 3);

    let err = must_fail(bench.device.get("ctrl", "id", Timeout::Default));

    assert_eq!(err.code(), -34);
    assert_snapshot!(err.to_string(), @"Transport timeout after 50ms");
    Ok(())
}

/// ```text
/// Given  a configured device
/// When   a call passes an explicit timeout
/// Then   the explicit timeout reaches the transport
/// ```
#[test]
fn scenario_explicit_timeout_wins() -> Result<()> {
    let bench = Bench::configured(&DeviceConfig::from_yaml_str(BENCH_YAML)?)?;
    bench.faults.push(Fault::Timeout);

    let err = must_fail(bench.device.get("aux", "leds", Timeout::Millis(7)));

    assert_snapshot!(err.to_string(), @"Transport timeout after 7ms");
    Ok(())
}

/// ```text
/// Given  a JSON config whose terminal_modes name a terminal the board lacks
/// When   a device is opened with it
/// Then   opening fails with NodeNotFound
/// ```
#[test]
fn scenario_unknown_terminal_in_config() -> Result<()> {
    let config = DeviceConfig::from_json_str(r#"{"terminal_modes": {"spindle": "GETSET_VERIFY"}}"#)?;

    let result = Bench::configured(&config);

    let err = result.err().ok_or_else(|| anyhow::anyhow!("config was accepted"))?;
    let err = err
        .downcast_ref::<Error>()
        .ok_or_else(|| anyhow::anyhow!("unexpected error type: {err}"))?;
    assert_eq!(err.code(), -10);
    Ok(())
}

/// ```text
/// Given  a JSON config with a field the schema does not know
/// When   it is parsed
/// Then   parsing fails and converts to an interface parse error
/// ```
#[test]
fn scenario_unknown_config_field_rejected() {
    let err = DeviceConfig::from_json_str(r#"{"retries": 4}"#).err();

    let code = err.map(|e| Error::from(e).code());
    assert_eq!(code, Some(-41));
}

/// ```text
/// Given  a config built in code
/// When   it is written as JSON and read back
/// Then   the same policy is recovered
/// ```
#[test]
fn scenario_config_survives_json() -> Result<()> {
    let config = DeviceConfig::builder()
        .timeout_ms(20)
        .modes(Modes::CHECKSUM_VERIFY)
        .terminal_modes("0x202", Modes::RETRY_ON_FAILURE)
        .retry_limit(5)
        .build()?;

    let back = DeviceConfig::from_json_str(&config.to_json_string()?)?;

    assert_eq!(back, config);
    Ok(())
}
