//! End-to-end data-path scenarios over the motor-board fixture.
//!
//! Each test follows the **Given / When / Then** pattern against an
//! in-memory register file; no hardware is involved.

use anyhow::Result;
use devif_engine::prelude::*;
use devif_integration_tests::{Bench, single_register_board};
use devif_model::bits;
use devif_test_helpers::fixtures::{AUX, CTRL, aux, ctrl};
use devif_test_helpers::prelude::*;
use proptest::prelude::*;

// ═══════════════════════════════════════════════════════════════════════════════
// Plain and multi-word registers
// ═══════════════════════════════════════════════════════════════════════════════

/// ```text
/// Given  a 32-bit position register on a 16-bit terminal
/// When   a value is set
/// Then   the low word lands at the base address and the high word after it
/// And    reading it back reproduces the value
/// ```
#[test]
fn scenario_position_spans_two_words() -> Result<()> {
    // Given
    let bench = Bench::new()?;

    // When
    bench
        .device
        .set("ctrl", "position", 0xCAFE_F00D_u32, Timeout::Default)?;

    // Then
    assert_eq!(bench.memory.peek_word(CTRL, ctrl::POSITION), 0xF00D);
    assert_eq!(bench.memory.peek_word(CTRL, ctrl::POSITION + 1), 0xCAFE);
    assert_eq!(
        bench.device.get("ctrl", "position", Timeout::Default)?,
        Value::Uint(0xCAFE_F00D)
    );
    Ok(())
}

/// ```text
/// Given  a 24-bit serial register on an 8-bit terminal
/// When   the register is addressed by the terminal's bus address
/// Then   three byte-wide words are written, least significant first
/// ```
#[test]
fn scenario_serial_by_terminal_address() -> Result<()> {
    let bench = Bench::new()?;

    bench.device.set(AUX, "serial", 0x00AB_CDEF, Timeout::Default)?;

    for (i, byte) in [0xEF, 0xCD, 0xAB].into_iter().enumerate() {
        let reg = aux::SERIAL + u32::try_from(i)?;
        assert_eq!(bench.memory.peek(AUX, reg), Some(vec![byte]));
    }
    assert_eq!(bench.device.get(AUX, "serial", -1)?, Value::Int(0x00AB_CDEF));
    Ok(())
}

/// ```text
/// Given  an array whose 24-bit elements span two 12-bit words each
/// When   the whole array is written
/// Then   each element reads back individually and as a list
/// ```
#[test]
fn scenario_array_with_multi_word_elements() -> Result<()> {
    let bench = Bench::new()?;
    let samples: Vec<Value> = vec![0x0ABC_DEu32.into(), 0x0012_345u32.into()];

    bench.device.set("adc", "samples", samples.clone(), Timeout::Default)?;

    assert_eq!(bench.device.get("adc", "samples[1]", Timeout::Default)?, Value::Int(0x0012_345));
    assert_eq!(bench.device.get("adc", "samples", Timeout::Default)?, Value::List(samples));
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sub-registers
// ═══════════════════════════════════════════════════════════════════════════════

fn isolation_board() -> Result<Tree> {
    Ok(Tree::device_interface("board").with_child(
        Tree::terminal("t", 8, 16).with_child(
            Tree::register("reg")
                .with_child(Tree::subregister("A", 1))?
                .with_child(Tree::subregister("B", 3))?,
        )?,
    )?)
}

/// ```text
/// Given  a register with field A at bit 0 and field B at bits 1-3, both zero
/// When   B is set to 5
/// Then   A still reads 0 and B reads 5
/// ```
#[test]
fn scenario_subfield_isolation() -> Result<()> {
    let bench = Bench::over(isolation_board()?)?;

    bench.device.set("t", "reg.B", 5, Timeout::Default)?;

    assert_eq!(bench.device.get("t", "reg.A", Timeout::Default)?, Value::Int(0));
    assert_eq!(bench.device.get("t", "reg.B", Timeout::Default)?, Value::Int(5));
    assert_eq!(bench.device.get("t", "reg", Timeout::Default)?, Value::Int(0b1010));
    Ok(())
}

/// ```text
/// Given  the control register with every bit set
/// When   the drive mode is set symbolically to "velocity"
/// Then   only the two mode bits change
/// And    get_subregs reports every field from a single read
/// ```
#[test]
fn scenario_symbolic_mode_change() -> Result<()> {
    let bench = Bench::new()?;
    bench.memory.poke_word(CTRL, ctrl::CONTROL, 0xFFFF, 2);

    bench.device.set("ctrl", "control.mode", "velocity", Timeout::Default)?;

    assert_eq!(bench.memory.peek_word(CTRL, ctrl::CONTROL), 0xFFFD);
    bench.reset_log();
    let fields = bench.device.get_subregs("ctrl", "control", Timeout::Default)?;
    assert_eq!(bench.reads_of(CTRL, ctrl::CONTROL), 1);
    let fields = fields.as_node()?;
    assert_eq!(fields.get_attr(fields.root(), "mode")?, &Value::Int(2));
    assert_eq!(fields.get_attr(fields.root(), "limit")?, &Value::Int(0xFFF));
    Ok(())
}

/// ```text
/// Given  the control register
/// When   enable, mode and limit are set together from one node value
/// Then   the register is read once and written once
/// ```
#[test]
fn scenario_node_value_sets_fields_in_one_write() -> Result<()> {
    let bench = Bench::new()?;
    let update = Tree::generic("control")
        .with_attr("enable", 1)
        .with_attr("mode", "torque")
        .with_attr("limit", 0x123);

    bench.device.set("ctrl", "control", update, Timeout::Default)?;

    assert_eq!(bench.reads_of(CTRL, ctrl::CONTROL), 1);
    assert_eq!(bench.writes_to(CTRL, ctrl::CONTROL), 1);
    assert_eq!(bench.memory.peek_word(CTRL, ctrl::CONTROL), 0x1233);
    Ok(())
}

/// ```text
/// Given  the LED register on the 8-bit aux terminal
/// When   an unknown colour field is named
/// Then   the call fails with NodeNotFound before touching the bus
/// ```
#[test]
fn scenario_unknown_field_touches_nothing() -> Result<()> {
    let bench = Bench::new()?;

    let result = bench.device.set("aux", "leds.purple", 1, Timeout::Default);

    assert_error_code!(result, -10);
    assert!(bench.memory.transfers().is_empty());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Arrays
// ═══════════════════════════════════════════════════════════════════════════════

/// ```text
/// Given  an array register of length 5
/// When   [0, 1, 2, 3, 4] is written and index 3 is read on its own
/// Then   index 3 reads 3 and index 2 is unchanged
/// ```
#[test]
fn scenario_array_indexing() -> Result<()> {
    let board = Tree::device_interface("board").with_child(
        Tree::terminal("t", 8, 16)
            .with_child(Tree::register("arr").with_attr(attr::ARRAY, 5u32))?,
    )?;
    let bench = Bench::over(board)?;
    let items: Vec<Value> = (0..5).map(Value::Int).collect();

    bench.device.set("t", "arr", items, Timeout::Default)?;
    let third = bench.device.get("t", "arr[3]", Timeout::Default)?;

    assert_eq!(third, Value::Int(3));
    assert_eq!(bench.reads_of(0x200, 2), 0);
    assert_eq!(bench.device.get("t", "arr[2]", Timeout::Default)?, Value::Int(2));
    assert_error_code!(bench.device.get("t", "arr[5]", Timeout::Default), -22);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Raw access and lifecycle
// ═══════════════════════════════════════════════════════════════════════════════

/// ```text
/// Given  a terminal address that the interface does not describe
/// When   a numeric register is written and read
/// Then   the transfer goes straight to the bus as a two-byte word
/// ```
#[test]
fn scenario_raw_register_on_unknown_terminal() -> Result<()> {
    let bench = Bench::new()?;

    bench.device.set(0x7F0u32, 0x10u32, 0x1234, Timeout::Default)?;

    assert_eq!(bench.memory.peek(0x7F0, 0x10), Some(vec![0x34, 0x12]));
    assert_eq!(bench.device.get(0x7F0u32, 0x10u32, Timeout::Default)?, Value::Int(0x1234));
    Ok(())
}

/// ```text
/// Given  a 32-bit register placed at the last address of a 16-bit terminal
/// When   it is read or written
/// Then   the call fails with a parse error before any transfer
/// ```
#[test]
fn scenario_register_past_end_of_address_space() -> Result<()> {
    let board = Tree::device_interface("board").with_child(
        Tree::terminal("t", 8, 16).with_child(
            Tree::register("r")
                .with_attr(attr::ADDR, u32::MAX)
                .with_attr(attr::WIDTH, 32u32),
        )?,
    )?;
    let bench = Bench::over(board)?;

    assert_error_code!(bench.device.get("t", "r", Timeout::Default), -22);
    assert_error_code!(bench.device.set("t", "r", 1, Timeout::Default), -22);
    assert_eq!(bench.reads_of(0x200, u32::MAX), 0);
    assert_eq!(bench.writes_to(0x200, u32::MAX), 0);
    Ok(())
}

/// ```text
/// Given  an open device
/// When   it is closed
/// Then   every later transfer fails with a transport error
/// ```
#[test]
fn scenario_closed_device_rejects_transfers() -> Result<()> {
    let bench = Bench::new()?;

    bench.device.close()?;

    assert!(bench.device.is_closed()?);
    let err = must_fail(bench.device.read("ctrl", "gains", 4, Timeout::Default));
    assert_eq!(err.category(), ErrorCategory::Transport);
    Ok(())
}

/// ```text
/// Given  an open device
/// When   its interface is swapped for one without the aux terminal
/// Then   aux registers no longer resolve, ctrl registers still do
/// ```
#[test]
fn scenario_interface_swap() -> Result<()> {
    let bench = Bench::new()?;
    let mut trimmed = bench.device.interface()?;
    let root = trimmed.root();
    let aux_terminal = trimmed.del_child(root, "aux")?;
    assert_eq!(aux_terminal.name(aux_terminal.root())?, "aux");

    bench.device.set_interface(trimmed)?;

    assert_error_code!(bench.device.get("aux", "leds", Timeout::Default), -10);
    bench.device.set("ctrl", "gains[0]", 1, Timeout::Default)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Round-trip properties
// ═══════════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every value that fits a register of width `w <= 32` reads back unchanged.
    #[test]
    fn prop_plain_register_roundtrip(width in 1u32..=32, seed in any::<u32>()) {
        let bench = Bench::over(single_register_board(16, width).map_err(|e| TestCaseError::fail(e.to_string()))?)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let v = if width == 32 { seed } else { seed & ((1u32 << width) - 1) };
        bench.device.set("t", "r", v, Timeout::Default)?;
        prop_assert_eq!(bench.device.get("t", "r", Timeout::Default)?, Value::Uint(v));
    }

    /// Registers spanning `k` words of `b` bits reproduce arbitrary-precision values.
    #[test]
    fn prop_wide_register_roundtrip(
        word_bits in prop::sample::select(vec![4u32, 8, 12, 16, 32]),
        words in 1u32..=4,
        seed in proptest::collection::vec(any::<u32>(), 4),
    ) {
        let width = word_bits * words;
        let bench = Bench::over(single_register_board(word_bits, width).map_err(|e| TestCaseError::fail(e.to_string()))?)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let value = Value::from_words(bits::extract_span(&seed, 0, width as usize));
        bench.device.set("t", "r", value.clone(), Timeout::Default)?;
        let back = bench.device.get("t", "r", Timeout::Default)?;
        prop_assert_eq!(back.as_bigint_words()?, value.as_bigint_words()?);
    }
}
