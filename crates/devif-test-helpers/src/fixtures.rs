//! Sample device interfaces for tests.
//!
//! [`motor_board`] describes a small motor controller with three terminals:
//!
//! | terminal | addr    | data bits | registers                                   |
//! |----------|---------|-----------|---------------------------------------------|
//! | `ctrl`   | `0x200` | 16        | `id`, `status`, `control`, `position`, `gains`, `go` |
//! | `aux`    | `0x201` | 8         | `leds`, `serial`                            |
//! | `adc`    | `0x202` | 12        | `samples`                                   |

use devif_engine::Device;
use devif_engine::transport::mock::MemoryTransport;
use devif_model::prelude::*;

/// Bus address of `ctrl`.
pub const CTRL: u32 = 0x200;
/// Bus address of `aux`.
pub const AUX: u32 = 0x201;
/// Bus address of `adc`.
pub const ADC: u32 = 0x202;

/// Register addresses on `ctrl`.
pub mod ctrl {
    /// Read-only identity word
    pub const ID: u32 = 0;
    /// Read-only status word
    pub const STATUS: u32 = 1;
    /// `enable`, `mode`, `reset` and `limit` fields
    pub const CONTROL: u32 = 2;
    /// 32-bit position, two words
    pub const POSITION: u32 = 3;
    /// Four gain words
    pub const GAINS: u32 = 5;
    /// Trigger register
    pub const GO: u32 = 9;
}

/// Register addresses on `aux`.
pub mod aux {
    /// Four 2-bit colour fields
    pub const LEDS: u32 = 0;
    /// 24-bit serial number, three words
    pub const SERIAL: u32 = 1;
}

fn ctrl_terminal() -> Result<Tree> {
    Tree::terminal("ctrl", 8, 16)
        .with_child(Tree::register("id").with_attr(attr::MODE, reg_mode::READ))?
        .with_child(Tree::register("status").with_attr(attr::MODE, reg_mode::READ))?
        .with_child(
            Tree::register("control")
                .with_child(Tree::subregister("enable", 1))?
                .with_child(Tree::subregister("mode", 2).with_attr(
                    attr::VALUEMAP,
                    Tree::valuemap(
                        "drive_modes",
                        [("idle", 0), ("torque", 1), ("velocity", 2), ("position", 3)],
                    ),
                ))?
                .with_child(Tree::subregister("reset", 1))?
                .with_child(Tree::subregister("limit", 12))?,
        )?
        .with_child(Tree::register("position").with_attr(attr::WIDTH, 32u32))?
        .with_child(Tree::register("gains").with_attr(attr::ARRAY, 4u32))?
        .with_child(Tree::register("go").with_attr(attr::TYPE, reg_type::TRIGGER))
}

fn aux_terminal() -> Result<Tree> {
    Tree::terminal("aux", 8, 8)
        .with_child(
            Tree::register("leds")
                .with_child(Tree::subregister("red", 2))?
                .with_child(Tree::subregister("green", 2))?
                .with_child(Tree::subregister("blue", 2))?
                .with_child(Tree::subregister("blink", 2))?,
        )?
        .with_child(Tree::register("serial").with_attr(attr::WIDTH, 24u32))
}

fn adc_terminal() -> Result<Tree> {
    Tree::terminal("adc", 8, 12).with_child(
        Tree::register("samples")
            .with_attr(attr::WIDTH, 24u32)
            .with_attr(attr::ARRAY, 2u32),
    )
}

/// The motor controller interface described in the module docs.
///
/// # Errors
///
/// Only fails if the tree construction rules change underneath the fixture.
pub fn motor_board() -> Result<Tree> {
    Tree::device_interface("motor_board")
        .with_child(ctrl_terminal()?)?
        .with_child(aux_terminal()?)?
        .with_child(adc_terminal()?)
}

/// A [`motor_board`] device over a fresh register file, plus a handle on it.
///
/// # Errors
///
/// Same as [`motor_board`].
pub fn motor_device() -> Result<(Device, MemoryTransport)> {
    let memory = MemoryTransport::new();
    Ok((Device::new(memory.clone(), motor_board()?), memory))
}
