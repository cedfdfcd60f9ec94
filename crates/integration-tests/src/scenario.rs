//! Test bench wiring a device to a fault-injecting transport.

use anyhow::Result;
use devif_engine::transport::mock::{MemoryTransport, TransferOp};
use devif_engine::{Device, DeviceConfig};
use devif_model::prelude::*;
use devif_test_helpers::faults::FaultyTransport;
use devif_test_helpers::fixtures::motor_board;
use tracing::debug;

/// A device plus handles on its transport.
pub struct Bench {
    /// The device under test
    pub device: Device,
    /// Fault queue shared with the device's transport
    pub faults: FaultyTransport,
    /// Register file behind the faults
    pub memory: MemoryTransport,
}

impl Bench {
    /// The motor board with no policy configured.
    pub fn new() -> Result<Self> {
        Self::over(motor_board()?)
    }

    /// Any interface with no policy configured.
    pub fn over(interface: Tree) -> Result<Self> {
        devif_test_helpers::init_tracing();
        let memory = MemoryTransport::new();
        let faults = FaultyTransport::new(memory.clone());
        let device = Device::new(faults.clone(), interface);
        debug!("bench ready");
        Ok(Self {
            device,
            faults,
            memory,
        })
    }

    /// The motor board opened through `config`.
    pub fn configured(config: &DeviceConfig) -> Result<Self> {
        devif_test_helpers::init_tracing();
        let memory = MemoryTransport::new();
        let faults = FaultyTransport::new(memory.clone());
        let device = Device::with_config(faults.clone(), motor_board()?, config)?;
        Ok(Self {
            device,
            faults,
            memory,
        })
    }

    fn count(&self, op: TransferOp, term: u32, reg: u32) -> usize {
        self.memory
            .transfers()
            .iter()
            .filter(|t| t.op == op && t.term_addr == term && t.reg_addr == reg)
            .count()
    }

    /// Completed reads of one register.
    pub fn reads_of(&self, term: u32, reg: u32) -> usize {
        self.count(TransferOp::Read, term, reg)
    }

    /// Completed writes to one register.
    pub fn writes_to(&self, term: u32, reg: u32) -> usize {
        self.count(TransferOp::Write, term, reg)
    }

    /// Forget the transfer log.
    pub fn reset_log(&self) {
        self.memory.clear_log();
    }
}

/// A one-terminal board named `board` whose terminal `t` has `data_width`-bit
/// words and a single register `r` of `width` bits.
pub fn single_register_board(data_width: u32, width: u32) -> Result<Tree> {
    Ok(Tree::device_interface("board").with_child(
        Tree::terminal("t", 8, data_width)
            .with_child(Tree::register("r").with_attr(attr::WIDTH, width))?,
    )?)
}
