//! Fault-injecting transport.
//!
//! [`FaultyTransport`] wraps a [`MemoryTransport`] and applies one queued
//! [`Fault`] per transfer, oldest first. Transfers with nothing queued behave
//! exactly like the memory transport. Clones share the queue, so a test keeps
//! a handle after moving one into a device.

use std::collections::VecDeque;
use std::sync::Arc;

use devif_engine::Transport;
use devif_engine::transport::mock::MemoryTransport;
use devif_model::{Result, TransportError};
use parking_lot::Mutex;

/// One injected misbehavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The transfer fails with a transport timeout
    Timeout,
    /// The transfer fails with a communication error
    Disconnect,
    /// The transfer completes but reports this status
    Status(i32),
    /// The transfer completes but reports a checksum off by one
    BadChecksum,
    /// Read data (or stored write data) is XORed with this mask
    FlipBits(u32),
    /// A write is acknowledged but not stored; reads are unaffected
    DropWrite,
}

#[derive(Debug, Default)]
struct FaultState {
    queue: VecDeque<Fault>,
    status: i32,
    skew_checksum: bool,
    injected: usize,
}

/// Memory transport with scheduled faults.
#[derive(Debug, Clone, Default)]
pub struct FaultyTransport {
    memory: MemoryTransport,
    state: Arc<Mutex<FaultState>>,
}

fn flip(data: &mut [u8], mask: u32) {
    for (byte, m) in data.iter_mut().zip(mask.to_le_bytes()) {
        *byte ^= m;
    }
}

impl FaultyTransport {
    /// Wrap `memory`; the caller may keep a clone of it for inspection.
    pub fn new(memory: MemoryTransport) -> Self {
        Self {
            memory,
            state: Arc::default(),
        }
    }

    /// The wrapped register file.
    pub fn memory(&self) -> &MemoryTransport {
        &self.memory
    }

    /// Queue a fault for the next unfaulted transfer.
    pub fn push(&self, fault: Fault) -> &Self {
        self.state.lock().queue.push_back(fault);
        self
    }

    /// Queue the same fault for the next `n` transfers.
    pub fn push_n(&self, fault: Fault, n: usize) -> &Self {
        self.state
            .lock()
            .queue
            .extend(std::iter::repeat_n(fault, n));
        self
    }

    /// Faults applied so far.
    pub fn injected(&self) -> usize {
        self.state.lock().injected
    }

    /// Faults still queued.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Take the next fault and reset per-transfer status.
    fn begin(&self) -> Option<Fault> {
        let mut state = self.state.lock();
        state.status = 0;
        state.skew_checksum = false;
        let fault = state.queue.pop_front();
        if fault.is_some() {
            state.injected += 1;
        }
        match fault {
            Some(Fault::Status(code)) => state.status = code,
            Some(Fault::BadChecksum) => state.skew_checksum = true,
            _ => {}
        }
        fault
    }
}

fn failure(fault: Option<Fault>, timeout_ms: u32) -> Result<()> {
    match fault {
        Some(Fault::Timeout) => Err(TransportError::Timeout { timeout_ms }.into()),
        Some(Fault::Disconnect) => {
            Err(TransportError::Communication("injected disconnect".into()).into())
        }
        _ => Ok(()),
    }
}

impl Transport for FaultyTransport {
    fn raw_read(&mut self, term_addr: u32, reg_addr: u32, buf: &mut [u8], timeout_ms: u32) -> Result<()> {
        let fault = self.begin();
        failure(fault, timeout_ms)?;
        self.memory.raw_read(term_addr, reg_addr, buf, timeout_ms)?;
        if let Some(Fault::FlipBits(mask)) = fault {
            flip(buf, mask);
        }
        Ok(())
    }

    fn raw_write(&mut self, term_addr: u32, reg_addr: u32, data: &[u8], timeout_ms: u32) -> Result<()> {
        let fault = self.begin();
        failure(fault, timeout_ms)?;
        match fault {
            Some(Fault::DropWrite) => Ok(()),
            Some(Fault::FlipBits(mask)) => {
                let mut stored = data.to_vec();
                flip(&mut stored, mask);
                self.memory.raw_write(term_addr, reg_addr, &stored, timeout_ms)
            }
            _ => self.memory.raw_write(term_addr, reg_addr, data, timeout_ms),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.memory.close()
    }

    fn transfer_status(&mut self) -> Result<i32> {
        Ok(self.state.lock().status)
    }

    fn transfer_checksum(&mut self) -> Result<u16> {
        let checksum = self.memory.transfer_checksum()?;
        if self.state.lock().skew_checksum {
            return Ok(checksum.wrapping_add(1));
        }
        Ok(checksum)
    }
}
