//! The transport capability consumed by the engine.

use devif_model::{DataTypeError, Error, Result};

/// Physical access to a device.
///
/// Implementations move bytes; they never interpret the device-interface
/// tree. `timeout_ms == 0` means no timeout. A timeout must surface as
/// [`devif_model::TransportError::Timeout`].
pub trait Transport: Send {
    /// Fill `buf` from `(term_addr, reg_addr)`.
    ///
    /// # Errors
    ///
    /// Returns a transport error on failure.
    fn raw_read(&mut self, term_addr: u32, reg_addr: u32, buf: &mut [u8], timeout_ms: u32) -> Result<()>;

    /// Write `data` to `(term_addr, reg_addr)`.
    ///
    /// # Errors
    ///
    /// Returns a transport error on failure.
    fn raw_write(&mut self, term_addr: u32, reg_addr: u32, data: &[u8], timeout_ms: u32) -> Result<()>;

    /// Release the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the connection could not be closed cleanly.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Status of the last transfer; `0` is success.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` unless the transport reports status.
    fn transfer_status(&mut self) -> Result<i32> {
        Err(unsupported("transfer_status"))
    }

    /// Device-computed checksum of the last transfer.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` unless the transport reports checksums.
    fn transfer_checksum(&mut self) -> Result<u16> {
        Err(unsupported("transfer_checksum"))
    }
}

fn unsupported(op: &str) -> Error {
    Error::new(DataTypeError::UnsupportedOperation(format!(
        "transport does not implement {op}"
    )))
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn raw_read(&mut self, term_addr: u32, reg_addr: u32, buf: &mut [u8], timeout_ms: u32) -> Result<()> {
        (**self).raw_read(term_addr, reg_addr, buf, timeout_ms)
    }

    fn raw_write(&mut self, term_addr: u32, reg_addr: u32, data: &[u8], timeout_ms: u32) -> Result<()> {
        (**self).raw_write(term_addr, reg_addr, data, timeout_ms)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn transfer_status(&mut self) -> Result<i32> {
        (**self).transfer_status()
    }

    fn transfer_checksum(&mut self) -> Result<u16> {
        (**self).transfer_checksum()
    }
}

/// Sum of 16-bit little-endian chunks; an odd trailing byte is added as-is.
/// Carries are discarded.
pub fn checksum16(bytes: &[u8]) -> u16 {
    let mut chunks = bytes.chunks_exact(2);
    let mut sum = 0u16;
    for pair in &mut chunks {
        sum = sum.wrapping_add(u16::from_le_bytes([pair[0], pair[1]]));
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u16::from(*last));
    }
    sum
}

/// In-memory transport for tests and simulations.
pub mod mock {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use devif_model::{Result, TransportError};
    use parking_lot::Mutex;

    use super::{Transport, checksum16};

    /// Direction of a recorded transfer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TransferOp {
        /// Device to host
        Read,
        /// Host to device
        Write,
    }

    /// One recorded transfer.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TransferRecord {
        /// Direction
        pub op: TransferOp,
        /// Terminal address
        pub term_addr: u32,
        /// Register address
        pub reg_addr: u32,
        /// Bytes moved
        pub data: Vec<u8>,
    }

    #[derive(Debug, Default)]
    struct MemoryState {
        cells: BTreeMap<(u32, u32), Vec<u8>>,
        log: Vec<TransferRecord>,
        status: i32,
        last_checksum: u16,
        closed: bool,
    }

    /// A register file keyed by `(terminal, register)` address.
    ///
    /// Clones share the same storage, so a test can keep a handle for
    /// inspection after moving one into a device.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryTransport {
        state: Arc<Mutex<MemoryState>>,
    }

    impl MemoryTransport {
        /// Empty register file.
        pub fn new() -> Self {
            Self::default()
        }

        /// Bytes last written to a register, if any.
        pub fn peek(&self, term_addr: u32, reg_addr: u32) -> Option<Vec<u8>> {
            self.state.lock().cells.get(&(term_addr, reg_addr)).cloned()
        }

        /// Little-endian word stored at a register (zero if never written).
        pub fn peek_word(&self, term_addr: u32, reg_addr: u32) -> u32 {
            let state = self.state.lock();
            let mut bytes = [0u8; 4];
            if let Some(cell) = state.cells.get(&(term_addr, reg_addr)) {
                for (dst, src) in bytes.iter_mut().zip(cell) {
                    *dst = *src;
                }
            }
            u32::from_le_bytes(bytes)
        }

        /// Store bytes without recording a transfer.
        pub fn poke(&self, term_addr: u32, reg_addr: u32, data: &[u8]) {
            self.state
                .lock()
                .cells
                .insert((term_addr, reg_addr), data.to_vec());
        }

        /// Store a little-endian word of `width` bytes without recording a transfer.
        pub fn poke_word(&self, term_addr: u32, reg_addr: u32, word: u32, width: usize) {
            let bytes = word.to_le_bytes();
            self.poke(term_addr, reg_addr, &bytes[..width.min(4)]);
        }

        /// Every transfer so far, oldest first.
        pub fn transfers(&self) -> Vec<TransferRecord> {
            self.state.lock().log.clone()
        }

        /// Number of writes recorded so far.
        pub fn write_count(&self) -> usize {
            self.state
                .lock()
                .log
                .iter()
                .filter(|r| r.op == TransferOp::Write)
                .count()
        }

        /// Forget recorded transfers.
        pub fn clear_log(&self) {
            self.state.lock().log.clear();
        }

        /// Status reported for subsequent transfers.
        pub fn set_status(&self, status: i32) {
            self.state.lock().status = status;
        }

        /// Whether `close` has been called.
        pub fn is_closed(&self) -> bool {
            self.state.lock().closed
        }
    }

    impl Transport for MemoryTransport {
        fn raw_read(&mut self, term_addr: u32, reg_addr: u32, buf: &mut [u8], _timeout_ms: u32) -> Result<()> {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TransportError::Communication("transport closed".into()).into());
            }
            buf.fill(0);
            if let Some(cell) = state.cells.get(&(term_addr, reg_addr)) {
                for (dst, src) in buf.iter_mut().zip(cell) {
                    *dst = *src;
                }
            }
            state.last_checksum = checksum16(buf);
            state.log.push(TransferRecord {
                op: TransferOp::Read,
                term_addr,
                reg_addr,
                data: buf.to_vec(),
            });
            Ok(())
        }

        fn raw_write(&mut self, term_addr: u32, reg_addr: u32, data: &[u8], _timeout_ms: u32) -> Result<()> {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TransportError::Communication("transport closed".into()).into());
            }
            state.cells.insert((term_addr, reg_addr), data.to_vec());
            state.last_checksum = checksum16(data);
            state.log.push(TransferRecord {
                op: TransferOp::Write,
                term_addr,
                reg_addr,
                data: data.to_vec(),
            });
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.state.lock().closed = true;
            Ok(())
        }

        fn transfer_status(&mut self) -> Result<i32> {
            Ok(self.state.lock().status)
        }

        fn transfer_checksum(&mut self) -> Result<u16> {
            Ok(self.state.lock().last_checksum)
        }
    }
}
