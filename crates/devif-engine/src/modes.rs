//! Verification/retry policy bits, timeouts and per-device policy state.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::retry::{AttemptLimit, RetryPolicy};

/// Default transfer timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;

bitflags! {
    /// Transfer-integrity policy bits.
    ///
    /// The effective policy for a terminal is the global mask OR the
    /// terminal's override mask.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Modes: u32 {
        /// Read every word twice and compare
        const DOUBLEGET_VERIFY = 0x01;

        /// Read every written word back and compare
        const GETSET_VERIFY    = 0x02;

        /// Hand failed transfers to the retry policy
        const RETRY_ON_FAILURE = 0x04;

        /// Query transfer status after every transfer
        const STATUS_VERIFY    = 0x08;

        /// Compare the transport checksum after every transfer
        const CHECKSUM_VERIFY  = 0x10;
    }
}

/// Per-call timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Use the device default
    #[default]
    Default,
    /// Wait forever
    Infinite,
    /// Explicit timeout in milliseconds
    Millis(u32),
}

impl Timeout {
    /// Milliseconds handed to the transport; `0` means no timeout.
    pub fn resolve(self, default_ms: u32) -> u32 {
        match self {
            Timeout::Default => default_ms,
            Timeout::Infinite => 0,
            Timeout::Millis(ms) => ms,
        }
    }
}

/// `-1` (or any negative) is the device default, `0` is no timeout.
impl From<i32> for Timeout {
    fn from(ms: i32) -> Self {
        match u32::try_from(ms) {
            Err(_) => Timeout::Default,
            Ok(0) => Timeout::Infinite,
            Ok(ms) => Timeout::Millis(ms),
        }
    }
}

impl From<std::time::Duration> for Timeout {
    fn from(d: std::time::Duration) -> Self {
        match u32::try_from(d.as_millis()) {
            Ok(0) => Timeout::Infinite,
            Ok(ms) => Timeout::Millis(ms),
            Err(_) => Timeout::Infinite,
        }
    }
}

/// Mutable policy held by a device, only touched under the device lock.
pub(crate) struct PolicyState {
    pub(crate) modes: Modes,
    pub(crate) terminal_modes: HashMap<u32, Modes>,
    pub(crate) timeout_ms: u32,
    pub(crate) retry: Arc<dyn RetryPolicy>,
}

impl PolicyState {
    pub(crate) fn effective(&self, term_addr: u32) -> Modes {
        self.modes | self.terminal_modes.get(&term_addr).copied().unwrap_or_default()
    }
}

impl Default for PolicyState {
    fn default() -> Self {
        Self {
            modes: Modes::empty(),
            terminal_modes: HashMap::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry: Arc::new(AttemptLimit::default()),
        }
    }
}
