//! Retry policies consulted when a transfer fails under `RETRY_ON_FAILURE`.

use std::time::Duration;

use devif_model::{Error, Result};

use crate::device::Device;

/// Default attempt limit: the first try plus exactly one retry.
pub const DEFAULT_RETRY_LIMIT: u32 = 2;

/// Decides whether a failed transfer is repeated.
///
/// `attempt` counts the attempts made so far, starting at 1. The callback
/// runs on the calling thread while the device lock is held; it may use the
/// device, but a transfer it issues cannot itself trigger another retry.
pub trait RetryPolicy: Send + Sync {
    /// Return `Ok(true)` to repeat the transfer, `Ok(false)` to surface `error`.
    ///
    /// # Errors
    ///
    /// Any error is wrapped into an operation error by the caller.
    fn should_retry(
        &self,
        device: &Device,
        term_addr: u32,
        reg_addr: u32,
        attempt: u32,
        error: &Error,
    ) -> Result<bool>;
}

impl<F> RetryPolicy for F
where
    F: Fn(&Device, u32, u32, u32, &Error) -> Result<bool> + Send + Sync,
{
    fn should_retry(
        &self,
        device: &Device,
        term_addr: u32,
        reg_addr: u32,
        attempt: u32,
        error: &Error,
    ) -> Result<bool> {
        self(device, term_addr, reg_addr, attempt, error)
    }
}

/// Allow up to `n` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptLimit(pub u32);

impl Default for AttemptLimit {
    fn default() -> Self {
        Self(DEFAULT_RETRY_LIMIT)
    }
}

impl RetryPolicy for AttemptLimit {
    fn should_retry(&self, _: &Device, _: u32, _: u32, attempt: u32, _: &Error) -> Result<bool> {
        Ok(attempt < self.0)
    }
}

/// The policy installed on a new device.
pub type DefaultRetryPolicy = AttemptLimit;

/// Attempt limit with exponential back-off between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Maximum number of attempts in total.
    pub max_attempts: u32,
    /// Delay before the first retry (doubles each attempt).
    pub base_delay_ms: u32,
}

impl Backoff {
    /// Back-off delay after the given attempt (1-indexed).
    ///
    /// Delay is capped at 8x the base.
    pub fn delay_ms_for(&self, attempt: u32) -> u32 {
        let shift = attempt.saturating_sub(1).min(3);
        self.base_delay_ms.saturating_mul(1 << shift)
    }
}

impl RetryPolicy for Backoff {
    fn should_retry(&self, _: &Device, _: u32, _: u32, attempt: u32, _: &Error) -> Result<bool> {
        if attempt >= self.max_attempts {
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(u64::from(self.delay_ms_for(attempt))));
        Ok(true)
    }
}
