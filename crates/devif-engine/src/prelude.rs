//! Everything needed to open a device and move values.

pub use crate::{
    config::DeviceConfig,
    device::{Device, DeviceLock},
    modes::{Modes, Timeout},
    resolver::{RegId, TermId},
    retry::{AttemptLimit, Backoff, RetryPolicy},
    transport::Transport,
};
pub use devif_model::prelude::*;
