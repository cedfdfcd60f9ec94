//! End-to-end scenarios for the device interface engine.
//!
//! The suites under `tests/` drive a [`Bench`]: the motor-board fixture
//! behind a fault-injecting transport, with the register file exposed for
//! inspection.
//!
//! - `device_e2e`: round trips, sub-field isolation, arrays, raw access
//! - `verification_e2e`: verification modes, retries, locking
//! - `config_e2e`: devices opened from JSON/YAML configuration
//! - `tree_e2e`: tree construction invariants

#![deny(rust_2018_idioms)]
#![deny(warnings)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::print_stdout)]

pub mod scenario;

pub use scenario::{Bench, single_register_board};
