//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use devif_test_helpers::prelude::*;
//! ```

pub use crate::must::{must, must_fail, must_some, must_with};
pub use crate::{assert_error_code, assert_payload_field, init_tracing};

#[cfg(feature = "faults")]
pub use crate::faults::{Fault, FaultyTransport};

#[cfg(feature = "fixtures")]
pub use crate::fixtures::{ADC, AUX, CTRL, motor_board, motor_device};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
