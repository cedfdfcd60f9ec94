//! Shared test utilities for the device interface crates.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with good error messages and `#[track_caller]`
//! - [`assertions`] - Assertion macros for error codes and payloads
//! - [`faults`] - Fault-injecting transport
//! - [`fixtures`] - Sample device interfaces
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! devif-test-helpers = { path = "crates/devif-test-helpers" }
//! ```
//!
//! ```rust,ignore
//! use devif_test_helpers::prelude::*;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod assertions;
pub mod must;
pub mod prelude;

#[cfg(feature = "faults")]
#[cfg_attr(docsrs, doc(cfg(feature = "faults")))]
pub mod faults;

#[cfg(feature = "fixtures")]
#[cfg_attr(docsrs, doc(cfg(feature = "fixtures")))]
pub mod fixtures;

pub use must::*;

#[doc(hidden)]
pub mod __private {
    pub use devif_model::{Error, Value};
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`. Returns `false` if a subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .is_ok()
}
