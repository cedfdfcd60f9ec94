//! Transaction engine for register-addressed devices.
//!
//! A [`Device`] pairs a [`Transport`] with a device-interface
//! [`Tree`](devif_model::Tree). Calls name a terminal and a register; the
//! [`resolver`] turns those names into physical word transfers, the [`codec`]
//! packs values into words, and the device runs the transfers under its
//! verification and retry policy ([`Modes`], [`RetryPolicy`]).
//!
//! # Example
//!
//! ```
//! use devif_engine::prelude::*;
//! use devif_engine::transport::mock::MemoryTransport;
//!
//! # fn main() -> Result<()> {
//! let iface = Tree::device_interface("board").with_child(
//!     Tree::terminal("ctrl", 8, 16).with_child(
//!         Tree::register("cfg")
//!             .with_child(Tree::subregister("enable", 1))?
//!             .with_child(Tree::subregister("gain", 7))?,
//!     )?,
//! )?;
//!
//! let device = Device::new(MemoryTransport::new(), iface);
//! device.enable_mode(Modes::GETSET_VERIFY)?;
//! device.set("ctrl", "cfg.gain", 5, Timeout::Default)?;
//! device.set("ctrl", "cfg.enable", 1, Timeout::Default)?;
//! assert_eq!(device.get("ctrl", "cfg", Timeout::Default)?, Value::Int(0b1011));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod config;
pub mod device;
mod executor;
pub mod modes;
pub mod prelude;
pub mod resolver;
pub mod retry;
pub mod transport;

pub use config::{ConfigError, DeviceConfig, DeviceConfigBuilder};
pub use device::{Device, DeviceLock};
pub use modes::{DEFAULT_TIMEOUT_MS, Modes, Timeout};
pub use resolver::{AddressKind, AddressSet, RegId, TermId};
pub use retry::{AttemptLimit, Backoff, DEFAULT_RETRY_LIMIT, DefaultRetryPolicy, RetryPolicy};
pub use transport::{Transport, checksum16};
