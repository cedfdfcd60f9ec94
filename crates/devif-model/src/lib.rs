//! Data model for addressing hardware through named terminals and registers.
//!
//! This crate holds the pieces shared by every layer of the stack:
//!
//! - [`error`]: the error taxonomy, codes and structured payloads
//! - [`value`]: the closed [`Value`] type and arbitrary-precision [`BigInt`]
//! - [`tree`]: the arena-backed device-interface [`Tree`]
//! - [`kinds`]: typed node constructors and their construction rules
//! - [`bits`]: bit-vector helpers over little-endian `u32` words
//!
//! # Example
//!
//! ```
//! use devif_model::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let iface = Tree::device_interface("board").with_child(
//!     Tree::terminal("ctrl", 8, 16)
//!         .with_child(Tree::register("status"))?
//!         .with_child(Tree::register("counter").with_attr(attr::WIDTH, 32u32))?,
//! )?;
//!
//! let ctrl = iface.get_child(iface.root(), "ctrl")?;
//! let counter = iface.get_child(ctrl, "counter")?;
//! assert_eq!(iface.attr_u32(ctrl, attr::ADDR)?, Some(TERMINAL_BASE_ADDR));
//! assert_eq!(iface.attr_u32(counter, attr::ADDR)?, Some(1));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bits;
pub mod error;
pub mod kinds;
pub mod prelude;
pub mod tree;
pub mod value;

pub use error::{
    DataTypeError, DeviceError, Error, ErrorCategory, ErrorKind, ExternalError, InterfaceError,
    Result, ScriptError, TransportError, TreeError,
};
pub use kinds::{MAX_REGISTER_WIDTH, TERMINAL_BASE_ADDR, attr, reg_mode, reg_type};
pub use tree::{NodeId, NodeKind, Tree};
pub use value::{BigInt, Capability, Value};
