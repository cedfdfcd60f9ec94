//! Convenience re-exports.
//!
//! ```
//! use devif_model::prelude::*;
//!
//! let reg = Tree::register("r").with_attr(attr::ARRAY, 4u32);
//! assert!(reg.has_attr(reg.root(), attr::ARRAY));
//! ```

pub use crate::{
    Result,
    error::{DataTypeError, DeviceError, Error, ErrorCategory, ErrorKind, TransportError, TreeError},
    kinds::{TERMINAL_BASE_ADDR, attr, reg_mode, reg_type, valuemap_lookup},
    tree::{NodeId, NodeKind, Tree},
    value::{BigInt, Value},
};
