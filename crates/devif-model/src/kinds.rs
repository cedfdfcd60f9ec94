//! Typed node constructors and the construction rules each parent kind applies
//! to a child before it is linked.

use std::collections::BTreeSet;

use crate::bits;
use crate::error::{Error, Result};
use crate::tree::{NodeId, NodeKind, Tree};
use crate::value::Value;

/// First address handed out to a terminal without an explicit `addr`.
pub const TERMINAL_BASE_ADDR: u32 = 0x200;

/// Widest register (or array element) accepted, in bits.
pub const MAX_REGISTER_WIDTH: u32 = 4096;

/// Well-known attribute names.
pub mod attr {
    /// Physical address of a terminal or register
    pub const ADDR: &str = "addr";
    /// Terminal register-address width in bits
    pub const REG_ADDR_WIDTH: &str = "regAddrWidth";
    /// Terminal bus word width in bits
    pub const REG_DATA_WIDTH: &str = "regDataWidth";
    /// Register type: `int` or `trigger`
    pub const TYPE: &str = "type";
    /// Access mode: `read`, `write`
    pub const MODE: &str = "mode";
    /// Bit width of a register or sub-register
    pub const WIDTH: &str = "width";
    /// Array length of a register
    pub const ARRAY: &str = "array";
    /// Initial value
    pub const INIT: &str = "init";
    /// Attached value map
    pub const VALUEMAP: &str = "valuemap";
    /// Sub-register bit offset inside its register
    pub const OFFSET: &str = "offset";
    /// Generated HDL signal name of a sub-register
    pub const VLOG_NAME: &str = "vlog_name";
}

/// Register `type` values.
pub mod reg_type {
    /// Plain integer register
    pub const INT: &str = "int";
    /// Write-triggered action; reading back is meaningless
    pub const TRIGGER: &str = "trigger";
}

/// Register `mode` values.
pub mod reg_mode {
    /// Read-only register
    pub const READ: &str = "read";
    /// Writable register
    pub const WRITE: &str = "write";
}

impl Tree {
    /// A device-interface root.
    pub fn device_interface(name: impl Into<String>) -> Self {
        Tree::new(NodeKind::DeviceInterface, name)
    }

    /// A terminal with its bus geometry.
    pub fn terminal(name: impl Into<String>, addr_width: u32, data_width: u32) -> Self {
        Tree::new(NodeKind::Terminal, name)
            .with_attr(attr::REG_ADDR_WIDTH, addr_width)
            .with_attr(attr::REG_DATA_WIDTH, data_width)
    }

    /// A register; defaults are filled in when it is linked under a terminal.
    pub fn register(name: impl Into<String>) -> Self {
        Tree::new(NodeKind::Register, name)
    }

    /// A sub-register of `width` bits.
    pub fn subregister(name: impl Into<String>, width: u32) -> Self {
        Tree::new(NodeKind::Subregister, name).with_attr(attr::WIDTH, width)
    }

    /// A value map from symbolic names to integers.
    pub fn valuemap<K, V>(name: impl Into<String>, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        entries
            .into_iter()
            .fold(Tree::new(NodeKind::Valuemap, name), |t, (k, v)| {
                t.with_attr(k, v)
            })
    }

    /// A plain attribute container.
    pub fn generic(name: impl Into<String>) -> Self {
        Tree::new(NodeKind::Generic, name)
    }
}

/// Look up `key` in the value map attached to `node`.
///
/// # Errors
///
/// Returns `AttrNotFound` if the node has no value map or the map has no such key.
pub fn valuemap_lookup(tree: &Tree, node: NodeId, key: &str) -> Result<Value> {
    let map = tree.get_attr(node, attr::VALUEMAP)?.as_node()?;
    map.get_attr(map.root(), key).cloned()
}

/// Words occupied by one register: `array * ceil(width / data_width)`.
///
/// # Errors
///
/// Returns `AttrNotFound` if the terminal has no data width.
pub fn register_word_count(tree: &Tree, term: NodeId, reg: NodeId) -> Result<u32> {
    let data_width = data_width(tree, term)?;
    let width = tree.attr_u32(reg, attr::WIDTH)?.unwrap_or(data_width);
    let array = tree.attr_u32(reg, attr::ARRAY)?.unwrap_or(1);
    Ok(array.saturating_mul(width.div_ceil(data_width).max(1)))
}

/// Bus word width of a terminal, validated to `1..=32`.
///
/// # Errors
///
/// Returns `AttrNotFound` if missing and `InvalidAttr` if out of range.
pub fn data_width(tree: &Tree, term: NodeId) -> Result<u32> {
    let width = tree
        .attr_u32(term, attr::REG_DATA_WIDTH)?
        .ok_or_else(|| Error::attr_not_found(attr::REG_DATA_WIDTH))?;
    if !(1..=32).contains(&width) {
        return Err(Error::invalid_attr(
            attr::REG_DATA_WIDTH,
            format!("word width {width} outside 1..=32"),
        ));
    }
    Ok(width)
}

pub(crate) fn prepare_child(tree: &mut Tree, parent: NodeId, child: NodeId) -> Result<()> {
    match tree.kind(parent)? {
        NodeKind::DeviceInterface => prepare_terminal(tree, parent, child),
        NodeKind::Terminal => prepare_register(tree, parent, child),
        NodeKind::Register => prepare_subregister(tree, parent, child),
        NodeKind::Generic | NodeKind::Subregister | NodeKind::Valuemap => Ok(()),
    }
}

fn expect_kind(tree: &Tree, child: NodeId, want: NodeKind, parent: NodeKind) -> Result<()> {
    let got = tree.kind(child)?;
    if got != want {
        return Err(Error::invalid_type(format!(
            "{} '{}' cannot be a child of a {}",
            got.as_str(),
            tree.name(child)?,
            parent.as_str()
        )));
    }
    Ok(())
}

fn prepare_terminal(tree: &mut Tree, root: NodeId, term: NodeId) -> Result<()> {
    expect_kind(tree, term, NodeKind::Terminal, NodeKind::DeviceInterface)?;
    if tree.attr_u32(term, attr::REG_ADDR_WIDTH)?.is_none() {
        return Err(Error::attr_not_found(attr::REG_ADDR_WIDTH));
    }
    data_width(tree, term)?;

    if tree.attr_u32(term, attr::ADDR)?.is_none() {
        let mut taken = BTreeSet::new();
        for sibling in tree.children(root)? {
            if let Some(addr) = tree.attr_u32(*sibling, attr::ADDR)? {
                taken.insert(addr);
            }
        }
        let mut addr = TERMINAL_BASE_ADDR;
        while taken.contains(&addr) {
            addr = addr.checked_add(1).ok_or_else(|| {
                Error::invalid_attr(attr::ADDR, "no free terminal address left")
            })?;
        }
        tree.set_attr(term, attr::ADDR, addr)?;
    }
    Ok(())
}

fn prepare_register(tree: &mut Tree, term: NodeId, reg: NodeId) -> Result<()> {
    expect_kind(tree, reg, NodeKind::Register, NodeKind::Terminal)?;

    match tree.attr_str(reg, attr::TYPE)? {
        None => tree.set_attr(reg, attr::TYPE, reg_type::INT)?,
        Some(reg_type::INT | reg_type::TRIGGER) => {}
        Some(other) => {
            return Err(Error::invalid_attr(
                attr::TYPE,
                format!("unknown register type '{other}'"),
            ));
        }
    }

    let word = data_width(tree, term)?;
    match tree.attr_u32(reg, attr::WIDTH)? {
        None => tree.set_attr(reg, attr::WIDTH, word)?,
        Some(0) => return Err(Error::invalid_attr(attr::WIDTH, "width must be positive")),
        Some(w) if w > MAX_REGISTER_WIDTH => {
            return Err(Error::invalid_attr(
                attr::WIDTH,
                format!("{w} bits exceeds the {MAX_REGISTER_WIDTH}-bit limit"),
            ));
        }
        Some(_) => {}
    }
    match tree.attr_u32(reg, attr::ARRAY)? {
        None => tree.set_attr(reg, attr::ARRAY, 1u32)?,
        Some(0) => return Err(Error::invalid_attr(attr::ARRAY, "array length must be positive")),
        Some(_) => {}
    }
    if !tree.has_attr(reg, attr::MODE) {
        tree.set_attr(reg, attr::MODE, reg_mode::WRITE)?;
    }

    if !tree.has_attr(reg, attr::INIT) && tree.num_children(reg)? > 0 {
        let init = composite_init(tree, reg)?;
        tree.set_attr(reg, attr::INIT, init)?;
    }

    if tree.attr_u32(reg, attr::ADDR)?.is_none() {
        let mut next = 0u32;
        for sibling in tree.children(term)? {
            let base = tree.attr_u32(*sibling, attr::ADDR)?.unwrap_or(0);
            next = next.max(base.saturating_add(register_word_count(tree, term, *sibling)?));
        }
        tree.set_attr(reg, attr::ADDR, next)?;
    }
    Ok(())
}

/// Concatenate each sub-register's initial value at its offset.
fn composite_init(tree: &Tree, reg: NodeId) -> Result<Value> {
    let mut acc = vec![0u32];
    for sub in tree.children(reg)? {
        let init = match tree.get_attr(*sub, attr::INIT) {
            Ok(Value::Str(s)) => valuemap_lookup(tree, *sub, s)?,
            Ok(v) => v.clone(),
            Err(_) => continue,
        };
        let offset = tree.attr_u32(*sub, attr::OFFSET)?.unwrap_or(0);
        let width = tree.attr_u32(*sub, attr::WIDTH)?.unwrap_or(1);
        bits::deposit(
            &mut acc,
            offset as usize,
            width as usize,
            &init.as_bigint_words()?,
        );
    }
    Ok(Value::from_words(acc))
}

fn prepare_subregister(tree: &mut Tree, reg: NodeId, sub: NodeId) -> Result<()> {
    expect_kind(tree, sub, NodeKind::Subregister, NodeKind::Register)?;

    if tree.has_attr(reg, attr::INIT) && tree.has_attr(sub, attr::INIT) {
        return Err(Error::invalid_attr(
            attr::INIT,
            format!(
                "declared on both register '{}' and sub-register '{}'",
                tree.name(reg)?,
                tree.name(sub)?
            ),
        ));
    }

    let width = match tree.attr_u32(sub, attr::WIDTH)? {
        None => {
            tree.set_attr(sub, attr::WIDTH, 1u32)?;
            1
        }
        Some(0) => return Err(Error::invalid_attr(attr::WIDTH, "width must be positive")),
        Some(w) => w,
    };

    let mut offset = 0u32;
    for sibling in tree.children(reg)? {
        offset = offset.saturating_add(tree.attr_u32(*sibling, attr::WIDTH)?.unwrap_or(1));
    }
    let total = offset.saturating_add(width);
    if total > MAX_REGISTER_WIDTH {
        return Err(Error::invalid_attr(
            attr::WIDTH,
            format!(
                "sub-register '{}' ends at bit {total}, past the {MAX_REGISTER_WIDTH}-bit limit",
                tree.name(sub)?
            ),
        ));
    }
    tree.set_attr(sub, attr::OFFSET, offset)?;
    tree.set_attr(reg, attr::WIDTH, total)?;

    if !tree.has_attr(sub, attr::VLOG_NAME) {
        let vlog = format!("{}_{}", tree.name(reg)?, tree.name(sub)?);
        tree.set_attr(sub, attr::VLOG_NAME, vlog)?;
    }
    Ok(())
}
