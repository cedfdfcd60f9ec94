//! Turns `(terminal, register)` identifiers into physical transfers.

use devif_model::kinds;
use devif_model::prelude::*;

/// Byte width of a raw transfer when no width is given.
pub const RAW_WORD_BYTES: usize = 2;

/// Upper bound on the physical transfers one identifier may resolve to.
pub const MAX_SPAN_WORDS: u32 = 1 << 16;

/// Terminal identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermId {
    /// Terminal name
    Name(String),
    /// Terminal `addr` attribute
    Addr(u32),
}

impl From<&str> for TermId {
    fn from(name: &str) -> Self {
        TermId::Name(name.to_string())
    }
}

impl From<String> for TermId {
    fn from(name: String) -> Self {
        TermId::Name(name)
    }
}

impl From<u32> for TermId {
    fn from(addr: u32) -> Self {
        TermId::Addr(addr)
    }
}

impl std::fmt::Display for TermId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TermId::Name(n) => f.write_str(n),
            TermId::Addr(a) => write!(f, "{a:#x}"),
        }
    }
}

/// Register identifier.
///
/// A numeric identifier addresses the bus directly and bypasses the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegId {
    /// `"name"`, `"name.field"` or `"name[index]"`
    Name(String),
    /// Raw register address
    Addr(u32),
}

impl From<&str> for RegId {
    fn from(name: &str) -> Self {
        RegId::Name(name.to_string())
    }
}

impl From<String> for RegId {
    fn from(name: String) -> Self {
        RegId::Name(name)
    }
}

impl From<u32> for RegId {
    fn from(addr: u32) -> Self {
        RegId::Addr(addr)
    }
}

impl std::fmt::Display for RegId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegId::Name(n) => f.write_str(n),
            RegId::Addr(a) => write!(f, "{a:#x}"),
        }
    }
}

/// Parsed symbolic register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterSpec<'a> {
    /// `"name"`
    Plain(&'a str),
    /// `"name.field"`
    Sub(&'a str, &'a str),
    /// `"name[index]"`
    Index(&'a str, u32),
}

/// Parse `"name"`, `"name.field"` or `"name[index]"`.
///
/// # Errors
///
/// Returns a device `Parse` error for empty names, unbalanced brackets or a
/// non-numeric index.
pub fn parse_register_spec(spec: &str) -> Result<RegisterSpec<'_>> {
    let malformed = |why: &str| Error::parse(format!("malformed register '{spec}': {why}"));

    if let Some((name, rest)) = spec.split_once('[') {
        let index = rest
            .strip_suffix(']')
            .ok_or_else(|| malformed("missing ']'"))?;
        if name.is_empty() {
            return Err(malformed("empty register name"));
        }
        let index = index
            .trim()
            .parse::<u32>()
            .ok()
            .ok_or_else(|| malformed("index is not a number"))?;
        return Ok(RegisterSpec::Index(name, index));
    }
    if spec.contains(']') {
        return Err(malformed("unexpected ']'"));
    }
    if let Some((name, field)) = spec.split_once('.') {
        if name.is_empty() || field.is_empty() || field.contains('.') {
            return Err(malformed("expected 'register.field'"));
        }
        return Ok(RegisterSpec::Sub(name, field));
    }
    if spec.is_empty() {
        return Err(malformed("empty register name"));
    }
    Ok(RegisterSpec::Plain(spec))
}

/// Addressing shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// Numeric register, no tree lookup
    Raw,
    /// One register or one array element
    Single,
    /// Every element of an array register
    Array,
    /// A bit field inside a register
    Subregister,
}

/// One physical transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysAddr {
    /// Register address on the bus
    pub addr: u32,
    /// Transfer width in bytes
    pub width: usize,
}

/// Bit field position relative to the first emitted word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    /// Bit offset
    pub offset: u32,
    /// Bit width
    pub width: u32,
}

/// Register geometry copied out of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterLayout {
    /// Bits per physical word
    pub word_bits: u32,
    /// Register width in bits
    pub width_bits: u32,
    /// Array length
    pub array: u32,
    /// Words per array element
    pub words_per_elem: u32,
    /// `mode` attribute
    pub mode: String,
    /// `type` attribute
    pub reg_type: String,
    /// Sub-register position, for `Subregister` addressing
    pub field: Option<BitField>,
}

/// Output of [`resolve`]. Recomputed for every call.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressSet {
    /// Addressing shape
    pub kind: AddressKind,
    /// Terminal address on the bus
    pub term_addr: u32,
    /// Physical transfers, in word order
    pub addrs: Vec<PhysAddr>,
    /// Terminal node, when the terminal is in the tree
    pub term: Option<NodeId>,
    /// Register node, for non-raw addressing
    pub reg: Option<NodeId>,
    /// Sub-register node, for `Subregister` addressing
    pub subreg: Option<NodeId>,
    /// Register geometry, for non-raw addressing
    pub layout: Option<RegisterLayout>,
}

impl AddressSet {
    /// Bits carried by each physical word.
    pub fn word_bits(&self) -> u32 {
        match &self.layout {
            Some(layout) => layout.word_bits,
            None => self
                .addrs
                .first()
                .map_or(32, |a| u32::try_from(a.width * 8).unwrap_or(32).min(32)),
        }
    }

    /// Register address of the first word, used in diagnostics.
    pub fn first_addr(&self) -> u32 {
        self.addrs.first().map_or(0, |a| a.addr)
    }

    /// Whether double-read verification applies: raw access, or any mode
    /// other than read-only.
    pub fn double_get_applies(&self) -> bool {
        match (&self.kind, &self.layout) {
            (AddressKind::Raw, _) | (_, None) => true,
            (_, Some(layout)) => layout.mode != reg_mode::READ,
        }
    }

    /// Whether write-back verification applies: raw access, or a writable
    /// integer register.
    pub fn get_set_applies(&self) -> bool {
        match (&self.kind, &self.layout) {
            (AddressKind::Raw, _) | (_, None) => true,
            (_, Some(layout)) => layout.mode == reg_mode::WRITE && layout.reg_type == reg_type::INT,
        }
    }
}

/// Find a terminal by name or `addr` attribute.
///
/// # Errors
///
/// Returns `NodeNotFound` if no terminal matches.
pub fn find_terminal(tree: &Tree, term: &TermId) -> Result<NodeId> {
    let root = tree.root();
    match term {
        TermId::Name(name) => tree.get_child(root, name),
        TermId::Addr(addr) => {
            for child in tree.children(root)? {
                if tree.attr_u32(*child, attr::ADDR)? == Some(*addr) {
                    return Ok(*child);
                }
            }
            Err(Error::node_not_found(format!("terminal {addr:#x}")))
        }
    }
}

/// Bus address of a terminal.
///
/// A numeric identifier is used as-is even when the tree has no such terminal.
///
/// # Errors
///
/// Returns `NodeNotFound` for unknown names and `AttrNotFound` for a terminal
/// without an address.
pub fn terminal_addr(tree: &Tree, term: &TermId) -> Result<u32> {
    match term {
        TermId::Addr(addr) => Ok(*addr),
        TermId::Name(_) => {
            let node = find_terminal(tree, term)?;
            tree.attr_u32(node, attr::ADDR)?
                .ok_or_else(|| Error::attr_not_found(attr::ADDR))
        }
    }
}

fn check_width(width: usize) -> Result<usize> {
    if (1..=4).contains(&width) {
        Ok(width)
    } else {
        Err(Error::new(DataTypeError::InvalidOperation(format!(
            "transfer width {width} outside 1..=4 bytes"
        ))))
    }
}

/// `count` consecutive transfers starting `start` words past `base`.
///
/// Fails instead of wrapping when the span leaves the 32-bit register space.
fn span_words(reg: &str, base: u32, start: u32, count: u32, width: usize) -> Result<Vec<PhysAddr>> {
    if count > MAX_SPAN_WORDS {
        return Err(Error::parse(format!(
            "'{reg}' spans {count} words, limit is {MAX_SPAN_WORDS}"
        )));
    }
    let overflow = || Error::parse(format!("'{reg}' at {base:#x} overflows the address space"));
    let first = base.checked_add(start).ok_or_else(overflow)?;
    first.checked_add(count.saturating_sub(1)).ok_or_else(overflow)?;
    Ok((0..count)
        .map(|i| PhysAddr {
            addr: first + i,
            width,
        })
        .collect())
}

/// Resolve identifiers against the tree.
///
/// `width_hint` overrides the byte width of every physical transfer; the
/// bit layout always follows the terminal's `regDataWidth`.
///
/// # Errors
///
/// - `NodeNotFound` for unknown terminals, registers or sub-registers
/// - device `Parse` for malformed identifiers and out-of-range indexes
/// - `InvalidOperation` for a transfer width outside `1..=4` bytes
pub fn resolve(tree: &Tree, term: &TermId, reg: &RegId, width_hint: Option<usize>) -> Result<AddressSet> {
    let name = match reg {
        RegId::Addr(addr) => {
            let width = check_width(width_hint.unwrap_or(RAW_WORD_BYTES))?;
            return Ok(AddressSet {
                kind: AddressKind::Raw,
                term_addr: terminal_addr(tree, term)?,
                addrs: vec![PhysAddr { addr: *addr, width }],
                term: find_terminal(tree, term).ok(),
                reg: None,
                subreg: None,
                layout: None,
            });
        }
        RegId::Name(name) => name,
    };

    let spec = parse_register_spec(name)?;
    let term_node = find_terminal(tree, term)?;
    let term_addr = tree
        .attr_u32(term_node, attr::ADDR)?
        .ok_or_else(|| Error::attr_not_found(attr::ADDR))?;
    let word_bits = kinds::data_width(tree, term_node)?;
    let width = check_width(width_hint.unwrap_or(word_bits.div_ceil(8) as usize))?;

    let reg_name = match spec {
        RegisterSpec::Plain(n) | RegisterSpec::Sub(n, _) | RegisterSpec::Index(n, _) => n,
    };
    let reg_node = tree.get_child(term_node, reg_name)?;
    let base = tree
        .attr_u32(reg_node, attr::ADDR)?
        .ok_or_else(|| Error::attr_not_found(attr::ADDR))?;
    let width_bits = tree.attr_u32(reg_node, attr::WIDTH)?.unwrap_or(word_bits);
    if width_bits > kinds::MAX_REGISTER_WIDTH {
        return Err(Error::invalid_attr(
            attr::WIDTH,
            format!("'{reg_name}' is {width_bits} bits wide, limit is {}", kinds::MAX_REGISTER_WIDTH),
        ));
    }
    let array = tree.attr_u32(reg_node, attr::ARRAY)?.unwrap_or(1);
    let words_per_elem = width_bits.div_ceil(word_bits).max(1);
    let mut layout = RegisterLayout {
        word_bits,
        width_bits,
        array,
        words_per_elem,
        mode: tree
            .attr_str(reg_node, attr::MODE)?
            .unwrap_or(reg_mode::WRITE)
            .to_string(),
        reg_type: tree
            .attr_str(reg_node, attr::TYPE)?
            .unwrap_or(reg_type::INT)
            .to_string(),
        field: None,
    };
    let span = |start: u32, count: u32| span_words(reg_name, base, start, count, width);

    let (kind, addrs, subreg) = match spec {
        RegisterSpec::Sub(_, field) => {
            let sub = tree.get_child(reg_node, field)?;
            let offset = tree.attr_u32(sub, attr::OFFSET)?.unwrap_or(0);
            let field_width = tree.attr_u32(sub, attr::WIDTH)?.unwrap_or(1);
            if field_width == 0 {
                return Err(Error::parse(format!("sub-register '{field}' has zero width")));
            }
            let end = offset
                .checked_add(field_width - 1)
                .ok_or_else(|| Error::parse(format!("sub-register '{field}' overflows its register")))?;
            let first = offset / word_bits;
            let last = end / word_bits;
            layout.field = Some(BitField {
                offset: offset - first * word_bits,
                width: field_width,
            });
            (AddressKind::Subregister, span(first, last - first + 1)?, Some(sub))
        }
        RegisterSpec::Index(_, index) => {
            if index >= array {
                return Err(Error::parse(format!(
                    "index {index} out of bounds for '{reg_name}' with {array} elements"
                )));
            }
            let start = index
                .checked_mul(words_per_elem)
                .ok_or_else(|| Error::parse(format!("'{reg_name}[{index}]' overflows the address space")))?;
            (AddressKind::Single, span(start, words_per_elem)?, None)
        }
        RegisterSpec::Plain(_) if array > 1 => {
            let count = array
                .checked_mul(words_per_elem)
                .ok_or_else(|| Error::parse(format!("'{reg_name}' overflows the address space")))?;
            (AddressKind::Array, span(0, count)?, None)
        }
        RegisterSpec::Plain(_) => (AddressKind::Single, span(0, words_per_elem)?, None),
    };

    Ok(AddressSet {
        kind,
        term_addr,
        addrs,
        term: Some(term_node),
        reg: Some(reg_node),
        subreg,
        layout: Some(layout),
    })
}
