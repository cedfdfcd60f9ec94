//! Verified transfers, the retry loop and the per-kind get/set paths.

use devif_model::prelude::*;
use tracing::{trace, warn};

use crate::codec::{self, DirtyWords};
use crate::device::Device;
use crate::modes::{Modes, Timeout};
use crate::resolver::{AddressKind, AddressSet, PhysAddr};
use crate::transport::{Transport, checksum16};

/// Build the small diagnostic tree attached to operation errors.
pub(crate) fn payload<const N: usize>(fields: [(&str, Value); N]) -> Value {
    Value::Node(
        fields
            .into_iter()
            .fold(Tree::generic("error"), |t, (k, v)| t.with_attr(k, v)),
    )
}

fn word_mask(word_bits: u32) -> u32 {
    if word_bits >= 32 {
        u32::MAX
    } else {
        (1u32 << word_bits) - 1
    }
}

/// One logical call: the terminal, its effective policy and the timeout.
pub(crate) struct Call<'a> {
    device: &'a Device,
    term_addr: u32,
    modes: Modes,
    timeout_ms: u32,
}

impl<'a> Call<'a> {
    pub(crate) fn new(device: &'a Device, term_addr: u32, timeout: Timeout) -> Result<Self> {
        device.with_state(|s| {
            Ok(Self {
                device,
                term_addr,
                modes: s.policy.effective(term_addr),
                timeout_ms: timeout.resolve(s.policy.timeout_ms),
            })
        })
    }

    fn transfer_read(&self, reg_addr: u32, len: usize, verify: bool) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.device.with_state(|s| {
            s.ensure_open()?;
            s.transport
                .raw_read(self.term_addr, reg_addr, &mut buf, self.timeout_ms)?;
            if verify {
                self.check_transfer(s.transport.as_mut(), reg_addr, &buf)?;
            }
            Ok(())
        })?;
        Ok(buf)
    }

    fn transfer_write(&self, reg_addr: u32, data: &[u8]) -> Result<()> {
        self.device.with_state(|s| {
            s.ensure_open()?;
            s.transport
                .raw_write(self.term_addr, reg_addr, data, self.timeout_ms)?;
            self.check_transfer(s.transport.as_mut(), reg_addr, data)
        })
    }

    /// Status and checksum verification of the transfer just made.
    fn check_transfer(&self, transport: &mut dyn Transport, reg_addr: u32, bytes: &[u8]) -> Result<()> {
        if self.modes.contains(Modes::STATUS_VERIFY) {
            let status = transport.transfer_status()?;
            if status != 0 {
                warn!(term = self.term_addr, reg = reg_addr, status, "transfer status verification failed");
                return Err(Error::operation(format!(
                    "transfer status {status} at {:#x}:{reg_addr:#x}",
                    self.term_addr
                ))
                .with_payload(payload([
                    ("term", self.term_addr.into()),
                    ("reg", reg_addr.into()),
                    ("status", status.into()),
                ])));
            }
        }
        if self.modes.contains(Modes::CHECKSUM_VERIFY) {
            let expected = transport.transfer_checksum()?;
            let checksum = checksum16(bytes);
            if checksum != expected {
                warn!(term = self.term_addr, reg = reg_addr, checksum, expected, "checksum verification failed");
                return Err(Error::operation(format!(
                    "checksum {checksum:#06x} != {expected:#06x} at {:#x}:{reg_addr:#x}",
                    self.term_addr
                ))
                .with_payload(payload([
                    ("term", self.term_addr.into()),
                    ("reg", reg_addr.into()),
                    ("checksum", u32::from(checksum).into()),
                    ("expected", u32::from(expected).into()),
                ])));
            }
        }
        Ok(())
    }

    /// Run `op`, consulting the retry policy on retryable failures.
    fn retrying<T>(&self, reg_addr: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match op() {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if !self.modes.contains(Modes::RETRY_ON_FAILURE) || !error.is_retryable() {
                return Err(error);
            }

            let scope = self.device.begin_retry()?;
            let decision = scope
                .policy()
                .should_retry(self.device, self.term_addr, reg_addr, attempt, &error);
            drop(scope);

            match decision {
                Ok(true) => {
                    warn!(term = self.term_addr, reg = reg_addr, attempt, %error, "retrying transfer");
                }
                Ok(false) => {
                    warn!(term = self.term_addr, reg = reg_addr, attempt, %error, "retry policy gave up");
                    return Err(error);
                }
                Err(cause) => {
                    warn!(term = self.term_addr, reg = reg_addr, attempt, %cause, "retry policy failed");
                    return Err(Error::operation(format!("retry policy failed: {cause}"))
                        .with_payload(payload([
                            ("term", self.term_addr.into()),
                            ("reg", reg_addr.into()),
                            ("attempt", attempt.into()),
                            ("code", cause.code().into()),
                        ])));
                }
            }
        }
    }

    /// Verified read of one word.
    pub(crate) fn read_word(&self, target: &AddressSet, phys: PhysAddr) -> Result<u32> {
        let mask = word_mask(target.word_bits());
        self.retrying(phys.addr, || {
            let first = codec::bytes_to_word(&self.transfer_read(phys.addr, phys.width, true)?) & mask;
            if self.modes.contains(Modes::DOUBLEGET_VERIFY) && target.double_get_applies() {
                let second = codec::bytes_to_word(&self.transfer_read(phys.addr, phys.width, true)?) & mask;
                if first != second {
                    warn!(term = self.term_addr, reg = phys.addr, first, second, "double get verification failed");
                    return Err(Error::operation(format!(
                        "double get mismatch at {:#x}:{:#x}",
                        self.term_addr, phys.addr
                    ))
                    .with_payload(payload([
                        ("term", self.term_addr.into()),
                        ("reg", phys.addr.into()),
                        ("get_val0", Value::from_words(vec![first])),
                        ("get_val1", Value::from_words(vec![second])),
                    ])));
                }
            }
            trace!(term = self.term_addr, reg = phys.addr, word = first, "read word");
            Ok(first)
        })
    }

    /// Verified write of one word.
    pub(crate) fn write_word(&self, target: &AddressSet, phys: PhysAddr, word: u32) -> Result<()> {
        let mask = word_mask(target.word_bits());
        let data = codec::word_to_bytes(word & mask, phys.width);
        self.retrying(phys.addr, || {
            self.transfer_write(phys.addr, &data)?;
            trace!(term = self.term_addr, reg = phys.addr, word, "wrote word");
            if self.modes.contains(Modes::GETSET_VERIFY) && target.get_set_applies() {
                let back = self.transfer_read(phys.addr, phys.width, false)?;
                if back != data {
                    let (set_val, get_val) = (codec::bytes_to_word(&data), codec::bytes_to_word(&back));
                    warn!(term = self.term_addr, reg = phys.addr, set_val, get_val, "get/set verification failed");
                    return Err(Error::operation(format!(
                        "read-back mismatch at {:#x}:{:#x}",
                        self.term_addr, phys.addr
                    ))
                    .with_payload(payload([
                        ("term", self.term_addr.into()),
                        ("reg", phys.addr.into()),
                        ("set_val", Value::from_words(vec![set_val])),
                        ("get_val", Value::from_words(vec![get_val])),
                    ])));
                }
            }
            Ok(())
        })
    }

    /// Raw byte-span read with status/checksum verification and retry.
    pub(crate) fn read_bytes(&self, reg_addr: u32, len: usize) -> Result<Vec<u8>> {
        self.retrying(reg_addr, || self.transfer_read(reg_addr, len, true))
    }

    /// Raw byte-span write with status/checksum verification and retry.
    pub(crate) fn write_bytes(&self, reg_addr: u32, data: &[u8]) -> Result<()> {
        self.retrying(reg_addr, || self.transfer_write(reg_addr, data))
    }
}

fn read_words(call: &Call<'_>, target: &AddressSet) -> Result<Vec<u32>> {
    target.addrs.iter().map(|p| call.read_word(target, *p)).collect()
}

fn missing(what: &str) -> Error {
    Error::new(DataTypeError::InvalidOperation(format!(
        "address set has no {what}"
    )))
}

/// Read and decode a resolved address set.
pub(crate) fn get(call: &Call<'_>, target: &AddressSet) -> Result<Value> {
    let words = read_words(call, target)?;
    let word_bits = target.word_bits();
    let layout = match (&target.kind, &target.layout) {
        (AddressKind::Raw, _) => {
            return Ok(Value::from_words(vec![words.first().copied().unwrap_or(0)]));
        }
        (_, Some(layout)) => layout,
        (_, None) => return Err(missing("register layout")),
    };
    match target.kind {
        AddressKind::Array => words
            .chunks(layout.words_per_elem.max(1) as usize)
            .map(|elem| codec::extract_field(elem, word_bits, 0, layout.width_bits))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        AddressKind::Subregister => {
            let field = layout.field.ok_or_else(|| missing("bit field"))?;
            codec::extract_field(&words, word_bits, field.offset, field.width)
        }
        AddressKind::Single | AddressKind::Raw => {
            codec::extract_field(&words, word_bits, 0, layout.width_bits)
        }
    }
}

/// A field update resolved against the tree before any transfer.
struct FieldUpdate {
    offset: u32,
    width: u32,
    value: Value,
}

/// Resolve everything the set path needs from the tree, under one borrow.
fn plan_fields(call: &Call<'_>, target: &AddressSet, value: &Value) -> Result<Vec<FieldUpdate>> {
    let reg = target.reg.ok_or_else(|| missing("register"))?;
    call.device.with_state(|s| {
        let tree = &s.interface;
        match (target.kind, value) {
            (AddressKind::Subregister, _) => {
                let sub = target.subreg.ok_or_else(|| missing("sub-register"))?;
                let field = target
                    .layout
                    .as_ref()
                    .and_then(|l| l.field)
                    .ok_or_else(|| missing("bit field"))?;
                Ok(vec![FieldUpdate {
                    offset: field.offset,
                    width: field.width,
                    value: codec::resolve_scalar(tree, sub, value)?,
                }])
            }
            (_, Value::Node(map)) => {
                let mut updates = Vec::new();
                for (name, v) in map.attrs(map.root())? {
                    let sub = tree.get_child(reg, name)?;
                    updates.push(FieldUpdate {
                        offset: tree.attr_u32(sub, attr::OFFSET)?.unwrap_or(0),
                        width: tree.attr_u32(sub, attr::WIDTH)?.unwrap_or(1),
                        value: codec::resolve_scalar(tree, sub, v)?,
                    });
                }
                Ok(updates)
            }
            _ => Err(missing("field plan")),
        }
    })
}

fn resolve_elements(call: &Call<'_>, target: &AddressSet, values: &[Value]) -> Result<Vec<Value>> {
    let reg = target.reg.ok_or_else(|| missing("register"))?;
    call.device.with_state(|s| {
        values
            .iter()
            .map(|v| codec::resolve_scalar(&s.interface, reg, v))
            .collect()
    })
}

fn merge_fields(call: &Call<'_>, target: &AddressSet, updates: &[FieldUpdate]) -> Result<Vec<(usize, u32)>> {
    let mut buffer = DirtyWords::new(target.addrs.len(), target.word_bits())?;
    for update in updates {
        buffer.merge_subfield(update.offset, update.width, &update.value, |i| {
            let phys = target.addrs.get(i).copied().ok_or_else(|| missing("word"))?;
            call.read_word(target, phys)
        })?;
    }
    Ok(buffer.dirty_words())
}

/// Encode and write a value to a resolved address set.
pub(crate) fn set(call: &Call<'_>, target: &AddressSet, value: &Value) -> Result<()> {
    let word_bits = target.word_bits();
    let count = target.addrs.len();
    let writes: Vec<(usize, u32)> = match (target.kind, value) {
        (AddressKind::Raw, _) => codec::word_split(value, count, word_bits)?
            .into_iter()
            .enumerate()
            .collect(),
        (AddressKind::Array, _) => {
            let layout = target.layout.as_ref().ok_or_else(|| missing("register layout"))?;
            let items = value.as_list().map_err(|e| {
                Error::invalid_type(format!("array register needs a list: {e}"))
            })?;
            if items.len() != layout.array as usize {
                return Err(Error::invalid_type(format!(
                    "array register has {} elements, got {}",
                    layout.array,
                    items.len()
                )));
            }
            let per = layout.words_per_elem as usize;
            let mut words = Vec::with_capacity(count);
            for item in resolve_elements(call, target, items)? {
                words.extend(codec::word_split(&item, per, word_bits)?);
            }
            words.into_iter().enumerate().collect()
        }
        (AddressKind::Subregister, _) | (AddressKind::Single, Value::Node(_)) => {
            let updates = plan_fields(call, target, value)?;
            merge_fields(call, target, &updates)?
        }
        (AddressKind::Single, _) => {
            let resolved = resolve_elements(call, target, std::slice::from_ref(value))?;
            let scalar = resolved.first().ok_or_else(|| missing("value"))?;
            codec::word_split(scalar, count, word_bits)?
                .into_iter()
                .enumerate()
                .collect()
        }
    };

    for (index, word) in writes {
        let phys = target.addrs.get(index).copied().ok_or_else(|| missing("word"))?;
        call.write_word(target, phys, word)?;
    }
    Ok(())
}

/// Read a register once and split it into its sub-register values.
pub(crate) fn get_subregs(call: &Call<'_>, target: &AddressSet) -> Result<Value> {
    let reg = target.reg.ok_or_else(|| missing("register"))?;
    // Copied before the first transfer: a retry callback may replace the
    // interface and leave `reg` pointing into a different tree.
    let (name, fields) = call.device.with_state(|s| {
        let tree = &s.interface;
        let mut fields = Vec::new();
        for sub in tree.children(reg)? {
            fields.push((
                tree.name(*sub)?.to_string(),
                tree.attr_u32(*sub, attr::OFFSET)?.unwrap_or(0),
                tree.attr_u32(*sub, attr::WIDTH)?.unwrap_or(1),
            ));
        }
        Ok((tree.name(reg)?.to_string(), fields))
    })?;
    let words = read_words(call, target)?;
    let word_bits = target.word_bits();

    let mut out = Tree::generic(name);
    for (sub, offset, width) in fields {
        let value = codec::extract_field(&words, word_bits, offset, width)?;
        out = out.with_attr(sub, value);
    }
    Ok(Value::Node(out))
}
