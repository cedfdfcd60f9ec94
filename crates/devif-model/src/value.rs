//! The closed value type carried by tree attributes, device reads and error payloads.

use core::fmt;
use std::any::Any;
use std::sync::Arc;

use crate::bits;
use crate::error::{Error, Result};
use crate::tree::Tree;

/// Arbitrary-precision unsigned integer as little-endian 32-bit words.
///
/// The word vector is kept normalized: no high zero words, at least one word.
/// An optional decimal rendering travels with values parsed from text.
#[derive(Debug, Clone)]
pub struct BigInt {
    words: Vec<u32>,
    decimal: Option<String>,
}

impl BigInt {
    /// Build from little-endian words.
    pub fn from_words(words: impl Into<Vec<u32>>) -> Self {
        let mut words = words.into();
        bits::normalize(&mut words);
        Self {
            words,
            decimal: None,
        }
    }

    /// Build from a `u64`.
    pub fn from_u64(v: u64) -> Self {
        Self::from_words(vec![v as u32, (v >> 32) as u32])
    }

    /// Parse a base-10 string of ASCII digits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCast` if the string is empty or contains a non-digit.
    pub fn parse_decimal(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_cast("string", "bigint"));
        }
        let mut words: Vec<u32> = vec![0];
        for c in trimmed.chars() {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| Error::invalid_cast("string", "bigint"))?;
            let mut carry = u64::from(digit);
            for w in &mut words {
                let acc = u64::from(*w) * 10 + carry;
                *w = acc as u32;
                carry = acc >> 32;
            }
            if carry != 0 {
                words.push(carry as u32);
            }
        }
        let mut out = Self::from_words(words);
        out.decimal = Some(trimmed.to_string());
        Ok(out)
    }

    /// Little-endian words, normalized.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// The decimal rendering the value was parsed from, if any.
    pub fn decimal(&self) -> Option<&str> {
        self.decimal.as_deref()
    }

    /// Value as `u64` when it fits.
    pub fn to_u64(&self) -> Option<u64> {
        match self.words.as_slice() {
            [lo] => Some(u64::from(*lo)),
            [lo, hi] => Some(u64::from(*lo) | (u64::from(*hi) << 32)),
            _ => None,
        }
    }

    /// Significant bit count.
    pub fn bit_len(&self) -> usize {
        bits::bit_len(&self.words)
    }

    /// Render in base 10.
    pub fn to_decimal_string(&self) -> String {
        if let Some(d) = &self.decimal {
            return d.clone();
        }
        const CHUNK: u64 = 1_000_000_000;
        let mut rem = self.words.clone();
        let mut chunks = Vec::new();
        loop {
            let mut carry = 0u64;
            for w in rem.iter_mut().rev() {
                let acc = (carry << 32) | u64::from(*w);
                *w = (acc / CHUNK) as u32;
                carry = acc % CHUNK;
            }
            chunks.push(carry as u32);
            bits::normalize(&mut rem);
            if rem == [0] {
                break;
            }
        }
        let mut out = String::new();
        for (i, chunk) in chunks.iter().rev().enumerate() {
            if i == 0 {
                out.push_str(&chunk.to_string());
            } else {
                out.push_str(&format!("{chunk:09}"));
            }
        }
        out
    }
}

impl PartialEq for BigInt {
    fn eq(&self, other: &Self) -> bool {
        self.words == other.words
    }
}

impl Eq for BigInt {}

/// Opaque, non-owned handle to a device capability.
#[derive(Clone)]
pub struct Capability(Arc<dyn Any + Send + Sync>);

impl Capability {
    /// Wrap a shared handle.
    pub fn new<T: Any + Send + Sync>(inner: Arc<T>) -> Self {
        Self(inner)
    }

    /// Downcast to the concrete capability type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Capability(..)")
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A logical value.
///
/// Equality only holds between compatible kinds: the three integer kinds
/// compare numerically, strings only to strings, nodes and lists structurally.
#[derive(Debug, Clone)]
pub enum Value {
    /// Signed 32-bit integer
    Int(i32),
    /// Unsigned 32-bit integer
    Uint(u32),
    /// Arbitrary-precision unsigned integer
    BigInt(BigInt),
    /// IEEE double
    Double(f64),
    /// UTF-8 string
    Str(String),
    /// Node-valued: an owned tree rooted at the referenced node
    Node(Tree),
    /// Ordered list
    List(Vec<Value>),
    /// Opaque byte buffer
    Buffer(Vec<u8>),
    /// Opaque device capability
    Capability(Capability),
}

impl Value {
    /// Collapse little-endian words to the narrowest integer kind.
    ///
    /// Below 2^31 yields `Int`, below 2^32 `Uint`, otherwise `BigInt`.
    pub fn from_words(words: impl Into<Vec<u32>>) -> Self {
        let big = BigInt::from_words(words);
        match big.words() {
            [w] => i32::try_from(*w).map_or(Value::Uint(*w), Value::Int),
            _ => Value::BigInt(big),
        }
    }

    /// Kind name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::BigInt(_) => "bigint",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Node(_) => "node",
            Value::List(_) => "list",
            Value::Buffer(_) => "buffer",
            Value::Capability(_) => "capability",
        }
    }

    /// Whether this is one of the integer kinds.
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Uint(_) | Value::BigInt(_))
    }

    /// Integer value as `i64`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCast` for non-integers or big integers wider than 63 bits.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(i64::from(*v)),
            Value::Uint(v) => Ok(i64::from(*v)),
            Value::BigInt(b) => b
                .to_u64()
                .and_then(|v| i64::try_from(v).ok())
                .ok_or_else(|| Error::invalid_cast("bigint", "i64")),
            other => Err(Error::invalid_cast(other.type_name(), "i64")),
        }
    }

    /// Integer value as `u32`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCast` for non-integers and values outside `u32`.
    pub fn as_u32(&self) -> Result<u32> {
        let v = self.as_i64()?;
        u32::try_from(v)
            .ok()
            .ok_or_else(|| Error::invalid_cast(self.type_name(), "u32"))
    }

    /// String contents.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCast` for non-strings.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Error::invalid_cast(other.type_name(), "string")),
        }
    }

    /// Node contents.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCast` for non-nodes.
    pub fn as_node(&self) -> Result<&Tree> {
        match self {
            Value::Node(t) => Ok(t),
            other => Err(Error::invalid_cast(other.type_name(), "node")),
        }
    }

    /// List contents.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCast` for non-lists.
    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Value::List(l) => Ok(l),
            other => Err(Error::invalid_cast(other.type_name(), "list")),
        }
    }

    /// Non-negative integer as little-endian 32-bit words.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCast` for non-integers and negative values.
    pub fn as_bigint_words(&self) -> Result<Vec<u32>> {
        match self {
            Value::Int(v) => u32::try_from(*v)
                .map(|w| vec![w])
                .ok()
                .ok_or_else(|| Error::invalid_cast("negative int", "bigint")),
            Value::Uint(v) => Ok(vec![*v]),
            Value::BigInt(b) => Ok(b.words().to_vec()),
            other => Err(Error::invalid_cast(other.type_name(), "bigint")),
        }
    }

    fn numeric_eq(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a == b),
            (Value::Int(a), _) | (_, Value::Int(a)) if *a < 0 => Some(false),
            _ => {
                let a = self.as_bigint_words().ok()?;
                let b = other.as_bigint_words().ok()?;
                Some(BigInt::from_words(a) == BigInt::from_words(b))
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.is_integer() && other.is_integer() {
            return self.numeric_eq(other).unwrap_or(false);
        }
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a == b,
            (Value::Capability(a), Value::Capability(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::BigInt(b) => f.write_str(&b.to_decimal_string()),
            Value::Double(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Node(t) => {
                let root = t.root();
                write!(f, "<node {}>", t.name(root).unwrap_or("?"))
            }
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Buffer(b) => write!(f, "<buffer {} bytes>", b.len()),
            Value::Capability(_) => f.write_str("<capability>"),
        }
    }
}

/// Parse an unsigned integer literal in decimal, `0x` hex or `0b` binary.
pub fn parse_int_literal(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2).ok()
    } else {
        s.parse().ok()
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        match u32::try_from(v) {
            Ok(small) => Value::Uint(small),
            Err(_) => Value::BigInt(BigInt::from_u64(v)),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Value::BigInt(v)
    }
}

impl From<Tree> for Value {
    fn from(v: Tree) -> Self {
        Value::Node(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Buffer(v)
    }
}
