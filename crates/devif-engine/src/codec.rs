//! Conversion between logical values and fixed-width hardware words.
//!
//! Words are always least-significant first. A word of `word_bits` bits is
//! carried in the low bits of a `u32`, so `word_bits` is limited to `1..=32`.

use devif_model::bits;
use devif_model::prelude::*;

fn check_word_bits(word_bits: u32) -> Result<()> {
    if (1..=32).contains(&word_bits) {
        Ok(())
    } else {
        Err(Error::new(DataTypeError::InvalidOperation(format!(
            "word width {word_bits} outside 1..=32"
        ))))
    }
}

/// Bit-vector of an integer value and its sign fill.
fn bit_vector(value: &Value) -> Result<(Vec<u32>, bool)> {
    match value {
        Value::Int(v) if *v < 0 => Ok((vec![u32::from_le_bytes(v.to_le_bytes())], true)),
        other => other.as_bigint_words().map(|w| (w, false)),
    }
}

/// Split an integer value into `count` words of `word_bits` bits.
///
/// Negative values are sign-extended across all words; wider values are
/// truncated to `count * word_bits` bits.
///
/// # Errors
///
/// Returns `InvalidCast` for non-integer values.
pub fn word_split(value: &Value, count: usize, word_bits: u32) -> Result<Vec<u32>> {
    check_word_bits(word_bits)?;
    let (vector, fill) = bit_vector(value)?;
    let step = word_bits as usize;
    Ok((0..count)
        .map(|i| bits::extract(&vector, i * step, step, fill))
        .collect())
}

/// Reassemble words produced by [`word_split`].
///
/// The result collapses to `Int` or `Uint` when it fits in 32 bits.
///
/// # Errors
///
/// Returns `InvalidOperation` for a word width outside `1..=32`.
pub fn word_join(words: &[u32], word_bits: u32) -> Result<Value> {
    check_word_bits(word_bits)?;
    let step = word_bits as usize;
    let mut acc = vec![0u32];
    for (i, word) in words.iter().enumerate() {
        bits::deposit(&mut acc, i * step, step, &[*word]);
    }
    Ok(Value::from_words(acc))
}

/// Map a symbolic value through the value map attached to `node`.
///
/// Non-string values pass through unchanged.
///
/// # Errors
///
/// Returns `AttrNotFound` when a string has no entry in the value map.
pub fn resolve_scalar(tree: &Tree, node: NodeId, value: &Value) -> Result<Value> {
    match value {
        Value::Str(name) => valuemap_lookup(tree, node, name),
        other => Ok(other.clone()),
    }
}

/// Word buffer for read-modify-write of bit fields within one logical set.
///
/// A word is read back at most once per buffer; once merged it is dirty and
/// later fields touching it build on the pending value.
#[derive(Debug, Clone)]
pub struct DirtyWords {
    words: Vec<u32>,
    dirty: Vec<bool>,
    word_bits: u32,
}

impl DirtyWords {
    /// Buffer of `count` words of `word_bits` bits, nothing read yet.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a word width outside `1..=32`.
    pub fn new(count: usize, word_bits: u32) -> Result<Self> {
        check_word_bits(word_bits)?;
        Ok(Self {
            words: vec![0; count],
            dirty: vec![false; count],
            word_bits,
        })
    }

    /// Replace `width` bits at `offset` with `value`.
    ///
    /// `read_word(i)` is called for every word in the span not already dirty.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the field lies outside the buffer,
    /// `InvalidCast` for a non-integer value, or whatever `read_word` returns.
    pub fn merge_subfield<F>(&mut self, offset: u32, width: u32, value: &Value, mut read_word: F) -> Result<()>
    where
        F: FnMut(usize) -> Result<u32>,
    {
        if width == 0 {
            return Ok(());
        }
        let step = self.word_bits as usize;
        let offset = offset as usize;
        let width = width as usize;
        let first = offset / step;
        let last = (offset + width - 1) / step;
        if last >= self.words.len() {
            return Err(Error::new(DataTypeError::InvalidOperation(format!(
                "bit field {offset}+{width} outside {} words",
                self.words.len()
            ))));
        }

        let (field, fill) = bit_vector(value)?;
        for i in first..=last {
            if !self.dirty[i] {
                self.words[i] = read_word(i)?;
            }
        }

        let mut span: Vec<u32> = Vec::new();
        for (i, word) in self.words[first..=last].iter().enumerate() {
            bits::deposit(&mut span, i * step, step, &[*word]);
        }
        let rel = offset - first * step;
        for taken in (0..width).step_by(32) {
            let n = (width - taken).min(32);
            let chunk = bits::extract(&field, taken, n, fill);
            bits::deposit(&mut span, rel + taken, n, &[chunk]);
        }
        for (i, slot) in self.words[first..=last].iter_mut().enumerate() {
            *slot = bits::extract(&span, i * step, step, false);
        }
        for flag in &mut self.dirty[first..=last] {
            *flag = true;
        }
        Ok(())
    }

    /// Words merged so far, as `(index, word)`.
    pub fn dirty_words(&self) -> Vec<(usize, u32)> {
        self.words
            .iter()
            .zip(&self.dirty)
            .enumerate()
            .filter(|(_, (_, dirty))| **dirty)
            .map(|(i, (word, _))| (i, *word))
            .collect()
    }

    /// Current contents of every word.
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

/// Extract a field from words joined at `word_bits`.
///
/// # Errors
///
/// Returns `InvalidOperation` for a word width outside `1..=32`.
pub fn extract_field(words: &[u32], word_bits: u32, offset: u32, width: u32) -> Result<Value> {
    let joined = word_join(words, word_bits)?.as_bigint_words()?;
    Ok(Value::from_words(bits::extract_span(
        &joined,
        offset as usize,
        width as usize,
    )))
}

/// Little-endian encoding of one word into `width` bytes.
pub fn word_to_bytes(word: u32, width: usize) -> Vec<u8> {
    let mut out = word.to_le_bytes().to_vec();
    out.resize(width, 0);
    out
}

/// Little-endian decoding of up to four bytes.
pub fn bytes_to_word(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    for (dst, src) in buf.iter_mut().zip(bytes) {
        *dst = *src;
    }
    u32::from_le_bytes(buf)
}
