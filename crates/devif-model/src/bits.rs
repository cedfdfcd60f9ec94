//! Bit-vector helpers over little-endian `u32` word slices.
//!
//! Bit `n` of a vector lives in word `n / 32` at position `n % 32`. Reads past
//! the end of a slice yield the `fill` bit so that negative values can be
//! sign-extended across wider fields.

/// Read one bit, returning `fill` past the end of `words`.
#[inline]
pub fn bit(words: &[u32], index: usize, fill: bool) -> bool {
    match words.get(index / 32) {
        Some(w) => (w >> (index % 32)) & 1 == 1,
        None => fill,
    }
}

/// Write one bit, growing `words` as needed.
#[inline]
pub fn set_bit(words: &mut Vec<u32>, index: usize, on: bool) {
    let word = index / 32;
    if word >= words.len() {
        if !on {
            return;
        }
        words.resize(word + 1, 0);
    }
    if let Some(w) = words.get_mut(word) {
        let mask = 1u32 << (index % 32);
        if on {
            *w |= mask;
        } else {
            *w &= !mask;
        }
    }
}

fn word_or(words: &[u32], index: usize, fill: bool) -> u32 {
    match words.get(index) {
        Some(w) => *w,
        None if fill => u32::MAX,
        None => 0,
    }
}

fn low_mask(width: usize) -> u32 {
    if width >= 32 { u32::MAX } else { (1u32 << width) - 1 }
}

/// Extract up to 32 bits starting at `offset`.
pub fn extract(words: &[u32], offset: usize, width: usize, fill: bool) -> u32 {
    let width = width.min(32);
    if width == 0 {
        return 0;
    }
    let (index, shift) = (offset / 32, offset % 32);
    let lo = word_or(words, index, fill);
    let joined = if shift == 0 {
        lo
    } else {
        (lo >> shift) | (word_or(words, index + 1, fill) << (32 - shift))
    };
    joined & low_mask(width)
}

/// Extract an arbitrary-width field as a new word vector.
pub fn extract_span(words: &[u32], offset: usize, width: usize) -> Vec<u32> {
    let mut out = vec![0u32; width.div_ceil(32).max(1)];
    for (k, slot) in out.iter_mut().enumerate() {
        let taken = k * 32;
        if taken >= width {
            break;
        }
        *slot = extract(words, offset + taken, width - taken, false);
    }
    out
}

/// Replace `width` bits at `offset` with the low bits of `value`.
pub fn deposit(words: &mut Vec<u32>, offset: usize, width: usize, value: &[u32]) {
    let mut pos = 0;
    while pos < width {
        let (index, shift) = ((offset + pos) / 32, (offset + pos) % 32);
        let n = (32 - shift).min(width - pos);
        let chunk = extract(value, pos, n, false);
        pos += n;
        if index >= words.len() {
            if chunk == 0 {
                continue;
            }
            words.resize(index + 1, 0);
        }
        if let Some(w) = words.get_mut(index) {
            let mask = low_mask(n) << shift;
            *w = (*w & !mask) | (chunk << shift);
        }
    }
}

/// Strip high zero words, keeping at least one word.
pub fn normalize(words: &mut Vec<u32>) {
    while words.len() > 1 && words.last() == Some(&0) {
        words.pop();
    }
    if words.is_empty() {
        words.push(0);
    }
}

/// Number of significant bits (zero for an all-zero vector).
pub fn bit_len(words: &[u32]) -> usize {
    for (i, w) in words.iter().enumerate().rev() {
        if *w != 0 {
            return i * 32 + (32 - w.leading_zeros() as usize);
        }
    }
    0
}
