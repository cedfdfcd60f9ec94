//! Fuzzes splitting values into bus words and joining them back.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_word_codec

#![deny(static_mut_refs)]
#![no_main]

use devif_engine::codec::{word_join, word_split};
use devif_model::Value;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let [bits, count, rest @ ..] = data else {
        return;
    };
    let word_bits = u32::from(bits % 32) + 1;
    let count = usize::from(count % 8) + 1;
    let limbs: Vec<u32> = rest
        .chunks(4)
        .map(|c| {
            let mut le = [0u8; 4];
            le[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(le)
        })
        .collect();
    let value = Value::from_words(limbs);

    let Ok(words) = word_split(&value, count, word_bits) else {
        return;
    };
    assert_eq!(words.len(), count);
    let joined = word_join(&words, word_bits).expect("valid word width");
    let again = word_split(&joined, count, word_bits).expect("joined value splits");
    assert_eq!(again, words);
});
