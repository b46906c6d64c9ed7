//! Raw register words to engineering values
//!
//! 32-bit values arrive as two big-endian registers, high word first.
//! Some meter firmwares send the low word first; `word_swap` undoes that.

use super::error::DecodeError;
use super::register::{DataType, RegisterDefinition};

/// Converts raw words into scaled values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decoder {
    word_swap: bool,
}

impl Decoder {
    /// Create a decoder with the given word order
    pub fn new(word_swap: bool) -> Self {
        Self { word_swap }
    }

    /// Whether the high/low words are exchanged before reassembly
    pub fn word_swap(&self) -> bool {
        self.word_swap
    }

    /// Decode words for `def` and apply its scale
    pub fn decode(&self, def: &RegisterDefinition, words: &[u16]) -> Result<f64, DecodeError> {
        let raw = match def.data_type {
            DataType::Float32 => f64::from(decode_float32(words, self.word_swap)?),
        };
        Ok(raw * def.scale)
    }
}

/// Reassemble two registers into an IEEE-754 single
///
/// No range checks: NaN and infinities come back exactly as transmitted.
pub fn decode_float32(words: &[u16], word_swap: bool) -> Result<f32, DecodeError> {
    let [first, second] = words else {
        return Err(DecodeError::WordCount {
            expected: DataType::Float32.word_count() as usize,
            actual: words.len(),
        });
    };

    let (hi, lo) = if word_swap {
        (*second, *first)
    } else {
        (*first, *second)
    };

    let raw = (u32::from(hi) << 16) | u32::from(lo);
    Ok(f32::from_be_bytes(raw.to_be_bytes()))
}

/// Split a float into the two registers a device would send
///
/// Inverse of [`decode_float32`]; used by simulators and tests.
pub fn encode_float32(value: f32, word_swap: bool) -> [u16; 2] {
    let raw = value.to_bits();
    let hi = (raw >> 16) as u16;
    let lo = (raw & 0xFFFF) as u16;
    if word_swap {
        [lo, hi]
    } else {
        [hi, lo]
    }
}
