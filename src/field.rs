//! Field extraction, decoding, and encoding.
//!
//! The payload bit-addressing convention matches the wire tooling this crate
//! speaks to: payload bytes are read as one little-endian integer (byte 0 is
//! least significant) and a field occupies bits `[offset, offset+len)` of
//! that integer. The extraction primitive lives here on its own because the
//! offset arithmetic is the most error-prone part of the codec and needs
//! direct tests.

use crate::meta::{FieldDefinition, FieldKind, FieldValue, RuntimeFieldConfig};
use crate::units;
use byteorder::{ByteOrder, LittleEndian};
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Extracts `bit_len` bits at `bit_offset` from a payload, returned as
/// 8-bit chunks least-significant chunk first. A trailing partial chunk
/// holds the remaining high bits unpadded.
///
/// Out-of-range requests are clamped to the bits that exist: a field
/// entirely past the payload yields an empty chunk list, which reconstructs
/// as zero. The caller decides whether that counts as a decode failure.
pub fn extract_field_bytes(payload: &[u8], bit_offset: usize, bit_len: usize) -> Vec<u8> {
    let take = payload.len().min(8);
    let total_bits = take * 8;
    if bit_offset >= total_bits || bit_len == 0 {
        return Vec::new();
    }
    let bit_len = bit_len.min(total_bits - bit_offset);

    let mut buf = [0u8; 8];
    buf[..take].copy_from_slice(&payload[..take]);
    let word = LittleEndian::read_u64(&buf);

    let mask = if bit_len >= 64 {
        u64::max_value()
    } else {
        (1u64 << bit_len) - 1
    };
    let bits = (word >> bit_offset) & mask;

    let mut chunks = Vec::with_capacity((bit_len + 7) / 8);
    for i in 0..bit_len / 8 {
        chunks.push(((bits >> (8 * i)) & 0xFF) as u8);
    }
    let rem = bit_len % 8;
    if rem != 0 {
        chunks.push(((bits >> (bit_len - rem)) & ((1 << rem) - 1)) as u8);
    }
    chunks
}

/// Reconstructs an integer from extracted chunks. Big-endian treats the
/// first chunk as most significant; sign extension happens over the chunk
/// array's width, eight bits per chunk.
fn int_from_chunks(chunks: &[u8], little_endian: bool, signed: bool) -> i128 {
    let mut value: u64 = 0;
    if little_endian {
        for (i, &c) in chunks.iter().enumerate() {
            value |= u64::from(c) << (8 * i);
        }
    } else {
        for &c in chunks {
            value = (value << 8) | u64::from(c);
        }
    }

    let width = 8 * chunks.len();
    let mut value = i128::from(value);
    if signed && width > 0 && (value >> (width - 1)) & 1 == 1 {
        value -= 1i128 << width;
    }
    value
}

/// Encode-side validation errors. These are the only codec errors meant to
/// reach a human: a frame carrying bad data onto a live bus is worth a loud
/// stop, where decode problems just degrade the display.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldEncodeError {
    /// The value does not fit the field's bit length.
    Overflow {
        field: String,
        value: f64,
        lower: f64,
        upper: f64,
    },
    /// Little-endian fields wider than a byte must be a whole number of
    /// bytes; there is no byte order to reverse otherwise.
    ByteAlignment { field: String, bit_len: usize },
}

impl Display for FieldEncodeError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            FieldEncodeError::Overflow {
                field,
                value,
                lower,
                upper,
            } => write!(
                f,
                "value {} is out of range for field '{}', which accepts {} to {}",
                value, field, lower, upper
            ),
            FieldEncodeError::ByteAlignment { field, bit_len } => write!(
                f,
                "cannot reverse byte order for field '{}': {} bits is not a whole number of bytes",
                field, bit_len
            ),
        }
    }
}

impl Error for FieldEncodeError {}

impl FieldDefinition {
    /// Decodes this field from a payload, applying the runtime unit target
    /// and value filter.
    ///
    /// Returns `None` when the field cannot be read at all (zero length or
    /// lying past the end of the payload); the caller omits such fields
    /// rather than aborting the message.
    pub fn decode(&self, payload: &[u8], cfg: &RuntimeFieldConfig) -> Option<FieldValue> {
        if self.bit_len == 0 || self.bit_offset + self.bit_len > payload.len() * 8 {
            return None;
        }

        let chunks = extract_field_bytes(payload, self.bit_offset, self.bit_len);

        if self.kind == FieldKind::Bitfield {
            let raw = int_from_chunks(&chunks, self.little_endian, false);
            if !cfg.filter.accepts(raw as f64) {
                return Some(FieldValue::Filtered);
            }
            return Some(FieldValue::Bitfield(format!(
                "{:#0width$b}",
                raw,
                width = self.bit_len + 2
            )));
        }

        let raw = int_from_chunks(&chunks, self.little_endian, self.kind.is_signed());

        // NMEA2000 "data not available". Takes precedence over scaling,
        // conversion, and filtering.
        if raw == 0xFFFF {
            return Some(FieldValue::NotAvailable);
        }

        let mut value = raw as f64 * self.scaling;

        if let Some(target) = &cfg.unit_target {
            value = units::convert(value, &self.units, target);
        }

        if !cfg.filter.accepts(value) {
            return Some(FieldValue::Filtered);
        }
        Some(FieldValue::Number(value))
    }

    /// Returns a closure decoding this field from a payload, for callers
    /// that parse the same field repeatedly.
    pub fn parser(&self, cfg: RuntimeFieldConfig) -> Box<dyn Fn(&[u8]) -> Option<FieldValue>> {
        let def = self.clone();
        Box::new(move |payload| def.decode(payload, &cfg))
    }

    /// Encodes a scaled (human) value into this field's bits, most
    /// significant bit first, ready for splicing into a payload bit array
    /// at `[offset, offset + len)`.
    ///
    /// The value is de-scaled and range-checked against the field's bit
    /// length; negatives are encoded as two's complement. Little-endian
    /// fields wider than a byte are emitted in reversed byte order to match
    /// the big-endian wire convention.
    pub fn encode(&self, value: f64) -> Result<Vec<u8>, FieldEncodeError> {
        let n = self.bit_len;
        if n == 0 {
            return Ok(Vec::new());
        }
        let raw = (value / self.scaling).trunc() as i128;

        let (raw_lower, raw_upper) = if self.kind.is_signed() {
            let bound = 1i128 << (n - 1);
            (-bound, bound - 1)
        } else {
            (0, (1i128 << n) - 1)
        };
        if raw < raw_lower || raw > raw_upper {
            let (lower, upper) = self.bounds();
            return Err(FieldEncodeError::Overflow {
                field: self.name.clone(),
                value,
                lower,
                upper,
            });
        }

        // Two's complement over the field width.
        let unsigned = raw.rem_euclid(1i128 << n) as u64;

        let mut bits: Vec<u8> = (0..n)
            .map(|i| ((unsigned >> (n - 1 - i)) & 1) as u8)
            .collect();

        if self.little_endian && n > 8 {
            if n % 8 != 0 {
                return Err(FieldEncodeError::ByteAlignment {
                    field: self.name.clone(),
                    bit_len: n,
                });
            }
            bits = bits.chunks(8).rev().flatten().cloned().collect();
        }

        Ok(bits)
    }
}
