//! Locator for the exponent of a DER `RSAPublicKey`
//!
//! Only the fixed shape `SEQUENCE { INTEGER modulus, INTEGER exponent }` is
//! understood. Every offset is checked against the buffer before it is read,
//! so malformed input is reported instead of read out of bounds.

use crate::error::{Error, Result};

pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_INTEGER: u8 = 0x02;

/// Widest long-form length accepted, in bytes after the prefix byte
const MAX_LENGTH_BYTES: usize = 4;

/// Data bytes of one field, addressed by index into the owning buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    /// Index of the first data byte
    pub offset: usize,
    /// Number of data bytes
    pub declared_length: usize,
    /// Index of the first byte of the length prefix
    pub length_field_offset: usize,
}

impl FieldSpan {
    /// Index one past the last data byte
    pub fn end(&self) -> usize {
        self.offset + self.declared_length
    }
}

/// A decoded DER length prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthField {
    /// Index of the prefix byte
    pub offset: usize,
    /// Bytes taken by the prefix, 1 for the short form
    pub width: usize,
    pub value: usize,
}

impl LengthField {
    pub fn is_short_form(&self) -> bool {
        self.width == 1
    }
}

/// Everything the patcher needs to know about a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentLocation {
    pub exponent: FieldSpan,
    pub exponent_length: LengthField,
    pub modulus: FieldSpan,
    pub sequence_length: LengthField,
    /// Declared size of the whole structure, header included
    pub total_len: usize,
}

/// Find the exponent field of a `SEQUENCE { INTEGER, INTEGER }`
///
/// `der` may carry trailing bytes (hash padding); they are ignored.
pub fn locate_exponent(der: &[u8]) -> Result<ExponentLocation> {
    expect_tag(der, 0, TAG_SEQUENCE, "SEQUENCE")?;
    let sequence_length = read_length(der, 1)?;
    let body_start = 1 + sequence_length.width;
    let total_len = body_start
        .checked_add(sequence_length.value)
        .ok_or_else(|| Error::malformed("SEQUENCE length overflows"))?;
    if total_len > der.len() {
        return Err(Error::malformed(format!(
            "SEQUENCE claims {} bytes but the buffer holds {}",
            total_len,
            der.len()
        )));
    }

    let (modulus, _) = read_integer(der, body_start, total_len, "modulus")?;
    let (exponent, exponent_length) = read_integer(der, modulus.end(), total_len, "exponent")?;

    if exponent.declared_length == 0 {
        return Err(Error::malformed("exponent INTEGER is empty"));
    }
    if exponent.end() != total_len {
        return Err(Error::malformed(format!(
            "exponent ends at {} but the SEQUENCE ends at {}",
            exponent.end(),
            total_len
        )));
    }

    Ok(ExponentLocation {
        exponent,
        exponent_length,
        modulus,
        sequence_length,
        total_len,
    })
}

fn expect_tag(der: &[u8], at: usize, tag: u8, what: &str) -> Result<()> {
    match der.get(at) {
        Some(&b) if b == tag => Ok(()),
        Some(&b) => Err(Error::malformed(format!(
            "expected {} tag 0x{:02x} at {}, found 0x{:02x}",
            what, tag, at, b
        ))),
        None => Err(Error::malformed(format!("buffer ends before {} tag at {}", what, at))),
    }
}

/// Decode the length prefix starting at `at`
pub fn read_length(der: &[u8], at: usize) -> Result<LengthField> {
    let first = *der
        .get(at)
        .ok_or_else(|| Error::malformed(format!("buffer ends before length at {}", at)))?;
    if first & 0x80 == 0 {
        return Ok(LengthField {
            offset: at,
            width: 1,
            value: first as usize,
        });
    }

    let count = (first & 0x7F) as usize;
    if count == 0 || count > MAX_LENGTH_BYTES {
        return Err(Error::malformed(format!(
            "unsupported length prefix 0x{:02x} at {}",
            first, at
        )));
    }
    let bytes = der
        .get(at + 1..at + 1 + count)
        .ok_or_else(|| Error::malformed(format!("length bytes at {} run past the buffer", at)))?;
    let value = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok(LengthField {
        offset: at,
        width: 1 + count,
        value,
    })
}

fn read_integer(
    der: &[u8],
    at: usize,
    limit: usize,
    what: &str,
) -> Result<(FieldSpan, LengthField)> {
    if at >= limit {
        return Err(Error::malformed(format!("{} INTEGER is missing", what)));
    }
    expect_tag(der, at, TAG_INTEGER, what)?;
    let length = read_length(&der[..limit], at + 1)?;
    let span = FieldSpan {
        offset: at + 1 + length.width,
        declared_length: length.value,
        length_field_offset: at + 1,
    };
    if span.offset.checked_add(span.declared_length).map_or(true, |end| end > limit) {
        return Err(Error::malformed(format!(
            "{} of {} bytes runs past the SEQUENCE",
            what, span.declared_length
        )));
    }
    Ok((span, length))
}

/// Bytes needed by a length prefix encoding `len`
pub fn length_prefix_width(len: usize) -> usize {
    if len < 0x80 {
        1
    } else {
        1 + (usize::BITS as usize / 8 - len.leading_zeros() as usize / 8)
    }
}

/// Encode `SEQUENCE { INTEGER modulus, INTEGER exponent }` with minimal lengths
///
/// Both slices are INTEGER contents, sign byte included.
pub fn encode_public_key(modulus: &[u8], exponent: &[u8]) -> Vec<u8> {
    let encoded = |content: &[u8]| 1 + length_prefix_width(content.len()) + content.len();
    let body_len = encoded(modulus) + encoded(exponent);
    let mut der = Vec::with_capacity(1 + length_prefix_width(body_len) + body_len);
    der.push(TAG_SEQUENCE);
    push_length(&mut der, body_len);
    for content in [modulus, exponent] {
        der.push(TAG_INTEGER);
        push_length(&mut der, content.len());
        der.extend_from_slice(content);
    }
    der
}

fn push_length(der: &mut Vec<u8>, len: usize) {
    let width = length_prefix_width(len);
    if width == 1 {
        der.push(len as u8);
        return;
    }
    der.push(0x80 | (width - 1) as u8);
    for i in (0..width - 1).rev() {
        der.push((len >> (8 * i)) as u8);
    }
}

/// Data bytes of the DER INTEGER encoding of `value`, sign byte included
pub fn integer_len(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let bytes = 8 - value.leading_zeros() as usize / 8;
    let top = (value >> (8 * (bytes - 1))) as u8;
    if top & 0x80 != 0 {
        bytes + 1
    } else {
        bytes
    }
}
