//! In-place exponent rewriting
//!
//! [`apply_exponent`] patches a padded DER buffer: exponent bytes, the two
//! length prefixes that depend on the exponent size, and the SHA-1 padding.
//! Every constraint is checked before the first byte is written, so a failed
//! patch leaves the buffer untouched.
//!
//! [`patch_block_words`] is the lower-level variant used on blocks that were
//! already split into big-endian words.

use crate::der::{integer_len, locate_exponent, FieldSpan, LengthField};
use crate::error::{Error, Result};
use crate::message::{write_padding, MessageBuffer, PADDING_OVERHEAD};
use crate::sha1::{BlockWords, BLOCK_LEN};

/// Longest DER INTEGER a `u64` exponent can need, sign byte included
pub const MAX_EXPONENT_LEN: usize = 9;

/// Largest value a short-form DER length can carry
const SHORT_FORM_MAX: usize = 0x7F;

/// Minimal DER INTEGER content bytes of an exponent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentBytes {
    bytes: [u8; MAX_EXPONENT_LEN],
    len: usize,
}

impl ExponentBytes {
    /// Big-endian bytes, with a leading zero when the top bit is set
    pub fn new(value: u64) -> Self {
        let len = integer_len(value);
        let mut wide = [0u8; MAX_EXPONENT_LEN];
        wide[1..].copy_from_slice(&value.to_be_bytes());
        let mut bytes = [0u8; MAX_EXPONENT_LEN];
        bytes[..len].copy_from_slice(&wide[MAX_EXPONENT_LEN - len..]);
        Self { bytes, len }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Layout of a buffer after a successful patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOutcome {
    pub exponent: FieldSpan,
    /// Declared length of the whole DER structure
    pub total_len: usize,
    /// Bytes the exponent field grew by
    pub grown_by: usize,
}

/// Write `exponent` into the padded DER key held by `buffer`
///
/// The field only ever grows; a shorter exponent is right-justified behind
/// zero bytes. Growth rewrites the exponent and SEQUENCE lengths in place,
/// which requires both to stay within their current length encoding, and the
/// grown content must still leave room for the SHA-1 padding.
pub fn apply_exponent(buffer: &mut [u8], exponent: u64) -> Result<PatchOutcome> {
    if buffer.len() % BLOCK_LEN != 0 {
        return Err(Error::malformed(format!(
            "buffer of {} bytes is not padded to whole blocks",
            buffer.len()
        )));
    }

    let value = ExponentBytes::new(exponent);
    let loc = locate_exponent(buffer)?;
    let field_len = loc.exponent.declared_length.max(value.len());
    let grown_by = field_len - loc.exponent.declared_length;
    let total_len = loc.total_len + grown_by;

    if total_len + PADDING_OVERHEAD > buffer.len() {
        return Err(Error::capacity(format!(
            "{} content bytes leave no room for padding in {} bytes",
            total_len,
            buffer.len()
        )));
    }

    let new_sequence_len = loc.sequence_length.value + grown_by;
    if grown_by > 0 {
        check_in_place(&loc.exponent_length, field_len, "exponent")?;
        check_in_place(&loc.sequence_length, new_sequence_len, "SEQUENCE")?;
    }

    // nothing below can fail
    if grown_by > 0 {
        write_length(buffer, &loc.exponent_length, field_len);
        write_length(buffer, &loc.sequence_length, new_sequence_len);
    }
    let span = FieldSpan {
        declared_length: field_len,
        ..loc.exponent
    };
    write_right_justified(&mut buffer[span.offset..span.end()], value.as_slice());
    write_padding(buffer, total_len);

    Ok(PatchOutcome {
        exponent: span,
        total_len,
        grown_by,
    })
}

/// Whether `field` can be rewritten in place to hold `new_value`
fn check_in_place(field: &LengthField, new_value: usize, what: &str) -> Result<()> {
    if field.is_short_form() {
        if new_value > SHORT_FORM_MAX {
            return Err(Error::encoding(format!(
                "{} length {} needs the long form, its prefix has one byte",
                what, new_value
            )));
        }
        return Ok(());
    }
    let value_bytes = field.width - 1;
    if value_bytes < std::mem::size_of::<usize>() && new_value >> (8 * value_bytes) != 0 {
        return Err(Error::encoding(format!(
            "{} length {} does not fit in {} length bytes",
            what, new_value, value_bytes
        )));
    }
    Ok(())
}

fn write_length(buffer: &mut [u8], field: &LengthField, value: usize) {
    if field.is_short_form() {
        buffer[field.offset] = value as u8;
        return;
    }
    let value_bytes = field.width - 1;
    for i in 0..value_bytes {
        buffer[field.offset + 1 + i] = (value >> (8 * (value_bytes - 1 - i))) as u8;
    }
}

fn write_right_justified(field: &mut [u8], value: &[u8]) {
    let pad = field.len() - value.len();
    field[..pad].fill(0);
    field[pad..].copy_from_slice(value);
}

/// Write an exponent field into a byte slice whose lengths are already final
///
/// `byte_index` addresses the first byte of the `field_len`-byte field. The
/// value is right-justified behind zero bytes; no length or padding is touched.
pub fn patch_field(
    bytes: &mut [u8],
    byte_index: usize,
    field_len: usize,
    value: &ExponentBytes,
) -> Result<()> {
    if value.len() > field_len {
        return Err(Error::capacity(format!(
            "{}-byte exponent does not fit a {}-byte field",
            value.len(),
            field_len
        )));
    }
    let field = bytes.get_mut(byte_index..byte_index + field_len).ok_or_else(|| {
        Error::capacity(format!(
            "field of {} bytes at {} is past the buffer",
            field_len, byte_index
        ))
    })?;
    write_right_justified(field, value.as_slice());
    Ok(())
}

/// Write an exponent field straight into word blocks
///
/// `byte_index` addresses the first byte of the `field_len`-byte field,
/// counting from the start of `blocks`; the field may straddle a block
/// boundary. The value is right-justified behind zero bytes.
pub fn patch_block_words(
    blocks: &mut [BlockWords],
    byte_index: usize,
    field_len: usize,
    value: &ExponentBytes,
) -> Result<()> {
    if value.len() > field_len {
        return Err(Error::capacity(format!(
            "{}-byte exponent does not fit a {}-byte field",
            value.len(),
            field_len
        )));
    }
    let end = byte_index + field_len;
    if end > blocks.len() * BLOCK_LEN {
        return Err(Error::capacity(format!(
            "field ending at byte {} is past {} blocks",
            end,
            blocks.len()
        )));
    }

    let pad = field_len - value.len();
    for i in 0..field_len {
        let byte = if i < pad { 0 } else { value.as_slice()[i - pad] };
        let at = byte_index + i;
        let word = &mut blocks[at / BLOCK_LEN][(at % BLOCK_LEN) / 4];
        let shift = 8 * (3 - at % 4);
        *word = (*word & !(0xFF << shift)) | ((byte as u32) << shift);
    }
    Ok(())
}

impl MessageBuffer {
    /// [`apply_exponent`] on an owned message, keeping its bookkeeping in step
    pub fn apply_exponent(&mut self, exponent: u64) -> Result<PatchOutcome> {
        let outcome = apply_exponent(self.as_mut_bytes(), exponent)?;
        self.sync_content_len(outcome.total_len);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::der::tests::sample_der;
    use crate::sha1::{sha1_padded, split_blocks, words_to_block};

    fn sample() -> MessageBuffer {
        MessageBuffer::from_der(&sample_der())
    }

    fn trailer_bits(buffer: &[u8]) -> u64 {
        let mut t = [0u8; 8];
        t.copy_from_slice(&buffer[buffer.len() - 8..]);
        u64::from_be_bytes(t)
    }

    #[test]
    fn exponent_bytes_encoding() {
        assert_eq!(ExponentBytes::new(0).as_slice(), &[0x00]);
        assert_eq!(ExponentBytes::new(3).as_slice(), &[0x03]);
        assert_eq!(ExponentBytes::new(0x80).as_slice(), &[0x00, 0x80]);
        assert_eq!(ExponentBytes::new(0x010001).as_slice(), &[0x01, 0x00, 0x01]);
        assert_eq!(ExponentBytes::new(0x8000_0000).as_slice(), &[0x00, 0x80, 0, 0, 0]);
        let max = ExponentBytes::new(u64::MAX);
        assert_eq!(max.len(), 9);
        assert_eq!(max.as_slice()[0], 0);
        assert!(max.as_slice()[1..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn same_length_patch_is_idempotent() {
        let mut once = sample();
        once.apply_exponent(0x01000d).unwrap();
        let mut twice = once.clone();
        let outcome = twice.apply_exponent(0x01000d).unwrap();
        assert_eq!(once, twice);
        assert_eq!(outcome.grown_by, 0);
        assert_eq!(outcome.total_len, 140);
    }

    #[test]
    fn shrink_and_restore_is_lossless() {
        let mut direct = sample();
        direct.apply_exponent(0x010001).unwrap();

        let mut round = sample();
        round.apply_exponent(0x010001).unwrap();
        round.apply_exponent(0x03).unwrap();
        assert_eq!(&round.as_bytes()[137..140], &[0x00, 0x00, 0x03]);
        round.apply_exponent(0x010001).unwrap();

        assert_eq!(round, direct);
        assert_eq!(direct, sample());
    }

    #[test]
    fn growing_by_one_byte() {
        let mut msg = sample();
        let before = trailer_bits(msg.as_bytes());
        let outcome = msg.apply_exponent(0x7fff_ffff).unwrap();

        assert_eq!(outcome.grown_by, 1);
        assert_eq!(outcome.total_len, 141);
        assert_eq!(msg.content_len(), 141);
        assert_eq!(trailer_bits(msg.as_bytes()), before + 8);
        assert_eq!(msg.as_bytes()[2], 0x8a);
        assert_eq!(msg.as_bytes()[136], 4);
        assert_eq!(&msg.as_bytes()[137..142], &[0x7f, 0xff, 0xff, 0xff, 0x80]);
    }

    #[test]
    fn grown_buffer_matches_canonical_encoding() {
        let mut patched = sample();
        patched.apply_exponent(0x8000_0000).unwrap();

        let mut der = sample_der();
        der[2] += 2;
        der.truncate(136);
        der.extend_from_slice(&[0x05, 0x00, 0x80, 0x00, 0x00, 0x00]);
        assert_eq!(patched, MessageBuffer::from_der(&der));
        assert_eq!(
            sha1_padded(patched.as_bytes()).unwrap().to_hex(),
            "e49bff9c090828c7e9bfa6784e144306303c856d"
        );
    }

    #[test]
    fn growth_past_padding_needs_capacity() {
        // the sample leaves 43 spare bytes, a 9-byte exponent needs 6
        let mut msg = sample();
        assert_eq!(msg.apply_exponent(u64::MAX).unwrap().grown_by, 6);

        // 55 content bytes fill a single block exactly
        let mut der = vec![0x30, 0x35, 0x02, 0x30];
        der.extend(std::iter::repeat(0x11).take(0x30));
        der.extend_from_slice(&[0x02, 0x01, 0x03]);
        let mut full = MessageBuffer::from_der(&der);
        assert_eq!(full.len(), 64);

        let before = full.clone();
        let err = full.apply_exponent(0x0100).unwrap_err();
        assert!(matches!(err, Error::InsufficientCapacity(_)));
        assert_eq!(full, before);

        full.reserve_growth(1);
        assert_eq!(full.apply_exponent(0x0100).unwrap().total_len, 56);
    }

    #[test]
    fn crossing_short_form_boundary_is_rejected() {
        // SEQUENCE length 0x7f in short form cannot grow in place
        let mut der = vec![0x30, 0x7f, 0x02, 0x7a];
        der.extend(std::iter::repeat(0x22).take(0x7a));
        der.extend_from_slice(&[0x02, 0x01, 0x03]);
        let mut msg = MessageBuffer::from_der(&der);
        let before = msg.clone();

        let err = msg.apply_exponent(0x0100).unwrap_err();
        assert!(matches!(err, Error::EncodingConstraintViolation(_)));
        assert_eq!(msg, before);

        // same length still works
        assert!(msg.apply_exponent(0x05).is_ok());
    }

    #[test]
    fn crossing_single_length_byte_is_rejected() {
        // 0x81 0xff cannot become 0x100 without a second length byte
        let mut der = vec![0x30, 0x81, 0xff, 0x02, 0x81, 0xf9];
        der.extend(std::iter::repeat(0x33).take(0xf9));
        der.extend_from_slice(&[0x02, 0x01, 0x03]);
        assert_eq!(der.len(), 3 + 0xff);
        let mut msg = MessageBuffer::from_der(&der);
        let err = msg.apply_exponent(0x0100).unwrap_err();
        assert!(matches!(err, Error::EncodingConstraintViolation(_)));
    }

    #[test]
    fn malformed_buffers_are_reported() {
        let mut msg = sample();
        msg.as_mut_bytes()[2] = 0xff;
        assert!(matches!(msg.apply_exponent(3), Err(Error::MalformedInput(_))));

        let mut odd = vec![0u8; 100];
        assert!(matches!(apply_exponent(&mut odd, 3), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn block_words_match_byte_patch() {
        for exponent in [3u64, 0x0d01, 0x010001, 0x01000d, 0x7f_ffff] {
            let mut msg = sample();
            let outcome = msg.apply_exponent(exponent).unwrap();
            assert_eq!(outcome.grown_by, 0);

            let mut blocks = split_blocks(sample().as_bytes()).unwrap();
            patch_block_words(&mut blocks, 137, 3, &ExponentBytes::new(exponent)).unwrap();
            let flat: Vec<u8> = blocks.iter().flat_map(|b| words_to_block(b)).collect();
            assert_eq!(flat, msg.as_bytes());
        }
    }

    #[test]
    fn field_patch_matches_byte_patch() {
        let tail_start = 2 * BLOCK_LEN;
        for exponent in [3u64, 0x0d01, 0x01000d] {
            let mut msg = sample();
            msg.apply_exponent(exponent).unwrap();

            let mut tail = sample().as_bytes()[tail_start..].to_vec();
            patch_field(&mut tail, 137 - tail_start, 3, &ExponentBytes::new(exponent)).unwrap();
            assert_eq!(tail, &msg.as_bytes()[tail_start..]);
        }
    }

    #[test]
    fn field_patch_rejects_overflow() {
        let mut bytes = [0u8; 8];
        let value = ExponentBytes::new(0x010001);
        assert!(patch_field(&mut bytes, 6, 3, &value).is_err());
        assert!(patch_field(&mut bytes, 0, 2, &value).is_err());
        assert_eq!(bytes, [0u8; 8]);
    }

    #[test]
    fn block_words_straddle_boundary() {
        let mut blocks = vec![[0u32; 16]; 2];
        patch_block_words(&mut blocks, 62, 4, &ExponentBytes::new(0x0102_0304)).unwrap();
        assert_eq!(blocks[0][15], 0x0000_0102);
        assert_eq!(blocks[1][0], 0x0304_0000);
    }

    #[test]
    fn block_words_reject_overflow() {
        let mut blocks = vec![[0u32; 16]; 1];
        let value = ExponentBytes::new(0x010001);
        assert!(patch_block_words(&mut blocks, 62, 3, &value).is_err());
        assert!(patch_block_words(&mut blocks, 0, 2, &value).is_err());
    }
}
