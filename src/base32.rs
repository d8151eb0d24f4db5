//! Base32 encoding in the onion address alphabet
//!
//! Encoding is hand-written so the search loop can write into a fixed stack
//! buffer; decoding is only needed for pattern parsing and verification and
//! goes through the `base32` crate.

use crate::error::{Error, Result};

/// The 32-symbol alphabet of onion addresses (RFC 4648, lowercase)
pub const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Number of symbols produced for `src_len` source bytes
pub const fn encoded_len(src_len: usize) -> usize {
    src_len * 8 / 5
}

/// Encode `src` into `dest`, returning the number of symbols written
///
/// `src` is read as a contiguous bitstream, most significant bit first.
/// `dest` must hold at least `nbits / 5 + 1` bytes, mirroring the
/// NUL-terminated buffers of the classic implementation; the extra byte is
/// left untouched.
pub fn encode_into(dest: &mut [u8], src: &[u8]) -> Result<usize> {
    let nbits = src.len() * 8;
    if nbits % 5 != 0 {
        return Err(Error::encoding(format!(
            "{} source bits is not a multiple of 5",
            nbits
        )));
    }
    if dest.len() < nbits / 5 + 1 {
        return Err(Error::capacity(format!(
            "base32 destination holds {} bytes, {} needed",
            dest.len(),
            nbits / 5 + 1
        )));
    }

    let mut written = 0;
    for bit in (0..nbits).step_by(5) {
        let byte = bit / 8;
        let mut v = (src[byte] as u16) << 8;
        if bit + 5 < nbits {
            v |= src[byte + 1] as u16;
        }
        let symbol = (v >> (11 - (bit % 8))) & 0x1F;
        dest[written] = ALPHABET[symbol as usize];
        written += 1;
    }
    Ok(written)
}

/// Allocating form of [`encode_into`]
pub fn encode(src: &[u8]) -> Result<String> {
    let mut dest = vec![0u8; encoded_len(src.len()) + 1];
    let n = encode_into(&mut dest, src)?;
    dest.truncate(n);
    // every byte came from ALPHABET
    Ok(dest.into_iter().map(char::from).collect())
}

/// Decode a lowercase base32 string without padding
pub fn decode(s: &str) -> Result<Vec<u8>> {
    ::base32::decode(::base32::Alphabet::Rfc4648Lower { padding: false }, s)
        .ok_or_else(|| Error::InvalidPattern(format!("'{}' is not valid base32", s)))
}

/// Whether `c` belongs to [`ALPHABET`]
pub fn is_symbol(c: u8) -> bool {
    matches!(c, b'a'..=b'z' | b'2'..=b'7')
}
