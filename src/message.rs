//! Padded key buffer fed to the block engine

use crate::error::{Error, Result};
use crate::sha1::BLOCK_LEN;

/// Bytes taken by the `0x80` boundary marker and the bit-length trailer
pub const PADDING_OVERHEAD: usize = 1 + TRAILER_LEN;

/// Size of the big-endian bit-length trailer
pub const TRAILER_LEN: usize = 8;

/// Smallest padded length able to hold `content_len` bytes
pub const fn padded_len(content_len: usize) -> usize {
    (content_len + PADDING_OVERHEAD).div_ceil(BLOCK_LEN) * BLOCK_LEN
}

/// A DER key followed by SHA-1 padding
///
/// The length is always a whole number of blocks, the byte after the content
/// is `0x80` and the last eight bytes hold the content length in bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBuffer {
    bytes: Vec<u8>,
    content_len: usize,
}

impl MessageBuffer {
    /// Pad raw DER bytes
    pub fn from_der(der: &[u8]) -> Self {
        Self::with_slack(der, 0)
    }

    /// Pad raw DER bytes, leaving room for the content to grow by `slack` bytes
    pub fn with_slack(der: &[u8], slack: usize) -> Self {
        let mut bytes = vec![0u8; padded_len(der.len() + slack)];
        bytes[..der.len()].copy_from_slice(der);
        let mut msg = Self {
            bytes,
            content_len: der.len(),
        };
        msg.write_padding(der.len());
        msg
    }

    /// Adopt a buffer that already carries padding
    ///
    /// The content length is recovered from the trailer; the boundary byte
    /// and the zero fill are checked.
    pub fn from_padded(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() || bytes.len() % BLOCK_LEN != 0 {
            return Err(Error::malformed(format!(
                "padded message of {} bytes is not a whole number of blocks",
                bytes.len()
            )));
        }
        let trailer_at = bytes.len() - TRAILER_LEN;
        let mut trailer = [0u8; TRAILER_LEN];
        trailer.copy_from_slice(&bytes[trailer_at..]);
        let bits = u64::from_be_bytes(trailer);
        if bits % 8 != 0 {
            return Err(Error::malformed(format!("trailer of {} bits is not whole bytes", bits)));
        }
        let content_len = usize::try_from(bits / 8)
            .map_err(|_| Error::malformed("trailer length does not fit in memory"))?;
        if content_len + PADDING_OVERHEAD > bytes.len() {
            return Err(Error::malformed(format!(
                "trailer claims {} content bytes in a {}-byte message",
                content_len,
                bytes.len()
            )));
        }
        if bytes[content_len] != 0x80
            || bytes[content_len + 1..trailer_at].iter().any(|&b| b != 0)
        {
            return Err(Error::malformed("padding is not 0x80 followed by zeros"));
        }
        Ok(Self { bytes, content_len })
    }

    /// Rewrite boundary byte, zero fill and trailer for `content_len` bytes
    ///
    /// Callers must have checked that `content_len + PADDING_OVERHEAD` fits.
    pub(crate) fn write_padding(&mut self, content_len: usize) {
        write_padding(&mut self.bytes, content_len);
        self.content_len = content_len;
    }

    /// Make sure the content can grow by `extra` bytes without losing padding
    ///
    /// Appends zero blocks when needed and moves the trailer to the new end.
    pub fn reserve_growth(&mut self, extra: usize) {
        let needed = padded_len(self.content_len + extra);
        if needed > self.bytes.len() {
            self.bytes.resize(needed, 0);
            let content_len = self.content_len;
            self.write_padding(content_len);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// The DER bytes without padding
    pub fn der(&self) -> &[u8] {
        &self.bytes[..self.content_len]
    }

    pub fn content_len(&self) -> usize {
        self.content_len
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.bytes.len() / BLOCK_LEN
    }

    /// Record the content length after an in-place patch
    pub(crate) fn sync_content_len(&mut self, content_len: usize) {
        self.content_len = content_len;
    }
}

/// Padding writer shared with the exponent patcher
pub(crate) fn write_padding(bytes: &mut [u8], content_len: usize) {
    let trailer_at = bytes.len() - TRAILER_LEN;
    bytes[content_len] = 0x80;
    bytes[content_len + 1..trailer_at].fill(0);
    let bits = (content_len as u64) * 8;
    bytes[trailer_at..].copy_from_slice(&bits.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_block_boundary() {
        assert_eq!(padded_len(0), 64);
        assert_eq!(padded_len(55), 64);
        assert_eq!(padded_len(56), 128);
        assert_eq!(padded_len(140), 192);
    }

    #[test]
    fn padding_layout() {
        let msg = MessageBuffer::from_der(&[0xaa; 140]);
        let bytes = msg.as_bytes();
        assert_eq!(bytes.len(), 192);
        assert_eq!(bytes[140], 0x80);
        assert!(bytes[141..184].iter().all(|&b| b == 0));
        assert_eq!(&bytes[184..], &[0, 0, 0, 0, 0, 0, 0x04, 0x60]);
        assert_eq!(msg.der(), &[0xaa; 140][..]);
        assert_eq!(msg.block_count(), 3);
    }

    #[test]
    fn from_padded_recovers_content() {
        let msg = MessageBuffer::from_der(b"hello");
        let again = MessageBuffer::from_padded(msg.as_bytes().to_vec()).unwrap();
        assert_eq!(again, msg);
    }

    #[test]
    fn from_padded_rejects_bad_trailers() {
        assert!(MessageBuffer::from_padded(vec![0u8; 63]).is_err());

        let mut bytes = MessageBuffer::from_der(b"hello").as_bytes().to_vec();
        bytes[63] = 0xff;
        assert!(matches!(
            MessageBuffer::from_padded(bytes),
            Err(Error::MalformedInput(_))
        ));

        let mut bytes = MessageBuffer::from_der(b"hello").as_bytes().to_vec();
        bytes[5] = 0x00;
        assert!(MessageBuffer::from_padded(bytes).is_err());
    }

    #[test]
    fn reserve_growth_appends_a_block() {
        let mut msg = MessageBuffer::from_der(&[1u8; 55]);
        assert_eq!(msg.len(), 64);
        msg.reserve_growth(0);
        assert_eq!(msg.len(), 64);
        msg.reserve_growth(1);
        assert_eq!(msg.len(), 128);
        assert_eq!(msg.content_len(), 55);
        assert_eq!(msg.as_bytes()[55], 0x80);
        assert_eq!(&msg.as_bytes()[120..], &(55u64 * 8).to_be_bytes());
    }
}
