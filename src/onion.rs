//! Tor v2 onion identifiers
//!
//! The identifier is the base32 encoding of the first 80 bits of the SHA-1
//! digest of the DER public key: 16 symbols, shown with a `.onion` suffix.

use std::fmt;

use crate::base32::encode_into;
use crate::error::Result;
use crate::sha1::Digest;

/// Symbols in an identifier
pub const IDENTIFIER_LEN: usize = 16;

/// Digest bytes covered by an identifier
pub const IDENTIFIER_BYTES: usize = 10;

/// A 16-symbol identifier, always drawn from the onion alphabet
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier([u8; IDENTIFIER_LEN]);

impl Identifier {
    pub fn from_digest(digest: &Digest) -> Result<Self> {
        // one spare slot for the encoder's terminator
        let mut buf = [0u8; IDENTIFIER_LEN + 1];
        encode_into(&mut buf, &digest.as_bytes()[..IDENTIFIER_BYTES])?;
        let mut symbols = [0u8; IDENTIFIER_LEN];
        symbols.copy_from_slice(&buf[..IDENTIFIER_LEN]);
        Ok(Self(symbols))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("identifier symbols are ASCII")
    }

    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LEN] {
        &self.0
    }

    /// Full hostname, `<identifier>.onion`
    pub fn onion_address(&self) -> String {
        format!("{}.onion", self.as_str())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.as_str())
    }
}
