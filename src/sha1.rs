//! SHA-1 block engine with resumable midstates
//!
//! [`compress`] is the bare 64-byte compression step. [`BlockHasher`] drives it
//! over whole blocks and can start either from the standard initialization
//! vector or from any [`HashState`] captured after a whole number of blocks.

use crate::error::{Error, Result};

/// Size of one compression block in bytes
pub const BLOCK_LEN: usize = 64;

/// Size of the SHA-1 output in bytes
pub const DIGEST_LEN: usize = 20;

/// Standard SHA-1 initialization vector
pub const IV: [u32; 5] = [0x6745_2301, 0xEFCD_AB89, 0x98BA_DCFE, 0x1032_5476, 0xC3D2_E1F0];

const K: [u32; 4] = [0x5A82_7999, 0x6ED9_EBA1, 0x8F1B_BCDC, 0xCA62_C1D6];

/// One 64-byte block as 16 big-endian words
pub type BlockWords = [u32; 16];

/// Running chained state of the hash, five 32-bit words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashState(pub [u32; 5]);

impl Default for HashState {
    fn default() -> Self {
        HashState(IV)
    }
}

impl HashState {
    /// Big-endian serialization of the state, i.e. the digest
    pub fn to_digest(&self) -> Digest {
        let mut out = [0u8; DIGEST_LEN];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        Digest(out)
    }

    /// Inverse of [`HashState::to_digest`]
    pub fn from_digest(digest: &Digest) -> Self {
        let mut words = [0u32; 5];
        for (word, chunk) in words.iter_mut().zip(digest.0.chunks_exact(4)) {
            *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        HashState(words)
    }
}

/// Final 160-bit hash value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Run one compression step over `block`, chaining from `state`
///
/// The 80-word schedule lives on the stack and is dropped on return.
pub fn compress(block: &BlockWords, state: HashState) -> HashState {
    let mut w = [0u32; 80];
    w[..16].copy_from_slice(block);
    for i in 16..80 {
        w[i] = (w[i - 3] ^ w[i - 8] ^ w[i - 14] ^ w[i - 16]).rotate_left(1);
    }

    let [mut a, mut b, mut c, mut d, mut e] = state.0;
    for (i, wi) in w.iter().enumerate() {
        let (f, k) = match i {
            0..=19 => ((b & c) | (!b & d), K[0]),
            20..=39 => (b ^ c ^ d, K[1]),
            40..=59 => ((b & c) | (b & d) | (c & d), K[2]),
            _ => (b ^ c ^ d, K[3]),
        };
        let temp = a
            .rotate_left(5)
            .wrapping_add(f)
            .wrapping_add(e)
            .wrapping_add(*wi)
            .wrapping_add(k);
        e = d;
        d = c;
        c = b.rotate_left(30);
        b = a;
        a = temp;
    }

    let [h0, h1, h2, h3, h4] = state.0;
    HashState([
        h0.wrapping_add(a),
        h1.wrapping_add(b),
        h2.wrapping_add(c),
        h3.wrapping_add(d),
        h4.wrapping_add(e),
    ])
}

/// Read a 64-byte block as big-endian words
pub fn block_to_words(block: &[u8; BLOCK_LEN]) -> BlockWords {
    let mut words = [0u32; 16];
    for (word, chunk) in words.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

/// Inverse of [`block_to_words`]
pub fn words_to_block(words: &BlockWords) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    for (chunk, word) in block.chunks_exact_mut(4).zip(words.iter()) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    block
}

/// Split an already padded byte buffer into word blocks
pub fn split_blocks(padded: &[u8]) -> Result<Vec<BlockWords>> {
    if padded.len() % BLOCK_LEN != 0 {
        return Err(Error::malformed(format!(
            "{} bytes is not a whole number of {}-byte blocks",
            padded.len(),
            BLOCK_LEN
        )));
    }
    Ok(padded
        .chunks_exact(BLOCK_LEN)
        .map(|chunk| {
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(chunk);
            block_to_words(&block)
        })
        .collect())
}

/// Multi-block driver over [`compress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHasher {
    state: HashState,
    blocks: usize,
}

impl Default for BlockHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockHasher {
    /// Start from the standard initialization vector
    pub fn new() -> Self {
        Self::resume(HashState::default(), 0)
    }

    /// Continue from a state captured after `blocks` whole blocks
    pub fn resume(state: HashState, blocks: usize) -> Self {
        Self { state, blocks }
    }

    pub fn update_words(&mut self, block: &BlockWords) {
        self.state = compress(block, self.state);
        self.blocks += 1;
    }

    pub fn update_block(&mut self, block: &[u8; BLOCK_LEN]) {
        self.update_words(&block_to_words(block));
    }

    /// Absorb a run of whole blocks
    pub fn update(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() % BLOCK_LEN != 0 {
            return Err(Error::malformed(format!(
                "{} bytes is not a whole number of {}-byte blocks",
                bytes.len(),
                BLOCK_LEN
            )));
        }
        for chunk in bytes.chunks_exact(BLOCK_LEN) {
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(chunk);
            self.update_block(&block);
        }
        Ok(())
    }

    /// Current chained state, usable as a resume point
    pub fn checkpoint(&self) -> HashState {
        self.state
    }

    /// Number of blocks absorbed since the initialization vector
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    pub fn finalize(self) -> Digest {
        self.state.to_digest()
    }
}

/// Hash a buffer that already carries SHA-1 padding
pub fn sha1_padded(padded: &[u8]) -> Result<Digest> {
    let mut hasher = BlockHasher::new();
    hasher.update(padded)?;
    Ok(hasher.finalize())
}
