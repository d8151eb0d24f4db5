//! Per-trial driver resuming SHA-1 from a cached checkpoint
//!
//! A [`SearchKey`] prepares one [`KeyTemplate`] per encoded exponent length.
//! The exponent length feeds the SEQUENCE length in the first block, so every
//! length gets its own checkpoint: the hash state after the blocks that
//! precede the one holding the exponent. Every candidate is hashed in its
//! minimal DER encoding, the form Tor derives the address from. Templates are
//! immutable and shared between workers.
//!
//! A [`TrialDriver`] owns the scratch blocks of one worker and walks
//! `Idle -> Checkpointed -> Evaluated -> Idle` for each candidate. Only the
//! blocks from the checkpoint on are recompressed.

use tracing::debug;

use crate::der::{encode_public_key, integer_len, locate_exponent, FieldSpan};
use crate::error::{Error, Result};
use crate::message::MessageBuffer;
use crate::onion::Identifier;
use crate::patch::{patch_block_words, patch_field, ExponentBytes, MAX_EXPONENT_LEN};
use crate::pattern::TargetSet;
use crate::sha1::{
    block_to_words, sha1_padded, split_blocks, BlockHasher, BlockWords, Digest, HashState,
    BLOCK_LEN,
};

/// Shortest DER INTEGER, a single byte
const SHORTEST_FIELD: usize = 1;

/// How a trial writes its exponent into the scratch blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchMode {
    /// Patch the padded DER bytes, then split the tail into words
    #[default]
    Der,
    /// Mask the exponent bytes straight into pre-split words
    BlockWords,
}

/// A padded key laid out for one exponent field length
#[derive(Debug, Clone)]
pub struct KeyTemplate {
    message: MessageBuffer,
    exponent: FieldSpan,
    checkpoint: HashState,
    checkpoint_block: usize,
    tail: Vec<BlockWords>,
}

impl KeyTemplate {
    fn build(base: &MessageBuffer, field_len: usize) -> Result<Self> {
        let loc = locate_exponent(base.as_bytes())?;
        let smallest = smallest_with_len(field_len);
        let mut message = if field_len < loc.exponent.declared_length {
            // the field never shrinks in place, so re-encode around the modulus
            let modulus = &base.as_bytes()[loc.modulus.offset..loc.modulus.end()];
            MessageBuffer::from_der(&encode_public_key(
                modulus,
                ExponentBytes::new(smallest).as_slice(),
            ))
        } else {
            let mut grown = base.clone();
            grown.reserve_growth(field_len - loc.exponent.declared_length);
            grown
        };
        let outcome = message.apply_exponent(smallest)?;

        let checkpoint_block = outcome.exponent.offset / BLOCK_LEN;
        let blocks = split_blocks(message.as_bytes())?;
        let mut hasher = BlockHasher::new();
        for block in &blocks[..checkpoint_block] {
            hasher.update_words(block);
        }

        Ok(Self {
            exponent: outcome.exponent,
            checkpoint: hasher.checkpoint(),
            checkpoint_block,
            tail: blocks[checkpoint_block..].to_vec(),
            message,
        })
    }

    /// Bytes in the exponent field
    pub fn field_len(&self) -> usize {
        self.exponent.declared_length
    }

    pub fn exponent_span(&self) -> FieldSpan {
        self.exponent
    }

    pub fn message(&self) -> &MessageBuffer {
        &self.message
    }

    /// Hash state after every block before the exponent's block
    pub fn checkpoint(&self) -> HashState {
        self.checkpoint
    }

    /// Index of the first block recompressed per trial
    pub fn checkpoint_block(&self) -> usize {
        self.checkpoint_block
    }

    pub fn tail_blocks(&self) -> usize {
        self.tail.len()
    }

    /// Padded bytes from the checkpoint block on
    fn tail_bytes(&self) -> &[u8] {
        &self.message.as_bytes()[self.checkpoint_block * BLOCK_LEN..]
    }

    /// Exponent offset counted from the start of the tail
    fn tail_offset(&self) -> usize {
        self.exponent.offset - self.checkpoint_block * BLOCK_LEN
    }
}

/// Smallest value whose DER INTEGER encoding is `len` bytes
fn smallest_with_len(len: usize) -> u64 {
    match len {
        0 | 1 => 0,
        _ => 0x80u64 << (8 * (len - 2)),
    }
}

/// A key prepared for searching exponents up to a maximum
///
/// Holds one template for every encoded exponent length from a single byte
/// up to the longer of the key's own field and the maximum exponent.
#[derive(Debug, Clone)]
pub struct SearchKey {
    base_len: usize,
    templates: Vec<Result<KeyTemplate>>,
}

impl SearchKey {
    /// Prepare a raw DER key
    pub fn new(der: &[u8], max_exponent: u64) -> Result<Self> {
        Self::from_message(MessageBuffer::from_der(der), max_exponent)
    }

    /// Prepare an already padded key
    ///
    /// Lengths the key cannot grow to in place keep their error, which is
    /// returned for every candidate of that length.
    pub fn from_message(message: MessageBuffer, max_exponent: u64) -> Result<Self> {
        let base_len = locate_exponent(message.as_bytes())?.exponent.declared_length;
        if base_len > MAX_EXPONENT_LEN {
            return Err(Error::capacity(format!(
                "{}-byte exponent field is wider than any u64 exponent",
                base_len
            )));
        }
        let top_len = base_len.max(integer_len(max_exponent));

        let templates: Vec<_> = (SHORTEST_FIELD..=top_len)
            .map(|len| {
                let template = KeyTemplate::build(&message, len);
                match &template {
                    Ok(t) => debug!(
                        field_len = len,
                        checkpoint_block = t.checkpoint_block,
                        tail_blocks = t.tail.len(),
                        "prepared key template"
                    ),
                    Err(e) => debug!(field_len = len, error = %e, "exponent length unusable"),
                }
                template
            })
            .collect();

        // the key's own length needs no re-encoding, so it must work
        if let Some(Err(e)) = templates.get(base_len - SHORTEST_FIELD) {
            return Err(e.clone());
        }
        Ok(Self { base_len, templates })
    }

    /// Exponent field length of the key as given
    pub fn base_field_len(&self) -> usize {
        self.base_len
    }

    /// Template whose field is the minimal encoding of `exponent`
    pub fn template_for(&self, exponent: u64) -> Result<&KeyTemplate> {
        match self.templates.get(integer_len(exponent) - SHORTEST_FIELD) {
            Some(Ok(template)) => Ok(template),
            Some(Err(e)) => Err(e.clone()),
            None => Err(Error::capacity(format!(
                "exponent {:#x} is above the prepared range",
                exponent
            ))),
        }
    }

    pub fn templates(&self) -> impl Iterator<Item = &KeyTemplate> {
        self.templates.iter().filter_map(|t| t.as_ref().ok())
    }

    /// Padded key carrying `exponent`
    pub fn message_for(&self, exponent: u64) -> Result<MessageBuffer> {
        let mut message = self.template_for(exponent)?.message.clone();
        message.apply_exponent(exponent)?;
        Ok(message)
    }

    /// Hash the whole key from the initialization vector
    ///
    /// Slow path, used to confirm matches found from a checkpoint.
    pub fn full_rehash(&self, exponent: u64) -> Result<Digest> {
        sha1_padded(self.message_for(exponent)?.as_bytes())
    }
}

/// Result of one evaluated candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialOutcome {
    pub exponent: u64,
    pub digest: Digest,
    pub identifier: Identifier,
    /// Index of the first target matched
    pub matched: Option<usize>,
}

impl TrialOutcome {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrialState {
    Idle,
    Checkpointed { template: usize, exponent: u64 },
    Evaluated(TrialOutcome),
}

impl TrialState {
    fn name(&self) -> &'static str {
        match self {
            TrialState::Idle => "idle",
            TrialState::Checkpointed { .. } => "checkpointed",
            TrialState::Evaluated(_) => "evaluated",
        }
    }
}

/// Single-worker trial state machine over a shared [`SearchKey`]
#[derive(Debug)]
pub struct TrialDriver<'k> {
    key: &'k SearchKey,
    mode: PatchMode,
    state: TrialState,
    scratch_bytes: Vec<u8>,
    scratch_words: Vec<BlockWords>,
}

impl<'k> TrialDriver<'k> {
    pub fn new(key: &'k SearchKey) -> Self {
        Self::with_mode(key, PatchMode::default())
    }

    pub fn with_mode(key: &'k SearchKey, mode: PatchMode) -> Self {
        Self {
            key,
            mode,
            state: TrialState::Idle,
            scratch_bytes: Vec::new(),
            scratch_words: Vec::new(),
        }
    }

    pub fn mode(&self) -> PatchMode {
        self.mode
    }

    pub fn is_idle(&self) -> bool {
        self.state == TrialState::Idle
    }

    /// `Idle -> Checkpointed`: pick the template and load its tail
    pub fn checkpoint(&mut self, exponent: u64) -> Result<()> {
        self.expect(|s| matches!(s, TrialState::Idle), "idle")?;
        let key = self.key;
        let template = key.template_for(exponent)?;
        match self.mode {
            PatchMode::Der => {
                self.scratch_bytes.clear();
                self.scratch_bytes.extend_from_slice(template.tail_bytes());
            }
            PatchMode::BlockWords => {
                self.scratch_words.clear();
                self.scratch_words.extend_from_slice(&template.tail);
            }
        }
        self.state = TrialState::Checkpointed {
            template: template.field_len() - SHORTEST_FIELD,
            exponent,
        };
        Ok(())
    }

    /// `Checkpointed -> Evaluated`: patch, compress the tail and test
    ///
    /// A failed patch drops the candidate and returns to `Idle`.
    pub fn evaluate(&mut self, targets: &TargetSet) -> Result<TrialOutcome> {
        let (index, exponent) = match self.state {
            TrialState::Checkpointed { template, exponent } => (template, exponent),
            other => {
                return Err(Error::TrialState {
                    expected: "checkpointed",
                    actual: other.name(),
                })
            }
        };
        let key = self.key;
        let template = match key.templates.get(index) {
            Some(Ok(t)) => t,
            _ => {
                self.state = TrialState::Idle;
                return Err(Error::capacity("template vanished between checkpoint and evaluation"));
            }
        };

        let state = match self.compress_tail(template, exponent) {
            Ok(state) => state,
            Err(e) => {
                self.state = TrialState::Idle;
                return Err(e);
            }
        };

        let digest = state.to_digest();
        let identifier = match Identifier::from_digest(&digest) {
            Ok(id) => id,
            Err(e) => {
                self.state = TrialState::Idle;
                return Err(e);
            }
        };
        let outcome = TrialOutcome {
            exponent,
            digest,
            identifier,
            matched: targets.first_match(&state),
        };
        self.state = TrialState::Evaluated(outcome);
        Ok(outcome)
    }

    fn compress_tail(&mut self, template: &KeyTemplate, exponent: u64) -> Result<HashState> {
        let mut hasher = BlockHasher::resume(template.checkpoint, template.checkpoint_block);
        match self.mode {
            PatchMode::Der => {
                patch_field(
                    &mut self.scratch_bytes,
                    template.tail_offset(),
                    template.field_len(),
                    &ExponentBytes::new(exponent),
                )?;
                for chunk in self.scratch_bytes.chunks_exact(BLOCK_LEN) {
                    let mut block = [0u8; BLOCK_LEN];
                    block.copy_from_slice(chunk);
                    hasher.update_words(&block_to_words(&block));
                }
            }
            PatchMode::BlockWords => {
                patch_block_words(
                    &mut self.scratch_words,
                    template.tail_offset(),
                    template.field_len(),
                    &ExponentBytes::new(exponent),
                )?;
                for block in &self.scratch_words {
                    hasher.update_words(block);
                }
            }
        }
        Ok(hasher.checkpoint())
    }

    /// `Evaluated -> Idle`: hand back the outcome
    pub fn finish(&mut self) -> Result<TrialOutcome> {
        match self.state {
            TrialState::Evaluated(outcome) => {
                self.state = TrialState::Idle;
                Ok(outcome)
            }
            other => Err(Error::TrialState {
                expected: "evaluated",
                actual: other.name(),
            }),
        }
    }

    /// Abandon the current trial
    pub fn reset(&mut self) {
        self.state = TrialState::Idle;
    }

    /// One full trial
    pub fn run(&mut self, exponent: u64, targets: &TargetSet) -> Result<TrialOutcome> {
        self.checkpoint(exponent)?;
        self.evaluate(targets)?;
        self.finish()
    }

    fn expect(&self, ok: impl Fn(&TrialState) -> bool, expected: &'static str) -> Result<()> {
        if ok(&self.state) {
            Ok(())
        } else {
            Err(Error::TrialState {
                expected,
                actual: self.state.name(),
            })
        }
    }
}
