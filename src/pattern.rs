//! Target patterns compiled to bitmasks over the leading digest words
//!
//! A pattern is matched against the 16-symbol identifier without encoding it:
//! each symbol covers five digest bits, so a fixed symbol becomes five mask
//! bits and a wildcard none. Patterns support:
//!
//! - literal symbols from the onion alphabet (`a-z`, `2-7`)
//! - `.` for any symbol
//! - `[abc]` for any one of the listed symbols
//!
//! Character classes expand into one bitmask alternative per combination.

use std::fmt;

use crate::base32::{self, is_symbol};
use crate::error::{Error, Result};
use crate::onion::IDENTIFIER_LEN;
use crate::sha1::HashState;

/// Upper bound on the alternatives one pattern may expand to
pub const MAX_ALTERNATIVES: usize = 1024;

/// Digest words touched by an identifier (80 bits round up to three words)
const MASK_WORDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Any,
    OneOf(Vec<u8>),
}

/// One fully expanded alternative: `state & mask == value`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitmask {
    pub mask: [u32; MASK_WORDS],
    pub value: [u32; MASK_WORDS],
}

impl Bitmask {
    fn from_symbols(symbols: &[u8; IDENTIFIER_LEN]) -> Result<Self> {
        // '7' is all ones, 'a' all zeros
        let mask_str: String = symbols
            .iter()
            .map(|&c| if c == b'.' { 'a' } else { '7' })
            .collect();
        let value_str: String = symbols
            .iter()
            .map(|&c| if c == b'.' { 'a' } else { c as char })
            .collect();
        Ok(Self {
            mask: to_words(&base32::decode(&mask_str)?),
            value: to_words(&base32::decode(&value_str)?),
        })
    }

    #[inline]
    pub fn matches(&self, state: &HashState) -> bool {
        (0..MASK_WORDS).all(|i| state.0[i] & self.mask[i] == self.value[i])
    }
}

fn to_words(bytes: &[u8]) -> [u32; MASK_WORDS] {
    let mut padded = [0u8; MASK_WORDS * 4];
    padded[..bytes.len()].copy_from_slice(bytes);
    let mut words = [0u32; MASK_WORDS];
    for (word, chunk) in words.iter_mut().zip(padded.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

/// A compiled identifier pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPattern {
    source: String,
    fixed_symbols: usize,
    alternatives: Vec<Bitmask>,
}

impl TargetPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let source = pattern.to_lowercase();
        let positions = parse_positions(&source)?;
        if positions.is_empty() {
            return Err(Error::InvalidPattern("empty pattern".to_string()));
        }

        let combinations = positions.iter().try_fold(1usize, |acc, p| match p {
            Position::Any => Some(acc),
            Position::OneOf(set) => acc.checked_mul(set.len()),
        });
        match combinations {
            Some(n) if n <= MAX_ALTERNATIVES => {}
            _ => {
                return Err(Error::InvalidPattern(format!(
                    "'{}' expands to more than {} alternatives",
                    source, MAX_ALTERNATIVES
                )))
            }
        }

        let mut expanded = vec![[b'.'; IDENTIFIER_LEN]];
        for (i, position) in positions.iter().enumerate() {
            if let Position::OneOf(set) = position {
                expanded = expanded
                    .into_iter()
                    .flat_map(|symbols| {
                        set.iter().map(move |&c| {
                            let mut next = symbols;
                            next[i] = c;
                            next
                        })
                    })
                    .collect();
            }
        }

        let alternatives = expanded
            .iter()
            .map(Bitmask::from_symbols)
            .collect::<Result<Vec<_>>>()?;
        let fixed_symbols = positions.iter().filter(|p| **p != Position::Any).count();

        Ok(Self {
            source,
            fixed_symbols,
            alternatives,
        })
    }

    /// The pattern as written, lowercased
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn alternatives(&self) -> &[Bitmask] {
        &self.alternatives
    }

    #[inline]
    pub fn matches(&self, state: &HashState) -> bool {
        self.alternatives.iter().any(|alt| alt.matches(state))
    }

    /// Average number of trials before a random identifier matches
    pub fn expected_trials(&self) -> f64 {
        2f64.powi(5 * self.fixed_symbols as i32) / self.alternatives.len() as f64
    }
}

impl fmt::Display for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_positions(pattern: &str) -> Result<Vec<Position>> {
    let bytes = pattern.as_bytes();
    let mut positions = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let position = match bytes[i] {
            b'.' => Position::Any,
            b'[' => {
                let close = bytes[i..]
                    .iter()
                    .position(|&c| c == b']')
                    .map(|p| i + p)
                    .ok_or_else(|| {
                        Error::InvalidPattern(format!("unclosed '[' in '{}'", pattern))
                    })?;
                let mut set: Vec<u8> = bytes[i + 1..close].to_vec();
                if set.is_empty() {
                    return Err(Error::InvalidPattern(format!("empty class in '{}'", pattern)));
                }
                if let Some(&bad) = set.iter().find(|&&c| !is_symbol(c)) {
                    return Err(Error::InvalidPattern(format!(
                        "'{}' is not an onion symbol in '{}'",
                        bad as char, pattern
                    )));
                }
                set.sort_unstable();
                set.dedup();
                i = close;
                Position::OneOf(set)
            }
            c if is_symbol(c) => Position::OneOf(vec![c]),
            c => {
                return Err(Error::InvalidPattern(format!(
                    "'{}' is not an onion symbol in '{}'",
                    c as char, pattern
                )))
            }
        };
        positions.push(position);
        i += 1;
    }
    if positions.len() > IDENTIFIER_LEN {
        return Err(Error::InvalidPattern(format!(
            "'{}' is longer than {} symbols",
            pattern, IDENTIFIER_LEN
        )));
    }
    Ok(positions)
}

/// Several patterns searched at once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    patterns: Vec<TargetPattern>,
}

impl TargetSet {
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| TargetPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &[TargetPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Index of the first pattern matched by `state`
    #[inline]
    pub fn first_match(&self, state: &HashState) -> Option<usize> {
        self.patterns.iter().position(|p| p.matches(state))
    }
}

impl From<Vec<TargetPattern>> for TargetSet {
    fn from(patterns: Vec<TargetPattern>) -> Self {
        Self { patterns }
    }
}
