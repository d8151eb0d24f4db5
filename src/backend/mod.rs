//! Search backends
//!
//! A backend walks the odd exponents of an [`ExponentRange`], runs a trial for
//! each against a shared [`SearchKey`](crate::trial::SearchKey) and reports
//! progress and matches over channels.

mod cpu;

use tracing::info;

use crate::error::{Error, Result};
use crate::message::MessageBuffer;
use crate::onion::Identifier;
use crate::trial::PatchMode;

pub use cpu::CpuBackend;

/// Smallest exponent searched by default
pub const EXP_MIN: u64 = 0x10001;

/// Largest exponent searched by default
pub const EXP_MAX: u64 = 0xFF_FFFF_FFFF;

/// Inclusive range of public exponents, walked over its odd members
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentRange {
    first: u64,
    last: u64,
}

impl ExponentRange {
    pub fn new(min: u64, max: u64) -> Result<Self> {
        if min < 3 {
            return Err(Error::InvalidRange(format!(
                "minimum exponent {:#x} is below 3",
                min
            )));
        }
        if min > max {
            return Err(Error::InvalidRange(format!(
                "minimum {:#x} is above maximum {:#x}",
                min, max
            )));
        }
        // u64::MAX is odd, so rounding up cannot overflow
        let first = min | 1;
        let last = if max % 2 == 0 { max - 1 } else { max };
        if first > last {
            return Err(Error::InvalidRange(format!(
                "no odd exponent between {:#x} and {:#x}",
                min, max
            )));
        }
        Ok(Self { first, last })
    }

    pub fn first(&self) -> u64 {
        self.first
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    /// Number of odd exponents in the range
    pub fn odd_count(&self) -> u64 {
        (self.last - self.first) / 2 + 1
    }

    /// The `n`th odd exponent, counting from zero
    pub fn nth_odd(&self, n: u64) -> u64 {
        self.first + 2 * n
    }

    pub fn contains(&self, exponent: u64) -> bool {
        exponent % 2 == 1 && (self.first..=self.last).contains(&exponent)
    }
}

impl Default for ExponentRange {
    fn default() -> Self {
        Self {
            first: EXP_MIN,
            last: EXP_MAX,
        }
    }
}

/// Everything a backend needs to run a search
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub key: MessageBuffer,
    pub patterns: Vec<String>,
    pub range: ExponentRange,
    /// Start at a random odd exponent and wrap around
    pub random_start: bool,
    pub mode: PatchMode,
}

impl SearchConfig {
    pub fn new(key: MessageBuffer, patterns: Vec<String>) -> Self {
        Self {
            key,
            patterns,
            range: ExponentRange::default(),
            random_start: false,
            mode: PatchMode::default(),
        }
    }
}

/// Progress update from the generator
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub keys_checked: u64,
    /// Candidates skipped because they could not be encoded
    pub keys_rejected: u64,
    pub keys_per_sec: f64,
    pub elapsed_secs: f64,
}

/// A confirmed match
#[derive(Debug, Clone)]
pub struct FoundKey {
    pub pattern: String,
    pub exponent: u64,
    pub identifier: Identifier,
    /// Public key DER carrying the exponent
    pub der: Vec<u8>,
}

impl FoundKey {
    pub fn onion_address(&self) -> String {
        self.identifier.onion_address()
    }
}

/// Information about a computation backend
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub name: String,
    pub estimated_speed: u64,
}

/// CPU backend with `cpu_threads` workers
pub fn select_backend(cpu_threads: usize) -> CpuBackend {
    let cpu = CpuBackend::with_threads(cpu_threads);
    log_backend_info(&cpu.info());
    cpu
}

fn log_backend_info(info: &BackendInfo) {
    info!(
        backend = %info.name,
        "estimated speed ~{} keys/sec",
        format_speed(info.estimated_speed)
    );
}

/// Format speed for display
pub fn format_speed(speed: u64) -> String {
    if speed >= 1_000_000_000 {
        format!("{:.1}B", speed as f64 / 1_000_000_000.0)
    } else if speed >= 1_000_000 {
        format!("{:.1}M", speed as f64 / 1_000_000.0)
    } else if speed >= 1_000 {
        format!("{:.1}K", speed as f64 / 1_000.0)
    } else {
        format!("{}", speed)
    }
}
