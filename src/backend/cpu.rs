//! CPU backend using Rayon for parallel processing

use crossbeam_channel::{Receiver, Sender};
use rand::Rng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pattern::TargetSet;
use crate::sha1::HashState;
use crate::trial::{SearchKey, TrialDriver, TrialOutcome};

use super::{BackendInfo, FoundKey, Progress, SearchConfig};

/// Candidates per parallel batch
const BATCH_SIZE: u64 = 100_000;

/// CPU backend using Rayon for parallel exponent search
#[derive(Debug, Clone)]
pub struct CpuBackend {
    thread_count: usize,
}

impl CpuBackend {
    /// Create a new CPU backend using all available cores
    pub fn new() -> Self {
        Self {
            thread_count: num_cpus::get(),
        }
    }

    /// Create a CPU backend with a specific thread count
    pub fn with_threads(thread_count: usize) -> Self {
        Self {
            thread_count: thread_count.max(1),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Get backend information
    pub fn info(&self) -> BackendInfo {
        BackendInfo {
            name: format!("CPU ({} threads)", self.thread_count),
            // one or two compressions per trial
            estimated_speed: (self.thread_count as u64) * 2_000_000,
        }
    }

    /// Search until every pattern is found, the range runs out or a stop
    /// signal arrives
    ///
    /// Returns [`Error::Stopped`] when interrupted.
    pub fn generate(
        &self,
        config: SearchConfig,
        progress_tx: Sender<Progress>,
        result_tx: Sender<FoundKey>,
        stop_rx: Receiver<()>,
    ) -> Result<()> {
        let targets = TargetSet::parse(&config.patterns)?;
        if targets.is_empty() {
            return Err(Error::InvalidPattern("no patterns given".to_string()));
        }
        let key = SearchKey::from_message(config.key.clone(), config.range.last())?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.thread_count)
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        let range = config.range;
        let total = range.odd_count();
        let start = if config.random_start {
            rand::thread_rng().gen_range(0..total)
        } else {
            0
        };

        // Shared state
        let remaining: Mutex<Vec<usize>> = Mutex::new((0..targets.len()).collect());
        let counter = AtomicU64::new(0);
        let rejected = AtomicU64::new(0);
        let stopped = AtomicBool::new(false);
        let start_time = Instant::now();

        info!(
            patterns = targets.len(),
            first = format_args!("{:#x}", range.nth_odd(start)),
            candidates = total,
            threads = self.thread_count,
            "starting exponent search"
        );

        let mut done = 0u64;
        pool.install(|| {
            while done < total {
                // Check stop signal
                if stop_rx.try_recv().is_ok() {
                    stopped.store(true, Ordering::SeqCst);
                    break;
                }
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                if lock(&remaining).is_empty() {
                    break;
                }

                let offset = start + done;
                let batch = BATCH_SIZE.min(total - done);

                (0..batch).into_par_iter().for_each_init(
                    || TrialDriver::with_mode(&key, config.mode),
                    |driver, i| {
                        if stopped.load(Ordering::Relaxed) {
                            return;
                        }
                        let exponent = range.nth_odd((offset + i) % total);
                        match driver.run(exponent, &targets) {
                            Ok(outcome) if outcome.is_match() => {
                                report_match(&key, &targets, &remaining, &outcome, &result_tx);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                driver.reset();
                                rejected.fetch_add(1, Ordering::Relaxed);
                                if e.is_recoverable() {
                                    debug!(
                                        exponent = format_args!("{:#x}", exponent),
                                        error = %e,
                                        "candidate rejected"
                                    );
                                } else {
                                    warn!(
                                        exponent = format_args!("{:#x}", exponent),
                                        error = %e,
                                        "trial failed"
                                    );
                                }
                            }
                        }
                        counter.fetch_add(1, Ordering::Relaxed);
                    },
                );
                done += batch;

                // Send progress update
                let keys_checked = counter.load(Ordering::Relaxed);
                let elapsed = start_time.elapsed().as_secs_f64();
                let keys_per_sec = if elapsed > 0.0 {
                    keys_checked as f64 / elapsed
                } else {
                    0.0
                };

                let _ = progress_tx.send(Progress {
                    keys_checked,
                    keys_rejected: rejected.load(Ordering::Relaxed),
                    keys_per_sec,
                    elapsed_secs: elapsed,
                });
            }
        });

        if stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }
        let left = lock(&remaining).len();
        if left > 0 {
            info!(
                unmatched = left,
                checked = counter.load(Ordering::Relaxed),
                "exponent range exhausted"
            );
        }
        Ok(())
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Confirm a checkpointed match with a full rehash and report every pattern
/// it satisfies that was still open
fn report_match(
    key: &SearchKey,
    targets: &TargetSet,
    remaining: &Mutex<Vec<usize>>,
    outcome: &TrialOutcome,
    result_tx: &Sender<FoundKey>,
) {
    let exponent = outcome.exponent;
    let message = match key.message_for(exponent) {
        Ok(m) => m,
        Err(e) => {
            warn!(
                exponent = format_args!("{:#x}", exponent),
                error = %e,
                "cannot rebuild matched key"
            );
            return;
        }
    };
    match crate::sha1::sha1_padded(message.as_bytes()) {
        Ok(digest) if digest == outcome.digest => {}
        Ok(digest) => {
            warn!(
                exponent = format_args!("{:#x}", exponent),
                checkpoint = %outcome.digest.to_hex(),
                full = %digest.to_hex(),
                "checkpoint digest disagrees with full hash"
            );
            return;
        }
        Err(e) => {
            warn!(error = %e, "full rehash failed");
            return;
        }
    }

    let state = HashState::from_digest(&outcome.digest);
    let hits: Vec<usize> = {
        let mut remaining = lock(remaining);
        let hits: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| targets.patterns()[i].matches(&state))
            .collect();
        remaining.retain(|i| !hits.contains(i));
        hits
    };

    for i in hits {
        let pattern = targets.patterns()[i].to_string();
        info!(
            pattern = %pattern,
            exponent = format_args!("{:#x}", exponent),
            address = %outcome.identifier.onion_address(),
            "found match"
        );
        let _ = result_tx.send(FoundKey {
            pattern,
            exponent,
            identifier: outcome.identifier,
            der: message.der().to_vec(),
        });
    }
}
